//! Serial Bus Arbiter
//!
//! A shared half-duplex link (RS-485, Modbus RTU/TCP gateway) can only carry
//! one transaction at a time. `SerialBus` queues requests by priority and
//! runs them one after another on a single worker thread.
//!
//! ```text
//! do_action ─► PriorityQueue ─► worker thread ─► open / address / action / close
//!                                     │
//!                                     └─► result handler (own thread)
//! ```

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, error, info};

use crate::client::BusClient;
use crate::error::{BusError, BusResult};
use crate::queue::PriorityQueue;
use crate::task::{Action, Task};
use crate::worker::BusWorker;

/// Largest accepted retry count, for both open and action attempts
pub const MAX_TRIES: u8 = 10;

// ─────────────────────────────────────────────────────────────────────────────
// Settings
// ─────────────────────────────────────────────────────────────────────────────

/// Construction parameters for a bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusSettings {
    /// Attempts to open the link before a task fails
    pub tries: u8,
    /// Tasks each priority lane can hold
    pub capacity: usize,
    /// Number of priority levels; 1 is served first
    pub priorities: usize,
    /// Worker sleep while the queue is empty
    pub idle_interval: Duration,
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            tries: 3,
            capacity: 100,
            priorities: 5,
            idle_interval: Duration::from_millis(10),
        }
    }
}

impl BusSettings {
    pub fn tries(mut self, tries: u8) -> Self {
        self.tries = tries;
        self
    }

    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn priorities(mut self, priorities: usize) -> Self {
        self.priorities = priorities;
        self
    }

    pub fn idle_interval(mut self, idle_interval: Duration) -> Self {
        self.idle_interval = idle_interval;
        self
    }

    fn validate(&self) -> BusResult<()> {
        if !(1..=MAX_TRIES).contains(&self.tries) {
            return Err(BusError::Config(format!(
                "tries {} must be between 1 and {MAX_TRIES}",
                self.tries
            )));
        }
        if self.idle_interval.is_zero() {
            return Err(BusError::Config("idle interval must be positive".to_string()));
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Bus State
// ─────────────────────────────────────────────────────────────────────────────

/// Lifecycle of a bus
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BusState {
    /// Built, worker not started; tasks may already be queued
    Created = 0,
    /// Worker is draining the queue
    Running = 1,
    /// Shutdown requested, waiting for the task in flight
    Stopping = 2,
    /// Worker has exited
    Stopped = 3,
}

impl BusState {
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Created,
            1 => Self::Running,
            2 => Self::Stopping,
            _ => Self::Stopped,
        }
    }
}

impl fmt::Display for BusState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusState::Created => write!(f, "created"),
            BusState::Running => write!(f, "running"),
            BusState::Stopping => write!(f, "stopping"),
            BusState::Stopped => write!(f, "stopped"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Serial Bus
// ─────────────────────────────────────────────────────────────────────────────

type Connector<C> = Box<dyn FnMut() -> BusResult<C> + Send>;

/// Where the worker's client comes from
enum ClientSource<C> {
    /// Supplied up front
    Ready(C),
    /// Built when the bus starts
    Connect(Connector<C>),
}

/// Priority-queued, single-worker arbiter over one hardware client
pub struct SerialBus<C: BusClient> {
    name: String,
    settings: BusSettings,
    queue: Arc<PriorityQueue<Task<C>>>,
    state: AtomicU8,
    done: Arc<AtomicBool>,
    source: Mutex<Option<ClientSource<C>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<C: BusClient> SerialBus<C> {
    /// Create a bus whose client is built by `connect` on `start`
    pub fn new<F>(name: impl Into<String>, settings: BusSettings, connect: F) -> BusResult<Self>
    where
        F: FnMut() -> BusResult<C> + Send + 'static,
    {
        Self::build(name.into(), settings, ClientSource::Connect(Box::new(connect)))
    }

    /// Create a bus around an existing client
    pub fn with_client(name: impl Into<String>, settings: BusSettings, client: C) -> BusResult<Self> {
        Self::build(name.into(), settings, ClientSource::Ready(client))
    }

    fn build(name: String, settings: BusSettings, source: ClientSource<C>) -> BusResult<Self> {
        settings.validate()?;
        let queue = PriorityQueue::new(settings.capacity, settings.priorities)?;

        Ok(Self {
            name,
            settings,
            queue: Arc::new(queue),
            state: AtomicU8::new(BusState::Created as u8),
            done: Arc::new(AtomicBool::new(false)),
            source: Mutex::new(Some(source)),
            worker: Mutex::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> &BusSettings {
        &self.settings
    }

    pub fn state(&self) -> BusState {
        BusState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Tasks waiting in the queue
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Queue `action` for the device at `device_addr`
    ///
    /// The action runs on the worker thread with exclusive use of the
    /// client, up to `tries` times until it succeeds. `handler` receives the
    /// final result on a separate thread. Only validation and queue errors
    /// are returned here; everything else goes to `handler`.
    pub fn do_action<T, A, H>(
        &self,
        device_addr: u8,
        action: A,
        tries: u8,
        handler: H,
        priority: usize,
    ) -> BusResult<()>
    where
        T: Send + 'static,
        A: FnMut(&mut C) -> BusResult<T> + Send + 'static,
        H: FnOnce(BusResult<T>) + Send + 'static,
    {
        if !(1..=MAX_TRIES).contains(&tries) {
            return Err(BusError::InvalidTries(tries));
        }

        let task = Task {
            unit: device_addr,
            tries,
            job: Box::new(Action::new(action, handler)),
        };
        self.queue.push(task, priority)?;

        debug!(bus = %self.name, unit = device_addr, priority, "Task queued");
        Ok(())
    }

    /// Build the client if needed and spawn the worker
    pub fn start(&self) -> BusResult<()> {
        let mut worker = self.worker.lock();
        if worker.is_some() || self.state() != BusState::Created {
            return Err(BusError::AlreadyStarted);
        }

        let client = {
            let mut source = self.source.lock();
            match source.take() {
                Some(ClientSource::Ready(client)) => client,
                Some(ClientSource::Connect(mut connect)) => match connect() {
                    Ok(client) => client,
                    Err(e) => {
                        // Keep the connector so start can be retried
                        *source = Some(ClientSource::Connect(connect));
                        return Err(e);
                    }
                },
                None => return Err(BusError::AlreadyStarted),
            }
        };

        let bus_worker = BusWorker::new(
            self.name.clone(),
            client,
            Arc::clone(&self.queue),
            Arc::clone(&self.done),
            self.settings.tries,
            self.settings.idle_interval,
        );

        let handle = thread::Builder::new()
            .name(format!("bus-{}", self.name))
            .spawn(move || bus_worker.run())
            .map_err(|e| {
                error!(bus = %self.name, error = %e, "Failed to spawn bus worker");
                BusError::WorkerSpawn(e.to_string())
            })?;

        *worker = Some(handle);
        self.state.store(BusState::Running as u8, Ordering::SeqCst);
        info!(bus = %self.name, pending = self.queue.len(), "Bus started");
        Ok(())
    }

    /// Stop the worker and wait for it to exit
    ///
    /// A task already executing finishes first. Tasks still queued are
    /// never run and their handlers never called. Result handlers already
    /// spawned may still be running when this returns.
    pub fn shutdown(&self) {
        let Some(handle) = self.worker.lock().take() else {
            return;
        };

        self.state.store(BusState::Stopping as u8, Ordering::SeqCst);
        self.done.store(true, Ordering::Release);

        if handle.join().is_err() {
            error!(bus = %self.name, "Bus worker panicked");
        }

        self.state.store(BusState::Stopped as u8, Ordering::SeqCst);
        info!(bus = %self.name, dropped = self.queue.len(), "Bus stopped");
    }
}

impl<C: BusClient> fmt::Debug for SerialBus<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerialBus")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("pending", &self.pending())
            .finish()
    }
}

impl<C: BusClient> Drop for SerialBus<C> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::QueueError;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;

    const WAIT: Duration = Duration::from_secs(5);

    /// Shared view into a mock client, kept by the test after the client
    /// moves into the worker
    #[derive(Clone, Default)]
    struct Recorder {
        log: Arc<Mutex<Vec<String>>>,
        open_failures: Arc<AtomicUsize>,
        open_times_out: Arc<AtomicBool>,
        fail_close: Arc<AtomicBool>,
        fail_address: Arc<AtomicBool>,
        busy: Arc<AtomicBool>,
        overlaps: Arc<AtomicUsize>,
    }

    impl Recorder {
        fn record(&self, entry: impl Into<String>) {
            self.log.lock().push(entry.into());
        }

        fn entries(&self) -> Vec<String> {
            self.log.lock().clone()
        }
    }

    struct MockClient {
        recorder: Recorder,
    }

    impl BusClient for MockClient {
        fn open(&mut self) -> BusResult<()> {
            if self.recorder.open_times_out.load(Ordering::SeqCst) {
                self.recorder.record("open timed out");
                return Err(BusError::Timeout(Duration::from_millis(500)));
            }
            let failures = &self.recorder.open_failures;
            if failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                self.recorder.record("open failed");
                return Err(BusError::Connection("port busy".to_string()));
            }
            if self.recorder.busy.swap(true, Ordering::SeqCst) {
                self.recorder.overlaps.fetch_add(1, Ordering::SeqCst);
            }
            self.recorder.record("open");
            Ok(())
        }

        fn close(&mut self) -> BusResult<()> {
            self.recorder.record("close");
            self.recorder.busy.store(false, Ordering::SeqCst);
            if self.recorder.fail_close.load(Ordering::SeqCst) {
                return Err(BusError::Timeout(Duration::from_millis(50)));
            }
            Ok(())
        }

        fn set_unit_address(&mut self, unit: u8) -> BusResult<()> {
            self.recorder.record(format!("unit {unit}"));
            if self.recorder.fail_address.load(Ordering::SeqCst) {
                return Err(BusError::Other("no such unit".to_string()));
            }
            Ok(())
        }
    }

    fn settings() -> BusSettings {
        BusSettings::default().idle_interval(Duration::from_millis(1))
    }

    fn mock_bus(settings: BusSettings) -> (SerialBus<MockClient>, Recorder) {
        let recorder = Recorder::default();
        let client = MockClient {
            recorder: recorder.clone(),
        };
        (SerialBus::with_client("test", settings, client).unwrap(), recorder)
    }

    fn read(unit: u8) -> impl FnMut(&mut MockClient) -> BusResult<u8> + Send + 'static {
        move |client: &mut MockClient| {
            client.recorder.record(format!("action {unit}"));
            Ok(unit)
        }
    }

    fn reply<T: Send + 'static>() -> (impl FnOnce(BusResult<T>) + Send + 'static, mpsc::Receiver<BusResult<T>>) {
        let (tx, rx) = mpsc::channel();
        (
            move |result| {
                let _ = tx.send(result);
            },
            rx,
        )
    }

    #[test]
    fn test_open_retries_until_success() {
        let (bus, recorder) = mock_bus(settings().tries(3));
        recorder.open_failures.store(2, Ordering::SeqCst);
        bus.start().unwrap();

        let (handler, rx) = reply();
        bus.do_action(1, read(1), 1, handler, 1).unwrap();

        assert_eq!(rx.recv_timeout(WAIT).unwrap(), Ok(1));
        assert_eq!(
            recorder.entries(),
            vec!["open failed", "open failed", "open", "unit 1", "action 1", "close"]
        );
    }

    #[test]
    fn test_open_gives_up_after_bus_tries() {
        let (bus, recorder) = mock_bus(settings().tries(2));
        recorder.open_failures.store(3, Ordering::SeqCst);
        bus.start().unwrap();

        let (handler, rx) = reply();
        bus.do_action(1, read(1), 5, handler, 1).unwrap();

        assert_eq!(
            rx.recv_timeout(WAIT).unwrap(),
            Err(BusError::Connection("port busy".to_string()))
        );
        // Neither the action nor close runs without an open link
        assert_eq!(recorder.entries(), vec!["open failed", "open failed"]);
    }

    #[test]
    fn test_open_failure_is_a_connection_error() {
        let (bus, recorder) = mock_bus(settings().tries(2));
        recorder.open_times_out.store(true, Ordering::SeqCst);
        bus.start().unwrap();

        let (handler, rx) = reply();
        bus.do_action(1, read(1), 1, handler, 1).unwrap();

        assert_eq!(
            rx.recv_timeout(WAIT).unwrap(),
            Err(BusError::Connection(
                "open failed: Request timed out after 500ms".to_string()
            ))
        );
        assert_eq!(recorder.entries(), vec!["open timed out", "open timed out"]);
    }

    #[test]
    fn test_slow_handler_does_not_stall_worker() {
        let (bus, recorder) = mock_bus(settings());
        bus.start().unwrap();

        let (release_tx, release_rx) = mpsc::channel::<()>();
        let (first_tx, first_rx) = mpsc::channel();
        let blocking = move |result: BusResult<u8>| {
            let _ = release_rx.recv_timeout(WAIT);
            let _ = first_tx.send(result);
        };
        bus.do_action(1, read(1), 1, blocking, 1).unwrap();

        let (second, second_rx) = reply();
        bus.do_action(2, read(2), 1, second, 1).unwrap();

        // The second transaction completes while the first handler is blocked
        assert_eq!(second_rx.recv_timeout(WAIT).unwrap(), Ok(2));
        assert!(first_rx.try_recv().is_err());
        assert!(recorder.entries().contains(&"action 2".to_string()));

        release_tx.send(()).unwrap();
        assert_eq!(first_rx.recv_timeout(WAIT).unwrap(), Ok(1));
    }

    #[test]
    fn test_concurrent_actions_never_overlap() {
        let (bus, recorder) = mock_bus(settings());
        let bus = Arc::new(bus);
        bus.start().unwrap();

        let (tx, rx) = mpsc::channel();
        let callers: Vec<_> = (1..=8u8)
            .map(|unit| {
                let bus = Arc::clone(&bus);
                let tx = tx.clone();
                thread::spawn(move || {
                    let action = move |client: &mut MockClient| {
                        client.recorder.record(format!("action {unit}"));
                        thread::sleep(Duration::from_millis(2));
                        Ok(unit)
                    };
                    bus.do_action(unit, action, 1, move |r| tx.send(r).unwrap(), 1)
                        .unwrap();
                })
            })
            .collect();
        for caller in callers {
            caller.join().unwrap();
        }

        let mut units: Vec<u8> = (0..8).map(|_| rx.recv_timeout(WAIT).unwrap().unwrap()).collect();
        units.sort_unstable();
        assert_eq!(units, (1..=8).collect::<Vec<_>>());
        assert_eq!(recorder.overlaps.load(Ordering::SeqCst), 0);

        // Every transaction is open, unit N, action N, close with nothing in between
        let entries = recorder.entries();
        assert_eq!(entries.len(), 32);
        for chunk in entries.chunks(4) {
            let unit = chunk[1].trim_start_matches("unit ");
            assert_eq!(chunk[0], "open");
            assert_eq!(chunk[2], format!("action {unit}"));
            assert_eq!(chunk[3], "close");
        }
    }

    #[test]
    fn test_action_retries() {
        let (bus, _recorder) = mock_bus(settings());
        bus.start().unwrap();

        let attempts = Arc::new(AtomicUsize::new(0));
        let flaky = |attempts: Arc<AtomicUsize>| {
            move |_: &mut MockClient| {
                if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(BusError::Timeout(Duration::from_millis(50)))
                } else {
                    Ok("value")
                }
            }
        };

        let (handler, rx) = reply();
        bus.do_action(3, flaky(Arc::clone(&attempts)), 3, handler, 1).unwrap();
        assert_eq!(rx.recv_timeout(WAIT).unwrap(), Ok("value"));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);

        attempts.store(0, Ordering::SeqCst);
        let (handler, rx) = reply();
        bus.do_action(3, flaky(Arc::clone(&attempts)), 2, handler, 1).unwrap();
        let err = rx.recv_timeout(WAIT).unwrap().unwrap_err();
        assert_eq!(
            err,
            BusError::Action {
                attempts: 2,
                source: Box::new(BusError::Timeout(Duration::from_millis(50))),
            }
        );
        assert_eq!(err.root(), &BusError::Timeout(Duration::from_millis(50)));
    }

    #[test]
    fn test_close_error_is_promoted_only_after_success() {
        let (bus, recorder) = mock_bus(settings());
        recorder.fail_close.store(true, Ordering::SeqCst);
        bus.start().unwrap();

        let (handler, rx) = reply();
        bus.do_action(1, read(1), 1, handler, 1).unwrap();
        assert_eq!(
            rx.recv_timeout(WAIT).unwrap(),
            Err(BusError::Connection(
                "close failed: Request timed out after 50ms".to_string()
            ))
        );

        let (handler, rx) = reply::<u8>();
        let failing = |_: &mut MockClient| Err(BusError::Exception("IllegalFunction".to_string()));
        bus.do_action(1, failing, 1, handler, 1).unwrap();
        let err = rx.recv_timeout(WAIT).unwrap().unwrap_err();
        assert_eq!(err.root(), &BusError::Exception("IllegalFunction".to_string()));
    }

    #[test]
    fn test_address_failure_skips_action() {
        let (bus, recorder) = mock_bus(settings());
        recorder.fail_address.store(true, Ordering::SeqCst);
        bus.start().unwrap();

        let (handler, rx) = reply();
        bus.do_action(5, read(5), 3, handler, 1).unwrap();

        assert_eq!(
            rx.recv_timeout(WAIT).unwrap(),
            Err(BusError::Address {
                unit: 5,
                reason: "no such unit".to_string()
            })
        );
        assert_eq!(recorder.entries(), vec!["open", "unit 5", "close"]);
    }

    #[test]
    fn test_do_action_validation() {
        let (bus, _recorder) = mock_bus(settings().capacity(10).priorities(3));

        for tries in [0, 11] {
            let (handler, _rx) = reply();
            assert_eq!(
                bus.do_action(1, read(1), tries, handler, 1),
                Err(BusError::InvalidTries(tries))
            );
        }

        let (handler, _rx) = reply();
        assert_eq!(
            bus.do_action(1, read(1), 1, handler, 4),
            Err(BusError::Queue(QueueError::InvalidPriority { priority: 4, max: 3 }))
        );

        // Not started, so nothing drains the lane
        for _ in 0..10 {
            let (handler, _rx) = reply();
            bus.do_action(1, read(1), 1, handler, 2).unwrap();
        }
        let (handler, _rx) = reply();
        assert_eq!(
            bus.do_action(1, read(1), 1, handler, 2),
            Err(BusError::Queue(QueueError::Full(2)))
        );
        assert_eq!(bus.pending(), 10);
    }

    #[test]
    fn test_settings_are_validated() {
        let build = |settings| SerialBus::new("bad", settings, || -> BusResult<MockClient> { unreachable!() });

        assert!(matches!(build(settings().tries(0)), Err(BusError::Config(_))));
        assert!(matches!(build(settings().tries(11)), Err(BusError::Config(_))));
        assert!(matches!(
            build(settings().capacity(9)),
            Err(BusError::Queue(QueueError::Config { .. }))
        ));
        assert!(matches!(
            build(settings().priorities(51)),
            Err(BusError::Queue(QueueError::Config { .. }))
        ));
    }

    #[test]
    fn test_priority_order() {
        let (bus, recorder) = mock_bus(settings());
        let (tx, rx) = mpsc::channel();

        for (unit, priority) in [(30, 3), (31, 3), (10, 1), (11, 1), (20, 2)] {
            let tx = tx.clone();
            bus.do_action(unit, read(unit), 1, move |r| tx.send(r).unwrap(), priority)
                .unwrap();
        }
        bus.start().unwrap();
        for _ in 0..5 {
            rx.recv_timeout(WAIT).unwrap().unwrap();
        }

        let actions: Vec<_> = recorder
            .entries()
            .into_iter()
            .filter(|e| e.starts_with("action"))
            .collect();
        assert_eq!(
            actions,
            vec!["action 10", "action 11", "action 20", "action 30", "action 31"]
        );
    }

    #[test]
    fn test_shutdown_finishes_task_in_flight() {
        let (bus, _recorder) = mock_bus(settings());
        let (started_tx, started_rx) = mpsc::channel();

        let slow = move |_: &mut MockClient| {
            let _ = started_tx.send(());
            thread::sleep(Duration::from_millis(100));
            Ok(1u8)
        };
        let (first, first_rx) = reply();
        let (second, second_rx) = reply();
        bus.do_action(1, slow, 1, first, 1).unwrap();
        bus.do_action(2, read(2), 1, second, 1).unwrap();

        bus.start().unwrap();
        assert_eq!(bus.state(), BusState::Running);
        started_rx.recv_timeout(WAIT).unwrap();

        bus.shutdown();
        assert_eq!(bus.state(), BusState::Stopped);
        assert_eq!(first_rx.recv_timeout(WAIT).unwrap(), Ok(1));
        assert_eq!(bus.pending(), 1);
        assert!(second_rx.recv_timeout(Duration::from_millis(50)).is_err());

        // Idempotent
        bus.shutdown();
        assert_eq!(bus.start(), Err(BusError::AlreadyStarted));
    }

    #[test]
    fn test_start_twice() {
        let (bus, _recorder) = mock_bus(settings());
        bus.start().unwrap();
        assert_eq!(bus.start(), Err(BusError::AlreadyStarted));
    }

    #[test]
    fn test_connector_failure_can_be_retried() {
        let recorder = Recorder::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let connect = {
            let recorder = recorder.clone();
            let calls = Arc::clone(&calls);
            move || {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(BusError::Connection("/dev/ttyUSB9: not found".to_string()))
                } else {
                    Ok(MockClient {
                        recorder: recorder.clone(),
                    })
                }
            }
        };
        let bus = SerialBus::new("lazy", settings(), connect).unwrap();

        assert_eq!(
            bus.start(),
            Err(BusError::Connection("/dev/ttyUSB9: not found".to_string()))
        );
        assert_eq!(bus.state(), BusState::Created);

        bus.start().unwrap();
        let (handler, rx) = reply();
        bus.do_action(4, read(4), 1, handler, 1).unwrap();
        assert_eq!(rx.recv_timeout(WAIT).unwrap(), Ok(4));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_panicking_action_is_isolated() {
        let (bus, recorder) = mock_bus(settings());
        bus.start().unwrap();

        let (handler, rx) = reply::<u8>();
        bus.do_action(1, |_: &mut MockClient| panic!("boom"), 1, handler, 1)
            .unwrap();
        let err = rx.recv_timeout(WAIT).unwrap().unwrap_err();
        assert_eq!(err.root(), &BusError::Other("Action panicked: boom".to_string()));

        let (handler, rx) = reply();
        bus.do_action(2, read(2), 1, handler, 1).unwrap();
        assert_eq!(rx.recv_timeout(WAIT).unwrap(), Ok(2));
        assert_eq!(recorder.entries().iter().filter(|e| *e == "close").count(), 2);
    }

    #[test]
    fn test_drop_stops_worker() {
        let (bus, recorder) = mock_bus(settings());
        bus.start().unwrap();
        let (handler, rx) = reply();
        bus.do_action(1, read(1), 1, handler, 1).unwrap();
        rx.recv_timeout(WAIT).unwrap().unwrap();

        drop(bus);
        assert_eq!(recorder.entries().last().map(String::as_str), Some("close"));
    }
}
