//! Bus worker thread
//!
//! The only thread that touches the hardware client. It drains the priority
//! queue one task at a time, so transactions on the wire never overlap.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::client::BusClient;
use crate::error::{BusError, BusResult};
use crate::queue::PriorityQueue;
use crate::task::{Job, Task};

/// Blocking worker owning the bus client
pub(crate) struct BusWorker<C> {
    bus: String,
    client: C,
    queue: Arc<PriorityQueue<Task<C>>>,
    done: Arc<AtomicBool>,
    /// Open attempts per task
    tries: u8,
    /// Sleep between polls of an empty queue
    idle: Duration,
}

impl<C: BusClient> BusWorker<C> {
    pub(crate) fn new(
        bus: String,
        client: C,
        queue: Arc<PriorityQueue<Task<C>>>,
        done: Arc<AtomicBool>,
        tries: u8,
        idle: Duration,
    ) -> Self {
        Self {
            bus,
            client,
            queue,
            done,
            tries,
            idle,
        }
    }

    /// Run until `done` is set; the task in flight always completes
    pub(crate) fn run(mut self) {
        info!(bus = %self.bus, "Bus worker started");

        while !self.done.load(Ordering::Acquire) {
            match self.queue.pop() {
                Some(task) => self.process(task),
                None => thread::sleep(self.idle),
            }
        }

        info!(bus = %self.bus, pending = self.queue.len(), "Bus worker stopped");
    }

    fn process(&mut self, task: Task<C>) {
        let Task { unit, tries, mut job } = task;
        let started = Instant::now();

        let outcome = self.execute(unit, tries, job.as_mut());
        match &outcome {
            Ok(()) => debug!(bus = %self.bus, unit, elapsed = ?started.elapsed(), "Task completed"),
            Err(e) => warn!(bus = %self.bus, unit, error = %e, "Task failed"),
        }

        self.deliver(job, outcome);
    }

    fn execute(&mut self, unit: u8, tries: u8, job: &mut dyn Job<C>) -> BusResult<()> {
        self.open()?;

        let result = self.transact(unit, tries, job);
        let closed = self.client.close().map_err(|e| link_error("close", e));

        match (result, closed) {
            (Err(e), closed) => {
                if let Err(close_err) = closed {
                    debug!(bus = %self.bus, error = %close_err, "Close failed after task error");
                }
                Err(e)
            }
            (Ok(()), closed) => closed,
        }
    }

    fn open(&mut self) -> BusResult<()> {
        let mut attempt = 1;
        loop {
            match self.client.open() {
                Ok(()) => return Ok(()),
                Err(e) if attempt < self.tries => {
                    debug!(bus = %self.bus, attempt, error = %e, "Open failed, retrying");
                    attempt += 1;
                }
                Err(e) => return Err(link_error("open", e)),
            }
        }
    }

    fn transact(&mut self, unit: u8, tries: u8, job: &mut dyn Job<C>) -> BusResult<()> {
        self.client
            .set_unit_address(unit)
            .map_err(|e| BusError::Address {
                unit,
                reason: e.to_string(),
            })?;

        let mut attempt = 1;
        loop {
            let result = panic::catch_unwind(AssertUnwindSafe(|| job.attempt(&mut self.client)))
                .unwrap_or_else(|payload| Err(BusError::Other(panic_message(payload.as_ref()))));

            match result {
                Ok(()) => return Ok(()),
                Err(e) if attempt < tries => {
                    debug!(bus = %self.bus, unit, attempt, error = %e, "Action failed, retrying");
                    attempt += 1;
                }
                Err(e) => {
                    return Err(BusError::Action {
                        attempts: attempt,
                        source: Box::new(e),
                    });
                }
            }
        }
    }

    /// Run the result handler on its own thread
    fn deliver(&self, job: Box<dyn Job<C>>, outcome: BusResult<()>) {
        let spawned = thread::Builder::new()
            .name(format!("bus-{}-result", self.bus))
            .spawn(move || job.finish(outcome));

        if let Err(e) = spawned {
            error!(bus = %self.bus, error = %e, "Failed to spawn result handler; result dropped");
        }
    }
}

/// Link failures always surface as connection errors
fn link_error(op: &str, e: BusError) -> BusError {
    match e {
        BusError::Connection(_) => e,
        other => BusError::Connection(format!("{op} failed: {other}")),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("Action panicked: {detail}")
}
