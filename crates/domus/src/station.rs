//! Station
//!
//! Wires the controller together: event registry, subscription index,
//! loopback transport and router on the dispatch side; one arbitrated bus
//! per configured link on the hardware side; pollers and write handlers
//! for every point in between.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use domus_bus::{BusError, BusResult, BusState, LoggingClient, ModbusClient, RegisterClient, SerialBus};
use domus_dispatch::{
    ERROR_EVENT, EventNames, Filter, Message, MessageRouter, SubscriptionError, Subscribers,
    TargetType, Transport, TransportError,
};

use crate::config::{BusConfig, PointConfig, Settings};
use crate::points::{self, ITEM_ERROR, ITEM_VALUE, ITEM_WRITE, ITEM_WRITTEN, ItemPublisher};
use crate::transport::{Inbox, LoopbackTransport};

/// Events the station itself publishes
pub const BUILTIN_EVENTS: [&str; 4] = [ITEM_VALUE, ITEM_ERROR, ITEM_WRITTEN, ERROR_EVENT];

/// Error type for station setup
#[derive(Debug, thiserror::Error)]
pub enum StationError {
    #[error("Bus {bus}: {source}")]
    Bus { bus: String, source: BusError },

    #[error("Failed to subscribe: {0}")]
    Subscription(#[from] SubscriptionError),

    #[error("Station has already been started")]
    AlreadyStarted,
}

/// Station talking Modbus on every bus
pub type ModbusStation = Station<LoggingClient<ModbusClient>>;

/// A running controller
pub struct Station<C: RegisterClient> {
    settings: Settings,
    registry: Arc<EventNames>,
    subscribers: Arc<Subscribers>,
    transport: LoopbackTransport,
    router: Arc<MessageRouter>,
    buses: DashMap<String, Arc<SerialBus<C>>>,
    points: Vec<Arc<PointConfig>>,
    inbox: Option<Inbox>,
    dispatch: Option<JoinHandle<()>>,
    pollers: Vec<JoinHandle<()>>,
}

impl ModbusStation {
    /// Build a station whose buses open real Modbus links on start
    pub fn modbus(settings: Settings) -> Result<Self, StationError> {
        Self::new(settings, |bus: &BusConfig| {
            let client = ModbusClient::new(bus.transport.clone(), bus.timeout())?;
            Ok(LoggingClient::new(bus.name.clone(), client))
        })
    }
}

impl<C: RegisterClient> Station<C> {
    /// Build the station; `connect` creates each bus client when the bus starts
    pub fn new<F>(settings: Settings, connect: F) -> Result<Self, StationError>
    where
        F: Fn(&BusConfig) -> BusResult<C> + Clone + Send + 'static,
    {
        let registry = Arc::new(EventNames::from_iter(BUILTIN_EVENTS));
        for name in &settings.events {
            if !registry.register(name.as_str()) {
                debug!(event = %name, "Event already registered");
            }
        }
        let subscribers = Arc::new(Subscribers::with_capacity(
            registry.clone(),
            settings.dispatch.subscriber_capacity,
        ));
        let (transport, inbox) = LoopbackTransport::new();
        let router = Arc::new(MessageRouter::new(
            settings.dispatch.publisher.clone(),
            Arc::clone(&subscribers),
            Arc::new(transport.clone()),
        ));

        let buses = DashMap::new();
        for config in &settings.buses {
            let bus_config = config.clone();
            let connect = connect.clone();
            let bus = SerialBus::new(config.name.clone(), config.settings(), move || connect(&bus_config))
                .map_err(|source| StationError::Bus {
                    bus: config.name.clone(),
                    source,
                })?;
            buses.insert(config.name.clone(), Arc::new(bus));
        }

        let station = Self {
            points: settings.points.iter().cloned().map(Arc::new).collect(),
            settings,
            registry,
            subscribers,
            transport,
            router,
            buses,
            inbox: Some(inbox),
            dispatch: None,
            pollers: Vec::new(),
        };
        station.subscribe()?;
        Ok(station)
    }

    fn subscribe(&self) -> Result<(), StationError> {
        self.subscribers.add_handler(Filter::any(), |msg: &Message| {
            debug!(
                publisher = %msg.publisher(),
                topic = %msg.topic(),
                kind = %msg.msg_type(),
                name = %msg.name(),
                target = %msg.target_type(),
                target_id = msg.target_id(),
                "Message"
            );
            Ok(())
        })?;

        for point in self.points.iter().filter(|point| point.writable) {
            let Some(bus) = self.bus(&point.bus) else {
                continue;
            };
            let filter = Filter::any()
                .commands()
                .name(ITEM_WRITE)
                .target(TargetType::Item, point.id);
            let id = self
                .subscribers
                .add_handler(filter, points::write_handler(Arc::clone(point), bus, self.items()))?;
            debug!(point = point.id, subscription = %id, "Write handler registered");
        }

        Ok(())
    }

    fn items(&self) -> ItemPublisher {
        ItemPublisher::new(
            self.settings.dispatch.publisher.clone(),
            Arc::new(self.transport.clone()),
        )
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn registry(&self) -> &Arc<EventNames> {
        &self.registry
    }

    pub fn subscribers(&self) -> &Arc<Subscribers> {
        &self.subscribers
    }

    pub fn router(&self) -> &Arc<MessageRouter> {
        &self.router
    }

    pub fn bus(&self, name: &str) -> Option<Arc<SerialBus<C>>> {
        self.buses.get(name).map(|bus| Arc::clone(bus.value()))
    }

    /// Publish a message into the station, as a remote peer would
    pub fn publish(&self, msg: Message) -> Result<(), TransportError> {
        self.transport.send(msg)
    }

    /// Start buses, the dispatch loop and every poller
    ///
    /// Must be called from within a tokio runtime. If a bus fails to start,
    /// the buses already running stay up and `start` may be called again.
    pub fn start(&mut self) -> Result<(), StationError> {
        if self.inbox.is_none() {
            return Err(StationError::AlreadyStarted);
        }

        for entry in self.buses.iter() {
            if entry.value().state() != BusState::Created {
                continue;
            }
            entry.value().start().map_err(|source| StationError::Bus {
                bus: entry.key().clone(),
                source,
            })?;
        }

        let inbox = self.inbox.take().ok_or(StationError::AlreadyStarted)?;
        self.dispatch = Some(tokio::spawn(inbox.run(Arc::clone(&self.router))));

        for point in &self.points {
            let Some(bus) = self.bus(&point.bus) else {
                warn!(point = point.id, bus = %point.bus, "Point has no bus");
                continue;
            };
            self.pollers
                .push(tokio::spawn(points::poll(Arc::clone(point), bus, self.items())));
        }

        info!(
            buses = self.buses.len(),
            points = self.points.len(),
            subscriptions = self.subscribers.len(),
            "Station started"
        );
        Ok(())
    }

    /// Stop pollers, drain every bus worker, then stop dispatching
    pub async fn shutdown(&mut self) {
        for poller in self.pollers.drain(..) {
            poller.abort();
        }

        let buses: Vec<_> = self.buses.iter().map(|entry| Arc::clone(entry.value())).collect();
        for bus in buses {
            let name = bus.name().to_string();
            if let Err(e) = tokio::task::spawn_blocking(move || bus.shutdown()).await {
                warn!(bus = %name, error = %e, "Bus shutdown failed");
            }
        }

        if let Some(dispatch) = self.dispatch.take() {
            dispatch.abort();
        }

        info!("Station stopped");
    }
}
