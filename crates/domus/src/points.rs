//! Point polling and writes
//!
//! Each configured point is read on its own interval through the bus
//! arbiter. Results come back as `item.value` / `item.error` events aimed at
//! `(item, point id)`; `item.write` commands on writable points queue a
//! write at the highest priority.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, trace, warn};

use domus_bus::{BusError, BusResult, RegisterClient, SerialBus};
use domus_dispatch::{
    HandlerError, HandlerResult, Message, Payload, TargetType, Transport, Value,
};

use crate::config::{PointConfig, RegisterKind};

/// Event carrying a fresh reading
pub const ITEM_VALUE: &str = "item.value";

/// Event carrying a failed read or write
pub const ITEM_ERROR: &str = "item.error";

/// Event confirming a completed write
pub const ITEM_WRITTEN: &str = "item.written";

/// Command requesting a write; payload key `value`
pub const ITEM_WRITE: &str = "item.write";

/// Queue priority used for writes
pub const WRITE_PRIORITY: usize = 1;

// ─────────────────────────────────────────────────────────────────────────────
// Readings
// ─────────────────────────────────────────────────────────────────────────────

/// Raw data read from a point
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reading {
    Bits(Vec<bool>),
    Words(Vec<u16>),
}

impl Reading {
    fn value_at(&self, index: usize) -> Option<Value> {
        match self {
            Reading::Bits(bits) => bits.get(index).map(|&b| Value::Bool(b)),
            Reading::Words(words) => words.get(index).map(|&w| Value::from(w)),
        }
    }

    fn len(&self) -> usize {
        match self {
            Reading::Bits(bits) => bits.len(),
            Reading::Words(words) => words.len(),
        }
    }

    /// `value` holds the first element; multi-element reads also carry
    /// `values`, keyed by offset from the point address
    pub fn into_payload(self) -> Payload {
        let mut payload = Payload::new();
        if let Some(first) = self.value_at(0) {
            payload.insert("value".to_string(), first);
        }
        if self.len() > 1 {
            let values: Payload = (0..self.len())
                .filter_map(|i| self.value_at(i).map(|v| (i.to_string(), v)))
                .collect();
            payload.insert("values".to_string(), Value::Map(values));
        }
        payload
    }
}

/// Build the bus action reading `point`
pub fn read<C: RegisterClient>(
    point: &PointConfig,
) -> impl FnMut(&mut C) -> BusResult<Reading> + Send + 'static {
    let (register, address, count) = (point.register, point.address, point.count);
    move |client: &mut C| match register {
        RegisterKind::Holding => client.read_holding_registers(address, count).map(Reading::Words),
        RegisterKind::Input => client.read_input_registers(address, count).map(Reading::Words),
        RegisterKind::Coil => client.read_coils(address, count).map(Reading::Bits),
        RegisterKind::Discrete => client.read_discrete_inputs(address, count).map(Reading::Bits),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Writes
// ─────────────────────────────────────────────────────────────────────────────

/// A value ready to be written to a single register or coil
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteValue {
    Coil(bool),
    Register(u16),
}

impl WriteValue {
    /// Take the `value` field of a write command, checked against the register kind
    pub fn from_message(register: RegisterKind, msg: &Message) -> Result<Self, HandlerError> {
        match register {
            RegisterKind::Coil => Ok(WriteValue::Coil(msg.get_bool("value")?)),
            RegisterKind::Holding => {
                let value = msg.get_int("value")?;
                u16::try_from(value).map(WriteValue::Register).map_err(|_| {
                    HandlerError::new(format!("value {value} does not fit a holding register"))
                })
            }
            RegisterKind::Input | RegisterKind::Discrete => {
                Err(HandlerError::new(format!("{register:?} registers are read-only")))
            }
        }
    }
}

impl From<WriteValue> for Value {
    fn from(value: WriteValue) -> Self {
        match value {
            WriteValue::Coil(b) => Value::Bool(b),
            WriteValue::Register(w) => Value::from(w),
        }
    }
}

/// Build the bus action writing `value` at `address`
pub fn write<C: RegisterClient>(
    address: u16,
    value: WriteValue,
) -> impl FnMut(&mut C) -> BusResult<WriteValue> + Send + 'static {
    move |client: &mut C| {
        match value {
            WriteValue::Coil(b) => client.write_single_coil(address, b)?,
            WriteValue::Register(w) => client.write_single_register(address, w)?,
        }
        Ok(value)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Item events
// ─────────────────────────────────────────────────────────────────────────────

/// Publishes point results as item events
#[derive(Clone)]
pub struct ItemPublisher {
    publisher: String,
    transport: Arc<dyn Transport>,
}

impl ItemPublisher {
    pub fn new(publisher: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        Self {
            publisher: publisher.into(),
            transport,
        }
    }

    fn message(&self, name: &str, point: &PointConfig) -> Message {
        Message::event(self.publisher.as_str(), name)
            .with_topic(format!("item/{}", point.id))
            .with_target(TargetType::Item, point.id)
            .with("point", point.name.as_str())
    }

    pub fn value(&self, point: &PointConfig, reading: Reading) {
        let mut msg = self.message(ITEM_VALUE, point);
        for (key, value) in reading.into_payload() {
            msg = msg.with(key, value);
        }
        self.publish(msg);
    }

    pub fn written(&self, point: &PointConfig, value: WriteValue) {
        self.publish(self.message(ITEM_WRITTEN, point).with("value", value));
    }

    pub fn error(&self, point: &PointConfig, error: &BusError) {
        self.publish(self.message(ITEM_ERROR, point).with("error", error.to_string()));
    }

    fn publish(&self, msg: Message) {
        if let Err(e) = self.transport.send(msg) {
            warn!(error = %e, "Failed to publish item event");
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Polling
// ─────────────────────────────────────────────────────────────────────────────

/// Read `point` every poll interval, forever
///
/// A tick is skipped while the previous read is still queued or running, so
/// a slow bus does not pile up reads of the same point.
pub async fn poll<C: RegisterClient>(
    point: Arc<PointConfig>,
    bus: Arc<SerialBus<C>>,
    items: ItemPublisher,
) {
    let in_flight = Arc::new(AtomicBool::new(false));
    let mut ticker = time::interval(point.poll_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    debug!(point = point.id, bus = %bus.name(), interval = ?point.poll_interval(), "Polling point");

    loop {
        ticker.tick().await;

        if in_flight.swap(true, Ordering::AcqRel) {
            trace!(point = point.id, "Previous read still pending");
            continue;
        }

        let handler = {
            let point = Arc::clone(&point);
            let items = items.clone();
            let in_flight = Arc::clone(&in_flight);
            move |result: BusResult<Reading>| {
                in_flight.store(false, Ordering::Release);
                match result {
                    Ok(reading) => items.value(&point, reading),
                    Err(e) => items.error(&point, &e),
                }
            }
        };

        if let Err(e) = bus.do_action(point.unit, read(&point), point.tries, handler, point.priority) {
            in_flight.store(false, Ordering::Release);
            warn!(point = point.id, bus = %bus.name(), error = %e, "Read not queued");
        }
    }
}

/// Subscription handler turning `item.write` commands into bus writes
pub fn write_handler<C: RegisterClient>(
    point: Arc<PointConfig>,
    bus: Arc<SerialBus<C>>,
    items: ItemPublisher,
) -> impl Fn(&Message) -> HandlerResult + Send + Sync + 'static {
    move |msg: &Message| {
        let value = WriteValue::from_message(point.register, msg)?;

        let handler = {
            let point = Arc::clone(&point);
            let items = items.clone();
            move |result: BusResult<WriteValue>| match result {
                Ok(value) => items.written(&point, value),
                Err(e) => items.error(&point, &e),
            }
        };

        bus.do_action(
            point.unit,
            write(point.address, value),
            point.tries,
            handler,
            WRITE_PRIORITY,
        )
        .map_err(|e| HandlerError::new(e.to_string()))?;

        debug!(point = point.id, ?value, "Write queued");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domus_dispatch::ValueError;

    fn point(register: RegisterKind, count: u16) -> PointConfig {
        PointConfig {
            id: 42,
            name: "boiler.temperature".to_string(),
            bus: "rs485-1".to_string(),
            unit: 1,
            register,
            address: 0,
            count,
            poll_ms: 1000,
            priority: 3,
            tries: 2,
            writable: false,
        }
    }

    #[test]
    fn test_single_reading_payload() {
        let payload = Reading::Words(vec![215]).into_payload();
        assert_eq!(payload.len(), 1);
        assert_eq!(payload["value"], Value::Int(215));
    }

    #[test]
    fn test_block_reading_payload() {
        let payload = Reading::Bits(vec![true, false, true]).into_payload();
        assert_eq!(payload["value"], Value::Bool(true));

        let Value::Map(values) = &payload["values"] else {
            panic!("values should be a map");
        };
        assert_eq!(values.len(), 3);
        assert_eq!(values["1"], Value::Bool(false));
        assert_eq!(values["2"], Value::Bool(true));
    }

    #[test]
    fn test_write_value_from_command() {
        let cmd = |value: Value| Message::command("ui", ITEM_WRITE).with("value", value);

        assert_eq!(
            WriteValue::from_message(RegisterKind::Coil, &cmd(Value::Bool(true))),
            Ok(WriteValue::Coil(true))
        );
        assert_eq!(
            WriteValue::from_message(RegisterKind::Holding, &cmd(Value::Int(1200))),
            Ok(WriteValue::Register(1200))
        );
        assert!(WriteValue::from_message(RegisterKind::Holding, &cmd(Value::Int(70_000))).is_err());
        assert!(WriteValue::from_message(RegisterKind::Holding, &cmd(Value::Int(-1))).is_err());
        assert!(WriteValue::from_message(RegisterKind::Input, &cmd(Value::Int(1))).is_err());

        let missing = WriteValue::from_message(RegisterKind::Coil, &Message::command("ui", ITEM_WRITE));
        assert_eq!(missing, Err(HandlerError::from(ValueError::Missing("value".to_string()))));
    }

    #[test]
    fn test_item_events_target_the_point() {
        struct Capture(parking_lot::Mutex<Vec<Message>>);

        impl Transport for Capture {
            fn send(&self, msg: Message) -> Result<(), domus_dispatch::TransportError> {
                self.0.lock().push(msg);
                Ok(())
            }

            fn send_raw(
                &self,
                _: &str,
                _: domus_dispatch::QoS,
                _: bool,
                _: &[u8],
            ) -> Result<(), domus_dispatch::TransportError> {
                unreachable!()
            }
        }

        let capture = Arc::new(Capture(parking_lot::Mutex::new(Vec::new())));
        let items = ItemPublisher::new("domus", capture.clone());
        let point = point(RegisterKind::Holding, 1);

        items.value(&point, Reading::Words(vec![7]));
        items.error(&point, &BusError::Timeout(std::time::Duration::from_millis(500)));

        let sent = capture.0.lock();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].name(), ITEM_VALUE);
        assert_eq!(sent[0].topic(), "item/42");
        assert_eq!(sent[0].target_type(), TargetType::Item);
        assert_eq!(sent[0].target_id(), 42);
        assert_eq!(sent[0].get_int("value"), Ok(7));
        assert_eq!(sent[0].get_string("point"), Ok("boiler.temperature"));
        assert_eq!(sent[1].name(), ITEM_ERROR);
        assert!(sent[1].get_string("error").unwrap().contains("timed out"));
    }
}
