//! Domus field bus arbitration
//!
//! Serializes access to shared RS-485 / Modbus links: callers queue actions
//! by priority, a single worker per bus runs them, and results come back
//! through per-task handlers.

pub mod bus;
pub mod client;
pub mod error;
pub mod modbus;
pub mod queue;

mod task;
mod worker;

pub use bus::{BusSettings, BusState, SerialBus, MAX_TRIES};
pub use client::{BusClient, LoggingClient, RegisterClient};
pub use error::{BusError, BusResult};
pub use modbus::{ModbusClient, ModbusTransport, Parity};
pub use queue::{PriorityQueue, QueueError, MAX_PRIORITIES, MIN_CAPACITY};
