//! Hardware Clients
//!
//! The bus worker only needs to open, address and close the link. Protocol
//! operations are called from inside task actions through
//! [`RegisterClient`].

use std::time::Instant;

use tracing::{debug, trace};

use crate::error::BusResult;

/// Link-level operations the bus worker drives around every task
pub trait BusClient: Send + 'static {
    /// Open the link; opening an already open link succeeds
    fn open(&mut self) -> BusResult<()>;

    /// Close the link
    fn close(&mut self) -> BusResult<()>;

    /// Select the unit (slave) address for subsequent requests
    fn set_unit_address(&mut self, unit: u8) -> BusResult<()>;
}

/// Register and coil access, as offered by Modbus devices
pub trait RegisterClient: BusClient {
    fn read_coils(&mut self, address: u16, count: u16) -> BusResult<Vec<bool>>;

    fn read_discrete_inputs(&mut self, address: u16, count: u16) -> BusResult<Vec<bool>>;

    fn read_holding_registers(&mut self, address: u16, count: u16) -> BusResult<Vec<u16>>;

    fn read_input_registers(&mut self, address: u16, count: u16) -> BusResult<Vec<u16>>;

    fn write_single_coil(&mut self, address: u16, value: bool) -> BusResult<()>;

    fn write_single_register(&mut self, address: u16, value: u16) -> BusResult<()>;

    fn write_multiple_registers(&mut self, address: u16, values: &[u16]) -> BusResult<()>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Logging Client
// ─────────────────────────────────────────────────────────────────────────────

/// Decorator that traces every call made on the wrapped client
pub struct LoggingClient<C> {
    bus: String,
    inner: C,
}

impl<C> LoggingClient<C> {
    pub fn new(bus: impl Into<String>, inner: C) -> Self {
        Self {
            bus: bus.into(),
            inner,
        }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    pub fn into_inner(self) -> C {
        self.inner
    }

    fn logged<T>(&mut self, op: &'static str, call: impl FnOnce(&mut C) -> BusResult<T>) -> BusResult<T> {
        let started = Instant::now();
        let result = call(&mut self.inner);
        match &result {
            Ok(_) => trace!(bus = %self.bus, op, elapsed = ?started.elapsed(), "Bus call"),
            Err(e) => debug!(bus = %self.bus, op, elapsed = ?started.elapsed(), error = %e, "Bus call failed"),
        }
        result
    }
}

impl<C: BusClient> BusClient for LoggingClient<C> {
    fn open(&mut self) -> BusResult<()> {
        self.logged("open", |c| c.open())
    }

    fn close(&mut self) -> BusResult<()> {
        self.logged("close", |c| c.close())
    }

    fn set_unit_address(&mut self, unit: u8) -> BusResult<()> {
        trace!(bus = %self.bus, unit, "Selecting unit");
        self.logged("set_unit_address", |c| c.set_unit_address(unit))
    }
}

impl<C: RegisterClient> RegisterClient for LoggingClient<C> {
    fn read_coils(&mut self, address: u16, count: u16) -> BusResult<Vec<bool>> {
        self.logged("read_coils", |c| c.read_coils(address, count))
    }

    fn read_discrete_inputs(&mut self, address: u16, count: u16) -> BusResult<Vec<bool>> {
        self.logged("read_discrete_inputs", |c| c.read_discrete_inputs(address, count))
    }

    fn read_holding_registers(&mut self, address: u16, count: u16) -> BusResult<Vec<u16>> {
        self.logged("read_holding_registers", |c| c.read_holding_registers(address, count))
    }

    fn read_input_registers(&mut self, address: u16, count: u16) -> BusResult<Vec<u16>> {
        self.logged("read_input_registers", |c| c.read_input_registers(address, count))
    }

    fn write_single_coil(&mut self, address: u16, value: bool) -> BusResult<()> {
        self.logged("write_single_coil", |c| c.write_single_coil(address, value))
    }

    fn write_single_register(&mut self, address: u16, value: u16) -> BusResult<()> {
        self.logged("write_single_register", |c| c.write_single_register(address, value))
    }

    fn write_multiple_registers(&mut self, address: u16, values: &[u16]) -> BusResult<()> {
        self.logged("write_multiple_registers", |c| c.write_multiple_registers(address, values))
    }
}
