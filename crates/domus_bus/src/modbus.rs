//! Modbus Client
//!
//! Modbus RTU over an RS-485 serial line, or Modbus TCP through a gateway.
//! `tokio-modbus` is async, while the bus worker is a plain thread, so the
//! client owns a current-thread runtime and blocks on each request.

use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::runtime::Runtime;
use tokio_modbus::client::{rtu, tcp, Context};
use tokio_modbus::prelude::*;
use tokio_serial::{DataBits, SerialStream, StopBits};

use crate::client::{BusClient, RegisterClient};
use crate::error::{BusError, BusResult};

fn default_baud_rate() -> u32 {
    9600
}

/// Serial parity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Parity {
    #[default]
    None,
    Even,
    Odd,
}

impl From<Parity> for tokio_serial::Parity {
    fn from(parity: Parity) -> Self {
        match parity {
            Parity::None => tokio_serial::Parity::None,
            Parity::Even => tokio_serial::Parity::Even,
            Parity::Odd => tokio_serial::Parity::Odd,
        }
    }
}

/// Physical link used to reach the devices
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModbusTransport {
    /// RTU framing on a serial port (RS-485 adapter)
    Rtu {
        path: String,
        #[serde(default = "default_baud_rate")]
        baud_rate: u32,
        #[serde(default)]
        parity: Parity,
    },
    /// Modbus TCP, typically an RS-485 gateway
    Tcp { address: SocketAddr },
}

impl fmt::Display for ModbusTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModbusTransport::Rtu {
                path, baud_rate, ..
            } => write!(f, "rtu:{path}@{baud_rate}"),
            ModbusTransport::Tcp { address } => write!(f, "tcp:{address}"),
        }
    }
}

/// Blocking Modbus client for use on a bus worker thread
pub struct ModbusClient {
    transport: ModbusTransport,
    timeout: Duration,
    unit: u8,
    runtime: Runtime,
    ctx: Option<Context>,
}

impl ModbusClient {
    /// Create a closed client; every request is bounded by `timeout`
    pub fn new(transport: ModbusTransport, timeout: Duration) -> BusResult<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| BusError::Connection(format!("failed to build client runtime: {e}")))?;

        Ok(Self {
            transport,
            timeout,
            unit: 0,
            runtime,
            ctx: None,
        })
    }

    pub fn transport(&self) -> &ModbusTransport {
        &self.transport
    }

    pub fn is_open(&self) -> bool {
        self.ctx.is_some()
    }

    fn connect(&self) -> BusResult<Context> {
        let slave = Slave(self.unit);
        match &self.transport {
            ModbusTransport::Rtu {
                path,
                baud_rate,
                parity,
            } => {
                let builder = tokio_serial::new(path, *baud_rate)
                    .data_bits(DataBits::Eight)
                    .parity((*parity).into())
                    .stop_bits(StopBits::One);

                // Registering the port needs the runtime's reactor.
                let _guard = self.runtime.enter();
                let port = SerialStream::open(&builder)
                    .map_err(|e| BusError::Connection(format!("{path}: {e}")))?;
                Ok(rtu::attach_slave(port, slave))
            }
            ModbusTransport::Tcp { address } => {
                let address = *address;
                self.runtime
                    .block_on(tokio::time::timeout(self.timeout, tcp::connect_slave(address, slave)))
                    .map_err(|_| BusError::Timeout(self.timeout))?
                    .map_err(|e| BusError::Connection(format!("{address}: {e}")))
            }
        }
    }

    /// Run one request on the open context
    fn request<'a, T, E, X, F>(
        &'a mut self,
        call: impl FnOnce(&'a mut Context) -> F,
    ) -> BusResult<T>
    where
        F: Future<Output = Result<Result<T, X>, E>> + 'a,
        E: fmt::Display,
        X: fmt::Debug,
    {
        let timeout = self.timeout;
        let ctx = self.ctx.as_mut().ok_or(BusError::NotOpen)?;
        match self.runtime.block_on(tokio::time::timeout(timeout, call(ctx))) {
            Err(_) => Err(BusError::Timeout(timeout)),
            Ok(Err(e)) => Err(BusError::Transport(e.to_string())),
            Ok(Ok(Err(exception))) => Err(BusError::Exception(format!("{exception:?}"))),
            Ok(Ok(Ok(value))) => Ok(value),
        }
    }
}

impl BusClient for ModbusClient {
    fn open(&mut self) -> BusResult<()> {
        if self.ctx.is_none() {
            self.ctx = Some(self.connect()?);
        }
        Ok(())
    }

    fn close(&mut self) -> BusResult<()> {
        let Some(mut ctx) = self.ctx.take() else {
            return Ok(());
        };

        let timeout = self.timeout;
        let result = self
            .runtime
            .block_on(tokio::time::timeout(timeout, ctx.disconnect()));

        // Dropping the context releases the port; do it inside the runtime
        // the port was registered with.
        let _guard = self.runtime.enter();
        drop(ctx);

        match result {
            Err(_) => Err(BusError::Connection(format!(
                "disconnect timed out after {timeout:?}"
            ))),
            Ok(Err(e)) => Err(BusError::Connection(format!("disconnect: {e}"))),
            Ok(Ok(Err(exception))) => Err(BusError::Connection(format!(
                "disconnect: {exception:?}"
            ))),
            Ok(Ok(Ok(()))) => Ok(()),
        }
    }

    fn set_unit_address(&mut self, unit: u8) -> BusResult<()> {
        self.unit = unit;
        if let Some(ctx) = self.ctx.as_mut() {
            ctx.set_slave(Slave(unit));
        }
        Ok(())
    }
}

impl RegisterClient for ModbusClient {
    fn read_coils(&mut self, address: u16, count: u16) -> BusResult<Vec<bool>> {
        self.request(|ctx| ctx.read_coils(address, count))
    }

    fn read_discrete_inputs(&mut self, address: u16, count: u16) -> BusResult<Vec<bool>> {
        self.request(|ctx| ctx.read_discrete_inputs(address, count))
    }

    fn read_holding_registers(&mut self, address: u16, count: u16) -> BusResult<Vec<u16>> {
        self.request(|ctx| ctx.read_holding_registers(address, count))
    }

    fn read_input_registers(&mut self, address: u16, count: u16) -> BusResult<Vec<u16>> {
        self.request(|ctx| ctx.read_input_registers(address, count))
    }

    fn write_single_coil(&mut self, address: u16, value: bool) -> BusResult<()> {
        self.request(|ctx| ctx.write_single_coil(address, value))
    }

    fn write_single_register(&mut self, address: u16, value: u16) -> BusResult<()> {
        self.request(|ctx| ctx.write_single_register(address, value))
    }

    fn write_multiple_registers(&mut self, address: u16, values: &[u16]) -> BusResult<()> {
        self.request(|ctx| ctx.write_multiple_registers(address, values))
    }
}
