//! Bus Errors

use std::time::Duration;

use crate::queue::QueueError;

/// Result type for bus operations
pub type BusResult<T> = Result<T, BusError>;

/// Errors raised by bus arbiters and hardware clients
///
/// Queue and validation errors are returned synchronously from
/// `do_action`; everything else reaches the task's result handler.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BusError {
    #[error("Invalid bus configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("Invalid tries {0}: must be between 1 and 10")]
    InvalidTries(u8),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Connection is not open")]
    NotOpen,

    #[error("Failed to select unit {unit}: {reason}")]
    Address { unit: u8, reason: String },

    #[error("Action failed after {attempts} attempt(s): {source}")]
    Action { attempts: u8, source: Box<BusError> },

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Device exception: {0}")]
    Exception(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Bus has already been started")]
    AlreadyStarted,

    #[error("Failed to spawn bus worker: {0}")]
    WorkerSpawn(String),

    #[error("{0}")]
    Other(String),
}

impl BusError {
    /// The innermost error, looking through action retries
    pub fn root(&self) -> &BusError {
        match self {
            BusError::Action { source, .. } => source.root(),
            other => other,
        }
    }
}
