//! Subscriptions
//!
//! A subscription pairs a message filter with a handler. Each of the six
//! filter attributes is either a concrete value or a wildcard; a message
//! matches when every constrained attribute equals the message's own.

mod index;

pub use index::*;

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use crate::message::{Message, MessageType, TargetType, ValueError};

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Reasons a subscription is rejected at registration time
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubscriptionError {
    #[error("invalid message type {0:?}: expected \"event\" or \"command\"")]
    InvalidMessageType(String),

    #[error("invalid target type {0:?}")]
    InvalidTargetType(String),

    #[error("invalid target id {0}: must be at least 1")]
    InvalidTargetId(i64),

    #[error("unknown event {0:?}")]
    UnknownEvent(String),
}

/// Failure reported by a handler
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct HandlerError(String);

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }

    pub fn message(&self) -> &str {
        &self.0
    }
}

impl From<ValueError> for HandlerError {
    fn from(err: ValueError) -> Self {
        Self(err.to_string())
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self(message.to_string())
    }
}

/// Result returned by handlers
pub type HandlerResult = Result<(), HandlerError>;

/// Shared handler callback
pub type Handler = Arc<dyn Fn(&Message) -> HandlerResult + Send + Sync>;

// ─────────────────────────────────────────────────────────────────────────────
// Subscription Id
// ─────────────────────────────────────────────────────────────────────────────

/// Identifier assigned at registration; never reused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(usize);

impl SubscriptionId {
    pub fn get(&self) -> usize {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Filter
// ─────────────────────────────────────────────────────────────────────────────

/// Message attributes a subscription can constrain
///
/// `None` is the wildcard.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    pub publisher: Option<String>,
    pub topic: Option<String>,
    pub msg_type: Option<MessageType>,
    pub name: Option<String>,
    pub target_type: Option<TargetType>,
    pub target_id: Option<i64>,
}

impl Filter {
    /// A filter that matches every message
    pub fn any() -> Self {
        Self::default()
    }

    /// Build a filter from raw attribute strings, empty meaning wildcard
    ///
    /// Checks the message type first, then the target type. Target id range
    /// and event names are checked when the filter is registered.
    pub fn parse(
        publisher: &str,
        topic: &str,
        msg_type: &str,
        name: &str,
        target_type: &str,
        target_id: Option<i64>,
    ) -> Result<Self, SubscriptionError> {
        let msg_type = match msg_type {
            "" => None,
            raw => Some(
                raw.parse::<MessageType>()
                    .map_err(|_| SubscriptionError::InvalidMessageType(raw.to_string()))?,
            ),
        };
        let target_type = match target_type {
            "" => None,
            raw => Some(
                raw.parse::<TargetType>()
                    .map_err(|_| SubscriptionError::InvalidTargetType(raw.to_string()))?,
            ),
        };

        Ok(Self {
            publisher: non_empty(publisher),
            topic: non_empty(topic),
            msg_type,
            name: non_empty(name),
            target_type,
            target_id,
        })
    }

    pub fn publisher(mut self, publisher: impl Into<String>) -> Self {
        self.publisher = non_empty(publisher);
        self
    }

    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = non_empty(topic);
        self
    }

    /// Only match events
    pub fn events(mut self) -> Self {
        self.msg_type = Some(MessageType::Event);
        self
    }

    /// Only match commands
    pub fn commands(mut self) -> Self {
        self.msg_type = Some(MessageType::Command);
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = non_empty(name);
        self
    }

    pub fn target_type(mut self, target_type: TargetType) -> Self {
        self.target_type = Some(target_type);
        self
    }

    /// Only match messages addressed to one entity
    pub fn target(mut self, target_type: TargetType, target_id: i64) -> Self {
        self.target_type = Some(target_type);
        self.target_id = Some(target_id);
        self
    }

    /// Check a single message against this filter directly
    pub fn matches(&self, msg: &Message) -> bool {
        Column::ALL.iter().all(|&column| {
            let wanted = self.key(column);
            wanted.is_empty() || wanted == column.key(msg)
        })
    }

    /// Bucket key for one column; empty is the wildcard bucket
    pub(crate) fn key(&self, column: Column) -> Cow<'_, str> {
        match column {
            Column::Publisher => opt_key(&self.publisher),
            Column::Topic => opt_key(&self.topic),
            Column::MsgType => Cow::Borrowed(self.msg_type.map_or("", |t| t.as_str())),
            Column::Name => opt_key(&self.name),
            Column::TargetType => Cow::Borrowed(self.target_type.map_or("", |t| t.as_str())),
            Column::TargetId => id_key(self.target_id.unwrap_or(0)),
        }
    }
}

fn non_empty(value: impl Into<String>) -> Option<String> {
    let value = value.into();
    (!value.is_empty()).then_some(value)
}

fn opt_key(value: &Option<String>) -> Cow<'_, str> {
    Cow::Borrowed(value.as_deref().unwrap_or(""))
}

fn id_key(id: i64) -> Cow<'static, str> {
    if id > 0 {
        Cow::Owned(id.to_string())
    } else {
        Cow::Borrowed("")
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Columns
// ─────────────────────────────────────────────────────────────────────────────

/// Indexed message attribute, in lookup order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Column {
    Publisher = 0,
    Topic = 1,
    MsgType = 2,
    Name = 3,
    TargetType = 4,
    TargetId = 5,
}

impl Column {
    pub(crate) const ALL: [Column; 6] = [
        Column::Publisher,
        Column::Topic,
        Column::MsgType,
        Column::Name,
        Column::TargetType,
        Column::TargetId,
    ];

    pub(crate) fn index(self) -> usize {
        self as usize
    }

    /// The message's value for this column
    pub(crate) fn key(self, msg: &Message) -> Cow<'_, str> {
        match self {
            Column::Publisher => Cow::Borrowed(msg.publisher()),
            Column::Topic => Cow::Borrowed(msg.topic()),
            Column::MsgType => Cow::Borrowed(msg.msg_type().as_str()),
            Column::Name => Cow::Borrowed(msg.name()),
            Column::TargetType => Cow::Borrowed(msg.target_type().as_str()),
            Column::TargetId => id_key(msg.target_id()),
        }
    }
}
