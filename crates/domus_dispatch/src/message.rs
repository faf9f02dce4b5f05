//! Messages
//!
//! Messages are the unit of communication between device objects, scripts
//! and transports. A message is built once and never mutated afterwards;
//! the builder methods consume and return it.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Message payload, keyed by field name
pub type Payload = BTreeMap<String, Value>;

// ─────────────────────────────────────────────────────────────────────────────
// Parse Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Errors produced when parsing wire names of message enums
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("unknown message type: {0:?}")]
    MessageType(String),

    #[error("unknown target type: {0:?}")]
    TargetType(String),
}

// ─────────────────────────────────────────────────────────────────────────────
// Message Type
// ─────────────────────────────────────────────────────────────────────────────

/// Whether a message reports something that happened or asks for an action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Event,
    Command,
}

impl MessageType {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Event => "event",
            MessageType::Command => "command",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "event" => Ok(MessageType::Event),
            "command" => Ok(MessageType::Command),
            other => Err(ParseError::MessageType(other.to_string())),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Target Type
// ─────────────────────────────────────────────────────────────────────────────

/// Kind of logical entity a message concerns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetType {
    /// The message is not addressed to any particular entity
    #[default]
    NotMatters,
    Object,
    Item,
    Service,
    Script,
}

impl TargetType {
    /// Every known target type
    pub const ALL: [TargetType; 5] = [
        TargetType::NotMatters,
        TargetType::Object,
        TargetType::Item,
        TargetType::Service,
        TargetType::Script,
    ];

    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetType::NotMatters => "not_matters",
            TargetType::Object => "object",
            TargetType::Item => "item",
            TargetType::Service => "service",
            TargetType::Script => "script",
        }
    }
}

impl fmt::Display for TargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TargetType {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TargetType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ParseError::TargetType(s.to_string()))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Quality of Service
// ─────────────────────────────────────────────────────────────────────────────

/// Delivery guarantee requested from the transport (MQTT levels 0-2)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QoS {
    #[default]
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

impl QoS {
    /// Numeric level as used on the wire
    pub fn level(&self) -> u8 {
        match self {
            QoS::AtMostOnce => 0,
            QoS::AtLeastOnce => 1,
            QoS::ExactlyOnce => 2,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Value
// ─────────────────────────────────────────────────────────────────────────────

/// A payload value
///
/// The set of kinds is closed on purpose: transports only ever carry these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Map(Payload),
}

impl Value {
    /// Name of the value kind, used in coercion errors
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Map(_) => "map",
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v.into())
    }
}

impl From<u16> for Value {
    fn from(v: u16) -> Self {
        Value::Int(v.into())
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<Payload> for Value {
    fn from(v: Payload) -> Self {
        Value::Map(v)
    }
}

/// Errors from typed payload accessors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValueError {
    #[error("payload has no field {0:?}")]
    Missing(String),

    #[error("payload field {key:?} is {found}, expected {expected}")]
    WrongKind {
        key: String,
        expected: &'static str,
        found: &'static str,
    },
}

// ─────────────────────────────────────────────────────────────────────────────
// Message
// ─────────────────────────────────────────────────────────────────────────────

/// A published event or command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    publisher: String,
    #[serde(default)]
    topic: String,
    #[serde(rename = "type")]
    msg_type: MessageType,
    name: String,
    #[serde(default)]
    target_type: TargetType,
    #[serde(default)]
    target_id: i64,
    #[serde(default)]
    payload: Payload,
    #[serde(default)]
    qos: QoS,
    #[serde(default)]
    retained: bool,
    sent_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    received_at: Option<DateTime<Utc>>,
}

impl Message {
    /// Create a message stamped with the current time
    pub fn new(
        msg_type: MessageType,
        publisher: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            publisher: publisher.into(),
            topic: String::new(),
            msg_type,
            name: name.into(),
            target_type: TargetType::NotMatters,
            target_id: 0,
            payload: Payload::new(),
            qos: QoS::default(),
            retained: false,
            sent_at: Utc::now(),
            received_at: None,
        }
    }

    /// Create an event message
    pub fn event(publisher: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(MessageType::Event, publisher, name)
    }

    /// Create a command message
    pub fn command(publisher: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(MessageType::Command, publisher, name)
    }

    /// Set the topic
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    /// Address the message to an entity
    pub fn with_target(mut self, target_type: TargetType, target_id: i64) -> Self {
        self.target_type = target_type;
        self.target_id = target_id;
        self
    }

    /// Replace the whole payload
    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }

    /// Add a single payload field
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    /// Set the delivery guarantee
    pub fn with_qos(mut self, qos: QoS) -> Self {
        self.qos = qos;
        self
    }

    /// Mark the message as retained by the broker
    pub fn retained(mut self, retained: bool) -> Self {
        self.retained = retained;
        self
    }

    /// Stamp the time the message reached this process
    pub fn received(mut self, at: DateTime<Utc>) -> Self {
        self.received_at = Some(at);
        self
    }

    pub fn publisher(&self) -> &str {
        &self.publisher
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn msg_type(&self) -> MessageType {
        self.msg_type
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn target_type(&self) -> TargetType {
        self.target_type
    }

    pub fn target_id(&self) -> i64 {
        self.target_id
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn qos(&self) -> QoS {
        self.qos
    }

    pub fn is_retained(&self) -> bool {
        self.retained
    }

    pub fn sent_at(&self) -> DateTime<Utc> {
        self.sent_at
    }

    pub fn received_at(&self) -> Option<DateTime<Utc>> {
        self.received_at
    }

    /// Check if this is an event
    pub fn is_event(&self) -> bool {
        self.msg_type == MessageType::Event
    }

    /// Get a raw payload field
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }

    /// Get a numeric field as a float; integers are widened
    pub fn get_float(&self, key: &str) -> Result<f64, ValueError> {
        match self.field(key)? {
            Value::Float(v) => Ok(*v),
            Value::Int(v) => Ok(*v as f64),
            other => Err(wrong_kind(key, "float", other)),
        }
    }

    /// Get an integer field
    pub fn get_int(&self, key: &str) -> Result<i64, ValueError> {
        match self.field(key)? {
            Value::Int(v) => Ok(*v),
            other => Err(wrong_kind(key, "int", other)),
        }
    }

    /// Get a string field
    pub fn get_string(&self, key: &str) -> Result<&str, ValueError> {
        match self.field(key)? {
            Value::String(v) => Ok(v),
            other => Err(wrong_kind(key, "string", other)),
        }
    }

    /// Get a boolean field
    pub fn get_bool(&self, key: &str) -> Result<bool, ValueError> {
        match self.field(key)? {
            Value::Bool(v) => Ok(*v),
            other => Err(wrong_kind(key, "bool", other)),
        }
    }

    /// Get a nested map field
    pub fn get_map(&self, key: &str) -> Result<&Payload, ValueError> {
        match self.field(key)? {
            Value::Map(v) => Ok(v),
            other => Err(wrong_kind(key, "map", other)),
        }
    }

    fn field(&self, key: &str) -> Result<&Value, ValueError> {
        self.payload
            .get(key)
            .ok_or_else(|| ValueError::Missing(key.to_string()))
    }
}

fn wrong_kind(key: &str, expected: &'static str, found: &Value) -> ValueError {
    ValueError::WrongKind {
        key: key.to_string(),
        expected,
        found: found.kind(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
