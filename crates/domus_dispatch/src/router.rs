//! Message Router
//!
//! Every inbound message passes through the router exactly once. The router
//! asks the subscription index for matching handlers, runs them, and turns
//! handler failures into error events instead of propagating them.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{trace, warn};

use crate::message::{Message, QoS};
use crate::subscription::{SubscriptionId, Subscribers};

/// Name of the event published when a handler fails
pub const ERROR_EVENT: &str = "system.error";

// ─────────────────────────────────────────────────────────────────────────────
// Transport
// ─────────────────────────────────────────────────────────────────────────────

/// Errors reported by a transport
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Transport closed")]
    Closed,

    #[error("Failed to encode message: {0}")]
    Encode(String),

    #[error("Failed to decode raw payload: {0}")]
    Decode(String),
}

/// Outbound side of a message transport
///
/// Inbound messages are handed to [`MessageRouter::dispatch`] by the
/// transport itself.
pub trait Transport: Send + Sync {
    /// Publish a message
    fn send(&self, msg: Message) -> Result<(), TransportError>;

    /// Publish pre-encoded bytes on a topic
    fn send_raw(
        &self,
        topic: &str,
        qos: QoS,
        retained: bool,
        payload: &[u8],
    ) -> Result<(), TransportError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Router
// ─────────────────────────────────────────────────────────────────────────────

/// Outcome of dispatching one message
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Handlers whose filter matched
    pub matched: usize,
    /// Handlers that returned an error or panicked
    pub failed: usize,
}

/// Routes messages to subscribed handlers
pub struct MessageRouter {
    publisher: String,
    subscribers: Arc<Subscribers>,
    transport: Arc<dyn Transport>,
}

impl MessageRouter {
    /// Create a router; `publisher` is stamped on the error events it emits
    pub fn new(
        publisher: impl Into<String>,
        subscribers: Arc<Subscribers>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            publisher: publisher.into(),
            subscribers,
            transport,
        }
    }

    pub fn subscribers(&self) -> &Arc<Subscribers> {
        &self.subscribers
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Run every handler matching `msg`
    pub fn dispatch(&self, msg: &Message) -> DispatchReport {
        let handlers = self.subscribers.get_handlers(msg);
        if handlers.is_empty() {
            trace!(name = msg.name(), publisher = msg.publisher(), "No subscribers");
            return DispatchReport::default();
        }

        let mut report = DispatchReport {
            matched: handlers.len(),
            failed: 0,
        };

        for (id, handler) in handlers {
            let error = match panic::catch_unwind(AssertUnwindSafe(|| handler(msg))) {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e.to_string(),
                Err(payload) => format!("handler panicked: {}", panic_message(payload.as_ref())),
            };

            report.failed += 1;
            warn!(subscription = %id, name = msg.name(), error = %error, "Handler failed");

            // Failures while handling an error event are only logged, so a
            // broken error subscriber cannot feed itself.
            if msg.is_event() && msg.name() == ERROR_EVENT {
                continue;
            }

            if let Err(e) = self.transport.send(self.error_event(msg, id, &error)) {
                warn!(subscription = %id, error = %e, "Failed to publish handler error");
            }
        }

        report
    }

    fn error_event(&self, msg: &Message, id: SubscriptionId, error: &str) -> Message {
        let topic = if msg.topic().is_empty() {
            "error".to_string()
        } else {
            format!("{}/error", msg.topic())
        };

        Message::event(&self.publisher, ERROR_EVENT)
            .with_topic(topic)
            .with_target(msg.target_type(), msg.target_id())
            .with("error", error)
            .with("handler", id.get() as i64)
            .with("message", msg.name())
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
