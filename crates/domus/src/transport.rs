//! In-process transport
//!
//! Everything published through [`LoopbackTransport`] comes back in through
//! its [`Inbox`], which feeds the router. This is how pollers, command
//! handlers and error events reach subscribers on the same controller.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, info};

use domus_dispatch::{Message, MessageRouter, QoS, Transport, TransportError};

/// Sending half of the loopback
#[derive(Clone)]
pub struct LoopbackTransport {
    tx: mpsc::UnboundedSender<Message>,
}

/// Receiving half of the loopback
pub struct Inbox {
    rx: mpsc::UnboundedReceiver<Message>,
}

impl LoopbackTransport {
    pub fn new() -> (Self, Inbox) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, Inbox { rx })
    }
}

impl Transport for LoopbackTransport {
    fn send(&self, msg: Message) -> Result<(), TransportError> {
        self.tx.send(msg).map_err(|_| TransportError::Closed)
    }

    /// `payload` must be a JSON encoded message; topic, QoS and retain flag
    /// are taken from the arguments
    fn send_raw(
        &self,
        topic: &str,
        qos: QoS,
        retained: bool,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        let msg: Message =
            serde_json::from_slice(payload).map_err(|e| TransportError::Decode(e.to_string()))?;
        self.send(msg.with_topic(topic).with_qos(qos).retained(retained))
    }
}

impl Inbox {
    /// Next inbound message, stamped with its receive time
    pub async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await.map(|msg| msg.received(Utc::now()))
    }

    /// Dispatch every inbound message until all senders are gone
    pub async fn run(mut self, router: Arc<MessageRouter>) {
        info!("Dispatch loop started");

        while let Some(msg) = self.recv().await {
            let report = router.dispatch(&msg);
            if report.matched == 0 {
                debug!(name = %msg.name(), "No subscribers");
            }
        }

        info!("Dispatch loop stopped");
    }
}
