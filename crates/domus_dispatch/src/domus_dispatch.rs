//! Domus message dispatch
//!
//! Publish/subscribe core: messages, the multi-attribute subscription index
//! and the router that runs matching handlers.

pub mod intset;
pub mod message;
pub mod registry;
pub mod router;
pub mod subscription;

pub use intset::IntSet;
pub use message::{Message, MessageType, ParseError, Payload, QoS, TargetType, Value, ValueError};
pub use registry::{EventNames, EventRegistry};
pub use router::{DispatchReport, MessageRouter, Transport, TransportError, ERROR_EVENT};
pub use subscription::{
    Filter, Handler, HandlerError, HandlerResult, SubscriptionError, SubscriptionId, Subscribers,
};
