//! Queue consumption
//!
//! Each queue carries a closed set of event types, modelled as an enum
//! implementing `QueueEvent`. A `QueueConsumer` turns the durable queue into
//! a strictly sequential stream of decoded events and hands them to an
//! `EnvelopeHandler`.

pub mod consumer;
pub mod envelope;
pub mod events;

pub use consumer::{DeliveryOutcome, QueueConsumer};
pub use envelope::Envelope;
pub use events::{FavoriteEvent, MessageEvent, NewMessage, PropertyFavorited};

use crate::error::{EnvelopeError, HandlerError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// What happens to a message whose handler failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Reject without requeue; the message is gone
    Drop,
    /// Requeue once; a redelivered message that fails again is dropped
    RequeueOnce,
}

impl FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "drop" => Ok(FailurePolicy::Drop),
            "requeue-once" | "requeue_once" => Ok(FailurePolicy::RequeueOnce),
            other => Err(format!(
                "invalid HANDLER_FAILURE_POLICY {:?}, expected drop or requeue-once",
                other
            )),
        }
    }
}

/// The closed set of events one queue accepts
pub trait QueueEvent: Sized + Send + 'static {
    /// Queue the events travel on
    const QUEUE: &'static str;

    /// Build the event from an envelope's `type` and `data`
    fn decode(kind: &str, data: serde_json::Value) -> Result<Self, EnvelopeError>;

    /// Envelope `type` tag of this event
    fn kind(&self) -> &'static str;
}

/// Processes decoded events; `Ok` acknowledges the message
#[async_trait]
pub trait EnvelopeHandler<E: QueueEvent>: Send + Sync + 'static {
    async fn handle(&self, event: E) -> Result<(), HandlerError>;
}
