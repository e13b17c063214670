//! Message broker access
//!
//! The relay talks to the broker through two seams:
//! 1. `BrokerConnector`: opens one connection and its channel
//! 2. `BrokerChannel`: queue declare, flow control, consume, publish
//!
//! `BrokerConnectionManager` owns the single live channel of the process and
//! supervises reconnection. `amqp` is the RabbitMQ implementation, `memory`
//! an in-process broker used for offline runs and tests.

pub mod amqp;
pub mod connection;
pub mod memory;

pub use amqp::AmqpConnector;
pub use connection::{BrokerConnectionManager, ConnectionState};
pub use memory::MemoryBroker;

use crate::error::BrokerError;
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::sync::Arc;
use tokio::sync::oneshot;

/// Stream of deliveries for one consumer
pub type DeliveryStream = BoxStream<'static, Result<Delivery, BrokerError>>;

/// A channel on an open broker connection
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    /// Declare a durable queue; declaring an existing queue is a no-op
    async fn declare_queue(&self, queue: &str) -> Result<(), BrokerError>;

    /// Limit unacknowledged deliveries for consumers created afterwards
    async fn set_prefetch(&self, credit: u16) -> Result<(), BrokerError>;

    /// Start consuming with manual acknowledgment
    async fn consume(&self, queue: &str, consumer_tag: &str)
        -> Result<DeliveryStream, BrokerError>;

    /// Publish a persistent message to `queue` through the default exchange
    async fn publish(&self, queue: &str, payload: &[u8]) -> Result<(), BrokerError>;

    fn is_open(&self) -> bool;

    /// Close the channel and its connection
    async fn close(&self) -> Result<(), BrokerError>;
}

/// Result of a successful connect
pub struct BrokerLink {
    pub channel: Arc<dyn BrokerChannel>,
    /// Resolves when the broker closes the connection on its own.
    /// A dropped sender means the close was ours.
    pub closed: oneshot::Receiver<BrokerError>,
}

#[async_trait]
pub trait BrokerConnector: Send + Sync + 'static {
    async fn connect(&self) -> Result<BrokerLink, BrokerError>;
}

#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn ack(&self) -> Result<(), BrokerError>;
    async fn reject(&self, requeue: bool) -> Result<(), BrokerError>;
}

/// One message handed to a consumer, settled exactly once
pub struct Delivery {
    pub payload: Vec<u8>,
    pub redelivered: bool,
    acker: Box<dyn Acknowledger>,
}

impl Delivery {
    pub fn new(payload: Vec<u8>, redelivered: bool, acker: Box<dyn Acknowledger>) -> Self {
        Self {
            payload,
            redelivered,
            acker,
        }
    }

    pub async fn ack(self) -> Result<(), BrokerError> {
        self.acker.ack().await
    }

    pub async fn reject(self, requeue: bool) -> Result<(), BrokerError> {
        self.acker.reject(requeue).await
    }

    /// Payload as text, lossy, for logging
    pub fn payload_lossy(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("payload_len", &self.payload.len())
            .field("redelivered", &self.redelivered)
            .finish()
    }
}
