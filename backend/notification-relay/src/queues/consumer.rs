//! Queue Consumer
//!
//! One consumer per queue. It attaches to the shared broker channel,
//! declares its queue durable, limits itself to one unacknowledged message
//! and settles every delivery exactly once:
//! - undecodable or unknown type: ack and drop
//! - handler success: ack
//! - handler failure: reject, requeue decided by `FailurePolicy`
//!
//! When attaching fails or the delivery stream ends, the consumer waits
//! `retry_delay` and attaches again, forever.

use super::{Envelope, EnvelopeHandler, FailurePolicy, QueueEvent};
use crate::broker::{BrokerConnectionManager, Delivery, DeliveryStream};
use crate::config::ConsumerConfig;
use crate::error::BrokerError;
use crate::metrics;
use futures::StreamExt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Flow-control credit; the broker holds back further deliveries until the
/// outstanding one is settled
pub const CONSUMER_PREFETCH: u16 = 1;

/// How a delivery was settled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Acked,
    /// Undecodable, acknowledged without processing
    Dropped,
    /// Handler failed, rejected without requeue
    Rejected,
    /// Handler failed, rejected with requeue
    Requeued,
}

impl DeliveryOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryOutcome::Acked => "acked",
            DeliveryOutcome::Dropped => "dropped",
            DeliveryOutcome::Rejected => "rejected",
            DeliveryOutcome::Requeued => "requeued",
        }
    }
}

pub struct QueueConsumer<E, H> {
    manager: Arc<BrokerConnectionManager>,
    handler: Arc<H>,
    config: ConsumerConfig,
    running: AtomicBool,
    _event: PhantomData<fn() -> E>,
}

impl<E, H> QueueConsumer<E, H>
where
    E: QueueEvent,
    H: EnvelopeHandler<E>,
{
    pub fn new(
        manager: Arc<BrokerConnectionManager>,
        handler: Arc<H>,
        config: ConsumerConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            manager,
            handler,
            config,
            running: AtomicBool::new(false),
            _event: PhantomData,
        })
    }

    pub fn queue(&self) -> &'static str {
        E::QUEUE
    }

    /// True while attached and receiving
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Run the consumer in the background until the handle is aborted
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let consumer = Arc::clone(self);
        tokio::spawn(async move { consumer.run().await })
    }

    async fn run(self: Arc<Self>) {
        let delay = self.config.retry_delay();
        loop {
            match self.start().await {
                Ok(stream) => {
                    self.running.store(true, Ordering::SeqCst);
                    info!(queue = E::QUEUE, "Consumer waiting for messages");
                    self.receive(stream).await;
                    self.running.store(false, Ordering::SeqCst);
                    warn!(
                        queue = E::QUEUE,
                        "Consumer detached from broker, re-attaching in {:?}", delay
                    );
                }
                Err(e) => {
                    error!(
                        queue = E::QUEUE,
                        error = %e,
                        "Consumer failed to start, retrying in {:?}", delay
                    );
                }
            }
            tokio::time::sleep(delay).await;
        }
    }

    /// Attach to the shared channel and open the delivery stream
    pub async fn start(&self) -> Result<DeliveryStream, BrokerError> {
        let channel = self.manager.get_channel().await?;
        channel.declare_queue(E::QUEUE).await?;
        debug!(queue = E::QUEUE, "Queue declared");
        channel.set_prefetch(CONSUMER_PREFETCH).await?;
        channel
            .consume(E::QUEUE, &format!("{}-consumer", E::QUEUE))
            .await
    }

    async fn receive(&self, mut stream: DeliveryStream) {
        while let Some(item) = stream.next().await {
            match item {
                Ok(delivery) => {
                    self.process(delivery).await;
                }
                Err(e) => {
                    warn!(queue = E::QUEUE, error = %e, "Delivery stream failed");
                    break;
                }
            }
        }
    }

    /// Decode, handle and settle one delivery
    pub async fn process(&self, delivery: Delivery) -> DeliveryOutcome {
        let outcome = match Envelope::decode::<E>(&delivery.payload) {
            Err(e) => {
                warn!(
                    queue = E::QUEUE,
                    error = %e,
                    payload = %delivery.payload_lossy(),
                    "Dropping message that cannot be processed"
                );
                settle(delivery.ack().await);
                DeliveryOutcome::Dropped
            }
            Ok(event) => {
                let kind = event.kind();
                debug!(queue = E::QUEUE, kind, "Received message");
                let raw = delivery.payload_lossy();
                let redelivered = delivery.redelivered;

                match self.handler.handle(event).await {
                    Ok(()) => {
                        settle(delivery.ack().await);
                        info!(queue = E::QUEUE, kind, "Message processed and acknowledged");
                        DeliveryOutcome::Acked
                    }
                    Err(e) => {
                        error!(
                            queue = E::QUEUE,
                            kind,
                            error = %e,
                            payload = %raw,
                            "Error processing message"
                        );
                        let requeue = self.config.failure_policy == FailurePolicy::RequeueOnce
                            && !redelivered;
                        settle(delivery.reject(requeue).await);
                        if requeue {
                            DeliveryOutcome::Requeued
                        } else {
                            DeliveryOutcome::Rejected
                        }
                    }
                }
            }
        };

        metrics::record_delivery(E::QUEUE, outcome.as_str());
        outcome
    }
}

fn settle(result: Result<(), BrokerError>) {
    if let Err(e) = result {
        // the broker requeues unsettled messages when the channel goes away
        warn!(error = %e, "Failed to settle delivery");
    }
}
