//! RabbitMQ implementation of the broker seams, backed by `lapin`

use super::{Acknowledger, BrokerChannel, BrokerConnector, BrokerLink, Delivery, DeliveryStream};
use crate::error::BrokerError;
use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions, BasicQosOptions,
    QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::debug;

/// Persistent delivery mode for published messages
const DELIVERY_MODE_PERSISTENT: u8 = 2;

pub struct AmqpConnector {
    url: String,
}

impl AmqpConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl BrokerConnector for AmqpConnector {
    async fn connect(&self) -> Result<BrokerLink, BrokerError> {
        let connection = Connection::connect(&self.url, ConnectionProperties::default())
            .await
            .map_err(|e| BrokerError::Connect(e.to_string()))?;

        let channel = match connection.create_channel().await {
            Ok(channel) => channel,
            Err(e) => {
                if let Err(close_err) = connection.close(200, "channel setup failed").await {
                    debug!("Error closing broker connection: {}", close_err);
                }
                return Err(BrokerError::Connect(e.to_string()));
            }
        };

        let (tx, rx) = oneshot::channel();
        let tx = Mutex::new(Some(tx));
        connection.on_error(move |err| {
            if let Some(tx) = tx.lock().take() {
                let _ = tx.send(BrokerError::Closed(err.to_string()));
            }
        });

        Ok(BrokerLink {
            channel: Arc::new(AmqpChannel {
                connection,
                channel,
            }),
            closed: rx,
        })
    }
}

pub struct AmqpChannel {
    connection: Connection,
    channel: Channel,
}

#[async_trait]
impl BrokerChannel for AmqpChannel {
    async fn declare_queue(&self, queue: &str) -> Result<(), BrokerError> {
        self.channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
        Ok(())
    }

    async fn set_prefetch(&self, credit: u16) -> Result<(), BrokerError> {
        self.channel
            .basic_qos(credit, BasicQosOptions::default())
            .await?;
        Ok(())
    }

    async fn consume(
        &self,
        queue: &str,
        consumer_tag: &str,
    ) -> Result<DeliveryStream, BrokerError> {
        let consumer = self
            .channel
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        let stream = consumer.map(|item| {
            item.map(|delivery| {
                Delivery::new(
                    delivery.data,
                    delivery.redelivered,
                    Box::new(AmqpAcker(delivery.acker)),
                )
            })
            .map_err(BrokerError::from)
        });

        Ok(stream.boxed())
    }

    async fn publish(&self, queue: &str, payload: &[u8]) -> Result<(), BrokerError> {
        let properties = BasicProperties::default()
            .with_delivery_mode(DELIVERY_MODE_PERSISTENT)
            .with_content_type("application/json".into());

        self.channel
            .basic_publish("", queue, BasicPublishOptions::default(), payload, properties)
            .await?
            .await?;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.connection.status().connected() && self.channel.status().connected()
    }

    async fn close(&self) -> Result<(), BrokerError> {
        if self.channel.status().connected() {
            self.channel.close(200, "shutdown").await?;
        }
        if self.connection.status().connected() {
            self.connection.close(200, "shutdown").await?;
        }
        Ok(())
    }
}

struct AmqpAcker(lapin::acker::Acker);

#[async_trait]
impl Acknowledger for AmqpAcker {
    async fn ack(&self) -> Result<(), BrokerError> {
        self.0
            .ack(BasicAckOptions::default())
            .await
            .map(|_| ())
            .map_err(BrokerError::from)
    }

    async fn reject(&self, requeue: bool) -> Result<(), BrokerError> {
        self.0
            .nack(BasicNackOptions {
                multiple: false,
                requeue,
            })
            .await
            .map(|_| ())
            .map_err(BrokerError::from)
    }
}
