//! Service assembly
//!
//! Wires the broker manager, presence registry, dispatcher and the two
//! queue consumers together, and tears them down on shutdown.

use crate::broker::{AmqpConnector, BrokerConnectionManager, BrokerConnector, MemoryBroker};
use crate::config::Config;
use crate::presence::PresenceRegistry;
use crate::queues::{FavoriteEvent, MessageEvent, QueueConsumer};
use crate::services::{NotificationDispatcher, NotificationStore};
use crate::state::AppState;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

pub const MEMORY_BROKER_SCHEME: &str = "memory://";

/// Pick the broker implementation from the configured URL
pub fn connector_for(url: &str) -> Arc<dyn BrokerConnector> {
    if url.starts_with(MEMORY_BROKER_SCHEME) {
        info!("Using in-process broker");
        Arc::new(MemoryBroker::new())
    } else {
        Arc::new(AmqpConnector::new(url))
    }
}

pub struct Relay {
    pub state: AppState,
    consumers: Vec<JoinHandle<()>>,
}

impl Relay {
    /// Build the shared state and start consuming both queues
    ///
    /// Must be called inside a Tokio runtime. Consumers attach lazily and
    /// keep retrying while the broker is unreachable.
    pub fn start(
        config: &Config,
        connector: Arc<dyn BrokerConnector>,
        store: Arc<dyn NotificationStore>,
    ) -> Self {
        let broker = BrokerConnectionManager::new(connector, config.broker.clone());
        let presence = Arc::new(PresenceRegistry::new());
        let dispatcher = Arc::new(NotificationDispatcher::new(store.clone(), presence.clone()));

        let favorites = QueueConsumer::<FavoriteEvent, _>::new(
            broker.clone(),
            dispatcher.clone(),
            config.consumer.clone(),
        );
        let messages = QueueConsumer::<MessageEvent, _>::new(
            broker.clone(),
            dispatcher,
            config.consumer.clone(),
        );
        let consumers = vec![favorites.spawn(), messages.spawn()];
        info!(
            queues = ?[favorites.queue(), messages.queue()],
            "Queue consumers started"
        );

        Self {
            state: AppState {
                store,
                broker,
                presence,
                websocket: config.websocket.clone(),
            },
            consumers,
        }
    }

    /// Stop consumers and close the broker connection
    ///
    /// A message mid-processing is left unacknowledged and will be
    /// redelivered to the next consumer.
    pub async fn shutdown(self) {
        for consumer in &self.consumers {
            consumer.abort();
        }
        self.state.broker.close().await;
        info!("Notification relay stopped");
    }
}
