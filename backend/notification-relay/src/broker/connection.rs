//! Broker Connection Manager
//!
//! Owns the single shared broker channel of the process. Callers ask for a
//! channel with `get_channel()`; when the broker drops the connection a
//! supervisor task retries at a fixed delay up to a ceiling and then leaves
//! the manager `Degraded` until a caller asks again.

use super::{BrokerChannel, BrokerConnector};
use crate::config::BrokerConfig;
use crate::error::BrokerError;
use crate::metrics;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex as AsyncMutex};
use tracing::{debug, error, info, warn};

/// Lifecycle of the shared broker connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Closed by the broker or by shutdown
    Closed,
    /// Last connect attempt failed
    Errored,
    /// Reconnect ceiling reached; only explicit `get_channel()` calls retry
    Degraded,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Closed => "closed",
            ConnectionState::Errored => "errored",
            ConnectionState::Degraded => "degraded",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
struct Status {
    state: ConnectionState,
    attempts: u32,
}

pub struct BrokerConnectionManager {
    connector: Arc<dyn BrokerConnector>,
    config: BrokerConfig,
    /// Held across connect attempts so they never overlap
    channel: AsyncMutex<Option<Arc<dyn BrokerChannel>>>,
    status: Mutex<Status>,
    /// Bumped on every successful connect; close signals from older links are ignored
    generation: AtomicU64,
    supervisor_running: AtomicBool,
    shutting_down: AtomicBool,
}

impl BrokerConnectionManager {
    pub fn new(connector: Arc<dyn BrokerConnector>, config: BrokerConfig) -> Arc<Self> {
        Arc::new(Self {
            connector,
            config,
            channel: AsyncMutex::new(None),
            status: Mutex::new(Status {
                state: ConnectionState::Disconnected,
                attempts: 0,
            }),
            generation: AtomicU64::new(0),
            supervisor_running: AtomicBool::new(false),
            shutting_down: AtomicBool::new(false),
        })
    }

    pub fn state(&self) -> ConnectionState {
        self.status.lock().state
    }

    /// Consecutive automatic reconnect attempts since the last success
    pub fn reconnect_attempts(&self) -> u32 {
        self.status.lock().attempts
    }

    pub fn max_reconnect_attempts(&self) -> u32 {
        self.config.max_reconnect_attempts
    }

    /// Return the live channel, connecting first if there is none
    ///
    /// Makes at most one connect attempt. On failure the background
    /// supervisor is scheduled unless the manager is already `Degraded`.
    pub async fn get_channel(self: &Arc<Self>) -> Result<Arc<dyn BrokerChannel>, BrokerError> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(BrokerError::Unavailable("broker manager is shut down".into()));
        }

        let mut slot = self.channel.lock().await;
        if let Some(channel) = slot.as_ref() {
            if channel.is_open() {
                return Ok(channel.clone());
            }
        }
        discard_stale(&mut slot).await;

        let degraded = self.state() == ConnectionState::Degraded;
        let fallback = if degraded {
            ConnectionState::Degraded
        } else {
            ConnectionState::Disconnected
        };

        match self.connect_locked(&mut slot, fallback).await {
            Ok(channel) => Ok(channel),
            Err(e) => {
                drop(slot);
                if !degraded {
                    self.spawn_supervisor();
                }
                Err(BrokerError::Unavailable(e.to_string()))
            }
        }
    }

    /// Declare `queue` and publish a persistent message to it
    pub async fn publish(self: &Arc<Self>, queue: &str, payload: &[u8]) -> Result<(), BrokerError> {
        let channel = self.get_channel().await?;
        channel.declare_queue(queue).await?;
        channel.publish(queue, payload).await
    }

    /// Close the channel and connection; no reconnection follows
    pub async fn close(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        let mut slot = self.channel.lock().await;
        if let Some(channel) = slot.take() {
            self.transition(ConnectionState::Closed);
            if let Err(e) = channel.close().await {
                error!("Error closing broker connection: {}", e);
            }
        }
        self.transition(ConnectionState::Disconnected);
        info!("Broker connections closed");
    }

    async fn connect_locked(
        self: &Arc<Self>,
        slot: &mut Option<Arc<dyn BrokerChannel>>,
        fallback: ConnectionState,
    ) -> Result<Arc<dyn BrokerChannel>, BrokerError> {
        self.transition(ConnectionState::Connecting);
        info!("Connecting to broker: {}", self.config.redacted_url());

        match self.connector.connect().await {
            Ok(link) => {
                let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
                {
                    let mut status = self.status.lock();
                    status.attempts = 0;
                }
                self.transition(ConnectionState::Connected);
                metrics::record_broker_connect("success");
                info!("Broker connected: {}", self.config.redacted_url());

                *slot = Some(link.channel.clone());
                self.spawn_close_watcher(link.closed, generation);
                Ok(link.channel)
            }
            Err(e) => {
                metrics::record_broker_connect("failure");
                error!("Failed to connect to broker: {}", e);
                if let Some(hint) = e.hint() {
                    error!("  -> {}", hint);
                }
                self.transition(ConnectionState::Errored);
                self.transition(fallback);
                Err(e)
            }
        }
    }

    fn spawn_close_watcher(self: &Arc<Self>, closed: oneshot::Receiver<BrokerError>, generation: u64) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            // Err means the sender was dropped by our own close
            let Ok(reason) = closed.await else {
                return;
            };
            manager.on_connection_lost(reason, generation).await;
        });
    }

    async fn on_connection_lost(self: &Arc<Self>, reason: BrokerError, generation: u64) {
        if self.shutting_down.load(Ordering::SeqCst) {
            return;
        }

        {
            let mut slot = self.channel.lock().await;
            if self.generation.load(Ordering::SeqCst) != generation {
                return;
            }
            *slot = None;
        }

        warn!("Broker connection closed ({}). Attempting to reconnect...", reason);
        self.transition(ConnectionState::Closed);
        self.transition(ConnectionState::Disconnected);
        self.spawn_supervisor();
    }

    fn spawn_supervisor(self: &Arc<Self>) {
        if self.supervisor_running.swap(true, Ordering::SeqCst) {
            return;
        }
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            manager.supervise().await;
        });
    }

    async fn supervise(self: Arc<Self>) {
        let delay = self.config.reconnect_delay();
        let max = self.config.max_reconnect_attempts;

        loop {
            tokio::time::sleep(delay).await;

            if self.shutting_down.load(Ordering::SeqCst) {
                break;
            }

            let mut slot = self.channel.lock().await;
            if slot.as_ref().map(|c| c.is_open()).unwrap_or(false) {
                break;
            }
            discard_stale(&mut slot).await;

            let attempt = {
                let mut status = self.status.lock();
                status.attempts += 1;
                status.attempts
            };
            info!("Reconnection attempt {}/{}", attempt, max);

            match self
                .connect_locked(&mut slot, ConnectionState::Disconnected)
                .await
            {
                Ok(_) => break,
                Err(e) => {
                    if attempt >= max {
                        self.transition(ConnectionState::Degraded);
                        error!(
                            "Max reconnection attempts reached ({}). Broker is not available; \
                             the service keeps running but notifications will not be consumed",
                            max
                        );
                        break;
                    }
                    warn!(
                        "Reconnection attempt {} failed: {}. Retrying in {:?}",
                        attempt, e, delay
                    );
                }
            }
        }

        self.supervisor_running.store(false, Ordering::SeqCst);
    }

    fn transition(&self, next: ConnectionState) {
        let mut status = self.status.lock();
        if status.state != next {
            info!("Broker connection state: {} -> {}", status.state, next);
            status.state = next;
        }
    }
}

/// Close a channel that stopped being usable so its connection is not left open
async fn discard_stale(slot: &mut Option<Arc<dyn BrokerChannel>>) {
    if let Some(stale) = slot.take() {
        warn!("Broker channel is no longer open, closing its connection");
        if let Err(e) = stale.close().await {
            debug!("Error closing stale broker connection: {}", e);
        }
    }
}
