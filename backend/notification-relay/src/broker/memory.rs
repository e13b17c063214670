//! In-process broker
//!
//! Implements durable queues with per-consumer credit, manual
//! acknowledgment and requeue-on-channel-loss. Selected with
//! `RABBITMQ_URL=memory://` for offline runs; tests drive it to
//! simulate outages.

use super::{Acknowledger, BrokerChannel, BrokerConnector, BrokerLink, Delivery, DeliveryStream};
use crate::error::BrokerError;
use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU16, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{oneshot, Notify};
use tokio::time::Instant;

#[derive(Clone, Default)]
pub struct MemoryBroker {
    shared: Arc<Shared>,
}

#[derive(Default)]
struct Shared {
    state: Mutex<BrokerState>,
    notify: Notify,
}

#[derive(Default)]
struct BrokerState {
    queues: HashMap<String, MemoryQueue>,
    channels: HashMap<u64, ChannelEntry>,
    next_channel_id: u64,
    next_tag: u64,
    unavailable: bool,
    failures_remaining: u32,
    connect_attempts: Vec<Instant>,
    published: u64,
}

struct ChannelEntry {
    open: bool,
    closed_tx: Option<oneshot::Sender<BrokerError>>,
}

#[derive(Default)]
struct MemoryQueue {
    ready: VecDeque<StoredMessage>,
    unacked: HashMap<u64, Unacked>,
}

#[derive(Clone)]
struct StoredMessage {
    payload: Vec<u8>,
    redelivered: bool,
}

struct Unacked {
    message: StoredMessage,
    channel_id: u64,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse every connection attempt until made available again
    pub fn set_available(&self, available: bool) {
        self.shared.state.lock().unavailable = !available;
    }

    /// Refuse the next `count` connection attempts
    pub fn fail_next_connects(&self, count: u32) {
        self.shared.state.lock().failures_remaining = count;
    }

    /// Drop every open connection as if the broker went away
    ///
    /// Unacknowledged messages go back to the head of their queue flagged as
    /// redelivered, and each connection's close signal fires.
    pub fn sever(&self) {
        let mut state = self.shared.state.lock();
        let open: Vec<u64> = state
            .channels
            .iter()
            .filter(|(_, entry)| entry.open)
            .map(|(id, _)| *id)
            .collect();

        for id in open {
            close_channel(&mut state, id);
            if let Some(tx) = state
                .channels
                .get_mut(&id)
                .and_then(|entry| entry.closed_tx.take())
            {
                let _ = tx.send(BrokerError::Closed("connection reset by broker".into()));
            }
        }
        drop(state);
        self.shared.notify.notify_waiters();
    }

    /// Enqueue a raw payload without going through a connection
    pub fn publish_raw(&self, queue: &str, payload: impl Into<Vec<u8>>) {
        let mut state = self.shared.state.lock();
        state.published += 1;
        state
            .queues
            .entry(queue.to_string())
            .or_default()
            .ready
            .push_back(StoredMessage {
                payload: payload.into(),
                redelivered: false,
            });
        drop(state);
        self.shared.notify.notify_waiters();
    }

    /// Number of connection attempts, successful or not
    pub fn connect_attempts(&self) -> usize {
        self.shared.state.lock().connect_attempts.len()
    }

    /// Instants at which connection attempts were made
    pub fn connect_attempt_times(&self) -> Vec<Instant> {
        self.shared.state.lock().connect_attempts.clone()
    }

    pub fn ready_count(&self, queue: &str) -> usize {
        self.shared
            .state
            .lock()
            .queues
            .get(queue)
            .map(|q| q.ready.len())
            .unwrap_or(0)
    }

    pub fn unacked_count(&self, queue: &str) -> usize {
        self.shared
            .state
            .lock()
            .queues
            .get(queue)
            .map(|q| q.unacked.len())
            .unwrap_or(0)
    }

    pub fn queue_exists(&self, queue: &str) -> bool {
        self.shared.state.lock().queues.contains_key(queue)
    }

    /// Payloads waiting in `queue`, head first
    pub fn ready_payloads(&self, queue: &str) -> Vec<Vec<u8>> {
        self.shared
            .state
            .lock()
            .queues
            .get(queue)
            .map(|q| q.ready.iter().map(|m| m.payload.clone()).collect())
            .unwrap_or_default()
    }

    pub fn open_channels(&self) -> usize {
        self.shared
            .state
            .lock()
            .channels
            .values()
            .filter(|entry| entry.open)
            .count()
    }
}

/// Mark a channel closed and return its unacknowledged messages to their queues
fn close_channel(state: &mut BrokerState, channel_id: u64) {
    if let Some(entry) = state.channels.get_mut(&channel_id) {
        entry.open = false;
    }

    for queue in state.queues.values_mut() {
        let mut orphaned: Vec<(u64, StoredMessage)> = queue
            .unacked
            .iter()
            .filter(|(_, u)| u.channel_id == channel_id)
            .map(|(tag, u)| (*tag, u.message.clone()))
            .collect();
        if orphaned.is_empty() {
            continue;
        }
        orphaned.sort_by_key(|(tag, _)| *tag);
        for (tag, mut message) in orphaned.into_iter().rev() {
            queue.unacked.remove(&tag);
            message.redelivered = true;
            queue.ready.push_front(message);
        }
    }
}

#[async_trait]
impl BrokerConnector for MemoryBroker {
    async fn connect(&self) -> Result<BrokerLink, BrokerError> {
        let mut state = self.shared.state.lock();
        state.connect_attempts.push(Instant::now());

        if state.unavailable {
            return Err(BrokerError::Connect(
                "IO error: Connection refused (os error 111)".into(),
            ));
        }
        if state.failures_remaining > 0 {
            state.failures_remaining -= 1;
            return Err(BrokerError::Connect(
                "IO error: Connection refused (os error 111)".into(),
            ));
        }

        let id = state.next_channel_id;
        state.next_channel_id += 1;
        let (tx, rx) = oneshot::channel();
        state.channels.insert(
            id,
            ChannelEntry {
                open: true,
                closed_tx: Some(tx),
            },
        );

        Ok(BrokerLink {
            channel: Arc::new(MemoryChannel {
                shared: self.shared.clone(),
                id,
                prefetch: AtomicU16::new(0),
            }),
            closed: rx,
        })
    }
}

pub struct MemoryChannel {
    shared: Arc<Shared>,
    id: u64,
    prefetch: AtomicU16,
}

impl MemoryChannel {
    fn ensure_open(&self, state: &BrokerState) -> Result<(), BrokerError> {
        match state.channels.get(&self.id) {
            Some(entry) if entry.open => Ok(()),
            _ => Err(BrokerError::Channel("channel is closed".into())),
        }
    }
}

struct ConsumerCursor {
    shared: Arc<Shared>,
    channel_id: u64,
    queue: String,
    credit: usize,
    in_flight: Arc<AtomicUsize>,
}

#[async_trait]
impl BrokerChannel for MemoryChannel {
    async fn declare_queue(&self, queue: &str) -> Result<(), BrokerError> {
        let mut state = self.shared.state.lock();
        self.ensure_open(&state)?;
        state.queues.entry(queue.to_string()).or_default();
        Ok(())
    }

    async fn set_prefetch(&self, credit: u16) -> Result<(), BrokerError> {
        let state = self.shared.state.lock();
        self.ensure_open(&state)?;
        self.prefetch.store(credit, Ordering::SeqCst);
        Ok(())
    }

    async fn consume(
        &self,
        queue: &str,
        _consumer_tag: &str,
    ) -> Result<DeliveryStream, BrokerError> {
        {
            let state = self.shared.state.lock();
            self.ensure_open(&state)?;
            if !state.queues.contains_key(queue) {
                return Err(BrokerError::Channel(format!(
                    "NOT_FOUND - no queue '{}'",
                    queue
                )));
            }
        }

        let cursor = ConsumerCursor {
            shared: self.shared.clone(),
            channel_id: self.id,
            queue: queue.to_string(),
            credit: self.prefetch.load(Ordering::SeqCst) as usize,
            in_flight: Arc::new(AtomicUsize::new(0)),
        };

        let stream = futures::stream::unfold(cursor, |cursor| async move {
            loop {
                let shared = cursor.shared.clone();
                let notified = shared.notify.notified();
                {
                    let mut guard = shared.state.lock();
                    let state = &mut *guard;
                    let open = state
                        .channels
                        .get(&cursor.channel_id)
                        .map(|entry| entry.open)
                        .unwrap_or(false);
                    if !open {
                        return None;
                    }

                    let has_credit = cursor.credit == 0
                        || cursor.in_flight.load(Ordering::SeqCst) < cursor.credit;
                    if has_credit {
                        let tag = state.next_tag;
                        if let Some(queue) = state.queues.get_mut(&cursor.queue) {
                            if let Some(message) = queue.ready.pop_front() {
                                queue.unacked.insert(
                                    tag,
                                    Unacked {
                                        message: message.clone(),
                                        channel_id: cursor.channel_id,
                                    },
                                );
                                state.next_tag += 1;
                                cursor.in_flight.fetch_add(1, Ordering::SeqCst);

                                let acker = MemoryAcker {
                                    shared: cursor.shared.clone(),
                                    queue: cursor.queue.clone(),
                                    tag,
                                    in_flight: cursor.in_flight.clone(),
                                };
                                let delivery = Delivery::new(
                                    message.payload,
                                    message.redelivered,
                                    Box::new(acker),
                                );
                                drop(guard);
                                return Some((Ok(delivery), cursor));
                            }
                        }
                    }
                }
                notified.await;
            }
        });

        Ok(stream.boxed())
    }

    async fn publish(&self, queue: &str, payload: &[u8]) -> Result<(), BrokerError> {
        {
            let mut state = self.shared.state.lock();
            self.ensure_open(&state)?;
            state.published += 1;
            state
                .queues
                .entry(queue.to_string())
                .or_default()
                .ready
                .push_back(StoredMessage {
                    payload: payload.to_vec(),
                    redelivered: false,
                });
        }
        self.shared.notify.notify_waiters();
        Ok(())
    }

    fn is_open(&self) -> bool {
        let state = self.shared.state.lock();
        self.ensure_open(&state).is_ok()
    }

    async fn close(&self) -> Result<(), BrokerError> {
        {
            let mut state = self.shared.state.lock();
            close_channel(&mut state, self.id);
            // caller-initiated: drop the sender without signalling
            if let Some(entry) = state.channels.get_mut(&self.id) {
                entry.closed_tx.take();
            }
        }
        self.shared.notify.notify_waiters();
        Ok(())
    }
}

struct MemoryAcker {
    shared: Arc<Shared>,
    queue: String,
    tag: u64,
    in_flight: Arc<AtomicUsize>,
}

impl MemoryAcker {
    fn settle(&self, requeue: bool) -> Result<(), BrokerError> {
        {
            let mut state = self.shared.state.lock();
            let queue = state
                .queues
                .get_mut(&self.queue)
                .ok_or_else(|| BrokerError::Channel(format!("no queue '{}'", self.queue)))?;
            let entry = queue.unacked.remove(&self.tag).ok_or_else(|| {
                BrokerError::Channel(format!("PRECONDITION_FAILED - unknown delivery tag {}", self.tag))
            })?;
            if requeue {
                let mut message = entry.message;
                message.redelivered = true;
                queue.ready.push_front(message);
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
        self.shared.notify.notify_waiters();
        Ok(())
    }
}

#[async_trait]
impl Acknowledger for MemoryAcker {
    async fn ack(&self) -> Result<(), BrokerError> {
        self.settle(false)
    }

    async fn reject(&self, requeue: bool) -> Result<(), BrokerError> {
        self.settle(requeue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn connect(broker: &MemoryBroker) -> Arc<dyn BrokerChannel> {
        broker.connect().await.unwrap().channel
    }

    #[tokio::test]
    async fn test_credit_limits_in_flight_deliveries() {
        let broker = MemoryBroker::new();
        let channel = connect(&broker).await;
        channel.declare_queue("q").await.unwrap();
        channel.set_prefetch(1).await.unwrap();
        broker.publish_raw("q", "one");
        broker.publish_raw("q", "two");

        let mut stream = channel.consume("q", "c").await.unwrap();
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.payload, b"one");

        let blocked = tokio::time::timeout(Duration::from_millis(50), stream.next()).await;
        assert!(blocked.is_err(), "second delivery must wait for the first ack");
        assert_eq!(broker.unacked_count("q"), 1);
        assert_eq!(broker.ready_count("q"), 1);

        first.ack().await.unwrap();
        let second = stream.next().await.unwrap().unwrap();
        assert_eq!(second.payload, b"two");
    }

    #[tokio::test]
    async fn test_reject_with_requeue_redelivers() {
        let broker = MemoryBroker::new();
        let channel = connect(&broker).await;
        channel.declare_queue("q").await.unwrap();
        channel.set_prefetch(1).await.unwrap();
        broker.publish_raw("q", "poison");

        let mut stream = channel.consume("q", "c").await.unwrap();
        let first = stream.next().await.unwrap().unwrap();
        assert!(!first.redelivered);
        first.reject(true).await.unwrap();

        let again = stream.next().await.unwrap().unwrap();
        assert!(again.redelivered);
        again.reject(false).await.unwrap();
        assert_eq!(broker.ready_count("q"), 0);
        assert_eq!(broker.unacked_count("q"), 0);
    }

    #[tokio::test]
    async fn test_sever_requeues_unacked_and_signals_close() {
        let broker = MemoryBroker::new();
        let link = broker.connect().await.unwrap();
        link.channel.declare_queue("q").await.unwrap();
        link.channel.set_prefetch(1).await.unwrap();
        broker.publish_raw("q", "in-flight");

        let mut stream = link.channel.consume("q", "c").await.unwrap();
        let delivery = stream.next().await.unwrap().unwrap();

        broker.sever();

        assert!(link.closed.await.is_ok());
        assert!(!link.channel.is_open());
        assert!(stream.next().await.is_none());
        assert!(delivery.ack().await.is_err());
        assert_eq!(broker.ready_count("q"), 1);
    }

    #[tokio::test]
    async fn test_caller_close_does_not_signal() {
        let broker = MemoryBroker::new();
        let link = broker.connect().await.unwrap();
        link.channel.close().await.unwrap();
        assert!(link.closed.await.is_err());
        assert_eq!(broker.open_channels(), 0);
    }

    #[tokio::test]
    async fn test_unavailable_broker_refuses_connections() {
        let broker = MemoryBroker::new();
        broker.set_available(false);
        assert!(broker.connect().await.is_err());
        broker.set_available(true);
        assert!(broker.connect().await.is_ok());
        assert_eq!(broker.connect_attempts(), 2);
    }
}
