//! Presence Registry
//!
//! Tracks which users have live websocket connections and pushes events to
//! every live connection of a user. The user -> connections map and the
//! connection -> user map live behind one lock and are only changed together.
//!
//! State is process-local; instances of the service do not share presence.

use crate::metrics;
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

/// Identifier of one live connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Event pushed to a connection; sent to the client as `{"event", "data"}`
#[derive(Debug, Clone, PartialEq, Serialize, actix::Message)]
#[rtype(result = "()")]
pub struct PresenceEvent {
    pub event: String,
    pub data: Value,
}

impl PresenceEvent {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }
}

/// Sending half of a connection's event queue
///
/// The connection is live while its receiver exists.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    sender: mpsc::UnboundedSender<PresenceEvent>,
}

impl ConnectionHandle {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PresenceEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self {
                id: ConnectionId::new(),
                sender,
            },
            receiver,
        )
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn is_live(&self) -> bool {
        !self.sender.is_closed()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceStats {
    pub total_connections: usize,
    pub connected_users: usize,
}

#[derive(Default)]
struct PresenceMaps {
    users: HashMap<String, HashSet<ConnectionId>>,
    connections: HashMap<ConnectionId, (String, ConnectionHandle)>,
}

impl PresenceMaps {
    /// Remove a connection from both maps, dropping the user entry once empty
    fn detach(&mut self, id: ConnectionId) -> Option<String> {
        let (user_id, _) = self.connections.remove(&id)?;
        if let Some(set) = self.users.get_mut(&user_id) {
            set.remove(&id);
            if set.is_empty() {
                self.users.remove(&user_id);
            }
        }
        Some(user_id)
    }
}

#[derive(Default)]
pub struct PresenceRegistry {
    maps: RwLock<PresenceMaps>,
}

/// Canonical form of a user identifier
pub fn normalize_user_id(user_id: &str) -> String {
    user_id.trim().to_string()
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection for a user
    ///
    /// Registering the same pair again changes nothing. A connection already
    /// registered for another user is moved. Returns the normalized user id,
    /// or `None` when it is blank or the connection has already gone away.
    pub async fn register(&self, user_id: &str, handle: ConnectionHandle) -> Option<String> {
        let user_id = normalize_user_id(user_id);
        if user_id.is_empty() {
            return None;
        }
        if !handle.is_live() {
            debug!(user_id = %user_id, connection_id = %handle.id(), "Connection closed before registering");
            return None;
        }

        let mut maps = self.maps.write().await;
        let id = handle.id();
        let previous = maps.connections.get(&id).map(|(user, _)| user.clone());
        if previous.as_deref() != Some(user_id.as_str()) {
            if previous.is_some() {
                maps.detach(id);
            }
            maps.users.entry(user_id.clone()).or_default().insert(id);
            maps.connections.insert(id, (user_id.clone(), handle));
        }
        let total = maps.connections.len();
        let count = maps.users.get(&user_id).map(|s| s.len()).unwrap_or(0);
        drop(maps);

        metrics::set_presence_connections(total);
        info!(
            user_id = %user_id,
            connection_id = %id,
            connections = count,
            "User registered"
        );
        Some(user_id)
    }

    /// Forget a connection; returns the user it belonged to
    pub async fn unregister(&self, id: ConnectionId) -> Option<String> {
        let mut maps = self.maps.write().await;
        let user_id = maps.detach(id);
        let total = maps.connections.len();
        drop(maps);

        metrics::set_presence_connections(total);
        if let Some(user_id) = &user_id {
            debug!(user_id = %user_id, connection_id = %id, "Connection unregistered");
        }
        user_id
    }

    /// Push an event to every live connection of a user
    ///
    /// Connections found dead are removed. Returns true when at least one
    /// live connection received the event.
    pub async fn emit_to_user(&self, user_id: &str, event: &str, data: Value) -> bool {
        let user_id = normalize_user_id(user_id);
        let message = PresenceEvent::new(event, data);

        let mut delivered = 0usize;
        let mut stale = Vec::new();
        {
            let maps = self.maps.read().await;
            let Some(ids) = maps.users.get(&user_id) else {
                debug!(
                    user_id = %user_id,
                    "User not connected, notification will be available on next fetch"
                );
                return false;
            };
            for id in ids {
                let Some((_, handle)) = maps.connections.get(id) else {
                    continue;
                };
                if handle.sender.send(message.clone()).is_ok() {
                    delivered += 1;
                } else {
                    stale.push(*id);
                }
            }
        }

        if !stale.is_empty() {
            let mut maps = self.maps.write().await;
            for id in stale {
                let dead = maps
                    .connections
                    .get(&id)
                    .map(|(_, handle)| !handle.is_live())
                    .unwrap_or(false);
                if dead {
                    maps.detach(id);
                }
            }
            metrics::set_presence_connections(maps.connections.len());
        }

        if delivered > 0 {
            info!(
                user_id = %user_id,
                event,
                connections = delivered,
                "Emitted event to user"
            );
        }
        delivered > 0
    }

    pub async fn connection_count(&self, user_id: &str) -> usize {
        let user_id = normalize_user_id(user_id);
        let maps = self.maps.read().await;
        maps.users.get(&user_id).map(|s| s.len()).unwrap_or(0)
    }

    pub async fn is_connected(&self, user_id: &str) -> bool {
        self.connection_count(user_id).await > 0
    }

    pub async fn total_connections(&self) -> usize {
        self.maps.read().await.connections.len()
    }

    pub async fn connected_users(&self) -> usize {
        self.maps.read().await.users.len()
    }

    pub async fn stats(&self) -> PresenceStats {
        let maps = self.maps.read().await;
        PresenceStats {
            total_connections: maps.connections.len(),
            connected_users: maps.users.len(),
        }
    }
}
