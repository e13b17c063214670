use crate::broker::BrokerConnectionManager;
use crate::config::WebSocketConfig;
use crate::presence::PresenceRegistry;
use crate::services::NotificationStore;
use std::sync::Arc;

/// Shared handles given to every HTTP and websocket handler
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn NotificationStore>,
    pub broker: Arc<BrokerConnectionManager>,
    pub presence: Arc<PresenceRegistry>,
    pub websocket: WebSocketConfig,
}
