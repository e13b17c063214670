pub mod broker;
pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod models;
pub mod presence;
pub mod queues;
pub mod relay;
pub mod services;
pub mod state;
pub mod websocket;

pub use config::Config;
pub use error::{AppError, Result};
pub use presence::PresenceRegistry;
pub use relay::Relay;
pub use state::AppState;
