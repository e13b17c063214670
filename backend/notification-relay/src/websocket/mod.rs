//! Websocket transport for real-time notifications
//!
//! Clients connect to `/ws`, send `register` with their user id, and then
//! receive every event emitted to that user through the presence registry.

pub mod messages;
pub mod session;

pub use messages::ClientFrame;
pub use session::NotificationSession;
