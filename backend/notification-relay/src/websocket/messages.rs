//! Websocket frames exchanged with clients
//!
//! Every frame is a JSON object `{"event": <name>, "data": <payload>}`.
//! Server pushes reuse `PresenceEvent`, which serializes the same way.

use crate::presence::PresenceEvent;
use serde::Deserialize;
use serde_json::{json, Value};

pub const REGISTER_EVENT: &str = "register";
pub const REGISTERED_EVENT: &str = "registered";

#[derive(Debug, Deserialize)]
struct RawFrame {
    event: String,
    #[serde(default)]
    data: Value,
}

/// Frames a client may send
#[derive(Debug, Clone, PartialEq)]
pub enum ClientFrame {
    /// Bind this connection to a user; `None` when no usable id was sent
    Register(Option<String>),
    Unknown(String),
}

impl ClientFrame {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let raw: RawFrame = serde_json::from_str(text)?;
        Ok(match raw.event.as_str() {
            REGISTER_EVENT => ClientFrame::Register(user_identifier(&raw.data)),
            _ => ClientFrame::Unknown(raw.event),
        })
    }
}

/// User ids arrive as strings or numbers depending on the client
fn user_identifier(data: &Value) -> Option<String> {
    let id = match data {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!id.is_empty()).then_some(id)
}

/// Acknowledgement sent after a successful `register`
pub fn registered(user_id: &str) -> PresenceEvent {
    PresenceEvent::new(
        REGISTERED_EVENT,
        json!({
            "userId": user_id,
            "success": true,
        }),
    )
}
