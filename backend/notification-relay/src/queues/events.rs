//! Event types carried by each queue

use super::QueueEvent;
use crate::error::EnvelopeError;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Map, Value};

pub const FAVORITE_QUEUE: &str = "favorite_notifications";
pub const MESSAGE_QUEUE: &str = "message_notifications";

pub const PROPERTY_FAVORITED: &str = "PROPERTY_FAVORITED";
pub const NEW_MESSAGE: &str = "NEW_MESSAGE";

/// Placeholder owner email used by publishers that do not know it
pub const PLACEHOLDER_EMAIL: &str = "no-email@example.com";
pub const UNKNOWN_OWNER: &str = "unknown";

#[derive(Debug, Clone, PartialEq)]
pub enum FavoriteEvent {
    PropertyFavorited(PropertyFavorited),
}

impl QueueEvent for FavoriteEvent {
    const QUEUE: &'static str = FAVORITE_QUEUE;

    fn decode(kind: &str, data: Value) -> Result<Self, EnvelopeError> {
        match kind {
            PROPERTY_FAVORITED => serde_json::from_value(data)
                .map(FavoriteEvent::PropertyFavorited)
                .map_err(|e| EnvelopeError::InvalidData {
                    kind: PROPERTY_FAVORITED,
                    reason: e.to_string(),
                }),
            other => Err(EnvelopeError::UnknownType {
                queue: Self::QUEUE,
                kind: other.to_string(),
            }),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            FavoriteEvent::PropertyFavorited(_) => PROPERTY_FAVORITED,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MessageEvent {
    NewMessage(NewMessage),
}

impl QueueEvent for MessageEvent {
    const QUEUE: &'static str = MESSAGE_QUEUE;

    fn decode(kind: &str, data: Value) -> Result<Self, EnvelopeError> {
        match kind {
            NEW_MESSAGE => serde_json::from_value(data)
                .map(MessageEvent::NewMessage)
                .map_err(|e| EnvelopeError::InvalidData {
                    kind: NEW_MESSAGE,
                    reason: e.to_string(),
                }),
            other => Err(EnvelopeError::UnknownType {
                queue: Self::QUEUE,
                kind: other.to_string(),
            }),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            MessageEvent::NewMessage(_) => NEW_MESSAGE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyFavorited {
    #[serde(deserialize_with = "id_string")]
    pub property_id: String,
    pub property_title: String,
    pub favorited_by: String,
    #[serde(default)]
    pub favorited_by_email: Option<String>,
    #[serde(default, deserialize_with = "opt_id_string")]
    pub property_owner_id: Option<String>,
    #[serde(default)]
    pub property_owner_email: Option<String>,
    /// Publisher fields we do not interpret, kept for the stored record
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PropertyFavorited {
    /// User the notification belongs to
    ///
    /// The owner email wins unless it is missing or a placeholder; then the
    /// owner id, then `"unknown"`.
    pub fn owner(&self) -> String {
        let email = non_empty(&self.property_owner_email)
            .filter(|e| *e != PLACEHOLDER_EMAIL && *e != UNKNOWN_OWNER);
        let owner = email
            .or_else(|| non_empty(&self.property_owner_id))
            .unwrap_or(UNKNOWN_OWNER);
        owner.trim().to_string()
    }

    pub fn message(&self) -> String {
        format!(
            "{} likes your property \"{}\"",
            self.favorited_by, self.property_title
        )
    }

    /// Record data: the event fields with missing owner fields set to `owner`
    pub fn record_data(&self, owner: &str) -> Value {
        let mut data = self.extra.clone();
        data.insert("propertyId".into(), json!(self.property_id));
        data.insert("propertyTitle".into(), json!(self.property_title));
        data.insert("favoritedBy".into(), json!(self.favorited_by));
        if let Some(email) = &self.favorited_by_email {
            data.insert("favoritedByEmail".into(), json!(email));
        }
        data.insert(
            "propertyOwnerEmail".into(),
            json!(non_empty(&self.property_owner_email).unwrap_or(owner)),
        );
        data.insert(
            "propertyOwnerId".into(),
            json!(non_empty(&self.property_owner_id).unwrap_or(owner)),
        );
        Value::Object(data)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessage {
    #[serde(deserialize_with = "id_string")]
    pub recipient_id: String,
    #[serde(default)]
    pub recipient_email: Option<String>,
    pub sender_name: String,
    pub content: String,
    #[serde(default, deserialize_with = "opt_id_string")]
    pub sender_id: Option<String>,
    #[serde(default, deserialize_with = "opt_id_string")]
    pub conversation_id: Option<String>,
    #[serde(default, deserialize_with = "opt_id_string")]
    pub message_id: Option<String>,
}

const PREVIEW_CHARS: usize = 50;

impl NewMessage {
    pub fn preview(&self) -> String {
        if self.content.chars().count() > PREVIEW_CHARS {
            let head: String = self.content.chars().take(PREVIEW_CHARS).collect();
            format!("{}...", head)
        } else {
            self.content.clone()
        }
    }

    pub fn message(&self) -> String {
        format!("{} sent you a message: \"{}\"", self.sender_name, self.preview())
    }

    pub fn record_data(&self) -> Value {
        json!({
            "messageId": self.message_id,
            "conversationId": self.conversation_id,
            "senderId": self.sender_id,
            "senderName": self.sender_name,
            "content": self.content,
        })
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}

/// Identifiers arrive as strings or numbers depending on the publisher
fn id_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number id, got {}",
            other
        ))),
    }
}

fn opt_id_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s)),
        Value::Number(n) => Ok(Some(n.to_string())),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number id, got {}",
            other
        ))),
    }
}
