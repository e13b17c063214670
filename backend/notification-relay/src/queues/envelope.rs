use super::QueueEvent;
use crate::error::EnvelopeError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::debug;

/// Wire unit published to a queue: `{"type", "data", "timestamp"}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
    /// Informational only; values that are not a recognizable time become `None`
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_timestamp"
    )]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Accepts RFC 3339 strings and epoch milliseconds
fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Value::deserialize(deserializer)?;
    let parsed = match &raw {
        Value::Null => return Ok(None),
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|t| t.with_timezone(&Utc)),
        Value::Number(n) => n.as_i64().and_then(DateTime::<Utc>::from_timestamp_millis),
        _ => None,
    };
    if parsed.is_none() {
        debug!(timestamp = %raw, "Ignoring unrecognized envelope timestamp");
    }
    Ok(parsed)
}

impl Envelope {
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            data,
            timestamp: Some(Utc::now()),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, EnvelopeError> {
        serde_json::to_vec(self).map_err(|e| EnvelopeError::Malformed(e.to_string()))
    }

    pub fn parse(payload: &[u8]) -> Result<Self, EnvelopeError> {
        let envelope: Envelope =
            serde_json::from_slice(payload).map_err(|e| EnvelopeError::Malformed(e.to_string()))?;
        if !envelope.data.is_object() {
            return Err(EnvelopeError::Malformed("data must be an object".into()));
        }
        Ok(envelope)
    }

    /// Parse a raw payload straight into the queue's event type
    pub fn decode<E: QueueEvent>(payload: &[u8]) -> Result<E, EnvelopeError> {
        let envelope = Self::parse(payload)?;
        E::decode(&envelope.kind, envelope.data)
    }
}
