use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;
use uuid::Uuid;

/// Notification type enumeration
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationType {
    PropertyFavorited,
    PropertyBooked,
    NewMessage,
    PropertyApproved,
    ReviewReceived,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::PropertyFavorited => "PROPERTY_FAVORITED",
            NotificationType::PropertyBooked => "PROPERTY_BOOKED",
            NotificationType::NewMessage => "NEW_MESSAGE",
            NotificationType::PropertyApproved => "PROPERTY_APPROVED",
            NotificationType::ReviewReceived => "REVIEW_RECEIVED",
        }
    }
}

impl FromStr for NotificationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PROPERTY_FAVORITED" => Ok(NotificationType::PropertyFavorited),
            "PROPERTY_BOOKED" => Ok(NotificationType::PropertyBooked),
            "NEW_MESSAGE" => Ok(NotificationType::NewMessage),
            "PROPERTY_APPROVED" => Ok(NotificationType::PropertyApproved),
            "REVIEW_RECEIVED" => Ok(NotificationType::ReviewReceived),
            other => Err(format!("unknown notification type: {}", other)),
        }
    }
}

/// Persisted notification record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: Uuid,
    pub user_id: String,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub title: String,
    pub message: String,
    pub data: Value,
    pub read: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub visited: bool,
    pub visited_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Notification {
    /// A record belongs to a user through its `userId` or the property owner
    /// fields in `data`
    pub fn is_owned_by(&self, user_id: &str) -> bool {
        let user_id = user_id.trim();
        self.user_id == user_id
            || data_field_matches(&self.data, "propertyOwnerEmail", user_id)
            || data_field_matches(&self.data, "propertyOwnerId", user_id)
    }

    /// Read filter used by listings: `read` and `visited` must both match
    pub fn matches_read_filter(&self, read: Option<bool>) -> bool {
        match read {
            Some(flag) => self.read == flag && self.visited == flag,
            None => true,
        }
    }
}

/// Compares string and numeric JSON values against their text form
fn data_field_matches(data: &Value, field: &str, user_id: &str) -> bool {
    match data.get(field) {
        Some(Value::String(s)) => s == user_id,
        Some(Value::Number(n)) => n.to_string() == user_id,
        _ => false,
    }
}

/// Input for creating a notification
#[derive(Debug, Clone, PartialEq)]
pub struct NewNotification {
    pub user_id: String,
    pub notification_type: NotificationType,
    pub title: String,
    pub message: String,
    pub data: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListOptions {
    pub limit: i64,
    pub skip: i64,
    pub read: Option<bool>,
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            limit: 50,
            skip: 0,
            read: None,
        }
    }
}

/// One page of a user's notifications, newest first
#[derive(Debug, Clone)]
pub struct NotificationPage {
    pub notifications: Vec<Notification>,
    pub total: i64,
    pub has_more: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(user_id: &str, data: Value) -> Notification {
        let now = Utc::now();
        Notification {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            notification_type: NotificationType::PropertyFavorited,
            title: "New favorite!".into(),
            message: "m".into(),
            data,
            read: false,
            read_at: None,
            visited: false,
            visited_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_ownership_through_data_fields() {
        let n = record(
            "owner@example.com",
            json!({"propertyOwnerEmail": "owner@example.com", "propertyOwnerId": 15}),
        );
        assert!(n.is_owned_by("owner@example.com"));
        assert!(n.is_owned_by(" 15 "));
        assert!(!n.is_owned_by("16"));
    }

    #[test]
    fn test_serializes_camel_case_with_type_tag() {
        let value = serde_json::to_value(record("u1", json!({}))).unwrap();
        assert_eq!(value["type"], "PROPERTY_FAVORITED");
        assert_eq!(value["userId"], "u1");
        assert!(value.get("readAt").is_some());
        assert!(value.get("createdAt").is_some());
    }

    #[test]
    fn test_type_round_trips_through_str() {
        for kind in [
            NotificationType::PropertyFavorited,
            NotificationType::NewMessage,
            NotificationType::ReviewReceived,
        ] {
            assert_eq!(kind.as_str().parse::<NotificationType>().unwrap(), kind);
        }
    }
}
