//! Notification persistence
//!
//! `NotificationStore` is the seam between the relay and its database.
//! `PgNotificationStore` backs production; `MemoryNotificationStore` is used
//! when no `DATABASE_URL` is configured and in tests.

use crate::error::StoreError;
use crate::models::{ListOptions, NewNotification, Notification, NotificationPage};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Persist a notification and return it with its generated id
    async fn create(&self, new: NewNotification) -> Result<Notification, StoreError>;

    /// Notifications owned by `user_id`, newest first
    async fn find_by_user(
        &self,
        user_id: &str,
        options: ListOptions,
    ) -> Result<NotificationPage, StoreError>;

    /// Notifications owned by `user_id` that are neither read nor visited
    async fn count_unread(&self, user_id: &str) -> Result<i64, StoreError>;

    /// Mark one notification read and visited
    ///
    /// Fails with `NotFound` for an unknown id. A requester that does not
    /// own the record is logged but the update still happens.
    async fn mark_as_read(&self, id: Uuid, user_id: &str) -> Result<Notification, StoreError>;

    /// Mark every unread notification of a user; returns how many changed
    async fn mark_all_as_read(&self, user_id: &str) -> Result<u64, StoreError>;

    /// Delete a notification owned by `user_id`
    async fn delete(&self, id: Uuid, user_id: &str) -> Result<Notification, StoreError>;
}

/// In-memory store for offline mode and tests
#[derive(Clone, Default)]
pub struct MemoryNotificationStore {
    records: Arc<RwLock<Vec<Notification>>>,
}

impl MemoryNotificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored record, oldest first
    pub async fn all(&self) -> Vec<Notification> {
        self.records.read().await.clone()
    }
}

#[async_trait]
impl NotificationStore for MemoryNotificationStore {
    async fn create(&self, new: NewNotification) -> Result<Notification, StoreError> {
        let now = Utc::now();
        let notification = Notification {
            id: Uuid::new_v4(),
            user_id: new.user_id,
            notification_type: new.notification_type,
            title: new.title,
            message: new.message,
            data: new.data,
            read: false,
            read_at: None,
            visited: false,
            visited_at: None,
            created_at: now,
            updated_at: now,
        };
        self.records.write().await.push(notification.clone());
        debug!(notification_id = %notification.id, "Notification saved");
        Ok(notification)
    }

    async fn find_by_user(
        &self,
        user_id: &str,
        options: ListOptions,
    ) -> Result<NotificationPage, StoreError> {
        let records = self.records.read().await;
        let matching: Vec<&Notification> = records
            .iter()
            .rev()
            .filter(|n| n.is_owned_by(user_id) && n.matches_read_filter(options.read))
            .collect();

        let total = matching.len() as i64;
        let notifications: Vec<Notification> = matching
            .into_iter()
            .skip(options.skip.max(0) as usize)
            .take(options.limit.max(0) as usize)
            .cloned()
            .collect();
        let has_more = options.skip + (notifications.len() as i64) < total;

        Ok(NotificationPage {
            notifications,
            total,
            has_more,
        })
    }

    async fn count_unread(&self, user_id: &str) -> Result<i64, StoreError> {
        let records = self.records.read().await;
        Ok(records
            .iter()
            .filter(|n| n.is_owned_by(user_id) && n.matches_read_filter(Some(false)))
            .count() as i64)
    }

    async fn mark_as_read(&self, id: Uuid, user_id: &str) -> Result<Notification, StoreError> {
        let mut records = self.records.write().await;
        let record = records
            .iter_mut()
            .find(|n| n.id == id)
            .ok_or(StoreError::NotFound)?;

        if !record.is_owned_by(user_id) {
            warn!(
                notification_id = %id,
                owner = %record.user_id,
                requested_by = %user_id,
                "User does not own notification, marking as read anyway"
            );
        }

        let now = Utc::now();
        record.read = true;
        record.read_at = Some(now);
        record.visited = true;
        record.visited_at = Some(now);
        record.updated_at = now;
        Ok(record.clone())
    }

    async fn mark_all_as_read(&self, user_id: &str) -> Result<u64, StoreError> {
        let mut records = self.records.write().await;
        let now = Utc::now();
        let mut modified = 0u64;
        for record in records
            .iter_mut()
            .filter(|n| !n.read && n.is_owned_by(user_id))
        {
            record.read = true;
            record.read_at = Some(now);
            record.visited = true;
            record.visited_at = Some(now);
            record.updated_at = now;
            modified += 1;
        }
        Ok(modified)
    }

    async fn delete(&self, id: Uuid, user_id: &str) -> Result<Notification, StoreError> {
        let mut records = self.records.write().await;
        let position = records
            .iter()
            .position(|n| n.id == id && n.is_owned_by(user_id))
            .ok_or(StoreError::AccessDenied)?;
        Ok(records.remove(position))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NotificationType;
    use serde_json::json;

    fn new(user_id: &str, data: serde_json::Value) -> NewNotification {
        NewNotification {
            user_id: user_id.to_string(),
            notification_type: NotificationType::NewMessage,
            title: "New message".into(),
            message: "hi".into(),
            data,
        }
    }

    #[tokio::test]
    async fn test_find_by_user_pages_newest_first() {
        let store = MemoryNotificationStore::new();
        for i in 0..3 {
            store.create(new("u1", json!({"n": i}))).await.unwrap();
        }
        store.create(new("u2", json!({}))).await.unwrap();

        let page = store
            .find_by_user(
                "u1",
                ListOptions {
                    limit: 2,
                    skip: 0,
                    read: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(page.total, 3);
        assert!(page.has_more);
        assert_eq!(page.notifications[0].data["n"], 2);

        let rest = store
            .find_by_user(
                "u1",
                ListOptions {
                    limit: 2,
                    skip: 2,
                    read: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(rest.notifications.len(), 1);
        assert!(!rest.has_more);
    }

    #[tokio::test]
    async fn test_owner_fields_in_data_grant_access() {
        let store = MemoryNotificationStore::new();
        let created = store
            .create(new("owner@example.com", json!({"propertyOwnerId": "15"})))
            .await
            .unwrap();

        assert_eq!(store.count_unread("15").await.unwrap(), 1);
        assert_eq!(store.mark_all_as_read("15").await.unwrap(), 1);
        assert_eq!(store.count_unread("owner@example.com").await.unwrap(), 0);

        assert!(matches!(
            store.delete(created.id, "someone-else").await,
            Err(StoreError::AccessDenied)
        ));
        store.delete(created.id, "15").await.unwrap();
        assert!(store.all().await.is_empty());
    }

    #[tokio::test]
    async fn test_mark_as_read_sets_visited_even_for_other_user() {
        let store = MemoryNotificationStore::new();
        let created = store.create(new("u1", json!({}))).await.unwrap();

        let updated = store.mark_as_read(created.id, "u2").await.unwrap();
        assert!(updated.read && updated.visited);
        assert!(updated.read_at.is_some() && updated.visited_at.is_some());

        assert!(matches!(
            store.mark_as_read(Uuid::new_v4(), "u1").await,
            Err(StoreError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_read_filter_requires_visited_to_match() {
        let store = MemoryNotificationStore::new();
        let a = store.create(new("u1", json!({}))).await.unwrap();
        store.create(new("u1", json!({}))).await.unwrap();
        store.mark_as_read(a.id, "u1").await.unwrap();

        let unread = store
            .find_by_user(
                "u1",
                ListOptions {
                    read: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(unread.total, 1);

        let read = store
            .find_by_user(
                "u1",
                ListOptions {
                    read: Some(true),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(read.notifications[0].id, a.id);
    }
}
