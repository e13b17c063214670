use super::store::NotificationStore;
use crate::config::DatabaseConfig;
use crate::error::StoreError;
use crate::models::{ListOptions, NewNotification, Notification, NotificationPage};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::migrate::Migrator;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Ownership predicate; `$1` is the normalized user id
const OWNED_BY: &str = "(user_id = $1 \
     OR data->>'propertyOwnerEmail' = $1 \
     OR data->>'propertyOwnerId' = $1)";

const COLUMNS: &str = "id, user_id, notification_type, title, message, data, \
     read, read_at, visited, visited_at, created_at, updated_at";

pub async fn init_pool(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(600))
        .test_before_acquire(true)
        .connect(&config.url)
        .await?;

    sqlx::query("SELECT 1").execute(&pool).await?;
    info!(
        max_connections = config.max_connections,
        "Database pool created and verified"
    );
    Ok(pool)
}

#[derive(Clone)]
pub struct PgNotificationStore {
    db: PgPool,
}

impl PgNotificationStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        MIGRATOR.run(&self.db).await
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Notification, StoreError> {
        let query = format!("SELECT {} FROM notifications WHERE id = $1", COLUMNS);
        let row = sqlx::query(&query).bind(id).fetch_one(&self.db).await?;
        row_to_notification(&row)
    }
}

fn row_to_notification(row: &PgRow) -> Result<Notification, StoreError> {
    let kind: String = row.try_get("notification_type")?;
    Ok(Notification {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        notification_type: kind.parse().map_err(StoreError::Database)?,
        title: row.try_get("title")?,
        message: row.try_get("message")?,
        data: row.try_get("data")?,
        read: row.try_get("read")?,
        read_at: row.try_get("read_at")?,
        visited: row.try_get("visited")?,
        visited_at: row.try_get("visited_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl NotificationStore for PgNotificationStore {
    async fn create(&self, new: NewNotification) -> Result<Notification, StoreError> {
        let query = format!(
            "INSERT INTO notifications (id, user_id, notification_type, title, message, data) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING {}",
            COLUMNS
        );

        let row = sqlx::query(&query)
            .bind(Uuid::new_v4())
            .bind(&new.user_id)
            .bind(new.notification_type.as_str())
            .bind(&new.title)
            .bind(&new.message)
            .bind(&new.data)
            .fetch_one(&self.db)
            .await?;

        let notification = row_to_notification(&row)?;
        debug!(notification_id = %notification.id, "Notification saved to database");
        Ok(notification)
    }

    async fn find_by_user(
        &self,
        user_id: &str,
        options: ListOptions,
    ) -> Result<NotificationPage, StoreError> {
        let user_id = user_id.trim();
        let filter = format!(
            "{} AND ($2::boolean IS NULL OR (read = $2 AND visited = $2))",
            OWNED_BY
        );

        let list_query = format!(
            "SELECT {} FROM notifications WHERE {} \
             ORDER BY created_at DESC LIMIT $3 OFFSET $4",
            COLUMNS, filter
        );
        let rows = sqlx::query(&list_query)
            .bind(user_id)
            .bind(options.read)
            .bind(options.limit.max(0))
            .bind(options.skip.max(0))
            .fetch_all(&self.db)
            .await?;

        let count_query = format!("SELECT COUNT(*) FROM notifications WHERE {}", filter);
        let total: i64 = sqlx::query_scalar(&count_query)
            .bind(user_id)
            .bind(options.read)
            .fetch_one(&self.db)
            .await?;

        let notifications = rows
            .iter()
            .map(row_to_notification)
            .collect::<Result<Vec<_>, _>>()?;
        let has_more = options.skip + (notifications.len() as i64) < total;

        Ok(NotificationPage {
            notifications,
            total,
            has_more,
        })
    }

    async fn count_unread(&self, user_id: &str) -> Result<i64, StoreError> {
        let query = format!(
            "SELECT COUNT(*) FROM notifications WHERE {} AND read = FALSE AND visited = FALSE",
            OWNED_BY
        );
        let count: i64 = sqlx::query_scalar(&query)
            .bind(user_id.trim())
            .fetch_one(&self.db)
            .await?;
        Ok(count)
    }

    async fn mark_as_read(&self, id: Uuid, user_id: &str) -> Result<Notification, StoreError> {
        let existing = self.find_by_id(id).await?;
        if !existing.is_owned_by(user_id) {
            warn!(
                notification_id = %id,
                owner = %existing.user_id,
                requested_by = %user_id,
                "User does not own notification, marking as read anyway"
            );
        }

        let now = Utc::now();
        let query = format!(
            "UPDATE notifications \
             SET read = TRUE, read_at = $2, visited = TRUE, visited_at = $2, updated_at = $2 \
             WHERE id = $1 \
             RETURNING {}",
            COLUMNS
        );
        let row = sqlx::query(&query)
            .bind(id)
            .bind(now)
            .fetch_one(&self.db)
            .await?;
        row_to_notification(&row)
    }

    async fn mark_all_as_read(&self, user_id: &str) -> Result<u64, StoreError> {
        let query = format!(
            "UPDATE notifications \
             SET read = TRUE, read_at = $2, visited = TRUE, visited_at = $2, updated_at = $2 \
             WHERE {} AND read = FALSE",
            OWNED_BY
        );
        let result = sqlx::query(&query)
            .bind(user_id.trim())
            .bind(Utc::now())
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete(&self, id: Uuid, user_id: &str) -> Result<Notification, StoreError> {
        let query = format!(
            "DELETE FROM notifications WHERE id = $2 AND {} RETURNING {}",
            OWNED_BY, COLUMNS
        );
        let row = sqlx::query(&query)
            .bind(user_id.trim())
            .bind(id)
            .fetch_optional(&self.db)
            .await?
            .ok_or(StoreError::AccessDenied)?;
        row_to_notification(&row)
    }
}
