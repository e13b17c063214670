//! Secondary notifiers (email, push)
//!
//! Best-effort side channels run after a notification is stored. Neither
//! talks to a real provider yet; both render what they would send and log it.

use crate::error::NotifierError;
use crate::models::{Notification, NotificationType};
use async_trait::async_trait;
use tracing::{debug, info};

#[async_trait]
pub trait SecondaryNotifier: Send + Sync {
    /// Label used in logs and the failure metric
    fn name(&self) -> &'static str;

    async fn notify(&self, notification: &Notification) -> Result<(), NotifierError>;
}

/// Where to reach the owner by email, if the record carries an address
fn owner_email(notification: &Notification) -> Option<&str> {
    let from_data = notification
        .data
        .get("propertyOwnerEmail")
        .and_then(|v| v.as_str());
    from_data
        .into_iter()
        .chain(std::iter::once(notification.user_id.as_str()))
        .find(|candidate| candidate.contains('@') && *candidate != "no-email@example.com")
}

pub struct EmailNotifier;

impl EmailNotifier {
    pub fn render(notification: &Notification) -> String {
        let closing = match notification.notification_type {
            NotificationType::PropertyFavorited => "<p>Don't miss the chance to get in touch!</p>",
            NotificationType::NewMessage => "<p>Open your inbox to reply.</p>",
            _ => "",
        };
        format!(
            "<h2>{}</h2>\n<p>{}</p>\n{}",
            notification.title, notification.message, closing
        )
    }
}

#[async_trait]
impl SecondaryNotifier for EmailNotifier {
    fn name(&self) -> &'static str {
        "email"
    }

    async fn notify(&self, notification: &Notification) -> Result<(), NotifierError> {
        let Some(to) = owner_email(notification) else {
            debug!(
                user_id = %notification.user_id,
                kind = notification.notification_type.as_str(),
                "No email address on record, skipping email"
            );
            return Ok(());
        };
        let body = Self::render(notification);
        info!(
            to,
            kind = notification.notification_type.as_str(),
            bytes = body.len(),
            "Email notification sent"
        );
        Ok(())
    }
}

pub struct PushNotifier;

#[async_trait]
impl SecondaryNotifier for PushNotifier {
    fn name(&self) -> &'static str {
        "push"
    }

    async fn notify(&self, notification: &Notification) -> Result<(), NotifierError> {
        info!(
            user_id = %notification.user_id,
            title = %notification.title,
            "Push notification sent"
        );
        Ok(())
    }
}
