//! Dispatch glue between queue consumers, the store and presence
//!
//! For every decoded event: persist the record, push it to the owner's live
//! connections, then fire the secondary notifiers in the background. Only a
//! persistence failure fails the event.

use super::notifiers::{EmailNotifier, PushNotifier, SecondaryNotifier};
use super::store::NotificationStore;
use crate::error::HandlerError;
use crate::metrics;
use crate::models::{NewNotification, Notification, NotificationType};
use crate::presence::PresenceRegistry;
use crate::queues::{EnvelopeHandler, FavoriteEvent, MessageEvent, NewMessage, PropertyFavorited};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, info};

pub struct NotificationDispatcher {
    store: Arc<dyn NotificationStore>,
    presence: Arc<PresenceRegistry>,
    notifiers: Vec<Arc<dyn SecondaryNotifier>>,
}

impl NotificationDispatcher {
    pub fn new(store: Arc<dyn NotificationStore>, presence: Arc<PresenceRegistry>) -> Self {
        Self {
            store,
            presence,
            notifiers: vec![Arc::new(EmailNotifier), Arc::new(PushNotifier)],
        }
    }

    pub fn with_notifiers(mut self, notifiers: Vec<Arc<dyn SecondaryNotifier>>) -> Self {
        self.notifiers = notifiers;
        self
    }

    pub async fn handle_property_favorited(
        &self,
        event: PropertyFavorited,
    ) -> Result<Notification, HandlerError> {
        let owner = event.owner();
        info!(
            property_title = %event.property_title,
            favorited_by = %event.favorited_by,
            owner = %owner,
            "Processing favorite"
        );

        self.deliver(NewNotification {
            data: event.record_data(&owner),
            message: event.message(),
            user_id: owner,
            notification_type: NotificationType::PropertyFavorited,
            title: "New favorite!".to_string(),
        })
        .await
    }

    pub async fn handle_new_message(&self, event: NewMessage) -> Result<Notification, HandlerError> {
        info!(
            sender_name = %event.sender_name,
            recipient_id = %event.recipient_id,
            "Processing message notification"
        );

        self.deliver(NewNotification {
            user_id: event.recipient_id.trim().to_string(),
            notification_type: NotificationType::NewMessage,
            title: "New message".to_string(),
            message: event.message(),
            data: event.record_data(),
        })
        .await
    }

    async fn deliver(&self, new: NewNotification) -> Result<Notification, HandlerError> {
        let record = self.store.create(new).await?;
        info!(notification_id = %record.id, user_id = %record.user_id, "Notification saved");

        let delivered = self
            .presence
            .emit_to_user(
                &record.user_id,
                record.notification_type.as_str(),
                record.data.clone(),
            )
            .await;
        debug!(notification_id = %record.id, delivered, "Real-time push attempted");

        self.spawn_notifiers(&record);
        Ok(record)
    }

    fn spawn_notifiers(&self, record: &Notification) {
        for notifier in &self.notifiers {
            let notifier = Arc::clone(notifier);
            let record = record.clone();
            tokio::spawn(async move {
                if let Err(e) = notifier.notify(&record).await {
                    metrics::record_notifier_failure(notifier.name());
                    error!(
                        notifier = notifier.name(),
                        notification_id = %record.id,
                        error = %e,
                        "Secondary notification failed"
                    );
                }
            });
        }
    }
}

#[async_trait]
impl EnvelopeHandler<FavoriteEvent> for NotificationDispatcher {
    async fn handle(&self, event: FavoriteEvent) -> Result<(), HandlerError> {
        match event {
            FavoriteEvent::PropertyFavorited(favorite) => {
                self.handle_property_favorited(favorite).await.map(|_| ())
            }
        }
    }
}

#[async_trait]
impl EnvelopeHandler<MessageEvent> for NotificationDispatcher {
    async fn handle(&self, event: MessageEvent) -> Result<(), HandlerError> {
        match event {
            MessageEvent::NewMessage(message) => self.handle_new_message(message).await.map(|_| ()),
        }
    }
}
