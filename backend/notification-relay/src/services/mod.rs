pub mod dispatcher;
pub mod notifiers;
pub mod pg_store;
pub mod store;

pub use dispatcher::NotificationDispatcher;
pub use notifiers::{EmailNotifier, PushNotifier, SecondaryNotifier};
pub use pg_store::PgNotificationStore;
pub use store::{MemoryNotificationStore, NotificationStore};
