use actix_web::{test, web, App};
use notification_relay::broker::{BrokerConnectionManager, MemoryBroker};
use notification_relay::config::{BrokerConfig, WebSocketConfig};
use notification_relay::handlers;
use notification_relay::models::{NewNotification, NotificationType};
use notification_relay::presence::{ConnectionHandle, PresenceRegistry};
use notification_relay::queues::events::FAVORITE_QUEUE;
use notification_relay::services::{MemoryNotificationStore, NotificationStore};
use notification_relay::AppState;
use serde_json::{json, Value};
use std::sync::Arc;

struct Fixture {
    state: AppState,
    broker: MemoryBroker,
    store: MemoryNotificationStore,
}

fn fixture() -> Fixture {
    let broker = MemoryBroker::new();
    let store = MemoryNotificationStore::new();
    let state = AppState {
        store: Arc::new(store.clone()),
        broker: BrokerConnectionManager::new(Arc::new(broker.clone()), BrokerConfig::default()),
        presence: Arc::new(PresenceRegistry::new()),
        websocket: WebSocketConfig::default(),
    };
    Fixture {
        state,
        broker,
        store,
    }
}

async fn seed(store: &MemoryNotificationStore, user_id: &str, title: &str) -> String {
    store
        .create(NewNotification {
            user_id: user_id.to_string(),
            notification_type: NotificationType::NewMessage,
            title: title.to_string(),
            message: format!("{} body", title),
            data: json!({}),
        })
        .await
        .unwrap()
        .id
        .to_string()
}

macro_rules! app {
    ($state:expr) => {
        test::init_service(
            App::new()
                .app_data(web::Data::new($state.clone()))
                .configure(handlers::configure),
        )
        .await
    };
}

#[actix_web::test]
async fn test_favorite_rejects_missing_fields() {
    let fx = fixture();
    let app = app!(fx.state);

    let req = test::TestRequest::post()
        .uri("/api/notifications/favorite")
        .set_json(json!({"propertyId": "p1", "propertyTitle": ""}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);

    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["success"], false);
    assert_eq!(
        body["error"],
        "Missing required fields: propertyTitle, favoritedBy, favoritedByEmail"
    );
    assert_eq!(fx.broker.ready_count(FAVORITE_QUEUE), 0);
}

#[actix_web::test]
async fn test_favorite_is_queued_with_owner_defaults() {
    let fx = fixture();
    let app = app!(fx.state);

    let req = test::TestRequest::post()
        .uri("/api/notifications/favorite")
        .set_json(json!({
            "propertyId": "p1",
            "propertyTitle": "Loft",
            "favoritedBy": "Ana",
            "favoritedByEmail": "ana@example.com",
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["message"], "Favorite notification queued successfully");

    let payloads = fx.broker.ready_payloads(FAVORITE_QUEUE);
    assert_eq!(payloads.len(), 1);
    let envelope: Value = serde_json::from_slice(&payloads[0]).unwrap();
    assert_eq!(envelope["type"], "PROPERTY_FAVORITED");
    assert_eq!(envelope["data"]["propertyOwnerId"], "unknown");
    assert_eq!(envelope["data"]["propertyOwnerEmail"], "no-email@example.com");
    assert!(envelope["timestamp"].is_string());
}

#[actix_web::test]
async fn test_publish_succeeds_even_when_broker_is_down() {
    let fx = fixture();
    fx.broker.set_available(false);
    let app = app!(fx.state);

    let req = test::TestRequest::post()
        .uri("/api/notifications/message")
        .set_json(json!({"recipientId": 3, "senderName": "Bo", "content": "hi"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["message"], "Message notification queued successfully");
    fx.state.broker.close().await;
}

#[actix_web::test]
async fn test_list_and_unread_count() {
    let fx = fixture();
    for title in ["one", "two", "three"] {
        seed(&fx.store, "u1", title).await;
    }
    seed(&fx.store, "u2", "other").await;
    let app = app!(fx.state);

    let req = test::TestRequest::get()
        .uri("/api/notifications/u1?limit=2&skip=0")
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["data"].as_array().unwrap().len(), 2);
    assert_eq!(body["data"][0]["title"], "three");
    assert_eq!(body["meta"], json!({"total": 3, "hasMore": true, "limit": 2, "skip": 0}));

    let req = test::TestRequest::get()
        .uri("/api/notifications/u1/unread/count")
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body, json!({"success": true, "count": 3}));
}

#[actix_web::test]
async fn test_mark_as_read_validation() {
    let fx = fixture();
    let id = seed(&fx.store, "u1", "one").await;
    let app = app!(fx.state);

    let req = test::TestRequest::patch()
        .uri(&format!("/api/notifications/{}/read", id))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "userId is required in request body");

    let req = test::TestRequest::patch()
        .uri(&format!("/api/notifications/{}/read", uuid::Uuid::new_v4()))
        .set_json(json!({"userId": "u1"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);

    let req = test::TestRequest::patch()
        .uri(&format!("/api/notifications/{}/read", id))
        .set_json(json!({"userId": "u1"}))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["data"]["read"], true);
    assert_eq!(body["data"]["visited"], true);
    assert!(body["data"]["readAt"].is_string());
}

#[actix_web::test]
async fn test_mark_all_as_read_reports_modified_count() {
    let fx = fixture();
    seed(&fx.store, "u1", "one").await;
    seed(&fx.store, "u1", "two").await;
    let app = app!(fx.state);

    let req = test::TestRequest::patch()
        .uri("/api/notifications/u1/read-all")
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body, json!({"success": true, "modifiedCount": 2}));

    let req = test::TestRequest::patch()
        .uri("/api/notifications/u1/read-all")
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["modifiedCount"], 0);
}

#[actix_web::test]
async fn test_delete_requires_ownership() {
    let fx = fixture();
    let id = seed(&fx.store, "u1", "one").await;
    let app = app!(fx.state);

    let req = test::TestRequest::delete()
        .uri(&format!("/api/notifications/{}", id))
        .set_json(json!({"userId": "u2"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "Notification not found or access denied");

    let req = test::TestRequest::delete()
        .uri(&format!("/api/notifications/{}", id))
        .set_json(json!({"userId": "u1"}))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["message"], "Notification deleted successfully");
    assert!(fx.store.all().await.is_empty());
}

#[actix_web::test]
async fn test_presence_endpoints() {
    let fx = fixture();
    let (handle, _rx) = ConnectionHandle::new();
    fx.state.presence.register("u1", handle).await;
    let app = app!(fx.state);

    let req = test::TestRequest::get().uri("/api/presence/u1").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(
        body,
        json!({"userId": "u1", "connected": true, "connectionCount": 1})
    );

    let req = test::TestRequest::get().uri("/api/presence").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body, json!({"totalConnections": 1, "connectedUsers": 1}));
}

#[actix_web::test]
async fn test_health_reports_broker_state() {
    let fx = fixture();
    let app = app!(fx.state);

    let req = test::TestRequest::get().uri("/health").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "notification-relay");
    assert_eq!(body["broker"]["state"], "disconnected");
    assert_eq!(body["broker"]["reconnectAttempts"], 0);
}

#[actix_web::test]
async fn test_metrics_endpoint_is_exposed() {
    let fx = fixture();
    let app = app!(fx.state);

    let req = test::TestRequest::get().uri("/metrics").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
}
