use actix_web::{dev::ServerHandle, web, App, HttpServer};
use awc::{ws, Client};
use futures::{Sink, SinkExt, Stream, StreamExt};
use notification_relay::broker::{BrokerConnectionManager, MemoryBroker};
use notification_relay::config::{BrokerConfig, WebSocketConfig};
use notification_relay::handlers;
use notification_relay::presence::PresenceRegistry;
use notification_relay::services::MemoryNotificationStore;
use notification_relay::AppState;
use serde_json::{json, Value};
use std::fmt::Debug;
use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::time::Duration;

fn app_state() -> AppState {
    AppState {
        store: Arc::new(MemoryNotificationStore::new()),
        broker: BrokerConnectionManager::new(
            Arc::new(MemoryBroker::new()),
            BrokerConfig::default(),
        ),
        presence: Arc::new(PresenceRegistry::new()),
        websocket: WebSocketConfig::default(),
    }
}

fn start_server(state: AppState) -> std::io::Result<(SocketAddr, ServerHandle)> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let addr = listener.local_addr()?;

    let server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(state.clone()))
            .configure(handlers::configure)
    })
    .workers(1)
    .listen(listener)?
    .run();

    let handle = server.handle();
    actix_rt::spawn(server);
    Ok((addr, handle))
}

async fn send<C>(connection: &mut C, frame: Value)
where
    C: Sink<ws::Message> + Unpin,
    C::Error: Debug,
{
    connection
        .send(ws::Message::Text(frame.to_string().into()))
        .await
        .expect("send frame");
}

/// Next text frame as JSON, skipping heartbeats
async fn next_json<C, E>(connection: &mut C) -> Value
where
    C: Stream<Item = Result<ws::Frame, E>> + Unpin,
    E: Debug,
{
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), connection.next())
            .await
            .expect("frame in time")
            .expect("frame")
            .expect("frame data");
        match frame {
            ws::Frame::Text(bytes) => return serde_json::from_slice(&bytes).unwrap(),
            ws::Frame::Ping(_) | ws::Frame::Pong(_) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

async fn wait_for_connections(presence: &PresenceRegistry, expected: usize) {
    for _ in 0..100 {
        if presence.total_connections().await == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("expected {expected} registered connections");
}

#[actix_rt::test]
async fn test_register_push_and_disconnect() {
    let state = app_state();
    let (addr, handle) = start_server(state.clone()).expect("start websocket server");
    let (_resp, mut connection) = Client::new()
        .ws(format!("http://{addr}/ws"))
        .connect()
        .await
        .expect("connect websocket client");

    send(&mut connection, json!({"event": "register", "data": " u1 "})).await;
    assert_eq!(
        next_json(&mut connection).await,
        json!({"event": "registered", "data": {"userId": "u1", "success": true}})
    );
    assert_eq!(state.presence.connection_count("u1").await, 1);

    let delivered = state
        .presence
        .emit_to_user("u1", "NEW_MESSAGE", json!({"messageId": "m1", "content": "hi"}))
        .await;
    assert!(delivered);
    assert_eq!(
        next_json(&mut connection).await,
        json!({"event": "NEW_MESSAGE", "data": {"messageId": "m1", "content": "hi"}})
    );

    connection
        .send(ws::Message::Close(None))
        .await
        .expect("send close");
    wait_for_connections(&state.presence, 0).await;
    assert_eq!(state.presence.connection_count("u1").await, 0);

    handle.stop(true).await;
}

#[actix_rt::test]
async fn test_numeric_id_and_blank_register() {
    let state = app_state();
    let (addr, handle) = start_server(state.clone()).expect("start websocket server");
    let (_resp, mut connection) = Client::new()
        .ws(format!("http://{addr}/ws"))
        .connect()
        .await
        .expect("connect websocket client");

    send(&mut connection, json!({"event": "register", "data": "   "})).await;
    send(&mut connection, json!({"event": "register"})).await;
    send(&mut connection, json!({"event": "register", "data": 42})).await;

    // the blank registrations get no reply, so the first frame is for 42
    assert_eq!(
        next_json(&mut connection).await,
        json!({"event": "registered", "data": {"userId": "42", "success": true}})
    );
    assert_eq!(state.presence.connected_users().await, 1);

    handle.stop(true).await;
}

#[actix_rt::test]
async fn test_close_right_after_register_leaves_no_entry() {
    let state = app_state();
    let (addr, handle) = start_server(state.clone()).expect("start websocket server");

    for _ in 0..5 {
        let (_resp, mut connection) = Client::new()
            .ws(format!("http://{addr}/ws"))
            .connect()
            .await
            .expect("connect websocket client");
        send(&mut connection, json!({"event": "register", "data": "u1"})).await;
        connection
            .send(ws::Message::Close(None))
            .await
            .expect("send close");
    }

    wait_for_connections(&state.presence, 0).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(state.presence.total_connections().await, 0);
    assert!(!state.presence.is_connected("u1").await);

    handle.stop(true).await;
}
