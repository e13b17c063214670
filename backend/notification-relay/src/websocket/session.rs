use super::messages::{registered, ClientFrame};
use crate::config::WebSocketConfig;
use crate::presence::{ConnectionHandle, PresenceEvent, PresenceRegistry};
use actix::{Actor, ActorContext, ActorFutureExt, AsyncContext, Handler, StreamHandler, WrapFuture};
use actix_web_actors::ws;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// One websocket connection
///
/// Pushes queued `PresenceEvent`s to the client and answers `register`
/// frames. The connection leaves the registry when the actor stops.
pub struct NotificationSession {
    handle: ConnectionHandle,
    events: Option<mpsc::UnboundedReceiver<PresenceEvent>>,
    presence: Arc<PresenceRegistry>,
    registered: bool,
    hb: Instant,
    heartbeat_interval: Duration,
    client_timeout: Duration,
}

impl NotificationSession {
    pub fn new(presence: Arc<PresenceRegistry>, config: &WebSocketConfig) -> Self {
        let (handle, events) = ConnectionHandle::new();
        Self {
            handle,
            events: Some(events),
            presence,
            registered: false,
            hb: Instant::now(),
            heartbeat_interval: Duration::from_secs(config.heartbeat_interval_secs),
            client_timeout: Duration::from_secs(config.client_timeout_secs),
        }
    }

    fn hb(&self, ctx: &mut ws::WebsocketContext<Self>) {
        let timeout = self.client_timeout;
        ctx.run_interval(self.heartbeat_interval, move |act, ctx| {
            if Instant::now().duration_since(act.hb) > timeout {
                warn!(connection_id = %act.handle.id(), "WebSocket heartbeat failed, disconnecting");
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }

    fn register(&self, user_id: Option<String>, ctx: &mut ws::WebsocketContext<Self>) {
        let Some(raw) = user_id else {
            warn!(connection_id = %self.handle.id(), "Attempted to register without userId");
            return;
        };

        let presence = self.presence.clone();
        let handle = self.handle.clone();
        let fut = async move { presence.register(&raw, handle).await };
        // wait, not spawn: `stopped` must not run while a registration is pending
        ctx.wait(fut.into_actor(self).map(|result, act, ctx| {
            if let Some(user_id) = result {
                act.registered = true;
                send_event(ctx, &registered(&user_id));
            }
        }));
    }
}

fn send_event(ctx: &mut ws::WebsocketContext<NotificationSession>, event: &PresenceEvent) {
    match serde_json::to_string(event) {
        Ok(text) => ctx.text(text),
        Err(e) => error!("Failed to serialize websocket event: {}", e),
    }
}

impl Actor for NotificationSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!(connection_id = %self.handle.id(), "New websocket connection");
        self.hb(ctx);

        if let Some(events) = self.events.take() {
            let stream = futures::stream::unfold(events, |mut rx| async move {
                rx.recv().await.map(|event| (event, rx))
            });
            ctx.add_message_stream(stream);
        }
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        let id = self.handle.id();
        if self.registered {
            let presence = self.presence.clone();
            actix::spawn(async move {
                presence.unregister(id).await;
            });
        }
        info!(connection_id = %id, "Websocket disconnected");
    }
}

impl Handler<PresenceEvent> for NotificationSession {
    type Result = ();

    fn handle(&mut self, event: PresenceEvent, ctx: &mut Self::Context) {
        send_event(ctx, &event);
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for NotificationSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => {
                self.hb = Instant::now();
                ctx.pong(&msg);
            }
            Ok(ws::Message::Pong(_)) => {
                self.hb = Instant::now();
            }
            Ok(ws::Message::Text(text)) => {
                self.hb = Instant::now();
                match ClientFrame::parse(&text) {
                    Ok(ClientFrame::Register(user_id)) => self.register(user_id, ctx),
                    Ok(ClientFrame::Unknown(event)) => {
                        debug!(connection_id = %self.handle.id(), event = %event, "Ignoring unknown websocket event");
                    }
                    Err(e) => {
                        debug!(connection_id = %self.handle.id(), "Ignoring websocket frame: {}", e);
                    }
                }
            }
            Ok(ws::Message::Binary(_)) => {
                warn!("Binary WebSocket messages not supported");
            }
            Ok(ws::Message::Close(reason)) => {
                ctx.close(reason);
                ctx.stop();
            }
            Err(e) => {
                error!(connection_id = %self.handle.id(), "Socket error: {}", e);
                ctx.stop();
            }
            _ => {}
        }
    }
}
