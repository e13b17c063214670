use crate::state::AppState;
use crate::websocket::NotificationSession;
use actix_web::{web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;

/// GET /ws: upgrade to a notification session
pub async fn ws_index(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let session = NotificationSession::new(state.presence.clone(), &state.websocket);
    ws::start(session, &req, stream)
}

pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/ws", web::get().to(ws_index));
}
