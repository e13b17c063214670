use crate::state::AppState;
use actix_web::{web, HttpResponse, Result as ActixResult};
use chrono::Utc;
use serde_json::json;

pub const SERVICE_NAME: &str = "notification-relay";

/// GET /health
///
/// Always 200 while the process serves HTTP; a degraded broker is reported
/// in the body, not through the status code.
pub async fn health(state: web::Data<AppState>) -> ActixResult<HttpResponse> {
    let presence = state.presence.stats().await;

    Ok(HttpResponse::Ok().json(json!({
        "status": "ok",
        "service": SERVICE_NAME,
        "timestamp": Utc::now().to_rfc3339(),
        "broker": {
            "state": state.broker.state(),
            "reconnectAttempts": state.broker.reconnect_attempts(),
        },
        "presence": presence,
    })))
}

pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health));
}
