use crate::state::AppState;
use actix_web::{web, HttpResponse, Result as ActixResult};
use serde_json::json;

/// GET /api/presence/{userId}
pub async fn user_presence(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> ActixResult<HttpResponse> {
    let user_id = crate::presence::normalize_user_id(&path.into_inner());
    let connection_count = state.presence.connection_count(&user_id).await;

    Ok(HttpResponse::Ok().json(json!({
        "userId": user_id,
        "connected": connection_count > 0,
        "connectionCount": connection_count,
    })))
}

/// GET /api/presence
pub async fn presence_summary(state: web::Data<AppState>) -> ActixResult<HttpResponse> {
    Ok(HttpResponse::Ok().json(state.presence.stats().await))
}

pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/presence")
            .route("", web::get().to(presence_summary))
            .route("/{user_id}", web::get().to(user_presence)),
    );
}
