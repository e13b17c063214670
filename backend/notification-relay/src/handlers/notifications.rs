//! Notification HTTP API
//!
//! Thin layer over the store, plus two publish endpoints that put envelopes
//! on the broker for the consumers to pick up.

use crate::error::{AppError, Result};
use crate::models::ListOptions;
use crate::queues::events::{
    FAVORITE_QUEUE, MESSAGE_QUEUE, NEW_MESSAGE, PLACEHOLDER_EMAIL, PROPERTY_FAVORITED,
    UNKNOWN_OWNER,
};
use crate::queues::Envelope;
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{error, info};
use uuid::Uuid;

const FAVORITE_REQUIRED: [&str; 4] = ["propertyId", "propertyTitle", "favoritedBy", "favoritedByEmail"];
const MESSAGE_REQUIRED: [&str; 3] = ["recipientId", "senderName", "content"];

/// JavaScript-style truthiness; publishers send `""`, `0` or `null` for absent fields
fn is_present(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) | Some(Value::Bool(false)) => false,
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Some(_) => true,
    }
}

fn check_required(body: &Map<String, Value>, required: &[&str]) -> Result<()> {
    let missing: Vec<&str> = required
        .iter()
        .copied()
        .filter(|field| !is_present(body.get(*field)))
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(AppError::BadRequest(format!(
            "Missing required fields: {}",
            missing.join(", ")
        )))
    }
}

/// Publish without failing the request; the caller is told the event was queued
async fn publish_best_effort(state: &AppState, queue: &str, envelope: &Envelope) {
    let result = match envelope.to_bytes() {
        Ok(payload) => state.broker.publish(queue, &payload).await.map_err(|e| e.to_string()),
        Err(e) => Err(e.to_string()),
    };
    match result {
        Ok(()) => info!(queue, kind = %envelope.kind, "Notification queued"),
        Err(e) => error!(queue, kind = %envelope.kind, error = %e, "Error sending to broker"),
    }
}

/// POST /api/notifications/favorite
pub async fn publish_favorite(
    state: web::Data<AppState>,
    body: web::Json<Map<String, Value>>,
) -> Result<HttpResponse> {
    let mut data = body.into_inner();
    check_required(&data, &FAVORITE_REQUIRED)?;

    if !is_present(data.get("propertyOwnerId")) {
        data.insert("propertyOwnerId".into(), json!(UNKNOWN_OWNER));
    }
    if !is_present(data.get("propertyOwnerEmail")) {
        data.insert("propertyOwnerEmail".into(), json!(PLACEHOLDER_EMAIL));
    }

    let envelope = Envelope::new(PROPERTY_FAVORITED, Value::Object(data));
    publish_best_effort(&state, FAVORITE_QUEUE, &envelope).await;

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "message": "Favorite notification queued successfully",
    })))
}

/// POST /api/notifications/message
pub async fn publish_message(
    state: web::Data<AppState>,
    body: web::Json<Map<String, Value>>,
) -> Result<HttpResponse> {
    let data = body.into_inner();
    check_required(&data, &MESSAGE_REQUIRED)?;

    let envelope = Envelope::new(NEW_MESSAGE, Value::Object(data));
    publish_best_effort(&state, MESSAGE_QUEUE, &envelope).await;

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "message": "Message notification queued successfully",
    })))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<i64>,
    pub skip: Option<i64>,
    pub read: Option<String>,
}

impl ListQuery {
    fn options(&self) -> ListOptions {
        let defaults = ListOptions::default();
        ListOptions {
            limit: self.limit.unwrap_or(defaults.limit),
            skip: self.skip.unwrap_or(defaults.skip),
            read: match self.read.as_deref() {
                Some("true") => Some(true),
                Some("false") => Some(false),
                _ => None,
            },
        }
    }
}

/// GET /api/notifications/{userId}
pub async fn list_notifications(
    state: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<ListQuery>,
) -> Result<HttpResponse> {
    let user_id = path.into_inner();
    let options = query.options();
    let page = state.store.find_by_user(&user_id, options).await?;

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "data": page.notifications,
        "meta": {
            "total": page.total,
            "hasMore": page.has_more,
            "limit": options.limit,
            "skip": options.skip,
        },
    })))
}

/// GET /api/notifications/{userId}/unread/count
pub async fn unread_count(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse> {
    let count = state.store.count_unread(&path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(json!({ "success": true, "count": count })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequesterBody {
    pub user_id: Option<Value>,
}

/// The requesting user from an optional `{"userId"}` body
fn requester(body: Option<web::Json<RequesterBody>>) -> Result<String> {
    let user_id = body.and_then(|b| b.into_inner().user_id);
    match user_id {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        _ => Err(AppError::BadRequest(
            "userId is required in request body".to_string(),
        )),
    }
}

fn notification_id(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|_| AppError::NotFound("Notification not found".to_string()))
}

/// PATCH /api/notifications/{notificationId}/read
pub async fn mark_as_read(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: Option<web::Json<RequesterBody>>,
) -> Result<HttpResponse> {
    let user_id = requester(body)?;
    let id = notification_id(&path.into_inner())?;

    let notification = state.store.mark_as_read(id, &user_id).await?;
    Ok(HttpResponse::Ok().json(json!({ "success": true, "data": notification })))
}

/// PATCH /api/notifications/{userId}/read-all
pub async fn mark_all_as_read(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse> {
    let modified = state.store.mark_all_as_read(path.trim()).await?;
    Ok(HttpResponse::Ok().json(json!({ "success": true, "modifiedCount": modified })))
}

/// DELETE /api/notifications/{notificationId}
pub async fn delete_notification(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: Option<web::Json<RequesterBody>>,
) -> Result<HttpResponse> {
    let user_id = requester(body)?;
    let id = Uuid::parse_str(&path.into_inner()).map_err(|_| {
        AppError::NotFound("Notification not found or access denied".to_string())
    })?;

    state.store.delete(id, &user_id).await?;
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "message": "Notification deleted successfully",
    })))
}

pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/notifications")
            .route("/favorite", web::post().to(publish_favorite))
            .route("/message", web::post().to(publish_message))
            .route("/{user_id}/unread/count", web::get().to(unread_count))
            .route("/{notification_id}/read", web::patch().to(mark_as_read))
            .route("/{user_id}/read-all", web::patch().to(mark_all_as_read))
            .route("/{notification_id}", web::delete().to(delete_notification))
            .route("/{user_id}", web::get().to(list_notifications)),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presence_follows_js_truthiness() {
        assert!(!is_present(None));
        assert!(!is_present(Some(&json!(""))));
        assert!(!is_present(Some(&json!(0))));
        assert!(!is_present(Some(&Value::Null)));
        assert!(is_present(Some(&json!("x"))));
        assert!(is_present(Some(&json!(7))));
    }

    #[test]
    fn test_missing_fields_are_listed_in_order() {
        let body: Map<String, Value> =
            serde_json::from_value(json!({"propertyId": "p1", "favoritedBy": "Ana"})).unwrap();
        let err = check_required(&body, &FAVORITE_REQUIRED).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Missing required fields: propertyTitle, favoritedByEmail"
        );
    }

    #[test]
    fn test_list_query_defaults() {
        let query = ListQuery {
            limit: None,
            skip: Some(10),
            read: Some("false".into()),
        };
        assert_eq!(
            query.options(),
            ListOptions {
                limit: 50,
                skip: 10,
                read: Some(false)
            }
        );
    }
}
