use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AppError>;

/// Errors raised while talking to the message broker
#[derive(Debug, Error, Clone)]
pub enum BrokerError {
    #[error("failed to connect to broker: {0}")]
    Connect(String),

    #[error("broker unavailable: {0}")]
    Unavailable(String),

    #[error("channel error: {0}")]
    Channel(String),

    #[error("connection closed: {0}")]
    Closed(String),
}

impl BrokerError {
    /// Operator hint for the most common connection failures
    pub fn hint(&self) -> Option<&'static str> {
        let msg = self.to_string();
        if msg.contains("ENOTFOUND")
            || msg.contains("getaddrinfo")
            || msg.contains("failed to lookup address")
        {
            Some("check that the hostname in RABBITMQ_URL is correct")
        } else if msg.contains("ECONNREFUSED") || msg.contains("Connection refused") {
            Some("check that the broker is running and reachable")
        } else if msg.contains("403") || msg.contains("ACCESS_REFUSED") {
            Some("check the username and password in RABBITMQ_URL")
        } else if msg.to_lowercase().contains("timeout") || msg.contains("timed out") {
            Some("connection timed out, check firewall and network settings")
        } else {
            None
        }
    }
}

impl From<lapin::Error> for BrokerError {
    fn from(e: lapin::Error) -> Self {
        BrokerError::Channel(e.to_string())
    }
}

/// Errors raised by the notification store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Notification not found")]
    NotFound,

    #[error("Notification not found or access denied")]
    AccessDenied,

    #[error("database error: {0}")]
    Database(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => StoreError::NotFound,
            other => StoreError::Database(other.to_string()),
        }
    }
}

/// A queue payload that cannot be turned into a known event
#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("malformed envelope: {0}")]
    Malformed(String),

    #[error("unknown message type {kind:?} on queue {queue}")]
    UnknownType { queue: &'static str, kind: String },

    #[error("invalid {kind} data: {reason}")]
    InvalidData { kind: &'static str, reason: String },
}

/// Failure while processing a decoded event
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("failed to persist notification: {0}")]
    Store(#[from] StoreError),

    #[error("{0}")]
    Failed(String),
}

/// Secondary notifier failure; logged and counted, never propagated
#[derive(Debug, Error)]
pub enum NotifierError {
    #[error("{notifier} delivery failed: {reason}")]
    Delivery {
        notifier: &'static str,
        reason: String,
    },
}

/// HTTP-facing error type
#[derive(Debug, Error)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("{0}")]
    Internal(String),
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound | StoreError::AccessDenied => AppError::NotFound(e.to_string()),
            StoreError::Database(msg) => AppError::Internal(msg),
        }
    }
}

impl From<BrokerError> for AppError {
    fn from(e: BrokerError) -> Self {
        AppError::ServiceUnavailable(e.to_string())
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Config(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({
            "success": false,
            "error": self.to_string(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broker_error_hints() {
        let refused = BrokerError::Connect("IO error: Connection refused (os error 111)".into());
        assert_eq!(
            refused.hint(),
            Some("check that the broker is running and reachable")
        );

        let auth = BrokerError::Connect("ACCESS_REFUSED - Login was refused".into());
        assert_eq!(
            auth.hint(),
            Some("check the username and password in RABBITMQ_URL")
        );

        let other = BrokerError::Connect("something odd".into());
        assert!(other.hint().is_none());
    }

    #[test]
    fn test_store_error_maps_to_404() {
        let err: AppError = StoreError::AccessDenied.into();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(err.to_string(), "Notification not found or access denied");
    }

    #[test]
    fn test_broker_error_maps_to_503() {
        let err: AppError = BrokerError::Unavailable("down".into()).into();
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
