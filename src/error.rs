//! Application error taxonomy.
//!
//! Every guard and handler rejects through [`AppError`]; the `IntoResponse`
//! impl is the single place where an error becomes a client-facing body of
//! the shape `{ "error": ..., "code": ..., "details": [...] }`.
//!
//! # Design Decisions
//! - Internal errors are logged in full and answered with a generic message
//! - Machine-readable codes are stable strings, independent of messages
//! - `TooManyRequests` carries its own `Retry-After` hint

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;

/// A single field-level validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Detail of an internal error, attached to the response extensions so the
/// response stage can expose it in development.
#[derive(Debug, Clone)]
pub struct InternalDetail(pub String);

/// Application error type.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Validation failed")]
    Validation(Vec<FieldError>),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Invalid token")]
    InvalidToken,

    #[error("Token expired")]
    TokenExpired,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("CSRF token missing or invalid")]
    CsrfValidationFailed,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Too many requests: {message}")]
    TooManyRequests { message: String, retry_after_secs: u64 },

    #[error("Payload too large (max {max_bytes} bytes)")]
    PayloadTooLarge { max_bytes: usize },

    #[error("Unsupported content type: {0}")]
    UnsupportedMediaType(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) | AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) | AppError::InvalidToken | AppError::TokenExpired => {
                StatusCode::UNAUTHORIZED
            }
            AppError::Forbidden(_) | AppError::CsrfValidationFailed => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::TooManyRequests { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::BadRequest(_) => "BAD_REQUEST",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::Unauthorized(_) => "UNAUTHORIZED",
            AppError::InvalidToken => "INVALID_TOKEN",
            AppError::TokenExpired => "TOKEN_EXPIRED",
            AppError::Forbidden(_) => "FORBIDDEN",
            AppError::CsrfValidationFailed => "CSRF_VALIDATION_FAILED",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Conflict(_) => "CONFLICT",
            AppError::TooManyRequests { .. } => "TOO_MANY_REQUESTS",
            AppError::PayloadTooLarge { .. } => "PAYLOAD_TOO_LARGE",
            AppError::UnsupportedMediaType(_) => "UNSUPPORTED_MEDIA_TYPE",
            AppError::Internal(_) => "INTERNAL_SERVER_ERROR",
        }
    }

    /// Message safe to show to the client.
    pub fn public_message(&self) -> String {
        match self {
            AppError::BadRequest(msg)
            | AppError::Unauthorized(msg)
            | AppError::Forbidden(msg)
            | AppError::NotFound(msg)
            | AppError::Conflict(msg) => msg.clone(),
            AppError::Validation(_) => "Validation failed".to_string(),
            AppError::InvalidToken => "Invalid token".to_string(),
            AppError::TokenExpired => "Token expired".to_string(),
            AppError::CsrfValidationFailed => {
                "Invalid or expired security token. Please reload the page.".to_string()
            }
            AppError::TooManyRequests { message, .. } => message.clone(),
            AppError::PayloadTooLarge { .. } => "Payload too large".to_string(),
            AppError::UnsupportedMediaType(_) => "Unsupported Content-Type".to_string(),
            AppError::Internal(_) => "Internal server error".to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        if let AppError::Internal(detail) = &self {
            tracing::error!(error = %detail, "Unhandled internal error");
        }

        let mut body = json!({
            "error": self.public_message(),
            "code": self.code(),
        });
        match &self {
            AppError::Validation(details) => body["details"] = json!(details),
            AppError::PayloadTooLarge { max_bytes } => body["maxSize"] = json!(max_bytes),
            AppError::TooManyRequests { retry_after_secs, .. } => {
                body["retryAfter"] = json!(retry_after_secs)
            }
            _ => {}
        }

        let mut response = (status, Json(body)).into_response();
        if let AppError::Internal(detail) = &self {
            response
                .extensions_mut()
                .insert(InternalDetail(detail.clone()));
        }
        if let AppError::TooManyRequests { retry_after_secs, .. } = self {
            if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("Malformed JSON body: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_validation_error_shape() {
        let err = AppError::Validation(vec![FieldError::new("mensaje", "too short")]);
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = body_json(response).await;
        assert_eq!(body["code"], "VALIDATION_ERROR");
        assert_eq!(body["details"][0]["field"], "mensaje");
    }

    #[tokio::test]
    async fn test_internal_error_hides_detail() {
        let response = AppError::Internal("db password=hunter2".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = body_json(response).await;
        assert_eq!(body["error"], "Internal server error");
        assert!(!body.to_string().contains("hunter2"));
    }

    #[test]
    fn test_too_many_requests_sets_retry_after() {
        let response = AppError::TooManyRequests {
            message: "slow down".into(),
            retry_after_secs: 42,
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "42");
    }

    #[test]
    fn test_csrf_code() {
        assert_eq!(AppError::CsrfValidationFailed.code(), "CSRF_VALIDATION_FAILED");
        assert_eq!(AppError::CsrfValidationFailed.status(), StatusCode::FORBIDDEN);
    }
}
