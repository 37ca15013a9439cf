//! Terminal responses produced outside route handlers.
//!
//! # Responsibilities
//! - JSON 404 for unmatched routes
//! - Convert handler panics into a generic 500
//!
//! # Design Decisions
//! - Both go through [`AppError`] so they share the error body shape and
//!   still pass the response stage (security headers, logging)

use std::any::Any;

use axum::{
    http::Uri,
    response::{IntoResponse, Response},
};

use crate::error::AppError;

/// Fallback for routes nothing else matched.
pub async fn not_found(uri: Uri) -> AppError {
    AppError::NotFound(format!("Route {} not found", uri.path()))
}

/// `CatchPanicLayer` handler.
pub fn handle_panic(payload: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic payload".to_string()
    };

    tracing::error!(panic = %detail, "Handler panicked");
    AppError::Internal(format!("panic: {}", detail)).into_response()
}
