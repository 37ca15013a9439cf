//! Authenticated file uploads.

use axum::{
    extract::{
        multipart::{MultipartError, MultipartRejection},
        DefaultBodyLimit, Extension, Multipart, State,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use chrono::Utc;
use serde_json::json;

use crate::auth::{require_role, AuthUser};
use crate::error::AppError;
use crate::http::{AppState, RequestMeta};
use crate::security::upload::{UploadError, UploadLedger};

/// Roles allowed to upload.
const UPLOAD_ROLES: &[&str] = &["user", "admin"];

pub fn router(state: &AppState) -> Router<AppState> {
    Router::new().route(
        "/api/uploads",
        post(upload).layer(DefaultBodyLimit::max(state.uploads.max_request_bytes())),
    )
}

fn multipart_error(err: MultipartError, limit: usize) -> AppError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        return AppError::PayloadTooLarge { max_bytes: limit };
    }
    UploadError::Multipart(err.body_text()).into()
}

async fn upload(
    State(state): State<AppState>,
    meta: RequestMeta,
    user: AuthUser,
    Extension(ledger): Extension<UploadLedger>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<impl IntoResponse, AppError> {
    require_role(&user, UPLOAD_ROLES)?;
    let claims = &user.0;
    let mut multipart =
        multipart.map_err(|e| AppError::BadRequest(format!("Expected multipart form data: {}", e)))?;
    let guard = &state.uploads;
    let limit = guard.max_request_bytes();

    let mut stored = Vec::new();
    while let Some(mut field) = multipart.next_field().await.map_err(|e| multipart_error(e, limit))? {
        let Some(original_name) = field.file_name().map(str::to_string) else {
            continue;
        };
        guard.check_count(stored.len() + 1)?;

        let mime = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        guard.check_file(&original_name, &mime)?;

        let mut data = Vec::new();
        while let Some(chunk) = field.chunk().await.map_err(|e| multipart_error(e, limit))? {
            data.extend_from_slice(&chunk);
            guard.check_size(data.len())?;
        }

        let file = guard
            .store(&original_name, &mime, &data, Utc::now(), &ledger)
            .await?;
        tracing::info!(
            stored_name = %file.stored_name,
            original_name = %file.original_name,
            mime_type = %file.mime_type,
            size = file.size,
            user_id = %claims.sub,
            ip = %meta.client_ip,
            "File uploaded"
        );
        stored.push(file);
    }

    if stored.is_empty() {
        return Err(AppError::BadRequest("No files uploaded".to_string()));
    }

    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "files": stored })),
    ))
}
