//! Page, health and static asset routes.

use std::path::PathBuf;

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderValue, StatusCode},
    response::{Html, IntoResponse},
    routing::{get, post},
    Json, Router,
};
use chrono::{SecondsFormat, Utc};
use serde_json::{json, Value};
use tower_http::{services::ServeDir, set_header::SetResponseHeaderLayer};

use crate::error::AppError;
use crate::http::{AppState, RequestMeta};
use crate::observability::audit::Level;
use crate::security::nonce::{inject_before_head_close, inject_nonce_into_html};
use crate::security::sanitize::{escape_html, sanitize_url};

const STATIC_CACHE: &str = "public, max-age=86400";

pub fn router(state: &AppState) -> Router<AppState> {
    let root = PathBuf::from(&state.config.web.root);
    let assets = Router::new()
        .nest_service("/assets", ServeDir::new(root.join("assets")))
        .nest_service("/styles", ServeDir::new(root.join("styles")))
        .nest_service("/scripts", ServeDir::new(root.join("scripts")))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::CACHE_CONTROL,
            HeaderValue::from_static(STATIC_CACHE),
        ));

    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/ping", get(ping))
        .route("/api/csp-report", post(csp_report))
        .merge(assets)
}

/// The landing page with the request nonce and CSRF token injected.
async fn index(State(state): State<AppState>, meta: RequestMeta) -> Result<Html<String>, AppError> {
    let path = PathBuf::from(&state.config.web.root).join("index.html");
    let html = tokio::fs::read_to_string(&path)
        .await
        .map_err(|e| AppError::Internal(format!("reading {}: {}", path.display(), e)))?;

    let mut html = inject_nonce_into_html(&html, &meta.nonce);
    if let Some(token) = &meta.csrf_token {
        let tag = format!(r#"<meta name="csrf-token" content="{}">"#, escape_html(token));
        html = inject_before_head_close(&html, &tag);
    }
    Ok(Html(html))
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        "uptime": state.started_at.elapsed().as_secs_f64(),
    }))
}

async fn ping() -> &'static str {
    "pong"
}

/// Browsers post violation reports here without origin or CSRF token.
async fn csp_report(State(state): State<AppState>, meta: RequestMeta, body: Bytes) -> impl IntoResponse {
    let report: Value = serde_json::from_slice(&body).unwrap_or_else(|_| json!({ "unparsed_bytes": body.len() }));
    let document_uri = report
        .pointer("/csp-report/document-uri")
        .and_then(Value::as_str)
        .map(sanitize_url);
    state.audit.security(
        Level::Warn,
        "CSP_VIOLATION",
        json!({
            "ip": meta.client_ip.to_string(),
            "documentUri": document_uri,
            "report": report,
        }),
    );
    StatusCode::NO_CONTENT
}

