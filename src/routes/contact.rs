//! Contact form.

use axum::{
    extract::State,
    http::{header, HeaderMap},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};

use crate::error::AppError;
use crate::http::{AppState, RequestMeta, SanitizedBody};
use crate::observability::audit::Level;
use crate::security::sanitize::{sanitize_email, sanitize_text};
use crate::validation::ContactForm;

pub fn router(state: &AppState) -> Router<AppState> {
    let router = Router::new().route("/api/contact", post(submit));
    if state.config.environment.is_development() {
        router.route("/api/contact/test", get(test_endpoint))
    } else {
        router
    }
}

async fn submit(
    State(state): State<AppState>,
    meta: RequestMeta,
    headers: HeaderMap,
    SanitizedBody(form): SanitizedBody<ContactForm>,
) -> Result<Json<Value>, AppError> {
    let form = form.validate()?;
    let nombre = sanitize_text(&form.nombre);
    let email = sanitize_email(&form.email);
    let empresa = sanitize_text(&form.empresa);
    let mensaje = sanitize_text(&form.mensaje);

    state.audit.audit(
        Level::Info,
        "CONTACT_FORM_SUBMITTED",
        json!({
            "data": {
                "nombre": nombre,
                "email": email,
                "empresa": empresa,
                "messageLength": mensaje.chars().count(),
            },
            "ip": meta.client_ip.to_string(),
            "userAgent": headers.get(header::USER_AGENT).and_then(|v| v.to_str().ok()),
        }),
    );
    tracing::info!(request_id = ?meta.request_id, "Contact form processed");

    Ok(Json(json!({
        "success": true,
        "message": "Message received. We will get in touch soon.",
    })))
}

async fn test_endpoint(meta: RequestMeta) -> Json<Value> {
    Json(json!({
        "message": "Contact API working",
        "csrfToken": meta.csrf_token,
    }))
}
