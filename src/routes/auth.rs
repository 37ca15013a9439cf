//! Login, registration, logout and token refresh.

use std::time::{Duration, Instant};

use axum::{
    extract::State,
    http::{header, HeaderValue, StatusCode},
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use axum_extra::extract::cookie::{Cookie, SameSite, SignedCookieJar};
use serde_json::json;
use uuid::Uuid;

use crate::auth::{hash_password, verify_password, TokenKind, User};
use crate::error::AppError;
use crate::http::{AppState, RequestMeta, SanitizedBody};
use crate::observability::audit::Level;
use crate::security::sanitize::{sanitize_email, sanitize_text};
use crate::validation::{LoginForm, RegisterForm};

/// Signed cookie holding the refresh token.
pub const REFRESH_COOKIE: &str = "refreshToken";

const INVALID_CREDENTIALS: &str = "Invalid email or password";

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/auth/login", post(login))
        .route("/api/auth/register", post(register))
        .route("/api/auth/logout", post(logout))
        .route("/api/auth/refresh", post(refresh))
}

fn refresh_cookie(state: &AppState, token: String) -> Cookie<'static> {
    Cookie::build((REFRESH_COOKIE, token))
        .path("/")
        .http_only(true)
        .secure(state.config.environment.is_production())
        .same_site(SameSite::Strict)
        .max_age(time::Duration::seconds(state.tokens.refresh_ttl_secs()))
        .build()
}

async fn login(
    State(state): State<AppState>,
    meta: RequestMeta,
    jar: SignedCookieJar,
    SanitizedBody(form): SanitizedBody<LoginForm>,
) -> Result<impl IntoResponse, AppError> {
    let form = form.validate()?;
    let email = sanitize_email(&form.email);

    let user = state.users.find_by_email(&email);
    let verified = match &user {
        Some(user) => verify_password(&form.password, &user.password_hash).await?,
        None => false,
    };

    let user = match user {
        Some(user) if verified => user,
        other => {
            let reason = if other.is_some() {
                "INVALID_PASSWORD"
            } else {
                "USER_NOT_FOUND"
            };
            state.audit.audit(
                Level::Warn,
                "LOGIN_FAILED",
                json!({
                    "email": email,
                    "ip": meta.client_ip.to_string(),
                    "reason": reason,
                }),
            );
            tokio::time::sleep(Duration::from_millis(state.config.auth.failure_delay_ms)).await;
            return Err(AppError::Unauthorized(INVALID_CREDENTIALS.to_string()));
        }
    };

    let access_token = state.tokens.issue(TokenKind::Access, &user)?;
    let refresh_token = state.tokens.issue(TokenKind::Refresh, &user)?;
    if let Some(previous) = &meta.session_id {
        state.sessions.destroy(previous);
    }
    let session_id = state.sessions.create(user.id, Instant::now());

    state.audit.audit(
        Level::Info,
        "LOGIN_SUCCESS",
        json!({
            "userId": user.id.to_string(),
            "email": user.email,
            "ip": meta.client_ip.to_string(),
        }),
    );

    Ok((
        jar.add(refresh_cookie(&state, refresh_token)),
        state.sessions.cookie_jar(&session_id),
        Json(json!({
            "success": true,
            "accessToken": access_token,
            "user": {
                "id": user.id.to_string(),
                "email": user.email,
                "nombre": user.nombre,
                "role": user.role,
            },
        })),
    ))
}

async fn register(
    State(state): State<AppState>,
    meta: RequestMeta,
    SanitizedBody(form): SanitizedBody<RegisterForm>,
) -> Result<impl IntoResponse, AppError> {
    let form = form.validate()?;
    let email = sanitize_email(&form.email);
    let nombre = sanitize_text(&form.nombre);

    if state.users.find_by_email(&email).is_some() {
        return Err(AppError::Conflict("Email is already registered".to_string()));
    }

    let password_hash = hash_password(&form.password, state.config.auth.bcrypt_cost).await?;
    state.users.insert(User::new(&email, &nombre, password_hash))?;

    state.audit.audit(
        Level::Info,
        "USER_REGISTERED",
        json!({
            "email": email,
            "nombre": nombre,
            "ip": meta.client_ip.to_string(),
        }),
    );

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": "User registered successfully",
        })),
    ))
}

async fn logout(
    State(state): State<AppState>,
    meta: RequestMeta,
    jar: SignedCookieJar,
) -> impl IntoResponse {
    if let Some(session_id) = &meta.session_id {
        state.sessions.destroy(session_id);
    }

    state.audit.audit(
        Level::Info,
        "LOGOUT",
        json!({ "ip": meta.client_ip.to_string() }),
    );

    let mut response = (
        jar.remove(Cookie::build(REFRESH_COOKIE).path("/")),
        Json(json!({
            "success": true,
            "message": "Logged out successfully",
        })),
    )
        .into_response();

    // An empty session value never resolves, so the removal needs no signature.
    if let Ok(value) = HeaderValue::from_str(&state.sessions.removal_cookie().to_string()) {
        response.headers_mut().append(header::SET_COOKIE, value);
    }
    response
}

async fn refresh(
    State(state): State<AppState>,
    meta: RequestMeta,
    jar: SignedCookieJar,
) -> Result<impl IntoResponse, AppError> {
    let token = jar
        .get(REFRESH_COOKIE)
        .map(|c| c.value().to_string())
        .ok_or_else(|| AppError::Unauthorized("Refresh token not provided".to_string()))?;

    let claims = state.tokens.verify(TokenKind::Refresh, &token)?;
    let user = Uuid::parse_str(&claims.sub)
        .ok()
        .and_then(|id| state.users.find_by_id(&id))
        .ok_or(AppError::InvalidToken)?;

    let access_token = state.tokens.issue(TokenKind::Access, &user)?;

    state.audit.audit(
        Level::Info,
        "TOKEN_REFRESHED",
        json!({ "userId": user.id.to_string(), "ip": meta.client_ip.to_string() }),
    );

    Ok(Json(json!({
        "success": true,
        "accessToken": access_token,
    })))
}
