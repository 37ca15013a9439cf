//! The security pipeline as an axum middleware.
//!
//! # Data Flow
//! ```text
//! Request
//!     → context (client IP, request id, route class) + nonce
//!     → admission guards (user agent, origin, rate limit, slow-down)
//!     → slow-down delay
//!     → body parsing (size-limited JSON/form, multipart left streaming)
//!     → signed cookies, session, CSRF token
//!     → inspection guards (CSRF, key neutralization, pollution, patterns)
//!     → route dispatch
//! Response (every status, rejections included)
//!     → auth budget refund, upload cleanup
//!     → CSRF/session cookies, rate-limit and security headers
//!     → request log, metrics
//! ```

use std::time::Instant;

use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, request::Parts, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::SignedCookieJar;
use chrono::Utc;
use serde_json::json;

use crate::error::{AppError, InternalDetail};
use crate::http::request::{
    body_kind, read_body, BodyKind, ParsedBody, RequestContext, RequestMeta, RouteClass,
};
use crate::http::server::AppState;
use crate::observability::audit::Level;
use crate::observability::metrics;
use crate::security::csrf::CSRF_HEADER;
use crate::security::nonce::generate_nonce;
use crate::security::rate_limit::Scope;
use crate::security::upload::UploadLedger;

/// Paths left out of the request log.
const QUIET_PATHS: &[&str] = &["/health", "/ping"];

pub async fn security_pipeline(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let start = Instant::now();
    let (parts, body) = request.into_parts();

    let mut ctx = RequestContext::new(&parts, state.config.listener.trust_proxy);
    ctx.nonce = generate_nonce();
    let ledger = (ctx.route == RouteClass::Upload).then(UploadLedger::new);

    let mut response = match dispatch(&state, &mut ctx, parts, body, ledger.clone(), next).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    };

    finalize(&state, &ctx, ledger, &mut response, start).await;
    response
}

/// Run both guard lists around body parsing, then the route.
async fn dispatch(
    state: &AppState,
    ctx: &mut RequestContext,
    mut parts: Parts,
    body: Body,
    ledger: Option<UploadLedger>,
    next: Next,
) -> Result<Response, AppError> {
    state.pipeline.admit(ctx)?;

    if !ctx.delay.is_zero() {
        tracing::debug!(ip = %ctx.client_ip, delay_ms = ctx.delay.as_millis() as u64, "Delaying request");
        tokio::time::sleep(ctx.delay).await;
    }

    let exempt = state.csrf.is_exempt(&ctx.path);
    let body = match body_kind(ctx, exempt)? {
        BodyKind::Stream | BodyKind::Empty => body,
        kind => {
            let bytes = read_body(ctx, body, kind, state.config.limits.max_body_bytes).await?;
            Body::from(bytes)
        }
    };

    let jar = SignedCookieJar::from_headers(&parts.headers, state.cookie_key.clone());
    ctx.session_id = state.sessions.resolve(&parts.headers, Instant::now());
    ctx.csrf = Some(state.csrf.resolve(&jar, Utc::now().timestamp()));

    state.pipeline.inspect(ctx)?;

    parts.extensions.insert(RequestMeta {
        request_id: ctx.request_id.clone(),
        client_ip: ctx.client_ip,
        nonce: ctx.nonce.clone(),
        csrf_token: ctx.csrf.as_ref().map(|c| c.token.clone()),
        session_id: ctx.session_id.clone(),
    });
    parts.extensions.insert(ParsedBody(ctx.body.clone()));
    if let Some(ledger) = ledger {
        parts.extensions.insert(ledger);
    }

    ctx.dispatched = true;
    Ok(next.run(Request::from_parts(parts, body)).await)
}

/// Copy the `Set-Cookie` headers a jar would emit onto `response`.
fn append_cookies(response: &mut Response, jar: SignedCookieJar) {
    let emitted = (jar, ()).into_response();
    for value in emitted.headers().get_all(header::SET_COOKIE) {
        response.headers_mut().append(header::SET_COOKIE, value.clone());
    }
}

fn sets_cookie(response: &Response, name: &str) -> bool {
    let prefix = format!("{}=", name);
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.starts_with(&prefix))
}

async fn finalize(
    state: &AppState,
    ctx: &RequestContext,
    ledger: Option<UploadLedger>,
    response: &mut Response,
    start: Instant,
) {
    let status = response.status();
    let now = Instant::now();

    if status == StatusCode::UNAUTHORIZED {
        state.tracker.track(ctx.client_ip, "UNAUTHORIZED", now);
    }

    // Only attempts the handler rejected keep their auth slot.
    if ctx.auth_counted && (status.as_u16() < 400 || !ctx.dispatched) {
        state.limiter.refund(Scope::Auth, &ctx.client_ip, now);
    } else if ctx.auth_counted {
        tracing::debug!(ip = %ctx.client_ip, status = status.as_u16(), "Counted failed authentication attempt");
    }

    if let Some(ledger) = ledger {
        if !status.is_success() {
            let removed = ledger.cleanup().await;
            if removed > 0 {
                tracing::warn!(removed, status = status.as_u16(), "Deleted uploads of failed request");
            }
        }
    }

    if let Some(csrf) = &ctx.csrf {
        if csrf.fresh {
            let jar = SignedCookieJar::new(state.cookie_key.clone()).add(state.csrf.cookie(csrf));
            append_cookies(response, jar);
        }
        if ctx.path.starts_with("/api/") {
            if let Ok(value) = HeaderValue::from_str(&csrf.token) {
                response.headers_mut().insert(CSRF_HEADER, value);
            }
        }
    }

    if let Some(session_id) = &ctx.session_id {
        if !sets_cookie(response, state.sessions.cookie_name()) {
            append_cookies(response, state.sessions.cookie_jar(session_id));
        }
    }

    if let Some(info) = ctx.rate_limit {
        info.apply(response.headers_mut());
    }

    state
        .security_headers
        .apply(response.headers_mut(), &ctx.nonce, &ctx.path);

    if state.config.environment.is_development() {
        expose_internal_detail(response);
    }

    if !QUIET_PATHS.contains(&ctx.path.as_str()) {
        let level = if status.is_server_error() {
            Level::Error
        } else if status.is_client_error() {
            Level::Warn
        } else {
            Level::Info
        };
        state.audit.general(
            level,
            "REQUEST",
            json!({
                "requestId": ctx.request_id,
                "method": ctx.method.as_str(),
                "path": ctx.path,
                "status": status.as_u16(),
                "durationMs": start.elapsed().as_millis() as u64,
                "ip": ctx.client_ip.to_string(),
                "userAgent": ctx.header(header::USER_AGENT),
            }),
        );
    }

    metrics::record_request(ctx.method.as_str(), status.as_u16(), start);
}

/// Rewrite an internal error body to include its detail.
fn expose_internal_detail(response: &mut Response) {
    let Some(InternalDetail(detail)) = response.extensions_mut().remove::<InternalDetail>() else {
        return;
    };
    let body = json!({
        "error": "Internal server error",
        "code": "INTERNAL_SERVER_ERROR",
        "detail": detail,
    });
    // The replacement body is plain JSON, whatever encoding the original had.
    response.headers_mut().remove(header::CONTENT_ENCODING);
    response.headers_mut().remove(header::CONTENT_LENGTH);
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    *response.body_mut() = Body::from(body.to_string());
}
