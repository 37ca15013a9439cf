//! Double-submit CSRF protection.
//!
//! The canonical token lives in a signed, HttpOnly cookie as
//! `<token>.<issued_unix_secs>`. Clients echo it back through the
//! `X-CSRF-Token` header, a `_csrf` body field or a `_csrf` query parameter.
//!
//! # Design Decisions
//! - Tokens are reusable until they expire
//! - Safe methods never need a token
//! - Requests carrying `Authorization: Bearer` are exempt; access tokens are
//!   never stored in cookies, so a browser cannot attach one on its own

use std::sync::Arc;

use axum_extra::extract::cookie::{Cookie, SameSite, SignedCookieJar};
use rand::{thread_rng, RngCore};
use serde_json::{json, Value};

use crate::config::CsrfConfig;
use crate::error::AppError;
use crate::http::request::RequestContext;
use crate::observability::audit::{AuditLog, Level};
use crate::security::pipeline::Guard;

/// Response header exposing the token to API clients.
pub const CSRF_HEADER: &str = "x-csrf-token";

/// Body field and query parameter carrying the token.
pub const CSRF_FIELD: &str = "_csrf";

const TOKEN_BYTES: usize = 32;

/// Token state for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsrfState {
    pub token: String,
    pub issued_at: i64,
    /// Minted during this request; the cookie must be sent.
    pub fresh: bool,
}

/// Generate a new random token (64 hex characters).
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Compare two byte strings without short-circuiting on the first mismatch.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Token issuing and cookie handling.
#[derive(Debug, Clone)]
pub struct CsrfTokens {
    cookie_name: String,
    ttl_secs: i64,
    secure: bool,
    exempt_paths: Vec<String>,
}

impl CsrfTokens {
    pub fn new(config: &CsrfConfig, secure: bool) -> Self {
        Self {
            cookie_name: config.cookie_name.clone(),
            ttl_secs: config.ttl_secs as i64,
            secure,
            exempt_paths: config.exempt_paths.clone(),
        }
    }

    pub fn is_exempt(&self, path: &str) -> bool {
        self.exempt_paths.iter().any(|p| p == path)
    }

    /// Read the token from the signed cookie, minting a new one when it is
    /// missing, tampered with or expired.
    pub fn resolve(&self, jar: &SignedCookieJar, now_secs: i64) -> CsrfState {
        let existing = jar
            .get(&self.cookie_name)
            .and_then(|cookie| self.parse_cookie_value(cookie.value(), now_secs));

        match existing {
            Some(state) => state,
            None => CsrfState {
                token: generate_token(),
                issued_at: now_secs,
                fresh: true,
            },
        }
    }

    fn parse_cookie_value(&self, value: &str, now_secs: i64) -> Option<CsrfState> {
        let (token, issued) = value.split_once('.')?;
        let issued_at: i64 = issued.parse().ok()?;
        let valid = token.len() == TOKEN_BYTES * 2
            && token.bytes().all(|b| b.is_ascii_hexdigit())
            && issued_at <= now_secs
            && now_secs - issued_at < self.ttl_secs;

        valid.then(|| CsrfState {
            token: token.to_string(),
            issued_at,
            fresh: false,
        })
    }

    /// Cookie carrying a freshly minted token.
    pub fn cookie(&self, state: &CsrfState) -> Cookie<'static> {
        Cookie::build((
            self.cookie_name.clone(),
            format!("{}.{}", state.token, state.issued_at),
        ))
        .path("/")
        .http_only(true)
        .secure(self.secure)
        .same_site(SameSite::Strict)
        .max_age(time::Duration::seconds(self.ttl_secs))
        .build()
    }
}

/// Rejects unsafe requests that do not echo the cookie token.
pub struct CsrfGuard {
    tokens: Arc<CsrfTokens>,
    audit: AuditLog,
}

impl CsrfGuard {
    pub fn new(tokens: Arc<CsrfTokens>, audit: AuditLog) -> Self {
        Self { tokens, audit }
    }

    fn presented_token(ctx: &RequestContext) -> Option<String> {
        if let Some(header) = ctx.header(CSRF_HEADER) {
            return Some(header.to_string());
        }
        if let Some(Value::String(field)) = ctx.body.get(CSRF_FIELD) {
            return Some(field.clone());
        }
        match ctx.query.get(CSRF_FIELD) {
            Some(Value::String(param)) => Some(param.clone()),
            _ => None,
        }
    }
}

impl Guard for CsrfGuard {
    fn name(&self) -> &'static str {
        "csrf"
    }

    fn inspect(&self, ctx: &mut RequestContext) -> Result<(), AppError> {
        if ctx.is_safe_method() || self.tokens.is_exempt(&ctx.path) || ctx.has_bearer() {
            return Ok(());
        }

        let expected = ctx.csrf.as_ref().filter(|state| !state.fresh);
        let presented = Self::presented_token(ctx);

        let valid = match (expected, presented.as_deref()) {
            (Some(state), Some(token)) => {
                constant_time_eq(state.token.as_bytes(), token.as_bytes())
            }
            _ => false,
        };

        if valid {
            return Ok(());
        }

        self.audit.audit(
            Level::Warn,
            "CSRF_VALIDATION_FAILED",
            json!({
                "ip": ctx.client_ip.to_string(),
                "path": ctx.path,
                "method": ctx.method.as_str(),
                "referer": ctx.header("referer"),
            }),
        );
        Err(AppError::CsrfValidationFailed)
    }
}
