//! Origin, Referer and User-Agent checks plus the CORS allow-list.
//!
//! # Responsibilities
//! - Require a same-host `Origin` or `Referer` on state-changing requests
//! - Block well-known attack tool user agents
//! - Build the CORS layer from the configured allow-list
//!
//! # Design Decisions
//! - `Origin` is preferred over `Referer` when both are present
//! - Exempt paths (CSP reports) are posted by browsers without an origin

use std::sync::Arc;
use std::time::Duration;

use axum::http::{header, HeaderName, HeaderValue, Method};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::json;
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::config::{CorsConfig, Environment};
use crate::error::AppError;
use crate::http::request::RequestContext;
use crate::observability::audit::{AuditLog, Level};
use crate::security::csrf::CsrfTokens;
use crate::security::pipeline::Guard;

static BLOCKED_USER_AGENTS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)sqlmap|nikto|nmap|masscan|metasploit|havij|acunetix").expect("static regex")
});

/// Origins always allowed in development.
const DEV_ORIGINS: &[&str] = &["http://localhost:3000", "http://127.0.0.1:3000"];

/// Rejects requests from known attack tooling.
pub struct UserAgentGuard {
    audit: AuditLog,
}

impl UserAgentGuard {
    pub fn new(audit: AuditLog) -> Self {
        Self { audit }
    }
}

impl Guard for UserAgentGuard {
    fn name(&self) -> &'static str {
        "user_agent"
    }

    fn inspect(&self, ctx: &mut RequestContext) -> Result<(), AppError> {
        let user_agent = ctx.header(header::USER_AGENT).unwrap_or("");
        if !BLOCKED_USER_AGENTS.is_match(user_agent) {
            return Ok(());
        }

        self.audit.security(
            Level::Warn,
            "MALICIOUS_USER_AGENT",
            json!({
                "ip": ctx.client_ip.to_string(),
                "path": ctx.path,
                "userAgent": user_agent,
            }),
        );
        Err(AppError::Forbidden("Forbidden".to_string()))
    }
}

/// Requires `Origin`/`Referer` to name the host the request was sent to.
pub struct OriginGuard {
    csrf: Arc<CsrfTokens>,
    audit: AuditLog,
}

impl OriginGuard {
    pub fn new(csrf: Arc<CsrfTokens>, audit: AuditLog) -> Self {
        Self { csrf, audit }
    }

    fn reject(&self, ctx: &RequestContext, source: &str, value: &str, message: &str) -> AppError {
        self.audit.security(
            Level::Warn,
            "ORIGIN_REJECTED",
            json!({
                "ip": ctx.client_ip.to_string(),
                "path": ctx.path,
                "header": source,
                "value": value,
                "host": ctx.header(header::HOST),
            }),
        );
        AppError::Forbidden(message.to_string())
    }
}

/// `host[:port]` of an absolute URL.
fn url_authority(raw: &str) -> Option<String> {
    let url = url::Url::parse(raw).ok()?;
    let host = url.host_str()?;
    Some(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

impl Guard for OriginGuard {
    fn name(&self) -> &'static str {
        "origin"
    }

    fn inspect(&self, ctx: &mut RequestContext) -> Result<(), AppError> {
        if !ctx.is_state_changing() || self.csrf.is_exempt(&ctx.path) {
            return Ok(());
        }

        let (name, value) = match (ctx.header(header::ORIGIN), ctx.header(header::REFERER)) {
            (Some(origin), _) => ("origin", origin),
            (None, Some(referer)) => ("referer", referer),
            (None, None) => {
                return Err(self.reject(ctx, "origin", "", "Missing origin header"));
            }
        };

        let host = ctx.header(header::HOST).unwrap_or("");
        match url_authority(value) {
            Some(authority) if !host.is_empty() && authority.eq_ignore_ascii_case(host) => Ok(()),
            _ => Err(self.reject(ctx, name, value, "Invalid request origin")),
        }
    }
}

/// Build the CORS layer for the configured allow-list.
pub fn cors_layer(config: &CorsConfig, environment: Environment) -> CorsLayer {
    let mut origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();
    if environment.is_development() {
        origins.extend(DEV_ORIGINS.iter().map(|&o| HeaderValue::from_static(o)));
    }

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static("x-csrf-token"),
            HeaderName::from_static("x-requested-with"),
        ])
        .expose_headers([
            HeaderName::from_static("x-ratelimit-limit"),
            HeaderName::from_static("x-ratelimit-remaining"),
            HeaderName::from_static("x-ratelimit-reset"),
        ])
        .allow_credentials(true)
        .max_age(Duration::from_secs(config.max_age_secs))
}
