//! Content-Security-Policy and response hardening headers.
//!
//! # Responsibilities
//! - Build the per-request CSP around the request nonce
//! - Add the static hardening header set (HSTS, framing, sniffing, isolation)
//! - Disable caching on authentication and admin paths
//! - Strip server-identifying headers
//!
//! # Design Decisions
//! - Never rejects; runs on every response, rejections included
//! - No `'unsafe-inline'` or `'unsafe-eval'` in any directive

use axum::http::{
    header::{
        CACHE_CONTROL, CONTENT_SECURITY_POLICY, CONTENT_SECURITY_POLICY_REPORT_ONLY, EXPIRES,
        PRAGMA, REFERRER_POLICY, SERVER, STRICT_TRANSPORT_SECURITY, X_CONTENT_TYPE_OPTIONS,
        X_DNS_PREFETCH_CONTROL, X_FRAME_OPTIONS, X_XSS_PROTECTION,
    },
    HeaderMap, HeaderName, HeaderValue,
};

use crate::config::CspConfig;

const PERMISSIONS_POLICY: &str = "geolocation=(), microphone=(), camera=(), payment=(), \
usb=(), magnetometer=(), gyroscope=(), accelerometer=(), ambient-light-sensor=(), \
autoplay=(), encrypted-media=(), picture-in-picture=()";

const NO_STORE: &str = "no-store, no-cache, must-revalidate, proxy-revalidate";

static STATIC_HEADERS: &[(&str, &str)] = &[
    ("x-permitted-cross-domain-policies", "none"),
    ("x-download-options", "noopen"),
    ("permissions-policy", PERMISSIONS_POLICY),
    ("cross-origin-embedder-policy", "require-corp"),
    ("cross-origin-opener-policy", "same-origin"),
    ("cross-origin-resource-policy", "same-origin"),
];

/// Applies the security header set to responses.
#[derive(Debug, Clone)]
pub struct SecurityHeaders {
    report_uri: String,
    report_only: bool,
    production: bool,
}

impl SecurityHeaders {
    pub fn new(config: &CspConfig, production: bool) -> Self {
        Self {
            report_uri: config.report_uri.clone(),
            report_only: config.report_only,
            production,
        }
    }

    /// Build the Content-Security-Policy value for one request.
    pub fn content_security_policy(&self, nonce: &str) -> String {
        let nonce_src = format!("'nonce-{}'", nonce);
        let mut directives = vec![
            "default-src 'self'".to_string(),
            format!("script-src 'self' {} 'strict-dynamic'", nonce_src),
            "script-src-attr 'none'".to_string(),
            format!("style-src 'self' {} https://fonts.googleapis.com", nonce_src),
            "img-src 'self' data: https:".to_string(),
            "font-src 'self' https://fonts.gstatic.com data:".to_string(),
            "connect-src 'self'".to_string(),
            "frame-src 'self' https://www.google.com".to_string(),
            "frame-ancestors 'none'".to_string(),
            "base-uri 'self'".to_string(),
            "form-action 'self'".to_string(),
            "object-src 'none'".to_string(),
            "media-src 'self'".to_string(),
            "worker-src 'self' blob:".to_string(),
            "manifest-src 'self'".to_string(),
        ];
        if self.production {
            directives.push("upgrade-insecure-requests".to_string());
        }
        if !self.report_uri.is_empty() {
            directives.push(format!("report-uri {}", self.report_uri));
        }
        directives.join("; ")
    }

    /// Write the full header set into `headers`.
    pub fn apply(&self, headers: &mut HeaderMap, nonce: &str, path: &str) {
        let csp_header = if self.report_only {
            CONTENT_SECURITY_POLICY_REPORT_ONLY
        } else {
            CONTENT_SECURITY_POLICY
        };
        match HeaderValue::from_str(&self.content_security_policy(nonce)) {
            Ok(value) => {
                headers.insert(csp_header, value);
            }
            Err(e) => tracing::error!(error = %e, "Failed to encode CSP header"),
        }

        headers.insert(
            STRICT_TRANSPORT_SECURITY,
            HeaderValue::from_static("max-age=31536000; includeSubDomains; preload"),
        );
        headers.insert(X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
        headers.insert(X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
        headers.insert(REFERRER_POLICY, HeaderValue::from_static("no-referrer"));
        headers.insert(X_DNS_PREFETCH_CONTROL, HeaderValue::from_static("off"));
        headers.insert(X_XSS_PROTECTION, HeaderValue::from_static("0"));
        for &(name, value) in STATIC_HEADERS {
            headers.insert(
                HeaderName::from_static(name),
                HeaderValue::from_static(value),
            );
        }

        if path.contains("/auth") || path.contains("/admin") {
            headers.insert(CACHE_CONTROL, HeaderValue::from_static(NO_STORE));
            headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
            headers.insert(EXPIRES, HeaderValue::from_static("0"));
            headers.insert(
                HeaderName::from_static("surrogate-control"),
                HeaderValue::from_static("no-store"),
            );
        }

        headers.remove(SERVER);
        headers.remove("x-powered-by");
    }
}
