//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the server.
//! All types derive Serde traits for deserialization from config files; the
//! environment overlay in `loader.rs` writes into the same structure.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Root configuration for the web server.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Deployment mode.
    pub environment: Environment,

    /// Listener configuration (bind host/port, proxy trust).
    pub listener: ListenerConfig,

    /// Signing secrets. Required; validated at startup.
    pub secrets: SecretsConfig,

    /// Token lifetimes and password hashing.
    pub auth: AuthConfig,

    /// Session cookie settings.
    pub session: SessionConfig,

    /// CSRF double-submit settings.
    pub csrf: CsrfConfig,

    /// CORS allow-list.
    pub cors: CorsConfig,

    /// Fixed-window rate limiting.
    pub rate_limit: RateLimitConfig,

    /// Progressive delay stage.
    pub slow_down: SlowDownConfig,

    /// Content Security Policy settings.
    pub csp: CspConfig,

    /// Request size and time limits.
    pub limits: LimitsConfig,

    /// File upload policy.
    pub upload: UploadConfig,

    /// Audit log and intrusion tracker settings.
    pub audit: AuditConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Static site location.
    pub web: WebConfig,
}

/// Deployment mode, read from `NODE_ENV`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production,
    Test,
}

impl Environment {
    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }

    pub fn is_development(&self) -> bool {
        matches!(self, Environment::Development)
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Some(Environment::Development),
            "production" | "prod" => Some(Environment::Production),
            "test" => Some(Environment::Test),
            _ => None,
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Production => write!(f, "production"),
            Environment::Test => write!(f, "test"),
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind host (e.g., "0.0.0.0").
    pub host: String,

    /// Bind port.
    pub port: u16,

    /// Take the client address from the last `X-Forwarded-For` hop.
    pub trust_proxy: bool,
}

impl ListenerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 3000,
            trust_proxy: true,
        }
    }
}

/// Signing secrets.
#[derive(Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct SecretsConfig {
    /// HS256 secret for access tokens.
    pub jwt_secret: String,

    /// HS256 secret for refresh tokens; falls back to `jwt_secret`.
    pub jwt_refresh_secret: Option<String>,

    /// Session signing secret.
    pub session_secret: String,

    /// Cookie signing secret (at least 32 bytes).
    pub cookie_secret: String,
}

impl SecretsConfig {
    pub fn refresh_secret(&self) -> &str {
        self.jwt_refresh_secret
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or(&self.jwt_secret)
    }
}

impl fmt::Debug for SecretsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mask = |s: &str| if s.is_empty() { "<unset>" } else { "[REDACTED]" };
        f.debug_struct("SecretsConfig")
            .field("jwt_secret", &mask(&self.jwt_secret))
            .field(
                "jwt_refresh_secret",
                &self.jwt_refresh_secret.as_deref().map(mask),
            )
            .field("session_secret", &mask(&self.session_secret))
            .field("cookie_secret", &mask(&self.cookie_secret))
            .finish()
    }
}

/// Token lifetimes and password hashing.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Access token lifetime in seconds.
    pub access_ttl_secs: u64,

    /// Refresh token lifetime in seconds.
    pub refresh_ttl_secs: u64,

    /// `iss`/`aud` claim value.
    pub issuer: String,

    /// bcrypt cost factor.
    pub bcrypt_cost: u32,

    /// Artificial delay applied to failed logins, in milliseconds.
    pub failure_delay_ms: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            access_ttl_secs: 15 * 60,
            refresh_ttl_secs: 7 * 24 * 60 * 60,
            issuer: "thenextstep.com.ar".to_string(),
            bcrypt_cost: 12,
            failure_delay_ms: 1000,
        }
    }
}

/// Session cookie settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    pub cookie_name: String,
    pub max_age_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: "tns_session".to_string(),
            max_age_secs: 3600,
        }
    }
}

/// CSRF double-submit settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CsrfConfig {
    /// Name of the signed cookie holding the canonical token.
    pub cookie_name: String,

    /// Token lifetime in seconds.
    pub ttl_secs: u64,

    /// Paths that skip origin and CSRF validation.
    pub exempt_paths: Vec<String>,
}

impl Default for CsrfConfig {
    fn default() -> Self {
        Self {
            cookie_name: "_csrf".to_string(),
            ttl_secs: 3600,
            exempt_paths: vec!["/api/csp-report".to_string()],
        }
    }
}

/// CORS allow-list.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CorsConfig {
    /// Origins allowed to read cross-origin responses.
    pub allowed_origins: Vec<String>,

    /// Preflight cache lifetime in seconds.
    pub max_age_secs: u64,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: Vec::new(),
            max_age_secs: 86_400,
        }
    }
}

/// Limit for one rate-limit scope.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct ScopeConfig {
    /// Maximum requests (or failures, for the auth scope) per window.
    pub max: u32,

    /// Window length in seconds.
    pub window_secs: u64,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    /// Client addresses that bypass every scope.
    pub trusted_ips: Vec<String>,

    /// Every request.
    pub global: ScopeConfig,

    /// Failed login/register attempts.
    pub auth: ScopeConfig,

    /// Contact form submissions.
    pub contact: ScopeConfig,

    /// Uploads and other expensive operations.
    pub heavy: ScopeConfig,

    /// Interval of the background sweep of expired windows.
    pub sweep_interval_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            trusted_ips: Vec::new(),
            global: ScopeConfig { max: 100, window_secs: 15 * 60 },
            auth: ScopeConfig { max: 5, window_secs: 15 * 60 },
            contact: ScopeConfig { max: 3, window_secs: 60 * 60 },
            heavy: ScopeConfig { max: 5, window_secs: 60 * 60 },
            sweep_interval_secs: 60,
        }
    }
}

/// Progressive delay configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SlowDownConfig {
    pub enabled: bool,

    /// Requests per window before delays start.
    pub delay_after: u32,

    /// Added delay per request above `delay_after`, in milliseconds.
    pub delay_ms: u64,

    /// Delay ceiling in milliseconds.
    pub max_delay_ms: u64,

    pub window_secs: u64,
}

impl Default for SlowDownConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            delay_after: 50,
            delay_ms: 500,
            max_delay_ms: 20_000,
            window_secs: 15 * 60,
        }
    }
}

/// Content Security Policy settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CspConfig {
    /// Violation report collection endpoint.
    pub report_uri: String,

    /// Emit `Content-Security-Policy-Report-Only` instead of enforcing.
    pub report_only: bool,
}

impl Default for CspConfig {
    fn default() -> Self {
        Self {
            report_uri: "/api/csp-report".to_string(),
            report_only: false,
        }
    }
}

/// Request limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum JSON/form body size in bytes.
    pub max_body_bytes: usize,

    /// Request timeout (total time for request/response) in seconds.
    pub request_timeout_secs: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: 2 * 1024 * 1024, // 2MB
            request_timeout_secs: 30,
        }
    }
}

/// File upload policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Storage root, outside the served web root.
    pub dir: String,

    /// MIME whitelist.
    pub allowed_types: Vec<String>,

    /// Per-file ceiling in bytes.
    pub max_file_bytes: usize,

    /// Files per request.
    pub max_files: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            dir: "./uploads".to_string(),
            allowed_types: vec![
                "image/jpeg".to_string(),
                "image/png".to_string(),
                "application/pdf".to_string(),
            ],
            max_file_bytes: 5 * 1024 * 1024,
            max_files: 5,
        }
    }
}

/// Audit log settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Suspicious events per IP before a high-severity alert.
    pub alert_threshold: u32,

    /// Idle time after which a tracker entry is dropped, in seconds.
    pub retention_secs: u64,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            alert_threshold: 10,
            retention_secs: 3600,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

/// Static site location.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WebConfig {
    /// Directory holding `index.html`, `assets/`, `styles/`, `scripts/`.
    pub root: String,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            root: "./web".to_string(),
        }
    }
}
