//! Configuration loading from disk and the environment.
//!
//! Precedence: defaults, then the optional TOML file, then environment
//! variables (including a `.env` file loaded by `main`).

use std::fs;
use std::path::Path;
use std::str::FromStr;

use crate::config::schema::{AppConfig, Environment};
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {var}: {value:?}")]
    Env { var: &'static str, value: String },

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load and validate configuration from an optional TOML file plus the
/// process environment.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let mut config = match path {
        Some(path) => parse_file(path)?,
        None => AppConfig::default(),
    };

    apply_env(&mut config, |key| std::env::var(key).ok())?;
    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Parse a TOML file without validating it.
pub fn parse_file(path: &Path) -> Result<AppConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    Ok(toml::from_str(&content)?)
}

fn parse<T: FromStr>(var: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Env { var, value })
}

fn parse_bool(var: &'static str, value: String) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Env { var, value }),
    }
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Overlay environment variables onto `config`.
///
/// `lookup` abstracts `std::env::var` so the mapping can be tested without
/// touching process state.
pub fn apply_env<F>(config: &mut AppConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = lookup("NODE_ENV") {
        config.environment = Environment::parse(&v).ok_or(ConfigError::Env {
            var: "NODE_ENV",
            value: v,
        })?;
    }

    if let Some(v) = lookup("HOST") {
        config.listener.host = v;
    }
    if let Some(v) = lookup("PORT") {
        config.listener.port = parse("PORT", v)?;
    }
    if let Some(v) = lookup("TRUST_PROXY") {
        config.listener.trust_proxy = parse_bool("TRUST_PROXY", v)?;
    }

    if let Some(v) = lookup("JWT_SECRET") {
        config.secrets.jwt_secret = v;
    }
    if let Some(v) = lookup("JWT_REFRESH_SECRET") {
        config.secrets.jwt_refresh_secret = Some(v);
    }
    if let Some(v) = lookup("SESSION_SECRET") {
        config.secrets.session_secret = v;
    }
    if let Some(v) = lookup("COOKIE_SECRET") {
        config.secrets.cookie_secret = v;
    }

    if let Some(v) = lookup("JWT_EXPIRES_IN_SECS") {
        config.auth.access_ttl_secs = parse("JWT_EXPIRES_IN_SECS", v)?;
    }
    if let Some(v) = lookup("JWT_REFRESH_EXPIRES_IN_SECS") {
        config.auth.refresh_ttl_secs = parse("JWT_REFRESH_EXPIRES_IN_SECS", v)?;
    }
    if let Some(v) = lookup("BCRYPT_ROUNDS") {
        config.auth.bcrypt_cost = parse("BCRYPT_ROUNDS", v)?;
    }

    if let Some(v) = lookup("SESSION_NAME") {
        config.session.cookie_name = v;
    }
    if let Some(v) = lookup("SESSION_MAX_AGE_SECS") {
        config.session.max_age_secs = parse("SESSION_MAX_AGE_SECS", v)?;
    }

    if let Some(v) = lookup("ALLOWED_ORIGINS") {
        config.cors.allowed_origins = parse_list(&v);
    }
    if let Some(v) = lookup("TRUSTED_IPS") {
        config.rate_limit.trusted_ips = parse_list(&v);
    }

    if let Some(v) = lookup("RATE_LIMIT_WINDOW_SECS") {
        config.rate_limit.global.window_secs = parse("RATE_LIMIT_WINDOW_SECS", v)?;
    }
    if let Some(v) = lookup("RATE_LIMIT_MAX_REQUESTS") {
        config.rate_limit.global.max = parse("RATE_LIMIT_MAX_REQUESTS", v)?;
    }
    if let Some(v) = lookup("RATE_LIMIT_AUTH_MAX") {
        config.rate_limit.auth.max = parse("RATE_LIMIT_AUTH_MAX", v)?;
    }
    if let Some(v) = lookup("RATE_LIMIT_CONTACT_MAX") {
        config.rate_limit.contact.max = parse("RATE_LIMIT_CONTACT_MAX", v)?;
    }

    if let Some(v) = lookup("CSP_REPORT_URI") {
        config.csp.report_uri = v;
    }
    if let Some(v) = lookup("CSP_REPORT_ONLY") {
        config.csp.report_only = parse_bool("CSP_REPORT_ONLY", v)?;
    }

    if let Some(v) = lookup("UPLOAD_ALLOWED_TYPES") {
        let types = parse_list(&v);
        // An empty list keeps the built-in whitelist.
        if !types.is_empty() {
            config.upload.allowed_types = types;
        }
    }
    if let Some(v) = lookup("UPLOAD_MAX_SIZE") {
        config.upload.max_file_bytes = parse("UPLOAD_MAX_SIZE", v)?;
    }
    if let Some(v) = lookup("UPLOAD_DIR") {
        config.upload.dir = v;
    }

    if let Some(v) = lookup("ALERT_THRESHOLD_401") {
        config.audit.alert_threshold = parse("ALERT_THRESHOLD_401", v)?;
    }

    if let Some(v) = lookup("LOG_LEVEL") {
        config.observability.log_level = v;
    }
    if let Some(v) = lookup("METRICS_ENABLED") {
        config.observability.metrics_enabled = parse_bool("METRICS_ENABLED", v)?;
    }
    if let Some(v) = lookup("METRICS_ADDRESS") {
        config.observability.metrics_address = v;
    }

    if let Some(v) = lookup("WEB_ROOT") {
        config.web.root = v;
    }

    Ok(())
}
