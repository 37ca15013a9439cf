//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Fail fast on missing or weak secrets
//! - Validate value ranges (windows > 0, limits > 0)
//! - Validate allow-list entries (origins, IPs, MIME types)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: AppConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::IpAddr;

use crate::config::schema::{AppConfig, ScopeConfig};

/// Minimum length of the cookie signing secret.
pub const MIN_COOKIE_SECRET_LEN: usize = 32;

/// A single semantic problem with the configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("required secret {0} is not set")]
    MissingSecret(&'static str),

    #[error("secret {name} must be at least {min} bytes")]
    WeakSecret { name: &'static str, min: usize },

    #[error("{field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("invalid allowed origin: {0}")]
    InvalidOrigin(String),

    #[error("invalid trusted IP: {0}")]
    InvalidIp(String),

    #[error("invalid upload MIME type: {0}")]
    InvalidMimeType(String),
}

fn invalid(field: &str, reason: &str) -> ValidationError {
    ValidationError::InvalidValue {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

fn check_scope(name: &str, scope: &ScopeConfig, errors: &mut Vec<ValidationError>) {
    if scope.max == 0 {
        errors.push(invalid(&format!("rate_limit.{}.max", name), "must be > 0"));
    }
    if scope.window_secs == 0 {
        errors.push(invalid(&format!("rate_limit.{}.window_secs", name), "must be > 0"));
    }
}

/// Validate a loaded configuration.
pub fn validate_config(config: &AppConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let secrets = &config.secrets;
    if secrets.jwt_secret.is_empty() {
        errors.push(ValidationError::MissingSecret("JWT_SECRET"));
    }
    if secrets.session_secret.is_empty() {
        errors.push(ValidationError::MissingSecret("SESSION_SECRET"));
    }
    if secrets.cookie_secret.is_empty() {
        errors.push(ValidationError::MissingSecret("COOKIE_SECRET"));
    } else if secrets.cookie_secret.len() < MIN_COOKIE_SECRET_LEN {
        errors.push(ValidationError::WeakSecret {
            name: "COOKIE_SECRET",
            min: MIN_COOKIE_SECRET_LEN,
        });
    }

    if config.auth.access_ttl_secs == 0 {
        errors.push(invalid("auth.access_ttl_secs", "must be > 0"));
    }
    if config.auth.refresh_ttl_secs <= config.auth.access_ttl_secs {
        errors.push(invalid(
            "auth.refresh_ttl_secs",
            "must be longer than the access token lifetime",
        ));
    }
    if !(4..=31).contains(&config.auth.bcrypt_cost) {
        errors.push(invalid("auth.bcrypt_cost", "must be between 4 and 31"));
    }
    if config.session.cookie_name.is_empty() {
        errors.push(invalid("session.cookie_name", "must not be empty"));
    }
    if config.csrf.ttl_secs == 0 {
        errors.push(invalid("csrf.ttl_secs", "must be > 0"));
    }

    for origin in &config.cors.allowed_origins {
        match url::Url::parse(origin) {
            Ok(url) if matches!(url.scheme(), "http" | "https") && url.host().is_some() => {}
            _ => errors.push(ValidationError::InvalidOrigin(origin.clone())),
        }
    }

    let limits = &config.rate_limit;
    for ip in &limits.trusted_ips {
        if ip.parse::<IpAddr>().is_err() {
            errors.push(ValidationError::InvalidIp(ip.clone()));
        }
    }
    check_scope("global", &limits.global, &mut errors);
    check_scope("auth", &limits.auth, &mut errors);
    check_scope("contact", &limits.contact, &mut errors);
    check_scope("heavy", &limits.heavy, &mut errors);
    if limits.sweep_interval_secs == 0 {
        errors.push(invalid("rate_limit.sweep_interval_secs", "must be > 0"));
    }

    if config.slow_down.enabled && config.slow_down.window_secs == 0 {
        errors.push(invalid("slow_down.window_secs", "must be > 0"));
    }
    if config.slow_down.max_delay_ms > config.limits.request_timeout_secs * 1000 {
        errors.push(invalid(
            "slow_down.max_delay_ms",
            "must not exceed the request timeout",
        ));
    }

    if config.limits.max_body_bytes == 0 {
        errors.push(invalid("limits.max_body_bytes", "must be > 0"));
    }
    if config.limits.request_timeout_secs == 0 {
        errors.push(invalid("limits.request_timeout_secs", "must be > 0"));
    }

    let upload = &config.upload;
    if upload.allowed_types.is_empty() {
        errors.push(invalid("upload.allowed_types", "must not be empty"));
    }
    for mime in &upload.allowed_types {
        if mime_guess::get_mime_extensions_str(mime).is_none() {
            errors.push(ValidationError::InvalidMimeType(mime.clone()));
        }
    }
    if upload.max_files == 0 {
        errors.push(invalid("upload.max_files", "must be > 0"));
    }
    if upload.max_file_bytes == 0 {
        errors.push(invalid("upload.max_file_bytes", "must be > 0"));
    }

    if config.audit.alert_threshold == 0 {
        errors.push(invalid("audit.alert_threshold", "must be > 0"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
