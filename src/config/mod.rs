//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML, optional) + environment (.env, process env)
//!     → loader.rs (parse, deserialize, overlay env)
//!     → validation.rs (semantic checks, missing secrets)
//!     → AppConfig (validated, immutable)
//!     → shared via Arc to every guard and handler
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{
    AppConfig, AuditConfig, AuthConfig, CorsConfig, CspConfig, CsrfConfig, Environment,
    LimitsConfig, ListenerConfig, ObservabilityConfig, RateLimitConfig, ScopeConfig,
    SecretsConfig, SessionConfig, SlowDownConfig, UploadConfig, WebConfig,
};
