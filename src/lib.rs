//! Hardened web backend for a professional-services site.
//!
//! Serves the static site and a small JSON API (contact form,
//! authentication, uploads) behind a layered security pipeline.

pub mod auth;
pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod routes;
pub mod security;
pub mod validation;

pub use config::AppConfig;
pub use error::AppError;
pub use http::{AppState, HttpServer};
pub use lifecycle::Shutdown;
