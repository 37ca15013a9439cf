//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, layers, graceful shutdown)
//!     → request.rs (client IP, route class, query and body parsing)
//!     → middleware.rs (security pipeline, route dispatch, response stage)
//!     → response.rs (404 fallback, panic conversion)
//!     → Send to client
//! ```

pub mod middleware;
pub mod request;
pub mod response;
pub mod server;

pub use request::{RequestContext, RequestMeta, SanitizedBody, X_REQUEST_ID};
pub use server::{AppState, HttpServer};
