//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Guards, handlers and the response stage produce:
//!     → audit.rs (redacted general/security/audit events)
//!     → logging.rs (tracing subscriber the events end up in)
//!     → metrics.rs (counters and latency histogram)
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) in production, pretty output in development
//! - Request ID flows through all subsystems
//! - Every event is redacted before emission

pub mod audit;
pub mod logging;
pub mod metrics;
pub mod redact;
