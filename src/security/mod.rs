//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → nonce.rs (per-request CSP nonce)
//!     → origin.rs (user agent, Origin/Referer vs Host)
//!     → rate_limit.rs + store.rs (fixed windows, slow-down)
//!     → csrf.rs (signed double-submit token)
//!     → sanitize.rs (key neutralization, pollution, patterns)
//!     → upload.rs (multipart routes only)
//!     → Pass to routing
//! Outgoing response:
//!     → headers.rs (CSP and hardening headers, every status)
//! ```
//!
//! # Design Decisions
//! - Defense in depth: multiple layers of protection
//! - Fail closed: reject on any security check failure
//! - No trust in client input

pub mod csrf;
pub mod headers;
pub mod nonce;
pub mod origin;
pub mod pipeline;
pub mod rate_limit;
pub mod sanitize;
pub mod store;
pub mod upload;
