//! Ordered guard orchestration.
//!
//! A [`Pipeline`] holds two explicit guard lists. The admission list runs
//! before the body is read (user agent, origin, rate limiting, slow-down);
//! the inspection list runs once the body, cookies and session are known
//! (CSRF, key neutralization, parameter pollution, pattern detection).
//! Each list halts on the first rejection.

use serde_json::json;

use crate::error::AppError;
use crate::http::request::RequestContext;
use crate::observability::audit::{AuditLog, Level};
use crate::observability::metrics;

/// A single inspect-or-reject stage.
pub trait Guard: Send + Sync {
    /// Stable name used in logs and metrics.
    fn name(&self) -> &'static str;

    /// Inspect (and possibly annotate) the request. An error rejects it.
    fn inspect(&self, ctx: &mut RequestContext) -> Result<(), AppError>;
}

/// The two guard lists, in execution order.
pub struct Pipeline {
    admission: Vec<Box<dyn Guard>>,
    inspection: Vec<Box<dyn Guard>>,
    audit: AuditLog,
}

impl Pipeline {
    pub fn new(
        admission: Vec<Box<dyn Guard>>,
        inspection: Vec<Box<dyn Guard>>,
        audit: AuditLog,
    ) -> Self {
        Self {
            admission,
            inspection,
            audit,
        }
    }

    pub fn admit(&self, ctx: &mut RequestContext) -> Result<(), AppError> {
        self.run(&self.admission, ctx)
    }

    pub fn inspect(&self, ctx: &mut RequestContext) -> Result<(), AppError> {
        self.run(&self.inspection, ctx)
    }

    /// Guard names in execution order, admission first.
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.admission
            .iter()
            .chain(self.inspection.iter())
            .map(|g| g.name())
            .collect()
    }

    fn run(&self, guards: &[Box<dyn Guard>], ctx: &mut RequestContext) -> Result<(), AppError> {
        for guard in guards {
            if let Err(err) = guard.inspect(ctx) {
                metrics::record_guard_rejection(guard.name());
                self.audit.security(
                    Level::Warn,
                    "REQUEST_REJECTED",
                    json!({
                        "guard": guard.name(),
                        "code": err.code(),
                        "ip": ctx.client_ip.to_string(),
                        "method": ctx.method.as_str(),
                        "path": ctx.path,
                    }),
                );
                return Err(err);
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stage_names())
            .finish()
    }
}
