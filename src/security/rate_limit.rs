//! Fixed-window rate limiting and progressive slow-down.
//!
//! # Scopes
//! - `global`: every request
//! - `auth`: login/register attempts; counted on admission, handed back when
//!   the attempt succeeds or never reaches its handler
//! - `contact`: contact form submissions
//! - `heavy`: uploads
//!
//! The request that pushes a counter above its maximum is rejected with 429.
//! Trusted client addresses bypass every scope.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::{HeaderMap, HeaderValue};
use serde_json::json;

use crate::config::{RateLimitConfig, ScopeConfig, SlowDownConfig};
use crate::error::AppError;
use crate::http::request::{RequestContext, RouteClass};
use crate::observability::audit::{AuditLog, Level};
use crate::observability::metrics;
use crate::security::pipeline::Guard;
use crate::security::store::{WindowSnapshot, WindowStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Global,
    Auth,
    Contact,
    Heavy,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Global => "global",
            Scope::Auth => "auth",
            Scope::Contact => "contact",
            Scope::Heavy => "heavy",
        }
    }

    fn rejection_message(&self) -> &'static str {
        match self {
            Scope::Global => "Too many requests from this IP, please try again later.",
            Scope::Auth => "Too many failed attempts. Access temporarily blocked for security.",
            Scope::Contact => "Submission limit reached. Please try again later.",
            Scope::Heavy => "Limit for expensive operations exceeded.",
        }
    }
}

/// Values for the `X-RateLimit-*` response headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitInfo {
    pub limit: u32,
    pub remaining: u32,
    /// Seconds until the window resets.
    pub reset_secs: u64,
}

impl RateLimitInfo {
    fn from_snapshot(scope: &ScopeConfig, snapshot: &WindowSnapshot, now: Instant) -> Self {
        Self {
            limit: scope.max,
            remaining: scope.max.saturating_sub(snapshot.count),
            reset_secs: snapshot.retry_after_secs(now),
        }
    }

    pub fn apply(&self, headers: &mut HeaderMap) {
        headers.insert("x-ratelimit-limit", HeaderValue::from(self.limit));
        headers.insert("x-ratelimit-remaining", HeaderValue::from(self.remaining));
        headers.insert("x-ratelimit-reset", HeaderValue::from(self.reset_secs));
    }
}

/// Outcome of counting one hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed(RateLimitInfo),
    Limited(RateLimitInfo),
}

/// Per-scope counters over an injected [`WindowStore`].
pub struct RateLimiter {
    store: Arc<dyn WindowStore>,
    config: RateLimitConfig,
    trusted: Vec<IpAddr>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn WindowStore>, config: RateLimitConfig) -> Self {
        let trusted = config
            .trusted_ips
            .iter()
            .filter_map(|ip| ip.parse().ok())
            .collect();
        Self {
            store,
            config,
            trusted,
        }
    }

    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn is_trusted(&self, ip: &IpAddr) -> bool {
        self.trusted.contains(ip)
    }

    pub fn store(&self) -> Arc<dyn WindowStore> {
        self.store.clone()
    }

    fn scope_config(&self, scope: Scope) -> ScopeConfig {
        match scope {
            Scope::Global => self.config.global,
            Scope::Auth => self.config.auth,
            Scope::Contact => self.config.contact,
            Scope::Heavy => self.config.heavy,
        }
    }

    fn key(scope: Scope, ip: &IpAddr) -> String {
        format!("{}:{}", scope.as_str(), ip)
    }

    /// Count one request against `scope`.
    pub fn hit(&self, scope: Scope, ip: &IpAddr, now: Instant) -> Decision {
        let limits = self.scope_config(scope);
        let snapshot = self.store.increment(
            &Self::key(scope, ip),
            Duration::from_secs(limits.window_secs),
            now,
        );
        let info = RateLimitInfo::from_snapshot(&limits, &snapshot, now);
        if snapshot.count > limits.max {
            Decision::Limited(info)
        } else {
            Decision::Allowed(info)
        }
    }

    /// Hand back one hit counted against `scope`.
    pub fn refund(&self, scope: Scope, ip: &IpAddr, now: Instant) {
        self.store.decrement(&Self::key(scope, ip), now);
    }
}

fn limited(scope: Scope, info: RateLimitInfo) -> AppError {
    metrics::record_rate_limited(scope.as_str());
    AppError::TooManyRequests {
        message: scope.rejection_message().to_string(),
        retry_after_secs: info.reset_secs,
    }
}

/// Applies the global scope and the scope of the request's route class.
pub struct RateLimitGuard {
    limiter: Arc<RateLimiter>,
    audit: AuditLog,
}

impl RateLimitGuard {
    pub fn new(limiter: Arc<RateLimiter>, audit: AuditLog) -> Self {
        Self { limiter, audit }
    }

    fn check(&self, ctx: &mut RequestContext, scope: Scope, now: Instant) -> Result<(), AppError> {
        match self.limiter.hit(scope, &ctx.client_ip, now) {
            Decision::Allowed(info) => {
                match scope {
                    Scope::Global => ctx.rate_limit = Some(info),
                    Scope::Auth => ctx.auth_counted = true,
                    _ => {}
                }
                Ok(())
            }
            Decision::Limited(info) => {
                ctx.rate_limit = Some(info);
                if scope == Scope::Auth {
                    self.audit.audit(
                        Level::Error,
                        "BRUTE_FORCE_SUSPECTED",
                        json!({
                            "ip": ctx.client_ip.to_string(),
                            "path": ctx.path,
                        }),
                    );
                } else {
                    self.audit.audit(
                        Level::Warn,
                        "RATE_LIMITED",
                        json!({
                            "scope": scope.as_str(),
                            "ip": ctx.client_ip.to_string(),
                            "path": ctx.path,
                            "userAgent": ctx.header("user-agent"),
                        }),
                    );
                }
                Err(limited(scope, info))
            }
        }
    }
}

impl Guard for RateLimitGuard {
    fn name(&self) -> &'static str {
        "rate_limit"
    }

    fn inspect(&self, ctx: &mut RequestContext) -> Result<(), AppError> {
        if !self.limiter.enabled() || self.limiter.is_trusted(&ctx.client_ip) {
            return Ok(());
        }
        let now = Instant::now();

        self.check(ctx, Scope::Global, now)?;

        match ctx.route {
            RouteClass::Contact => self.check(ctx, Scope::Contact, now),
            RouteClass::Upload => self.check(ctx, Scope::Heavy, now),
            RouteClass::Auth => self.check(ctx, Scope::Auth, now),
            _ => Ok(()),
        }
    }
}

/// Adds a growing delay once a client passes the soft threshold.
pub struct SlowDownGuard {
    limiter: Arc<RateLimiter>,
    config: SlowDownConfig,
    audit: AuditLog,
}

impl SlowDownGuard {
    pub fn new(limiter: Arc<RateLimiter>, config: SlowDownConfig, audit: AuditLog) -> Self {
        Self {
            limiter,
            config,
            audit,
        }
    }

    /// Delay for the `count`-th request of a window.
    pub fn delay_for(&self, count: u32) -> Duration {
        if count <= self.config.delay_after {
            return Duration::ZERO;
        }
        let over = u64::from(count - self.config.delay_after);
        Duration::from_millis(
            over.saturating_mul(self.config.delay_ms)
                .min(self.config.max_delay_ms),
        )
    }
}

impl Guard for SlowDownGuard {
    fn name(&self) -> &'static str {
        "slow_down"
    }

    fn inspect(&self, ctx: &mut RequestContext) -> Result<(), AppError> {
        if !self.config.enabled || self.limiter.is_trusted(&ctx.client_ip) {
            return Ok(());
        }

        let snapshot = self.limiter.store().increment(
            &format!("slowdown:{}", ctx.client_ip),
            Duration::from_secs(self.config.window_secs),
            Instant::now(),
        );
        ctx.delay = self.delay_for(snapshot.count);

        if snapshot.count == self.config.delay_after.saturating_add(1) {
            self.audit.security(
                Level::Warn,
                "SLOW_DOWN_ACTIVATED",
                json!({ "ip": ctx.client_ip.to_string(), "path": ctx.path }),
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{Method, Request};

    use crate::observability::audit::MemorySink;
    use crate::security::store::MemoryWindowStore;

    fn limiter(config: RateLimitConfig) -> Arc<RateLimiter> {
        Arc::new(RateLimiter::new(Arc::new(MemoryWindowStore::new()), config))
    }

    fn ctx(method: Method, uri: &str) -> RequestContext {
        let (parts, _) = Request::builder()
            .method(method)
            .uri(uri)
            .body(())
            .unwrap()
            .into_parts();
        RequestContext::new(&parts, false)
    }

    #[test]
    fn test_hundred_and_first_request_is_limited() {
        let limiter = limiter(RateLimitConfig::default());
        let ip: IpAddr = "192.0.2.1".parse().unwrap();
        let now = Instant::now();

        for _ in 0..100 {
            assert!(matches!(limiter.hit(Scope::Global, &ip, now), Decision::Allowed(_)));
        }
        match limiter.hit(Scope::Global, &ip, now) {
            Decision::Limited(info) => {
                assert_eq!(info.remaining, 0);
                assert_eq!(info.reset_secs, 900);
            }
            other => panic!("expected limit, got {:?}", other),
        }

        // A new window admits the client again.
        let later = now + Duration::from_secs(900);
        assert!(matches!(limiter.hit(Scope::Global, &ip, later), Decision::Allowed(_)));
    }

    #[test]
    fn test_scopes_are_independent() {
        let limiter = limiter(RateLimitConfig::default());
        let ip: IpAddr = "192.0.2.2".parse().unwrap();
        let now = Instant::now();

        for _ in 0..3 {
            limiter.hit(Scope::Contact, &ip, now);
        }
        assert!(matches!(limiter.hit(Scope::Contact, &ip, now), Decision::Limited(_)));
        assert!(matches!(limiter.hit(Scope::Heavy, &ip, now), Decision::Allowed(_)));
    }

    #[test]
    fn test_refund_returns_auth_slot() {
        let limiter = limiter(RateLimitConfig::default());
        let ip: IpAddr = "192.0.2.3".parse().unwrap();
        let now = Instant::now();

        for _ in 0..5 {
            assert!(matches!(limiter.hit(Scope::Auth, &ip, now), Decision::Allowed(_)));
        }
        limiter.refund(Scope::Auth, &ip, now);
        assert!(matches!(limiter.hit(Scope::Auth, &ip, now), Decision::Allowed(_)));
        assert!(matches!(limiter.hit(Scope::Auth, &ip, now), Decision::Limited(_)));
    }

    #[test]
    fn test_guard_counts_auth_attempts_up_front() {
        let limiter = limiter(RateLimitConfig::default());
        let (sink, audit) = MemorySink::log();
        let guard = RateLimitGuard::new(limiter.clone(), audit);

        // Attempts in flight hold their slot until they are handed back.
        for _ in 0..5 {
            let mut request = ctx(Method::POST, "/api/auth/login");
            guard.inspect(&mut request).unwrap();
            assert!(request.auth_counted);
        }

        let mut request = ctx(Method::POST, "/api/auth/login");
        let err = guard.inspect(&mut request).unwrap_err();
        assert_eq!(err.code(), "TOO_MANY_REQUESTS");
        assert!(!request.auth_counted);
        assert_eq!(sink.events(), vec!["BRUTE_FORCE_SUSPECTED"]);
    }

    #[test]
    fn test_other_routes_leave_auth_budget_alone() {
        let (_, audit) = MemorySink::log();
        let guard = RateLimitGuard::new(limiter(RateLimitConfig::default()), audit);
        let mut request = ctx(Method::POST, "/api/contact");
        guard.inspect(&mut request).unwrap();
        assert!(!request.auth_counted);
    }

    #[test]
    fn test_trusted_ips_bypass() {
        let config = RateLimitConfig {
            trusted_ips: vec!["0.0.0.0".to_string()],
            global: ScopeConfig { max: 1, window_secs: 60 },
            ..RateLimitConfig::default()
        };
        let (_, audit) = MemorySink::log();
        let guard = RateLimitGuard::new(limiter(config), audit);

        for _ in 0..5 {
            assert!(guard.inspect(&mut ctx(Method::GET, "/")).is_ok());
        }
    }

    #[test]
    fn test_admitted_requests_carry_header_values() {
        let (_, audit) = MemorySink::log();
        let guard = RateLimitGuard::new(limiter(RateLimitConfig::default()), audit);
        let mut request = ctx(Method::GET, "/");
        guard.inspect(&mut request).unwrap();

        let info = request.rate_limit.unwrap();
        assert_eq!(info.limit, 100);
        assert_eq!(info.remaining, 99);

        let mut headers = HeaderMap::new();
        info.apply(&mut headers);
        assert_eq!(headers.get("x-ratelimit-remaining").unwrap(), "99");
    }

    #[test]
    fn test_slow_down_delay_grows_and_caps() {
        let (_, audit) = MemorySink::log();
        let guard = SlowDownGuard::new(
            limiter(RateLimitConfig::default()),
            SlowDownConfig::default(),
            audit,
        );

        assert_eq!(guard.delay_for(50), Duration::ZERO);
        assert_eq!(guard.delay_for(51), Duration::from_millis(500));
        assert_eq!(guard.delay_for(54), Duration::from_millis(2000));
        assert_eq!(guard.delay_for(1000), Duration::from_secs(20));
    }

    #[test]
    fn test_slow_down_logs_once_per_window() {
        let (sink, audit) = MemorySink::log();
        let config = SlowDownConfig {
            delay_after: 2,
            delay_ms: 0,
            ..SlowDownConfig::default()
        };
        let guard = SlowDownGuard::new(limiter(RateLimitConfig::default()), config, audit);

        for _ in 0..6 {
            guard.inspect(&mut ctx(Method::GET, "/")).unwrap();
        }
        assert_eq!(sink.events(), vec!["SLOW_DOWN_ACTIVATED"]);
    }
}
