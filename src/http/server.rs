//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Build the shared application state from configuration
//! - Create the Axum router with all routes
//! - Wire up layers (timeout, request ID, tracing, security pipeline,
//!   CORS, compression, panic capture)
//! - Bind to a listener and drain gracefully on shutdown
//! - Run the rate-window sweeper alongside the server

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{FromRef, Request},
    http::HeaderName,
    middleware, Router,
};
use axum_extra::extract::cookie::Key;
use sha2::{Digest, Sha512};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    catch_panic::CatchPanicLayer,
    compression::CompressionLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::Span;

use crate::auth::{InMemoryUserStore, SessionStore, TokenIssuer, UserStore};
use crate::config::AppConfig;
use crate::http::middleware::security_pipeline;
use crate::http::request::X_REQUEST_ID;
use crate::http::response::{handle_panic, not_found};
use crate::lifecycle::Shutdown;
use crate::observability::audit::{AuditLog, SuspiciousActivityTracker};
use crate::routes;
use crate::security::csrf::{CsrfGuard, CsrfTokens};
use crate::security::headers::SecurityHeaders;
use crate::security::origin::{cors_layer, OriginGuard, UserAgentGuard};
use crate::security::pipeline::Pipeline;
use crate::security::rate_limit::{RateLimitGuard, RateLimiter, SlowDownGuard};
use crate::security::sanitize::{NoSqlSanitizeGuard, ParameterPollutionGuard, PatternGuard};
use crate::security::store::{MemoryWindowStore, WindowStore, WindowSweeper};
use crate::security::upload::UploadGuard;

/// Application state injected into handlers and the pipeline.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub pipeline: Arc<Pipeline>,
    pub limiter: Arc<RateLimiter>,
    pub csrf: Arc<CsrfTokens>,
    pub security_headers: Arc<SecurityHeaders>,
    pub audit: AuditLog,
    pub tracker: Arc<SuspiciousActivityTracker>,
    pub tokens: Arc<TokenIssuer>,
    pub users: Arc<dyn UserStore>,
    pub sessions: Arc<SessionStore>,
    pub uploads: Arc<UploadGuard>,
    pub cookie_key: Key,
    pub started_at: Instant,
}

impl AppState {
    /// State with in-memory stores.
    pub fn new(config: AppConfig, audit: AuditLog) -> Self {
        Self::with_stores(
            config,
            audit,
            Arc::new(MemoryWindowStore::new()),
            Arc::new(InMemoryUserStore::new()),
        )
    }

    pub fn with_stores(
        config: AppConfig,
        audit: AuditLog,
        windows: Arc<dyn WindowStore>,
        users: Arc<dyn UserStore>,
    ) -> Self {
        let secure = config.environment.is_production();
        let limiter = Arc::new(RateLimiter::new(windows, config.rate_limit.clone()));
        let csrf = Arc::new(CsrfTokens::new(&config.csrf, secure));

        let pipeline = Pipeline::new(
            vec![
                Box::new(UserAgentGuard::new(audit.clone())),
                Box::new(OriginGuard::new(csrf.clone(), audit.clone())),
                Box::new(RateLimitGuard::new(limiter.clone(), audit.clone())),
                Box::new(SlowDownGuard::new(
                    limiter.clone(),
                    config.slow_down.clone(),
                    audit.clone(),
                )),
            ],
            vec![
                Box::new(CsrfGuard::new(csrf.clone(), audit.clone())),
                Box::new(NoSqlSanitizeGuard::new(audit.clone())),
                Box::new(ParameterPollutionGuard::new(audit.clone())),
                Box::new(PatternGuard::new(audit.clone())),
            ],
            audit.clone(),
        );

        Self {
            pipeline: Arc::new(pipeline),
            limiter,
            csrf,
            security_headers: Arc::new(SecurityHeaders::new(&config.csp, secure)),
            tracker: Arc::new(SuspiciousActivityTracker::new(
                config.audit.alert_threshold,
                Duration::from_secs(config.audit.retention_secs),
                audit.clone(),
            )),
            tokens: Arc::new(TokenIssuer::new(&config.secrets, &config.auth)),
            users,
            sessions: Arc::new(SessionStore::new(
                &config.secrets.session_secret,
                &config.session,
                secure,
            )),
            uploads: Arc::new(UploadGuard::new(&config.upload)),
            cookie_key: Key::from(Sha512::digest(config.secrets.cookie_secret.as_bytes()).as_slice()),
            started_at: Instant::now(),
            audit,
            config: Arc::new(config),
        }
    }
}

impl FromRef<AppState> for Key {
    fn from_ref(state: &AppState) -> Self {
        state.cookie_key.clone()
    }
}

impl FromRef<AppState> for Arc<TokenIssuer> {
    fn from_ref(state: &AppState) -> Self {
        state.tokens.clone()
    }
}

/// Span for one request. Only the path is recorded so query strings
/// (which may carry `_csrf`) stay out of the logs.
pub fn request_span(request: &Request) -> Span {
    tracing::debug_span!(
        "request",
        method = %request.method(),
        path = %request.uri().path(),
        version = ?request.version(),
    )
}

/// Build the Axum router with all middleware layers.
#[allow(deprecated)]
pub fn build_router(state: AppState) -> Router {
    let request_id = HeaderName::from_static(X_REQUEST_ID);
    let config = state.config.clone();

    routes::router(&state)
        .fallback(not_found)
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(CompressionLayer::new())
        .layer(cors_layer(&config.cors, config.environment))
        .layer(middleware::from_fn_with_state(state.clone(), security_pipeline))
        .with_state(state)
        .layer(TimeoutLayer::new(Duration::from_secs(
            config.limits.request_timeout_secs,
        )))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(request_id.clone(), MakeRequestUuid))
                .layer(TraceLayer::new_for_http().make_span_with(request_span))
                .layer(PropagateRequestIdLayer::new(request_id)),
        )
}

/// HTTP server for the site.
pub struct HttpServer {
    router: Router,
    state: AppState,
}

impl HttpServer {
    /// Create a server logging through `tracing`.
    pub fn new(config: AppConfig) -> Self {
        Self::with_state(AppState::new(config, AuditLog::tracing()))
    }

    pub fn with_state(state: AppState) -> Self {
        let router = build_router(state.clone());
        Self { router, state }
    }

    /// The fully layered router.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Serve until `shutdown` fires, then drain in-flight requests.
    pub async fn run(self, listener: TcpListener, shutdown: Shutdown) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            environment = %self.state.config.environment,
            "HTTP server starting"
        );

        let sweeper = WindowSweeper::new(
            self.state.limiter.store(),
            Duration::from_secs(self.state.config.rate_limit.sweep_interval_secs),
        );
        let sweeper = tokio::spawn(sweeper.run(shutdown.subscribe()));
        let supervisor = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { shutdown.supervise("window sweeper", sweeper).await })
        };

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();

        let served = axum::serve(listener, app)
            .with_graceful_shutdown(Shutdown::wait(shutdown.subscribe()))
            .await;
        shutdown.trigger();
        served?;

        match supervisor.await {
            Ok(false) => {}
            Ok(true) => return Err(std::io::Error::other("window sweeper stopped unexpectedly")),
            Err(e) => tracing::warn!(error = %e, "Sweeper supervisor ended abnormally"),
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::Mutex;

    use axum::body::Body;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_request_span_omits_query() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();

        let request = Request::builder()
            .uri("/api/contact?_csrf=abcdef0123456789")
            .body(Body::empty())
            .unwrap();
        tracing::subscriber::with_default(subscriber, || {
            let span = request_span(&request);
            let _entered = span.enter();
            tracing::debug!("handling");
        });

        let output = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("path=/api/contact"), "{}", output);
        assert!(!output.contains("abcdef0123456789"), "{}", output);
    }
}
