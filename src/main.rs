//! NextStep web backend
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request
//!     ──────────────▶ request id, timeout, trace
//!                     │
//!                     ▼
//!              ┌──────────────────────────────┐
//!              │      security pipeline       │
//!              │  user agent, origin, rate    │
//!              │  limit, slow-down, body      │
//!              │  parsing, CSRF, sanitizers   │
//!              └──────────────┬───────────────┘
//!                             ▼
//!              ┌──────────────────────────────┐
//!              │  routes: static site, health,│
//!              │  contact, auth, uploads      │
//!              └──────────────┬───────────────┘
//!                             ▼
//!     Client Response ◀── cookies, security headers, request log
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use nextstep_web::config::load_config;
use nextstep_web::lifecycle::signals::spawn_signal_handler;
use nextstep_web::observability::{logging, metrics};
use nextstep_web::{HttpServer, Shutdown};

#[derive(Parser, Debug)]
#[command(name = "nextstep-web", version, about = "NextStep web backend")]
struct Args {
    /// Optional TOML configuration file.
    #[arg(short, long, env = "NEXTSTEP_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    dotenvy::dotenv().ok();

    let config = match load_config(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = logging::init_logging(&config.observability.log_level, config.environment) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    // Handler panics become 500s; a panicking background task stops the server.
    std::panic::set_hook(Box::new(|info| {
        tracing::error!(panic = %info, "Panic");
    }));

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = %config.environment,
        "nextstep-web starting"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = match TcpListener::bind(config.listener.bind_address()).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(address = %config.listener.bind_address(), error = %e, "Failed to bind");
            std::process::exit(1);
        }
    };

    let shutdown = Shutdown::new();
    let signals = spawn_signal_handler(shutdown.clone());
    let signals = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { shutdown.supervise("signal handler", signals).await })
    };

    if let Err(e) = HttpServer::new(config).run(listener, shutdown).await {
        tracing::error!(error = %e, "Server error");
        std::process::exit(1);
    }

    if signals.is_finished() && matches!(signals.await, Ok(true) | Err(_)) {
        tracing::error!("Signal handler stopped unexpectedly");
        std::process::exit(1);
    }

    tracing::info!("Shutdown complete");
}
