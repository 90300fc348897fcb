//! Server scaffold binary.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request
//!     ─────────────▶ transport (axum serve loop)
//!                        │
//!                        ▼
//!                    HttpServer / LoggingHttpServer
//!                        │  SessionStore::get
//!                        │  Router::match_route
//!                        ▼
//!                    delegate → RouteContext → route handler
//!                        │
//!     Client Response    ▼
//!     ◀───────────── ResponseWriter
//!
//!     Lifecycle: routines + serving loop, SIGINT/SIGTERM → bounded shutdown
//! ```
//!
//! Routes served by the binary:
//! - `GET /` answers `OK`
//! - `GET /visits` counts visits in the caller's session

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use axum::http::{Method, StatusCode};
use clap::Parser;
use serde_json::Value;

use server_skeleton::config::{load_config, ServerConfig};
use server_skeleton::http::{
    HttpServer, LoggingHttpServer, LoggingRouteDelegate, RouteContext, RouteDelegate,
};
use server_skeleton::lifecycle::{self, routine, LifecycleError, LoggingRunDelegate};
use server_skeleton::observability;
use server_skeleton::routing::{route, Router, TableRouter};
use server_skeleton::session::{MemorySessionStore, NullSessionStore, SessionStore};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Parser)]
#[command(name = "server-skeleton")]
#[command(about = "HTTP server scaffold with sessions and graceful shutdown", long_about = None)]
struct Cli {
    /// Path to a TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Tag requests with an id and log every request
    #[arg(short, long)]
    logging: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => match load_config(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("failed to load {}: {e}", path.display());
                return ExitCode::FAILURE;
            }
        },
        None => ServerConfig::default(),
    };

    if let Err(e) = observability::logging::init(&config.observability) {
        eprintln!("failed to initialize logging: {e}");
    }

    tracing::info!(
        bind_address = %config.listener.bind_address,
        request_timeout_secs = config.timeouts.request_secs,
        shutdown_timeout_ms = config.lifecycle.shutdown_timeout_ms,
        sessions = config.session.enabled,
        logging = cli.logging,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => {
                if let Err(e) = observability::metrics::init_metrics(addr) {
                    tracing::error!(error = %e, "Failed to install metrics exporter");
                }
            }
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let store: Arc<dyn SessionStore> = if config.session.enabled {
        match MemorySessionStore::from_config(&config.session) {
            Ok(store) => {
                store.start_cleanup(config.session.cleanup_interval());
                Arc::new(store)
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to initialize session store");
                return ExitCode::FAILURE;
            }
        }
    } else {
        Arc::new(NullSessionStore)
    };

    match serve(&config, store, cli.logging).await {
        Ok(()) => {
            tracing::info!("Shutdown complete");
            ExitCode::SUCCESS
        }
        Err(e @ LifecycleError::Serve(_)) => {
            tracing::error!(error = %e, "Server failed");
            ExitCode::from(2)
        }
        Err(e) => {
            tracing::error!(error = %e, "Shutdown incomplete");
            ExitCode::FAILURE
        }
    }
}

async fn serve(
    config: &ServerConfig,
    store: Arc<dyn SessionStore>,
    logging: bool,
) -> Result<(), LifecycleError> {
    let delegate = LoggingRunDelegate::new().with_routine(routine(|signal| async move {
        let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => tracing::debug!("Heartbeat"),
                _ = signal.cancelled() => break,
            }
        }
    }));

    let router = build_router();
    if logging {
        let server = LoggingHttpServer::from_config(config, store, router, LoggingRouteDelegate);
        lifecycle::run(Arc::new(server), delegate, &config.lifecycle).await
    } else {
        let server = HttpServer::from_config(config, store, router, RouteDelegate);
        lifecycle::run(Arc::new(server), delegate, &config.lifecycle).await
    }
}

fn build_router() -> TableRouter<RouteContext> {
    let mut router = TableRouter::new();
    let routes = [
        route(Method::GET, "/", |ctx: RouteContext| async move {
            ctx.writer.write_header(StatusCode::OK);
            ctx.writer.write("OK");
        }),
        route(Method::GET, "/visits", |mut ctx: RouteContext| async move {
            let visits = ctx
                .session
                .get_value("visits")
                .and_then(|v| v.as_u64())
                .unwrap_or(0)
                + 1;
            ctx.session.set_value("visits", Value::from(visits));
            if let Err(e) = ctx.save_session().await {
                ctx.fail(&e);
                return;
            }
            ctx.writer.write_header(StatusCode::OK);
            ctx.writer.write(visits.to_string());
        }),
    ];
    for r in routes {
        if let Err(e) = router.add_route(r) {
            tracing::error!(error = %e, "Failed to register route");
        }
    }
    router
}
