//! Sync backend for the student council site.
//!
//! The site used to sit on a push based realtime database. The SQL backend it
//! runs on now only answers requests, so change notifications are emulated:
//! this server bundles collections into one `/sync` response and the
//! `poller` crate fetches it on a timer, diffs it and calls subscribers.
//!
//!
//!
//! # General Infrastructure
//! - One SQLite file, tables created on startup when missing
//! - `GET /sync?collections=...` returns every requested collection keyed by record id, plus `_timestamp`
//! - `GET /health` reports liveness and whether the database answers
//! - CRUD endpoints live elsewhere and are the only writers
//!
//!
//!
//! # Caching
//!
//! **Goal**: Many browsers polling every few seconds should not each cost a full read.
//!
//! - `Cache-Control: s-maxage=1, stale-while-revalidate=2` by default
//! - Any shared cache in front collapses bursts into one read per second
//! - Staleness stays well under one poll interval (3 seconds)
//!
//!
//!
//! # Setup
//!
//! Environment variables, all optional.
//! ```sh
//! RUST_PORT=8080
//! DATABASE_PATH=council.db
//! SYNC_MAX_AGE_SECS=1
//! SYNC_STALE_SECS=2
//! QA_LIMIT=50
//! INIT_SCHEMA=true
//! RUST_LOG=info
//! ```
//!
//! Run.
//! ```sh
//! cargo run -p council-backend
//! ```
//!
//! Watch it from the terminal.
//! ```sh
//! cargo run -p council-tester -- --url http://localhost:8080
//! ```
use std::{sync::Arc, time::Duration};

use axum::{
    Router,
    http::{Method, header::CONTENT_TYPE},
    routing::get,
};

use signal::ctrl_c;
#[cfg(unix)]
use signal::unix::{SignalKind, signal};
use tokio::{net::TcpListener, signal};
use tower_http::cors::CorsLayer;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};

pub mod config;
pub mod database;
pub mod error;
pub mod routes;
pub mod state;
pub mod sync;
pub mod utils;

use config::Config;
use error::ServerError;
use routes::{health_handler, method_not_allowed, sync_handler};
use state::AppState;

pub async fn start_server() -> Result<(), ServerError> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    info!("Loading config...");
    let config = Config::load()?;

    info!("Initializing state...");
    let state = AppState::new(config).await?;

    info!("Starting server...");
    let app = build_router(state.clone());

    let address = format!("0.0.0.0:{}", state.config.port);
    info!("Binding to {address}");

    let listener = TcpListener::bind(&address).await?;
    info!("Server running on {address}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shut down");
    Ok(())
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE])
        .max_age(Duration::from_secs(60 * 60));

    Router::new()
        .route("/sync", get(sync_handler).fallback(method_not_allowed))
        .route("/health", get(health_handler))
        .layer(cors)
        .with_state(state)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, shutting down"),
            Err(e) => {
                error!("Failed to install Ctrl+C handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                error!("Failed to install signal handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
