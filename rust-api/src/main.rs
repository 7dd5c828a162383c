//! Lyftr Web Server - signed webhook ingestion API.
//!
//! This binary:
//! - Loads configuration from the environment (fails fast if incomplete)
//! - Opens the SQLite store and ensures the schema exists
//! - Serves the API until SIGINT/SIGTERM

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::{net::TcpListener, signal};
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use lyftr::config::DEFAULT_LOG_LEVEL;
use lyftr::{router, AppState, Config, Metrics, SqliteStore};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env();

    // Initialize structured JSON logging
    let default_level = config
        .as_ref()
        .map(|c| c.log_level.as_str())
        .unwrap_or(DEFAULT_LOG_LEVEL);
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    info!("webhook_server_starting");

    let config = config.map_err(|e| {
        error!(error = %e, "config_invalid");
        e
    })?;
    info!(
        port = config.port,
        database_url = %config.database_url,
        log_level = %config.log_level,
        "config_loaded"
    );

    let location = config.database_location()?;
    let store = tokio::task::spawn_blocking(move || SqliteStore::open_location(&location))
        .await
        .context("Store initialization task failed")?
        .context("Failed to open message store")?;
    info!("message_store_ready");

    let metrics = Metrics::new().context("Failed to register metrics")?;

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let state = AppState::new(config, Arc::new(store), metrics);
    let app = router(state);

    let listener = TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    info!(address = %addr, "webhook_server_listening");

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("webhook_server_shutdown_complete");

    Ok(())
}

/// Create a future that completes when a shutdown signal is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }

    info!("webhook_server_shutting_down");
}
