//! Cachelet - a sharded in-memory key-value cache server
//!
//! Serves string, number, boolean, JSON, and opaque byte values with
//! per-key TTL, size-aware LRU eviction, and compare-and-swap via entity
//! versions, over a small HTTP/JSON surface.

mod api;
mod cache;
mod config;
mod error;
mod models;

use std::net::SocketAddr;

use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use api::{create_router, AppState};
use config::Config;

/// Main entry point for the cache server.
///
/// # Startup Sequence
/// 1. Load configuration from environment variables
/// 2. Initialize tracing subscriber for logging
/// 3. Spawn the sharded cache store
/// 4. Create Axum router with all endpoints
/// 5. Start HTTP server on configured port
/// 6. On SIGINT/SIGTERM, stop accepting connections and drain the shards
#[tokio::main]
async fn main() {
    // Configuration comes first so its log level can seed the subscriber.
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(error) => {
            eprintln!("configuration error: {error}");
            std::process::exit(1);
        }
    };

    // Defaults to the configured level, can be overridden with RUST_LOG.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("cachelet={level},tower_http={level}", level = config.log_level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting cachelet cache server");
    info!(
        shards = config.shards,
        max_item_bytes = config.max_item_bytes,
        memory_budget_bytes = ?config.memory_budget_bytes,
        max_inflight = config.max_inflight,
        max_shard_mailbox = config.max_shard_mailbox,
        request_timeout_ms = config.request_timeout_ms,
        read_requires_auth = config.read_requires_auth,
        "Configuration loaded"
    );

    // Spawn the store and build the router around it.
    let state = AppState::from_config(&config);
    info!("Cache store initialized");

    let app = create_router(state.clone());

    // Bind to configured port
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    info!("Server listening on http://{}", addr);

    // Start server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .unwrap();

    // Drain every shard's mailbox before exiting.
    state.cache.shutdown().await;
    info!("Server shutdown complete");
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM).
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
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }
}
