//! sigsim server entry point
//!
//! Boots the control API and hands each accepted simulation to its own
//! blocking task. A shutdown signal cancels every in-flight run before the
//! server exits.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use sigsim::config::AppConfig;
use sigsim::persistence::ResultStore;
use sigsim::server::{self, AppState, RunRegistry, SharedState};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::load().context("Failed to load configuration")?;
    info!(config = %config.digest(), "configuration loaded");

    let results = ResultStore::new(&config.output.dir)?;
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state: SharedState = Arc::new(AppState {
        config,
        registry: RunRegistry::new(),
        results,
    });

    let router = server::create_router(state.clone());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(%addr, "control API listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(state))
        .await
        .context("Server error")?;

    Ok(())
}

/// Resolve on SIGINT or SIGTERM, cancelling every registered run first so
/// no simulation is left writing while the process exits.
async fn shutdown_signal(state: SharedState) {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received, cancelling running simulations");
    state.registry.cancel_all();
}
