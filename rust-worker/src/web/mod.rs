//! Health and metrics HTTP endpoints.
//!
//! This module provides a small web server that:
//! - Reports worker health for orchestrator liveness checks
//! - Exposes the metrics registry for a pull-based collector
//!
//! It shares the worker's shutdown token and stops with it.

pub mod handlers;

use std::net::SocketAddr;

use anyhow::{Context, Result};
use axum::{routing::get, Router};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

pub use handlers::{health, metrics, AppState, HealthResponse};

/// Build the router for the health and metrics endpoints.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind the listener for the health and metrics endpoints.
pub async fn bind(port: u16) -> Result<TcpListener> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind metrics address {addr}"))?;

    info!(address = %addr, "metrics_server_listening");

    Ok(listener)
}

/// Serve the endpoints on `listener` until `shutdown` is cancelled.
pub async fn serve(listener: TcpListener, state: AppState, shutdown: CancellationToken) -> Result<()> {
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("Metrics server error")?;

    info!("metrics_server_stopped");

    Ok(())
}
