// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! HTTP server wiring

use anyhow::{Context, Result};
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::health::health_handler;
use super::vision::vision_handler;
use crate::config::BridgeConfig;
use crate::vision::VisionService;

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    /// Loaded model pipeline
    pub service: Arc<VisionService>,
    /// Single inference slot; generation runs one request at a time
    pub inference_slot: Arc<Mutex<()>>,
}

impl AppState {
    pub fn new(service: VisionService) -> Self {
        Self {
            service: Arc::new(service),
            inference_slot: Arc::new(Mutex::new(())),
        }
    }
}

/// Build the router with all routes and layers
pub fn create_router(state: AppState, max_body_bytes: usize) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health_handler))
        // Dense region detection
        .route("/v1/vision", post(vision_handler))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until Ctrl-C
pub async fn start_server(config: &BridgeConfig, state: AppState) -> Result<()> {
    let app = create_router(state, config.max_body_bytes);

    let addr = config.listen_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    tracing::info!("Vision bridge listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    tracing::info!("Vision bridge stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
