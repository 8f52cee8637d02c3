// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use anyhow::Result;
use std::env;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use vision_bridge::{
    api::{start_server, AppState},
    config::BridgeConfig,
    version,
    vision::{model_manager::model_info, ModelBootstrapper, VisionBackend, VisionService},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber for logging
    if env::var("RUST_LOG").is_err() {
        env::set_var("RUST_LOG", "info");
    }
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("Starting vision bridge {}", version::get_version_string());

    let config = BridgeConfig::from_env();
    if let Err(e) = config.validate() {
        tracing::error!("Invalid configuration: {}", e);
        std::process::exit(1);
    }

    tracing::info!(
        "Scene context: {}, detection: {:?}, caption: {:?}",
        config.scene_context,
        config.detection,
        config.caption_params()
    );

    // The model must be loaded before the listener binds; a failure here
    // ends the process.
    let bootstrapper = ModelBootstrapper::new(&config);
    let model = match tokio::task::spawn_blocking(move || bootstrapper.load()).await {
        Ok(Ok(model)) => model,
        Ok(Err(e)) => {
            tracing::error!("Failed to load model: {:#}", e);
            std::process::exit(1);
        }
        Err(e) => {
            tracing::error!("Model loading task failed: {}", e);
            std::process::exit(1);
        }
    };

    let backend: Arc<dyn VisionBackend> = Arc::new(model);
    let info = model_info(backend.as_ref(), &config.model_dir);
    tracing::info!(
        "Dense perception active: {} on {} ({})",
        info.name,
        info.device.to_uppercase(),
        info.model_dir.display()
    );

    let state = AppState::new(VisionService::new(backend, &config));
    start_server(&config, state).await
}
