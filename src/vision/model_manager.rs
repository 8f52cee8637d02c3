// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! One-time model loading at startup
//!
//! Unlike a lazily populated registry, the bridge has exactly one model and
//! cannot serve without it: any failure here is returned to `main`, which
//! exits before the listener binds.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

use crate::config::BridgeConfig;
use crate::vision::backend::VisionBackend;
use crate::vision::device::DevicePreference;
use crate::vision::florence::{FlorenceFiles, FlorenceModel};
use crate::vision::service::VisionService;

/// Information about the loaded model
#[derive(Debug, Clone, PartialEq)]
pub struct VisionModelInfo {
    /// Model identifier
    pub name: String,
    /// Device the sessions were committed on
    pub device: String,
    /// Directory the model was loaded from
    pub model_dir: PathBuf,
}

/// Loads the Florence-2 model described by a [`BridgeConfig`]
#[derive(Debug, Clone)]
pub struct ModelBootstrapper {
    model_dir: PathBuf,
    model_id: String,
    device_preference: DevicePreference,
    intra_threads: usize,
}

impl ModelBootstrapper {
    pub fn new(config: &BridgeConfig) -> Self {
        Self {
            model_dir: config.model_dir.clone(),
            model_id: config.model_id.clone(),
            device_preference: config.device_preference,
            intra_threads: config.intra_threads,
        }
    }

    /// Resolve the model files without loading anything
    pub fn locate(&self) -> Result<FlorenceFiles> {
        FlorenceFiles::locate(&self.model_dir)
    }

    /// Load the model; blocking, call from `spawn_blocking` in async code
    pub fn load(&self) -> Result<FlorenceModel> {
        let start = Instant::now();
        info!(
            "Loading {} from {} (device: {:?})",
            self.model_id,
            self.model_dir.display(),
            self.device_preference
        );

        let files = self.locate()?;
        let model = FlorenceModel::load(
            &files,
            self.model_id.clone(),
            self.device_preference,
            self.intra_threads,
        )
        .with_context(|| format!("Failed to load {}", self.model_id))?;

        info!(
            "Model ready on {} in {:.2}s",
            model.device(),
            start.elapsed().as_secs_f64()
        );
        Ok(model)
    }

    /// Load the model and wrap it in a [`VisionService`] for `config`
    pub fn load_service(&self, config: &BridgeConfig) -> Result<VisionService> {
        let backend: Arc<dyn VisionBackend> = Arc::new(self.load()?);
        Ok(VisionService::new(backend, config))
    }
}

/// Describe a loaded backend
pub fn model_info(backend: &dyn VisionBackend, model_dir: &std::path::Path) -> VisionModelInfo {
    VisionModelInfo {
        name: backend.model_id().to_string(),
        device: backend.device().to_string(),
        model_dir: model_dir.to_path_buf(),
    }
}
