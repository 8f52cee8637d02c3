// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Per-request vision pipeline
//!
//! decode image -> dense region pass -> normalize -> (scene caption pass)
//!
//! The service is built once at startup around the loaded backend and is
//! immutable afterwards. It does no locking of its own; callers serialize
//! `analyze` when the backend cannot run passes concurrently.

use image::DynamicImage;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::debug;

use super::backend::VisionBackend;
use super::cache_guard::CacheGuard;
use super::detection::{normalize_regions, NormalizeError, NormalizedDetection};
use super::florence::TaskPrompt;
use super::image_utils::{decode_base64_image, ImageError};
use crate::config::{BridgeConfig, GenerationParams};

/// Context reported when the caption pass yields no text
pub const UNKNOWN_SCENE: &str = "UNKNOWN SCENE";

/// Errors raised while serving one request
#[derive(Debug, Error)]
pub enum VisionError {
    #[error(transparent)]
    Image(#[from] ImageError),

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error(transparent)]
    Normalize(#[from] NormalizeError),
}

impl VisionError {
    /// Wrap a backend error, keeping its context chain in the message
    pub fn inference(err: anyhow::Error) -> Self {
        Self::Inference(format!("{:#}", err))
    }
}

/// Result of analyzing one image
#[derive(Debug, Clone, PartialEq)]
pub struct VisionAnalysis {
    /// Detections in model order
    pub detections: Vec<NormalizedDetection>,
    /// Scene caption, set only in scene mode
    pub context: Option<String>,
    /// Source image width
    pub width: u32,
    /// Source image height
    pub height: u32,
}

/// Vision pipeline bound to a loaded backend
pub struct VisionService {
    backend: Arc<dyn VisionBackend>,
    detection: GenerationParams,
    caption: Option<GenerationParams>,
}

impl std::fmt::Debug for VisionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VisionService")
            .field("model_id", &self.backend.model_id())
            .field("detection", &self.detection)
            .field("caption", &self.caption)
            .finish()
    }
}

impl VisionService {
    /// Build from configuration; scene mode follows `config.scene_context`
    pub fn new(backend: Arc<dyn VisionBackend>, config: &BridgeConfig) -> Self {
        Self::with_params(backend, config.detection, config.caption_params())
    }

    /// Build with explicit parameters; `caption: None` disables scene mode
    pub fn with_params(
        backend: Arc<dyn VisionBackend>,
        detection: GenerationParams,
        caption: Option<GenerationParams>,
    ) -> Self {
        Self {
            backend,
            detection,
            caption,
        }
    }

    pub fn backend(&self) -> &Arc<dyn VisionBackend> {
        &self.backend
    }

    /// Whether a scene caption is produced alongside detections
    pub fn scene_context(&self) -> bool {
        self.caption.is_some()
    }

    pub fn detection_params(&self) -> GenerationParams {
        self.detection
    }

    pub fn caption_params(&self) -> Option<GenerationParams> {
        self.caption
    }

    /// Analyze one base64-encoded image
    ///
    /// Backend caches are released before returning, whatever the outcome.
    pub fn analyze(&self, image_base64: &str) -> Result<VisionAnalysis, VisionError> {
        let _cache = CacheGuard::new(self.backend.clone());
        let start = Instant::now();

        let (image, info) = decode_base64_image(image_base64)?;
        debug!(
            "Decoded {:?} image {}x{} ({} bytes)",
            info.format, info.width, info.height, info.size_bytes
        );

        let detections = self.detect(&image)?;

        let context = match &self.caption {
            Some(params) => Some(self.describe_scene(&image, params)?),
            None => None,
        };

        debug!(
            "Analysis finished in {}ms: {} detections, context: {}",
            start.elapsed().as_millis(),
            detections.len(),
            context.is_some()
        );

        Ok(VisionAnalysis {
            detections,
            context,
            width: info.width,
            height: info.height,
        })
    }

    fn detect(&self, image: &DynamicImage) -> Result<Vec<NormalizedDetection>, VisionError> {
        let task = TaskPrompt::DenseRegionCaption;
        let size = (image.width(), image.height());

        let generated = self
            .backend
            .generate(image, task, &self.detection)
            .map_err(VisionError::inference)?;

        let regions = self
            .backend
            .post_process(&generated, task, size)
            .map_err(VisionError::inference)?
            .into_regions()
            .ok_or_else(|| {
                VisionError::Inference(format!("{} did not produce regions", task))
            })?;

        Ok(normalize_regions(&regions, size.0, size.1)?)
    }

    fn describe_scene(
        &self,
        image: &DynamicImage,
        params: &GenerationParams,
    ) -> Result<String, VisionError> {
        let task = TaskPrompt::DetailedCaption;

        let generated = self
            .backend
            .generate(image, task, params)
            .map_err(VisionError::inference)?;

        let caption = self
            .backend
            .post_process(&generated, task, (image.width(), image.height()))
            .map_err(VisionError::inference)?
            .into_caption()
            .ok_or_else(|| VisionError::Inference(format!("{} did not produce text", task)))?;

        let caption = caption.trim();
        Ok(if caption.is_empty() {
            UNKNOWN_SCENE.to_string()
        } else {
            caption.to_string()
        })
    }
}
