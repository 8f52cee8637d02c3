// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Vision processing: dense region captioning with Florence-2
//!
//! This module provides:
//! - Image decoding from base64 (`image_utils`)
//! - Device selection for ONNX Runtime (`device`)
//! - The model seam (`backend`) and its Florence-2 implementation (`florence`)
//! - The per-request pipeline (`service`) and startup loading (`model_manager`)

pub mod backend;
pub mod cache_guard;
pub mod detection;
pub mod device;
pub mod florence;
pub mod image_utils;
pub mod model_manager;
pub mod service;

pub use backend::{Prediction, RegionPrediction, VisionBackend};
pub use cache_guard::CacheGuard;
pub use detection::{NormalizeError, NormalizedDetection};
pub use device::{Device, DevicePreference};
pub use image_utils::{
    decode_base64_image, decode_image_bytes, detect_format, ImageError, ImageInfo,
};
pub use model_manager::{ModelBootstrapper, VisionModelInfo};
pub use service::{VisionAnalysis, VisionError, VisionService, UNKNOWN_SCENE};
