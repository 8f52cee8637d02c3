// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Vision API endpoint module
//!
//! Provides POST /v1/vision for dense region detection.

pub mod handler;
pub mod request;
pub mod response;

pub use handler::vision_handler;
pub use request::VisionRequest;
pub use response::{NormalizedDetection, VisionResponse};
