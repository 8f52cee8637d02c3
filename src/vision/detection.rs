// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Resolution-independent detections
//!
//! Boxes are rescaled from pixels to a 0-1000 grid per axis (x by image
//! width, y by image height) so clients never need the source resolution.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::backend::RegionPrediction;

/// Upper bound of the normalized coordinate grid
pub const NORMALIZED_SCALE: f64 = 1000.0;

#[derive(Debug, Error, PartialEq)]
pub enum NormalizeError {
    #[error("Cannot normalize boxes for a {width}x{height} image")]
    ZeroDimensions { width: u32, height: u32 },
}

/// One detected region
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedDetection {
    /// Uppercased region label
    pub label: String,
    /// `[xmin, ymin, xmax, ymax]`, each in `[0, 1000]`
    pub box_2d: [f64; 4],
}

impl NormalizedDetection {
    /// Build from a pixel-space box on a `width` x `height` image
    ///
    /// Coordinates keep the order the model produced them in.
    pub fn from_pixel_box(
        label: &str,
        bbox: &[f64; 4],
        width: u32,
        height: u32,
    ) -> Result<Self, NormalizeError> {
        if width == 0 || height == 0 {
            return Err(NormalizeError::ZeroDimensions { width, height });
        }

        Ok(Self {
            label: label.to_uppercase(),
            box_2d: [
                normalize_coordinate(bbox[0], width),
                normalize_coordinate(bbox[1], height),
                normalize_coordinate(bbox[2], width),
                normalize_coordinate(bbox[3], height),
            ],
        })
    }
}

/// Scale one pixel coordinate to the 0-1000 grid, clamped
///
/// Non-finite input maps to 0.
pub fn normalize_coordinate(value: f64, extent: u32) -> f64 {
    let scaled = value * NORMALIZED_SCALE / extent as f64;
    if scaled.is_finite() {
        scaled.clamp(0.0, NORMALIZED_SCALE)
    } else {
        0.0
    }
}

/// Normalize every region of a prediction, keeping model order
pub fn normalize_regions(
    regions: &RegionPrediction,
    width: u32,
    height: u32,
) -> Result<Vec<NormalizedDetection>, NormalizeError> {
    regions
        .iter()
        .map(|(bbox, label)| NormalizedDetection::from_pixel_box(label, bbox, width, height))
        .collect()
}
