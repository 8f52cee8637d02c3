// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Vision response types

use serde::{Deserialize, Serialize};

pub use crate::vision::NormalizedDetection;
use crate::vision::VisionAnalysis;

/// Response body of `POST /v1/vision`
///
/// `response` is itself a JSON document (an array of detections) carried as
/// a string, which is what existing clients parse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisionResponse {
    /// JSON-encoded `[{label, box_2d}, ...]`
    pub response: String,
    /// Scene caption, present only in scene mode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

impl VisionResponse {
    pub fn from_analysis(analysis: &VisionAnalysis) -> Result<Self, serde_json::Error> {
        Ok(Self {
            response: serde_json::to_string(&analysis.detections)?,
            context: analysis.context.clone(),
        })
    }

    /// Decode the embedded detection list
    pub fn detections(&self) -> Result<Vec<NormalizedDetection>, serde_json::Error> {
        serde_json::from_str(&self.response)
    }
}
