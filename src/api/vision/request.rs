// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Vision request types and validation

use serde::{Deserialize, Serialize};

use crate::api::errors::ApiError;

/// Request body of `POST /v1/vision`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VisionRequest {
    /// Base64-encoded images; only the first one is analyzed
    #[serde(default)]
    pub images: Vec<String>,
}

impl VisionRequest {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            images: vec![image.into()],
        }
    }

    /// The image to analyze
    pub fn first_image(&self) -> Result<&str, ApiError> {
        self.images
            .first()
            .map(String::as_str)
            .ok_or_else(|| {
                ApiError::InvalidRequest("images must contain at least one image".to_string())
            })
    }
}
