// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Seam between the request pipeline and the pretrained model
//!
//! The model, its tokenizer and the accelerator runtime are external
//! collaborators. `VisionBackend` is everything the pipeline needs from
//! them: a generation call, a post-processing call, the device in use, and
//! a cache flush. The production implementation is
//! [`FlorenceModel`](crate::vision::florence::FlorenceModel); tests use
//! scripted backends.

use anyhow::{bail, Result};
use image::DynamicImage;

use crate::config::GenerationParams;
use crate::vision::device::Device;
use crate::vision::florence::postprocess::post_process_generation;
use crate::vision::florence::TaskPrompt;

/// Structured prediction for one task, in source-image pixel space
#[derive(Debug, Clone, PartialEq)]
pub enum Prediction {
    /// Dense region caption output
    Regions(RegionPrediction),
    /// Caption output
    Caption(String),
}

impl Prediction {
    /// Region output, if this is a region prediction
    pub fn into_regions(self) -> Option<RegionPrediction> {
        match self {
            Self::Regions(regions) => Some(regions),
            Self::Caption(_) => None,
        }
    }

    /// Caption text, if this is a caption prediction
    pub fn into_caption(self) -> Option<String> {
        match self {
            Self::Caption(text) => Some(text),
            Self::Regions(_) => None,
        }
    }
}

/// Parallel box/label sequences
///
/// Boxes are `[xmin, ymin, xmax, ymax]` in pixels. Both sequences always
/// have the same length.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegionPrediction {
    bboxes: Vec<[f64; 4]>,
    labels: Vec<String>,
}

impl RegionPrediction {
    /// Build from parallel sequences, rejecting a length mismatch
    pub fn new(bboxes: Vec<[f64; 4]>, labels: Vec<String>) -> Result<Self> {
        if bboxes.len() != labels.len() {
            bail!(
                "Model returned {} boxes but {} labels",
                bboxes.len(),
                labels.len()
            );
        }
        Ok(Self { bboxes, labels })
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bbox: [f64; 4], label: impl Into<String>) {
        self.bboxes.push(bbox);
        self.labels.push(label.into());
    }

    pub fn bboxes(&self) -> &[[f64; 4]] {
        &self.bboxes
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.bboxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bboxes.is_empty()
    }

    /// Iterate `(bbox, label)` pairs in model order
    pub fn iter(&self) -> impl Iterator<Item = (&[f64; 4], &str)> {
        self.bboxes
            .iter()
            .zip(self.labels.iter().map(String::as_str))
    }
}

/// A loaded vision-language model
///
/// Implementations must be safe to share across threads; the service
/// serializes generation calls itself.
pub trait VisionBackend: Send + Sync + 'static {
    /// Identifier of the loaded model
    fn model_id(&self) -> &str;

    /// Device the model was placed on at startup
    fn device(&self) -> Device;

    /// Run one generation pass and return the decoded text, special and
    /// location tokens included
    fn generate(
        &self,
        image: &DynamicImage,
        task: TaskPrompt,
        params: &GenerationParams,
    ) -> Result<String>;

    /// Turn generated text into a structured prediction
    fn post_process(
        &self,
        generated: &str,
        task: TaskPrompt,
        image_size: (u32, u32),
    ) -> Result<Prediction> {
        post_process_generation(generated, task, image_size)
    }

    /// Release memory held from the last generation passes
    fn clear_cache(&self);
}
