// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Florence-2 encoders
//!
//! Two graphs run before decoding:
//! - `vision_encoder.onnx`: pixels `[1, 3, 768, 768]` to image tokens
//!   `[1, 577, 768]`
//! - `encoder_model.onnx`: image tokens followed by prompt embeddings, to
//!   the hidden states the decoder cross-attends to

use anyhow::{Context, Result};
use ndarray::{concatenate, Array2, Array3, Array4, Axis, Ix3};
use ort::session::Session;
use ort::value::Value;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::debug;

use super::lock_session;
use super::preprocessing::FLORENCE_INPUT_SIZE;
use crate::vision::device::{build_session, Device};

/// Output of the multimodal encoder
#[derive(Debug, Clone)]
pub struct EncoderOutput {
    /// `[1, seq_len, hidden]`
    pub hidden_states: Array3<f32>,
    /// `[1, seq_len]`, all ones
    pub attention_mask: Array2<i64>,
}

/// Florence-2 vision and text encoders
#[derive(Clone)]
pub struct FlorenceEncoder {
    vision_session: Arc<Mutex<Session>>,
    text_session: Arc<Mutex<Session>>,
    vision_input_name: String,
}

impl std::fmt::Debug for FlorenceEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlorenceEncoder")
            .field("vision_input_name", &self.vision_input_name)
            .finish_non_exhaustive()
    }
}

impl FlorenceEncoder {
    /// Wrap an already committed vision session and load the text encoder
    /// on the same device
    ///
    /// The vision session is opened by the caller because it is the one
    /// that decides which device the pipeline runs on.
    pub fn new(
        vision_session: Session,
        text_encoder_path: &Path,
        device: Device,
        intra_threads: usize,
    ) -> Result<Self> {
        let vision_input_name = vision_session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .unwrap_or_else(|| "pixel_values".to_string());

        let text_session = build_session(text_encoder_path, device, intra_threads)
            .context("Failed to load Florence text encoder")?;

        debug!(
            "Florence encoders ready on {} (vision input: {})",
            device, vision_input_name
        );

        Ok(Self {
            vision_session: Arc::new(Mutex::new(vision_session)),
            text_session: Arc::new(Mutex::new(text_session)),
            vision_input_name,
        })
    }

    /// Encode preprocessed pixels into image tokens `[1, n, hidden]`
    pub fn encode_image(&self, pixel_values: &Array4<f32>) -> Result<Array3<f32>> {
        let shape = pixel_values.shape();
        if shape[0] != 1 || shape[1] != 3 {
            anyhow::bail!("Invalid input shape: {:?}, expected [1, 3, H, W]", shape);
        }
        if shape[2] != FLORENCE_INPUT_SIZE as usize || shape[3] != FLORENCE_INPUT_SIZE as usize {
            debug!(
                "Input size {}x{} differs from expected {}x{}",
                shape[2], shape[3], FLORENCE_INPUT_SIZE, FLORENCE_INPUT_SIZE
            );
        }

        let input_value = Value::from_array(pixel_values.to_owned())
            .context("Failed to create pixel_values tensor")?;

        let mut session = lock_session(&self.vision_session, "vision encoder")?;
        let outputs = session
            .run(ort::inputs![self.vision_input_name.as_str() => input_value])
            .context("Vision encoder inference failed")?;

        let features = outputs[0]
            .try_extract_array::<f32>()
            .context("Failed to extract image features")?
            .to_owned()
            .into_dimensionality::<Ix3>()
            .context("Image features are not rank 3")?;

        debug!("Image features shape: {:?}", features.shape());
        Ok(features)
    }

    /// Run the text encoder over `[image tokens, prompt embeddings]`
    pub fn encode(
        &self,
        image_features: &Array3<f32>,
        prompt_embeds: &Array3<f32>,
    ) -> Result<EncoderOutput> {
        let (inputs_embeds, attention_mask) = merge_inputs(image_features, prompt_embeds)?;

        let embeds_value = Value::from_array(inputs_embeds)
            .context("Failed to create inputs_embeds tensor")?;
        let mask_value = Value::from_array(attention_mask.clone())
            .context("Failed to create attention_mask tensor")?;

        let mut session = lock_session(&self.text_session, "text encoder")?;
        let outputs = session
            .run(ort::inputs![
                "inputs_embeds" => embeds_value,
                "attention_mask" => mask_value
            ])
            .context("Text encoder inference failed")?;

        let hidden_states = outputs[0]
            .try_extract_array::<f32>()
            .context("Failed to extract encoder hidden states")?
            .to_owned()
            .into_dimensionality::<Ix3>()
            .context("Encoder hidden states are not rank 3")?;

        Ok(EncoderOutput {
            hidden_states,
            attention_mask,
        })
    }
}

/// Concatenate image and prompt tokens along the sequence axis and build
/// the matching all-ones attention mask
pub fn merge_inputs(
    image_features: &Array3<f32>,
    prompt_embeds: &Array3<f32>,
) -> Result<(Array3<f32>, Array2<i64>)> {
    if image_features.shape()[2] != prompt_embeds.shape()[2] {
        anyhow::bail!(
            "Hidden size mismatch: image features {:?}, prompt embeddings {:?}",
            image_features.shape(),
            prompt_embeds.shape()
        );
    }

    let merged = concatenate(Axis(1), &[image_features.view(), prompt_embeds.view()])
        .context("Failed to concatenate image and prompt embeddings")?;
    let mask = Array2::<i64>::ones((1, merged.shape()[1]));

    Ok((merged, mask))
}
