// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Token embedding lookup (`embed_tokens.onnx`)
//!
//! The Florence-2 ONNX export splits the shared embedding table out of the
//! encoder and decoder graphs, so both the prompt and every decoder step go
//! through this session first.

use anyhow::{Context, Result};
use ndarray::{Array2, Array3, Ix3};
use ort::session::Session;
use ort::value::Value;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::debug;

use super::lock_session;
use crate::vision::device::{build_session, Device};

/// Maps token ids to embedding vectors
#[derive(Clone)]
pub struct TokenEmbedder {
    session: Arc<Mutex<Session>>,
}

impl std::fmt::Debug for TokenEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenEmbedder").finish_non_exhaustive()
    }
}

impl TokenEmbedder {
    /// Load `embed_tokens.onnx` on `device`
    pub fn load(model_path: &Path, device: Device, intra_threads: usize) -> Result<Self> {
        let session = build_session(model_path, device, intra_threads)
            .context("Failed to load token embedding model")?;
        debug!("Token embedder loaded from {}", model_path.display());

        Ok(Self {
            session: Arc::new(Mutex::new(session)),
        })
    }

    /// Embed a token sequence, returning `[1, len, hidden]`
    pub fn embed(&self, token_ids: &[u32]) -> Result<Array3<f32>> {
        if token_ids.is_empty() {
            anyhow::bail!("Cannot embed an empty token sequence");
        }

        let input_ids = token_ids_to_array(token_ids);
        let input_value =
            Value::from_array(input_ids).context("Failed to create input_ids tensor")?;

        let mut session = lock_session(&self.session, "embed_tokens")?;
        let outputs = session
            .run(ort::inputs!["input_ids" => input_value])
            .context("embed_tokens inference failed")?;

        let embeddings = outputs[0]
            .try_extract_array::<f32>()
            .context("Failed to extract embeddings tensor")?
            .to_owned()
            .into_dimensionality::<Ix3>()
            .context("Token embeddings are not rank 3")?;

        Ok(embeddings)
    }
}

/// Token ids as the `[1, len]` int64 tensor the graphs expect
pub fn token_ids_to_array(token_ids: &[u32]) -> Array2<i64> {
    let ids: Vec<i64> = token_ids.iter().map(|&id| id as i64).collect();
    Array2::from_shape_vec((1, ids.len()), ids).unwrap_or_else(|_| Array2::zeros((1, 0)))
}
