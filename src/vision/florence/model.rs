// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Florence-2 pipeline
//!
//! Combines:
//! - Vision encoder (image feature extraction)
//! - Text encoder (image tokens + task prompt)
//! - Language decoder (greedy generation)
//!
//! Runtime buffers on an accelerator are handed back after every run (see
//! [`Device::memory_policy`]). On top of that, the encoded features of the
//! last image are kept so the caption pass that follows a region pass on
//! the same photo skips the vision encoder. `clear_cache` drops them at the
//! end of each request.

use anyhow::{anyhow, Context, Result};
use image::DynamicImage;
use ndarray::Array3;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokenizers::Tokenizer;
use tracing::{debug, info};

use super::decoder::{FlorenceDecoder, SpecialTokens};
use super::embeddings::TokenEmbedder;
use super::encoder::FlorenceEncoder;
use super::preprocessing::preprocess_for_florence;
use super::tasks::TaskPrompt;
use crate::config::GenerationParams;
use crate::vision::backend::VisionBackend;
use crate::vision::device::{open_on_preferred_device, Device, DevicePreference};

const VISION_ENCODER_NAMES: &[&str] = &["vision_encoder.onnx", "vision_encoder_fp16.onnx"];
const EMBED_TOKENS_NAMES: &[&str] = &["embed_tokens.onnx", "embed_tokens_fp16.onnx"];
const TEXT_ENCODER_NAMES: &[&str] = &["encoder_model.onnx", "encoder_model_fp16.onnx"];
const DECODER_NAMES: &[&str] = &[
    "decoder_model.onnx",
    "decoder_model_merged.onnx",
    "decoder_model_fp16.onnx",
];
const TOKENIZER_NAME: &str = "tokenizer.json";

/// Resolved file layout of a Florence-2 ONNX export
///
/// Files are looked up in the directory itself and in an `onnx/`
/// subdirectory (the layout of the community exports on HuggingFace).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlorenceFiles {
    pub vision_encoder: PathBuf,
    pub embed_tokens: PathBuf,
    pub text_encoder: PathBuf,
    pub decoder: PathBuf,
    pub tokenizer: PathBuf,
}

impl FlorenceFiles {
    /// Locate every required file under `model_dir`
    pub fn locate(model_dir: &Path) -> Result<Self> {
        if !model_dir.exists() {
            anyhow::bail!(
                "Florence model directory not found: {}",
                model_dir.display()
            );
        }

        Ok(Self {
            vision_encoder: find_model_file(model_dir, VISION_ENCODER_NAMES)?,
            embed_tokens: find_model_file(model_dir, EMBED_TOKENS_NAMES)?,
            text_encoder: find_model_file(model_dir, TEXT_ENCODER_NAMES)?,
            decoder: find_model_file(model_dir, DECODER_NAMES)?,
            tokenizer: find_model_file(model_dir, &[TOKENIZER_NAME])?,
        })
    }
}

/// Find a model file by trying multiple possible names
fn find_model_file(dir: &Path, names: &[&str]) -> Result<PathBuf> {
    let search_dirs = [dir.to_path_buf(), dir.join("onnx")];
    for search_dir in &search_dirs {
        for name in names {
            let path = search_dir.join(name);
            if path.exists() {
                return Ok(path);
            }
        }
    }
    anyhow::bail!(
        "Model file not found in {}. Tried: {:?}",
        dir.display(),
        names
    );
}

/// Image features kept between passes over the same image
struct CachedFeatures {
    key: blake3::Hash,
    features: Array3<f32>,
}

/// Cache key for an image: content hash over dimensions and pixels
fn image_key(image: &DynamicImage) -> blake3::Hash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&image.width().to_le_bytes());
    hasher.update(&image.height().to_le_bytes());
    hasher.update(image.as_bytes());
    hasher.finalize()
}

/// Florence-2 model
pub struct FlorenceModel {
    model_id: String,
    device: Device,
    encoder: FlorenceEncoder,
    embedder: TokenEmbedder,
    decoder: FlorenceDecoder,
    tokenizer: Arc<Tokenizer>,
    feature_cache: Mutex<Option<CachedFeatures>>,
}

impl std::fmt::Debug for FlorenceModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlorenceModel")
            .field("model_id", &self.model_id)
            .field("device", &self.device)
            .finish_non_exhaustive()
    }
}

impl FlorenceModel {
    /// Load all Florence-2 sessions
    ///
    /// The vision encoder is opened first on the preferred devices; the
    /// device it lands on is then used for every other session.
    pub fn load(
        files: &FlorenceFiles,
        model_id: impl Into<String>,
        preference: DevicePreference,
        intra_threads: usize,
    ) -> Result<Self> {
        let model_id = model_id.into();
        let start = Instant::now();

        let tokenizer = Tokenizer::from_file(&files.tokenizer)
            .map_err(|e| anyhow!("Failed to load tokenizer: {}", e))?;
        let special_tokens = SpecialTokens::from_tokenizer(&tokenizer);
        debug!(
            "Loaded tokenizer with {} tokens, special tokens {:?}",
            tokenizer.get_vocab_size(true),
            special_tokens
        );

        let (device, vision_session) =
            open_on_preferred_device(&files.vision_encoder, preference, intra_threads)
                .context("Failed to load Florence vision encoder")?;

        let encoder =
            FlorenceEncoder::new(vision_session, &files.text_encoder, device, intra_threads)?;
        let embedder = TokenEmbedder::load(&files.embed_tokens, device, intra_threads)?;
        let decoder = FlorenceDecoder::load(&files.decoder, special_tokens, device, intra_threads)?;

        info!(
            "Florence-2 pipeline ready: {} on {} ({:.2}s)",
            model_id,
            device,
            start.elapsed().as_secs_f64()
        );

        Ok(Self {
            model_id,
            device,
            encoder,
            embedder,
            decoder,
            tokenizer: Arc::new(tokenizer),
            feature_cache: Mutex::new(None),
        })
    }

    /// Image features for `image`, from cache when the same image was
    /// encoded since the last flush
    fn image_features(&self, image: &DynamicImage) -> Result<Array3<f32>> {
        let key = image_key(image);

        {
            let cache = self
                .feature_cache
                .lock()
                .map_err(|_| anyhow!("Feature cache lock poisoned"))?;
            if let Some(cached) = cache.as_ref().filter(|c| c.key == key) {
                debug!("Reusing cached image features");
                return Ok(cached.features.clone());
            }
        }

        let pixel_values = preprocess_for_florence(image);
        let features = self
            .encoder
            .encode_image(&pixel_values)
            .context("Failed to encode image")?;

        let mut cache = self
            .feature_cache
            .lock()
            .map_err(|_| anyhow!("Feature cache lock poisoned"))?;
        *cache = Some(CachedFeatures {
            key,
            features: features.clone(),
        });

        Ok(features)
    }

    fn tokenize_prompt(&self, task: TaskPrompt) -> Result<Vec<u32>> {
        let encoding = self
            .tokenizer
            .encode(task.prompt_text(), true)
            .map_err(|e| anyhow!("Failed to encode prompt: {}", e))?;
        Ok(encoding.get_ids().to_vec())
    }

    /// Whether image features are currently cached
    pub fn has_cached_features(&self) -> bool {
        self.feature_cache
            .lock()
            .map(|cache| cache.is_some())
            .unwrap_or(false)
    }
}

impl VisionBackend for FlorenceModel {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn device(&self) -> Device {
        self.device
    }

    fn generate(
        &self,
        image: &DynamicImage,
        task: TaskPrompt,
        params: &GenerationParams,
    ) -> Result<String> {
        let start = Instant::now();

        let image_features = self.image_features(image)?;
        let prompt_ids = self.tokenize_prompt(task)?;
        let prompt_embeds = self.embedder.embed(&prompt_ids)?;

        let encoder_output = self
            .encoder
            .encode(&image_features, &prompt_embeds)
            .context("Failed to run text encoder")?;

        let ids = self
            .decoder
            .generate(&self.embedder, &encoder_output, params)
            .with_context(|| format!("Failed to generate {}", task))?;

        let text = self
            .tokenizer
            .decode(&ids, false)
            .map_err(|e| anyhow!("Decoding failed: {}", e))?;

        debug!(
            "{} generated {} tokens in {}ms",
            task,
            ids.len(),
            start.elapsed().as_millis()
        );

        Ok(text)
    }

    fn clear_cache(&self) {
        if let Ok(mut cache) = self.feature_cache.lock() {
            if cache.take().is_some() {
                debug!("Released cached image features ({})", self.device);
            }
        }
    }
}
