// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Configuration for the vision bridge
//!
//! All values come from environment variables (optionally seeded from a
//! `.env` file). Decoding constants are named here instead of being baked
//! into the handler so that single-task and scene-aware deployments can
//! share one binary.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use crate::vision::device::DevicePreference;

/// Default listen host (all interfaces)
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default listen port
pub const DEFAULT_PORT: u16 = 8000;

/// Default Florence-2 ONNX export directory
pub const DEFAULT_MODEL_DIR: &str = "./models/florence-2-base-onnx";

/// Default model identifier reported by /health
pub const DEFAULT_MODEL_ID: &str = "microsoft/Florence-2-base";

/// Token budget for the dense region pass
pub const DEFAULT_MAX_NEW_TOKENS: usize = 128;

/// Token budget for the scene caption pass
pub const DEFAULT_CAPTION_MAX_NEW_TOKENS: usize = 32;

/// Repetition penalty applied during greedy decoding
pub const DEFAULT_REPETITION_PENALTY: f32 = 1.5;

/// Upper bound accepted for any token budget
pub const MAX_TOKENS_LIMIT: usize = 1024;

/// Default request body limit (base64 photos from phones are large)
pub const DEFAULT_MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Fixed decoding parameters for one generation pass
///
/// Decoding is always greedy (beam width 1).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationParams {
    /// Maximum number of tokens generated after the decoder start token
    pub max_new_tokens: usize,
    /// Penalty applied to tokens already present in the sequence (1.0 = off)
    pub repetition_penalty: f32,
}

impl GenerationParams {
    pub fn new(max_new_tokens: usize, repetition_penalty: f32) -> Self {
        Self {
            max_new_tokens,
            repetition_penalty,
        }
    }

    /// Parameters for the dense region caption pass
    pub fn detection_default() -> Self {
        Self::new(DEFAULT_MAX_NEW_TOKENS, DEFAULT_REPETITION_PENALTY)
    }

    /// Parameters for the detailed caption pass
    pub fn caption_default() -> Self {
        Self::new(DEFAULT_CAPTION_MAX_NEW_TOKENS, DEFAULT_REPETITION_PENALTY)
    }

    /// Validate the parameters
    pub fn validate(&self, name: &str) -> Result<(), String> {
        if self.max_new_tokens == 0 || self.max_new_tokens > MAX_TOKENS_LIMIT {
            return Err(format!(
                "{} max_new_tokens must be between 1 and {}, got {}",
                name, MAX_TOKENS_LIMIT, self.max_new_tokens
            ));
        }
        if !self.repetition_penalty.is_finite() || self.repetition_penalty < 1.0 {
            return Err(format!(
                "{} repetition_penalty must be a finite value >= 1.0, got {}",
                name, self.repetition_penalty
            ));
        }
        Ok(())
    }
}

/// Configuration for the vision bridge process
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Listen host
    pub host: String,
    /// Listen port
    pub port: u16,
    /// Directory holding the Florence-2 ONNX export and tokenizer.json
    pub model_dir: PathBuf,
    /// Model identifier (informational)
    pub model_id: String,
    /// Run the detailed caption pass and return `context`
    pub scene_context: bool,
    /// Dense region caption decoding parameters
    pub detection: GenerationParams,
    /// Detailed caption decoding parameters
    pub caption: GenerationParams,
    /// Which execution device to use
    pub device_preference: DevicePreference,
    /// ONNX Runtime intra-op threads
    pub intra_threads: usize,
    /// Maximum accepted request body size in bytes
    pub max_body_bytes: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            model_dir: PathBuf::from(DEFAULT_MODEL_DIR),
            model_id: DEFAULT_MODEL_ID.to_string(),
            scene_context: true,
            detection: GenerationParams::detection_default(),
            caption: GenerationParams::caption_default(),
            device_preference: DevicePreference::Auto,
            intra_threads: 4,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

impl BridgeConfig {
    /// Load configuration from environment variables
    ///
    /// A `.env` file in the working directory is loaded first if present.
    /// Unparseable values fall back to their defaults and are caught by
    /// `validate` only when they are out of range.
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();

        let defaults = Self::default();

        Self {
            host: env::var("VISION_HOST").unwrap_or(defaults.host),
            port: parse_env("VISION_PORT").unwrap_or(defaults.port),
            model_dir: env::var("FLORENCE_MODEL_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.model_dir),
            model_id: env::var("FLORENCE_MODEL_ID").unwrap_or(defaults.model_id),
            scene_context: env::var("SCENE_CONTEXT")
                .map(|v| parse_flag(&v))
                .unwrap_or(defaults.scene_context),
            detection: GenerationParams {
                max_new_tokens: parse_env("MAX_NEW_TOKENS")
                    .unwrap_or(defaults.detection.max_new_tokens),
                repetition_penalty: parse_env("REPETITION_PENALTY")
                    .unwrap_or(defaults.detection.repetition_penalty),
            },
            caption: GenerationParams {
                max_new_tokens: parse_env("CAPTION_MAX_NEW_TOKENS")
                    .unwrap_or(defaults.caption.max_new_tokens),
                repetition_penalty: parse_env("CAPTION_REPETITION_PENALTY")
                    .unwrap_or(defaults.caption.repetition_penalty),
            },
            device_preference: parse_env("VISION_DEVICE").unwrap_or(defaults.device_preference),
            intra_threads: parse_env("ORT_INTRA_THREADS").unwrap_or(defaults.intra_threads),
            max_body_bytes: parse_env("MAX_BODY_BYTES").unwrap_or(defaults.max_body_bytes),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.port == 0 {
            return Err("VISION_PORT must be greater than 0".to_string());
        }
        if self.intra_threads == 0 {
            return Err("ORT_INTRA_THREADS must be greater than 0".to_string());
        }
        if self.max_body_bytes == 0 {
            return Err("MAX_BODY_BYTES must be greater than 0".to_string());
        }
        self.detection.validate("detection")?;
        if self.scene_context {
            self.caption.validate("caption")?;
        }
        Ok(())
    }

    /// Address string for the listener
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Caption parameters when scene mode is enabled
    pub fn caption_params(&self) -> Option<GenerationParams> {
        self.scene_context.then_some(self.caption)
    }
}

fn parse_env<T: FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
