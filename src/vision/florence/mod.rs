// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Florence-2 integration for dense region captioning
//!
//! Components:
//! - `preprocessing` - Image preprocessing for encoder input
//! - `embeddings` - Token embedding lookup shared by encoder and decoder
//! - `encoder` - Vision encoder and multimodal text encoder
//! - `decoder` - Greedy language decoder
//! - `postprocess` - Parsing of `<loc_N>` output into boxes and labels
//! - `model` - Combined Florence-2 pipeline

pub mod decoder;
pub mod embeddings;
pub mod encoder;
pub mod model;
pub mod postprocess;
pub mod preprocessing;
pub mod tasks;

use anyhow::{anyhow, Result};
use ort::session::Session;
use std::sync::{Mutex, MutexGuard};

pub use decoder::{FlorenceDecoder, SpecialTokens};
pub use embeddings::TokenEmbedder;
pub use encoder::{EncoderOutput, FlorenceEncoder};
pub use model::{FlorenceFiles, FlorenceModel};
pub use tasks::TaskPrompt;

/// Lock a shared session, turning a poisoned lock into an error
pub(crate) fn lock_session<'a>(
    session: &'a Mutex<Session>,
    name: &str,
) -> Result<MutexGuard<'a, Session>> {
    session
        .lock()
        .map_err(|_| anyhow!("{} session lock poisoned", name))
}
