// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Florence-2 language decoder
//!
//! Greedy autoregressive decoding over `decoder_model.onnx`. The export has
//! no past-key-value outputs, so every step re-runs the full prefix.
//!
//! Sequence layout: `[decoder_start, bos, generated..., eos]`. The decoder
//! start token is `</s>`; `<s>` is forced as the first generated token.

use anyhow::{Context, Result};
use ndarray::{ArrayViewD, Axis};
use ort::session::Session;
use ort::value::Value;
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokenizers::Tokenizer;
use tracing::{debug, trace};

use super::embeddings::TokenEmbedder;
use super::encoder::EncoderOutput;
use super::lock_session;
use crate::config::GenerationParams;
use crate::vision::device::{build_session, Device};

/// Special token ids used while decoding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpecialTokens {
    /// First token fed to the decoder
    pub decoder_start: u32,
    /// Token forced at the first generation step
    pub bos: u32,
    /// Stops generation
    pub eos: u32,
}

impl Default for SpecialTokens {
    fn default() -> Self {
        Self {
            decoder_start: 2,
            bos: 0,
            eos: 2,
        }
    }
}

impl SpecialTokens {
    /// Resolve ids from the tokenizer vocabulary, keeping BART defaults for
    /// anything missing
    pub fn from_tokenizer(tokenizer: &Tokenizer) -> Self {
        let defaults = Self::default();
        let bos = tokenizer.token_to_id("<s>").unwrap_or(defaults.bos);
        let eos = tokenizer.token_to_id("</s>").unwrap_or(defaults.eos);

        Self {
            decoder_start: eos,
            bos,
            eos,
        }
    }
}

/// Florence-2 language decoder
#[derive(Clone)]
pub struct FlorenceDecoder {
    session: Arc<Mutex<Session>>,
    special_tokens: SpecialTokens,
}

impl std::fmt::Debug for FlorenceDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlorenceDecoder")
            .field("special_tokens", &self.special_tokens)
            .finish_non_exhaustive()
    }
}

impl FlorenceDecoder {
    /// Load `decoder_model.onnx` on `device`
    pub fn load(
        model_path: &Path,
        special_tokens: SpecialTokens,
        device: Device,
        intra_threads: usize,
    ) -> Result<Self> {
        let session = build_session(model_path, device, intra_threads)
            .context("Failed to load Florence decoder")?;

        let input_names: Vec<_> = session.inputs.iter().map(|i| &i.name).collect();
        debug!("Decoder inputs: {:?}", input_names);

        Ok(Self {
            session: Arc::new(Mutex::new(session)),
            special_tokens,
        })
    }

    /// Generate token ids conditioned on `encoder_output`
    ///
    /// The returned sequence includes the decoder start token and, when
    /// generation stopped on it, the end token.
    pub fn generate(
        &self,
        embedder: &TokenEmbedder,
        encoder_output: &EncoderOutput,
        params: &GenerationParams,
    ) -> Result<Vec<u32>> {
        let ids = greedy_decode(
            |prefix| self.forward(embedder, encoder_output, prefix),
            &self.special_tokens,
            params,
        )?;

        debug!("Generation complete: {} total tokens", ids.len());
        Ok(ids)
    }

    /// One decoder pass over `prefix`, returning logits for the next token
    fn forward(
        &self,
        embedder: &TokenEmbedder,
        encoder_output: &EncoderOutput,
        prefix: &[u32],
    ) -> Result<Vec<f32>> {
        let inputs_embeds = embedder.embed(prefix)?;

        let encoder_value = Value::from_array(encoder_output.hidden_states.clone())
            .context("Failed to create encoder hidden states tensor")?;
        let mask_value = Value::from_array(encoder_output.attention_mask.clone())
            .context("Failed to create encoder attention mask tensor")?;
        let embeds_value =
            Value::from_array(inputs_embeds).context("Failed to create inputs_embeds tensor")?;

        let mut session = lock_session(&self.session, "decoder")?;
        let outputs = session
            .run(ort::inputs![
                "encoder_hidden_states" => encoder_value,
                "encoder_attention_mask" => mask_value,
                "inputs_embeds" => embeds_value
            ])
            .context("Decoder inference failed")?;

        let logits = outputs[0]
            .try_extract_array::<f32>()
            .context("Failed to extract logits tensor")?;

        last_position_logits(logits.view())
    }
}

/// Greedy decoding loop
///
/// `next_logits` receives the current sequence and returns the logits for
/// the token that follows it. Step 0 is forced to `bos` without a model
/// call. Generation stops after `eos` or `max_new_tokens` new tokens.
pub fn greedy_decode<F>(
    mut next_logits: F,
    special_tokens: &SpecialTokens,
    params: &GenerationParams,
) -> Result<Vec<u32>>
where
    F: FnMut(&[u32]) -> Result<Vec<f32>>,
{
    let mut ids = vec![special_tokens.decoder_start];

    for step in 0..params.max_new_tokens {
        let next = if step == 0 {
            special_tokens.bos
        } else {
            let mut logits = next_logits(&ids)?;
            apply_repetition_penalty(&mut logits, &ids, params.repetition_penalty);
            argmax(&logits).context("Decoder returned empty logits")?
        };

        trace!("Step {}: token {}", step, next);
        ids.push(next);

        if next == special_tokens.eos {
            debug!("Generation stopped at EOS after {} steps", step + 1);
            break;
        }
    }

    Ok(ids)
}

/// Penalize every token already present in `history`
///
/// Positive logits are divided by `penalty`, negative ones multiplied,
/// so a penalized token always becomes less likely. Each distinct token is
/// penalized once regardless of how often it occurred.
pub fn apply_repetition_penalty(logits: &mut [f32], history: &[u32], penalty: f32) {
    if penalty == 1.0 {
        return;
    }

    let seen: HashSet<u32> = history.iter().copied().collect();
    for token in seen {
        if let Some(logit) = logits.get_mut(token as usize) {
            *logit = if *logit > 0.0 {
                *logit / penalty
            } else {
                *logit * penalty
            };
        }
    }
}

/// Index of the largest logit; the first one wins on ties
pub fn argmax(logits: &[f32]) -> Option<u32> {
    let mut best: Option<(usize, f32)> = None;
    for (idx, &value) in logits.iter().enumerate() {
        if value.is_nan() {
            continue;
        }
        match best {
            Some((_, best_value)) if value <= best_value => {}
            _ => best = Some((idx, value)),
        }
    }
    best.map(|(idx, _)| idx as u32)
}

/// Logits of the last sequence position from a `[1, seq, vocab]` or
/// `[seq, vocab]` tensor
pub fn last_position_logits(output: ArrayViewD<'_, f32>) -> Result<Vec<f32>> {
    let shape = output.shape().to_vec();
    let last = match shape.len() {
        3 => output.index_axis_move(Axis(0), 0),
        2 => output,
        _ => anyhow::bail!("Unexpected decoder output shape: {:?}", shape),
    };

    let seq_len = last.shape()[0];
    if seq_len == 0 {
        anyhow::bail!("Decoder returned an empty sequence");
    }

    Ok(last.index_axis_move(Axis(0), seq_len - 1).iter().copied().collect())
}
