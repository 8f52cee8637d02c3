// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Florence-2 output parsing
//!
//! Dense region output looks like
//! `</s><s>red car<loc_52><loc_300><loc_410><loc_702>wheel<loc_...>...</s>`:
//! a phrase followed by one or more groups of four quantized coordinates
//! (`xmin ymin xmax ymax`), each bin covering 1/1000 of the image side.

use anyhow::Result;
use regex::Regex;
use std::sync::OnceLock;
use tracing::debug;

use super::tasks::TaskPrompt;
use crate::vision::backend::{Prediction, RegionPrediction};

/// Number of coordinate bins per image side
pub const NUM_LOCATION_BINS: u32 = 1000;

const SPECIAL_TOKENS: &[&str] = &["<s>", "</s>", "<pad>"];

fn phrase_regex() -> &'static Regex {
    static PHRASE: OnceLock<Regex> = OnceLock::new();
    PHRASE.get_or_init(|| {
        Regex::new(r"([^<]+(?:<loc_\d+>){4,})").expect("phrase pattern is valid")
    })
}

fn location_regex() -> &'static Regex {
    static LOCATION: OnceLock<Regex> = OnceLock::new();
    LOCATION.get_or_init(|| Regex::new(r"<loc_(\d+)>").expect("location pattern is valid"))
}

/// Parse generated text into the prediction for `task`
pub fn post_process_generation(
    generated: &str,
    task: TaskPrompt,
    image_size: (u32, u32),
) -> Result<Prediction> {
    let prediction = match task {
        TaskPrompt::DenseRegionCaption => {
            Prediction::Regions(parse_dense_regions(generated, image_size))
        }
        TaskPrompt::DetailedCaption => Prediction::Caption(parse_caption(generated)),
    };
    Ok(prediction)
}

/// Extract labeled boxes (pixel space) from dense region output
///
/// A phrase followed by several complete groups of four locations yields
/// one box per group, all sharing the phrase. Trailing incomplete groups
/// are dropped. Labels are trimmed and then reduced to ASCII, matching the
/// Florence-2 processor; a phrase that ends up empty still keeps its boxes.
pub fn parse_dense_regions(generated: &str, image_size: (u32, u32)) -> RegionPrediction {
    let (width, height) = image_size;
    let text = strip_special_tokens(generated);
    let mut regions = RegionPrediction::empty();

    for m in phrase_regex().find_iter(&text) {
        let chunk = m.as_str();
        let phrase = chunk.split("<loc_").next().unwrap_or_default().trim();
        let label: String = phrase.chars().filter(char::is_ascii).collect();

        let bins: Vec<u32> = location_regex()
            .captures_iter(chunk)
            .filter_map(|c| c.get(1).and_then(|n| n.as_str().parse().ok()))
            .collect();

        for group in bins.chunks_exact(4) {
            let bbox = [
                dequantize_bin(group[0], width),
                dequantize_bin(group[1], height),
                dequantize_bin(group[2], width),
                dequantize_bin(group[3], height),
            ];
            regions.push(bbox, label.as_str());
        }
    }

    debug!("Parsed {} regions from {} chars", regions.len(), generated.len());
    regions
}

/// Extract caption text
pub fn parse_caption(generated: &str) -> String {
    let text = strip_special_tokens(generated);
    let without_locations = location_regex().replace_all(&text, "");
    without_locations.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Map a location bin back to a pixel coordinate (bin center)
pub fn dequantize_bin(bin: u32, size: u32) -> f64 {
    let bin = bin.min(NUM_LOCATION_BINS - 1) as f64;
    (bin + 0.5) * size as f64 / NUM_LOCATION_BINS as f64
}

fn strip_special_tokens(text: &str) -> String {
    SPECIAL_TOKENS
        .iter()
        .fold(text.to_string(), |acc, token| acc.replace(token, ""))
}
