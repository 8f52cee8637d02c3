// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Florence-2 task prompts

use std::fmt;

/// A Florence-2 task mode
///
/// The task token selects the model behavior. The ONNX export has no
/// processor, so the token is expanded here into the natural-language
/// prompt the model was trained on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskPrompt {
    /// Multiple labeled boxes covering sub-regions of the image
    DenseRegionCaption,
    /// One free-text description of the whole image
    DetailedCaption,
}

impl TaskPrompt {
    /// Task token as used by the reference processor
    pub fn token(&self) -> &'static str {
        match self {
            Self::DenseRegionCaption => "<DENSE_REGION_CAPTION>",
            Self::DetailedCaption => "<DETAILED_CAPTION>",
        }
    }

    /// Prompt text fed to the tokenizer
    pub fn prompt_text(&self) -> &'static str {
        match self {
            Self::DenseRegionCaption => "Locate the objects in the image, with their descriptions.",
            Self::DetailedCaption => "Describe in detail what is shown in the image.",
        }
    }
}

impl fmt::Display for TaskPrompt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}
