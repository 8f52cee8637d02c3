// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
// Version information for the vision bridge

/// Full version string with feature description
pub const VERSION: &str = "v0.1.0-dense-region-bridge-2025-11-03";

/// Semantic version number
pub const VERSION_NUMBER: &str = env!("CARGO_PKG_VERSION");

/// Build date
pub const BUILD_DATE: &str = "2025-11-03";

/// Supported features in this version
pub const FEATURES: &[&str] = &[
    "dense-region-caption",
    "scene-context",
    "normalized-boxes-0-1000",
    "accelerator-cache-flush",
    "serialized-inference",
];

/// Get version information as a formatted string
pub fn get_version_string() -> String {
    format!("vision-bridge {} ({})", VERSION_NUMBER, BUILD_DATE)
}
