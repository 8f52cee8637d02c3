// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Execution device selection for ONNX Runtime sessions
//!
//! The bridge prefers an accelerator (CoreML on Apple Silicon, CUDA
//! elsewhere) and falls back to the CPU when the accelerator cannot be
//! registered. A device only counts as available once a session has
//! actually been committed on it.

use anyhow::{anyhow, Context, Result};
use ort::execution_providers::{
    ArenaExtendStrategy, CPUExecutionProvider, CUDAExecutionProvider, CoreMLExecutionProvider,
};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use serde::Serialize;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing::{info, warn};

/// Device a model session runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    /// Apple Neural Engine / GPU via CoreML
    CoreMl,
    /// NVIDIA GPU via CUDA
    Cuda,
    /// General-purpose processor
    Cpu,
}

impl Device {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CoreMl => "coreml",
            Self::Cuda => "cuda",
            Self::Cpu => "cpu",
        }
    }

    /// Whether this device is a hardware accelerator
    pub fn is_accelerator(&self) -> bool {
        !matches!(self, Self::Cpu)
    }

    /// Memory policy for sessions committed on this device
    pub fn memory_policy(&self) -> MemoryPolicy {
        if self.is_accelerator() {
            MemoryPolicy {
                memory_pattern: false,
                arena_on_demand: true,
            }
        } else {
            MemoryPolicy {
                memory_pattern: true,
                arena_on_demand: false,
            }
        }
    }
}

/// How a session holds on to runtime memory between runs
///
/// Accelerator sessions skip the pre-planned memory pattern and grow the
/// device arena only by what each run requests, so per-image buffers are
/// released when the run ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryPolicy {
    /// Reuse a pre-planned allocation layout across runs
    pub memory_pattern: bool,
    /// Grow the device arena by exactly what a run requests (CUDA)
    pub arena_on_demand: bool,
}

impl MemoryPolicy {
    fn arena_extend_strategy(&self) -> ArenaExtendStrategy {
        if self.arena_on_demand {
            ArenaExtendStrategy::SameAsRequested
        } else {
            ArenaExtendStrategy::NextPowerOfTwo
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Requested device policy (`VISION_DEVICE`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DevicePreference {
    /// Best accelerator for this platform, CPU as a fallback
    #[default]
    Auto,
    /// Force CPU
    Cpu,
    /// Force CoreML (fails if unavailable)
    CoreMl,
    /// Force CUDA (fails if unavailable)
    Cuda,
}

impl DevicePreference {
    /// Devices to try, in order
    pub fn candidates(&self) -> Vec<Device> {
        match self {
            Self::Auto => {
                if cfg!(target_os = "macos") {
                    vec![Device::CoreMl, Device::Cpu]
                } else {
                    vec![Device::Cuda, Device::Cpu]
                }
            }
            Self::Cpu => vec![Device::Cpu],
            Self::CoreMl => vec![Device::CoreMl],
            Self::Cuda => vec![Device::Cuda],
        }
    }
}

impl FromStr for DevicePreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" | "" => Ok(Self::Auto),
            "cpu" => Ok(Self::Cpu),
            "coreml" | "mps" | "metal" => Ok(Self::CoreMl),
            "cuda" | "gpu" => Ok(Self::Cuda),
            other => Err(format!("unknown device '{}'", other)),
        }
    }
}

/// Build an inference session for `model_path` pinned to `device`
///
/// Accelerator providers are registered with `error_on_failure` so that a
/// missing provider surfaces as an error instead of a silent CPU run.
///
/// Accelerator sessions follow [`Device::memory_policy`] so runtime memory
/// is handed back after every run.
pub fn build_session(model_path: &Path, device: Device, intra_threads: usize) -> Result<Session> {
    let policy = device.memory_policy();
    let builder = Session::builder().context("Failed to create session builder")?;

    let builder = match device {
        Device::CoreMl => builder.with_execution_providers([CoreMLExecutionProvider::default()
            .build()
            .error_on_failure()]),
        Device::Cuda => builder.with_execution_providers([CUDAExecutionProvider::default()
            .with_arena_extend_strategy(policy.arena_extend_strategy())
            .build()
            .error_on_failure()]),
        Device::Cpu => builder.with_execution_providers([CPUExecutionProvider::default().build()]),
    }
    .with_context(|| format!("Failed to set {} execution provider", device))?;

    builder
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .context("Failed to set optimization level")?
        .with_intra_threads(intra_threads)
        .context("Failed to set intra threads")?
        .with_memory_pattern(policy.memory_pattern)
        .context("Failed to set memory pattern")?
        .commit_from_file(model_path)
        .with_context(|| {
            format!(
                "Failed to load model from {} on {}",
                model_path.display(),
                device
            )
        })
}

/// Open `model_path` on the first device of `preference` that works
///
/// Returns the device that succeeded so the remaining sessions of the
/// pipeline can be pinned to the same one.
pub fn open_on_preferred_device(
    model_path: &Path,
    preference: DevicePreference,
    intra_threads: usize,
) -> Result<(Device, Session)> {
    let mut last_error = None;

    for device in preference.candidates() {
        info!("Attempting {} execution provider...", device);
        match build_session(model_path, device, intra_threads) {
            Ok(session) => {
                info!("✅ {} execution provider initialized", device);
                return Ok((device, session));
            }
            Err(e) => {
                warn!("⚠️  {} execution provider failed: {:#}", device, e);
                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| anyhow!("No execution device candidates")))
}
