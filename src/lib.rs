// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
pub mod api;
pub mod config;
pub mod version;
pub mod vision;

pub use api::{create_router, start_server, AppState, VisionRequest, VisionResponse};
pub use config::{BridgeConfig, GenerationParams};
pub use vision::{
    Device, DevicePreference, ModelBootstrapper, NormalizedDetection, VisionBackend, VisionError,
    VisionService,
};
