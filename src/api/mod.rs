// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
pub mod errors;
pub mod health;
pub mod http_server;
pub mod vision;

pub use errors::ApiError;
pub use health::{health_handler, HealthResponse};
pub use http_server::{create_router, start_server, AppState};
pub use vision::{vision_handler, VisionRequest, VisionResponse};
