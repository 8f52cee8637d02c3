// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Liveness endpoint

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};

use crate::api::http_server::AppState;
use crate::version;

/// Response body of `GET /health`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub model: String,
    pub device: String,
    pub scene_context: bool,
    pub version: String,
}

/// GET /health - Report the loaded model and device
///
/// The server only binds after the model loaded, so a reachable server is
/// always ready.
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let backend = state.service.backend();
    Json(HealthResponse {
        status: "ok".to_string(),
        model: backend.model_id().to_string(),
        device: backend.device().to_string(),
        scene_context: state.service.scene_context(),
        version: version::VERSION.to_string(),
    })
}
