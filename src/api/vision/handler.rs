// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Vision endpoint handler

use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use std::time::Instant;
use tracing::{info, warn};

use super::request::VisionRequest;
use super::response::VisionResponse;
use crate::api::errors::ApiError;
use crate::api::http_server::AppState;

/// POST /v1/vision - Detect and label regions of an image
///
/// Accepts `{"images": ["<base64>", ...]}` and analyzes the first image.
/// Every failure, including a malformed body, is a 500 with a plain-text
/// description.
pub async fn vision_handler(
    State(state): State<AppState>,
    payload: Result<Json<VisionRequest>, JsonRejection>,
) -> Result<Json<VisionResponse>, ApiError> {
    let result = analyze_request(state, payload).await;
    if let Err(e) = &result {
        warn!("Vision request failed: {}", e);
    }
    result.map(Json)
}

async fn analyze_request(
    state: AppState,
    payload: Result<Json<VisionRequest>, JsonRejection>,
) -> Result<VisionResponse, ApiError> {
    let Json(request) =
        payload.map_err(|rejection| ApiError::InvalidRequest(rejection.body_text()))?;
    let image = request.first_image()?.to_string();

    // Held by the blocking task so a dropped connection cannot release the
    // slot while generation is still running.
    let slot = state.inference_slot.clone().lock_owned().await;
    let service = state.service.clone();
    let start = Instant::now();

    let analysis = tokio::task::spawn_blocking(move || {
        let _slot = slot;
        service.analyze(&image)
    })
    .await
    .map_err(|e| ApiError::TaskFailed(e.to_string()))??;

    info!(
        "Identified {} items in {:.2}s on {}",
        analysis.detections.len(),
        start.elapsed().as_secs_f64(),
        state.service.backend().device()
    );

    Ok(VisionResponse::from_analysis(&analysis)?)
}
