// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Vision endpoint tests for POST /v1/vision
//!
//! Drives the full router with `oneshot` against scripted backends:
//! - Success responses carry a JSON-array string of normalized detections
//! - Every failure is a 500 with a plain-text description
//! - Model caches are released after success and after failure
//! - `context` appears only in scene mode

use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use vision_bridge::{
    api::{create_router, AppState, VisionResponse},
    config::{GenerationParams, DEFAULT_MAX_BODY_BYTES},
    vision::{NormalizedDetection, RegionPrediction, VisionService, UNKNOWN_SCENE},
};

use crate::common::{png_base64, ScriptedBackend};

fn router_for(backend: Arc<ScriptedBackend>, scene_context: bool) -> Router {
    let caption = scene_context.then(GenerationParams::caption_default);
    let service =
        VisionService::with_params(backend, GenerationParams::detection_default(), caption);
    create_router(AppState::new(service), DEFAULT_MAX_BODY_BYTES)
}

fn vision_request(body: String) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/v1/vision")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body))
        .unwrap()
}

fn images_body(images: &[String]) -> String {
    serde_json::json!({ "images": images }).to_string()
}

async fn send(router: Router, request: Request<Body>) -> (StatusCode, String) {
    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

fn parse_success(body: &str) -> (VisionResponse, Vec<NormalizedDetection>) {
    let response: VisionResponse = serde_json::from_str(body).unwrap();
    let detections = response.detections().unwrap();
    (response, detections)
}

// =============================================================================
// Success path
// =============================================================================

/// Test 1: A valid image yields 200 with a JSON-array response string
#[tokio::test]
async fn test_valid_image_returns_detections() {
    let backend = Arc::new(ScriptedBackend::default());
    let router = router_for(backend.clone(), false);

    let (status, body) = send(router, vision_request(images_body(&[png_base64(640, 480)]))).await;

    assert_eq!(status, StatusCode::OK, "body: {}", body);
    let (response, detections) = parse_success(&body);
    assert!(response.response.starts_with('['));
    assert_eq!(detections.len(), 2);
    assert_eq!(detections[0].label, "RED CAR");
    assert_eq!(detections[1].label, "PERSON");
}

/// Test 2: Every coordinate lies in [0, 1000] and every label is uppercase
#[tokio::test]
async fn test_boxes_in_range_and_labels_uppercase() {
    let backend = Arc::new(ScriptedBackend::with_region_output(
        "<s>tall tree<loc_0><loc_0><loc_999><loc_999>small Dog<loc_10><loc_900><loc_40><loc_950></s>",
    ));
    let router = router_for(backend, false);

    let (status, body) = send(router, vision_request(images_body(&[png_base64(333, 777)]))).await;

    assert_eq!(status, StatusCode::OK);
    let (_, detections) = parse_success(&body);
    assert_eq!(detections.len(), 2);
    for detection in &detections {
        assert_eq!(detection.label, detection.label.to_uppercase());
        assert!(detection.box_2d.iter().all(|&v| (0.0..=1000.0).contains(&v)));
        assert!(detection.box_2d[0] <= detection.box_2d[2]);
        assert!(detection.box_2d[1] <= detection.box_2d[3]);
    }
}

/// Test 3: 100x200 image with pixel box [10, 20, 50, 100]
#[tokio::test]
async fn test_normalization_example() {
    let regions = RegionPrediction::new(vec![[10.0, 20.0, 50.0, 100.0]], vec!["cat".to_string()])
        .unwrap();
    let backend = Arc::new(ScriptedBackend {
        pixel_regions: Some(regions),
        ..ScriptedBackend::default()
    });
    let router = router_for(backend, false);

    let (status, body) = send(router, vision_request(images_body(&[png_base64(100, 200)]))).await;

    assert_eq!(status, StatusCode::OK);
    let (_, detections) = parse_success(&body);
    assert_eq!(detections[0].label, "CAT");
    assert_eq!(detections[0].box_2d, [100.0, 100.0, 500.0, 500.0]);
}

/// Test 4: No regions in the model output is an empty list, not an error
#[tokio::test]
async fn test_no_regions_returns_empty_array() {
    let backend = Arc::new(ScriptedBackend::with_region_output("</s><s></s>"));
    let router = router_for(backend, false);

    let (status, body) = send(router, vision_request(images_body(&[png_base64(64, 64)]))).await;

    assert_eq!(status, StatusCode::OK);
    let (response, detections) = parse_success(&body);
    assert_eq!(response.response, "[]");
    assert!(detections.is_empty());
}

/// Test 5: Only the first image is analyzed
#[tokio::test]
async fn test_only_first_image_used() {
    let backend = Arc::new(ScriptedBackend::default());
    let router = router_for(backend.clone(), false);

    let images = vec![png_base64(32, 16), "not base64 at all!".to_string()];
    let (status, _) = send(router, vision_request(images_body(&images))).await;

    assert_eq!(status, StatusCode::OK);
    let calls = backend.recorded_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].image_size, (32, 16));
}

/// Test 6: Identical requests give identical responses
#[tokio::test]
async fn test_deterministic_output() {
    let backend = Arc::new(ScriptedBackend::default());
    let router = router_for(backend, true);
    let body = images_body(&[png_base64(320, 240)]);

    let (_, first) = send(router.clone(), vision_request(body.clone())).await;
    let (_, second) = send(router, vision_request(body)).await;

    assert_eq!(first, second);
}

// =============================================================================
// Scene mode
// =============================================================================

/// Test 7: Scene mode adds a non-empty context from a 32-token caption pass
#[tokio::test]
async fn test_scene_mode_includes_context() {
    let backend = Arc::new(ScriptedBackend::default());
    let router = router_for(backend.clone(), true);

    let (status, body) = send(router, vision_request(images_body(&[png_base64(640, 480)]))).await;

    assert_eq!(status, StatusCode::OK);
    let (response, _) = parse_success(&body);
    assert_eq!(
        response.context.as_deref(),
        Some("A red car parked next to a person.")
    );

    let calls = backend.recorded_calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1].params.max_new_tokens, 32);
}

/// Test 8: Single-task mode omits the context field entirely
#[tokio::test]
async fn test_single_mode_omits_context() {
    let backend = Arc::new(ScriptedBackend::default());
    let router = router_for(backend, false);

    let (status, body) = send(router, vision_request(images_body(&[png_base64(64, 64)]))).await;

    assert_eq!(status, StatusCode::OK);
    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert!(json.get("context").is_none());
    assert!(json["response"].is_string());
}

/// Test 9: An empty caption still yields a non-empty context
#[tokio::test]
async fn test_empty_caption_falls_back() {
    let backend = Arc::new(ScriptedBackend::with_caption_output("</s><s></s>"));
    let router = router_for(backend, true);

    let (status, body) = send(router, vision_request(images_body(&[png_base64(64, 64)]))).await;

    assert_eq!(status, StatusCode::OK);
    let (response, _) = parse_success(&body);
    assert_eq!(response.context.as_deref(), Some(UNKNOWN_SCENE));
}

// =============================================================================
// Failure path
// =============================================================================

/// Test 10: Empty images list is a 500 with a message
#[tokio::test]
async fn test_empty_images_returns_500() {
    let backend = Arc::new(ScriptedBackend::default());
    let router = router_for(backend.clone(), true);

    let (status, body) = send(router, vision_request(r#"{"images": []}"#.to_string())).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(!body.is_empty());
    assert!(backend.recorded_calls().is_empty());
}

/// Test 11: Missing images field is a 500
#[tokio::test]
async fn test_missing_images_returns_500() {
    let backend = Arc::new(ScriptedBackend::default());
    let router = router_for(backend, false);

    let (status, body) = send(router, vision_request("{}".to_string())).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body.contains("at least one image"));
}

/// Test 12: Malformed JSON is a 500 with plain text, not a 4xx
#[tokio::test]
async fn test_malformed_json_returns_500() {
    let backend = Arc::new(ScriptedBackend::default());
    let router = router_for(backend, false);

    let response = router
        .oneshot(vision_request("{\"images\": [".to_string()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/plain; charset=utf-8"
    );
}

/// Test 13: Invalid base64 is a 500 and the cache is still released
#[tokio::test]
async fn test_invalid_base64_returns_500_and_clears_cache() {
    let backend = Arc::new(ScriptedBackend::default());
    let router = router_for(backend.clone(), true);

    let (status, body) =
        send(router, vision_request(images_body(&["@@not-base64@@".to_string()]))).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body.contains("Invalid base64"), "body: {}", body);
    assert_eq!(backend.clear_count(), 1);
}

/// Test 14: Base64 of something that is not an image is a 500
#[tokio::test]
async fn test_non_image_payload_returns_500() {
    use base64::{engine::general_purpose::STANDARD, Engine as _};

    let backend = Arc::new(ScriptedBackend::default());
    let router = router_for(backend, false);
    let payload = STANDARD.encode(b"just some text, not pixels");

    let (status, body) = send(router, vision_request(images_body(&[payload]))).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, "Unsupported image format");
}

/// Test 15: Model failure is a 500 carrying the error text, cache released
#[tokio::test]
async fn test_model_failure_returns_500_and_clears_cache() {
    let backend = Arc::new(ScriptedBackend::failing("out of accelerator memory"));
    let router = router_for(backend.clone(), true);

    let (status, body) = send(router, vision_request(images_body(&[png_base64(64, 64)]))).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body.contains("out of accelerator memory"));
    assert_eq!(backend.clear_count(), 1);
}

/// Test 16: Cache is released after every successful request
#[tokio::test]
async fn test_success_clears_cache_each_request() {
    let backend = Arc::new(ScriptedBackend::default());
    let router = router_for(backend.clone(), true);
    let body = images_body(&[png_base64(64, 64)]);

    for expected in 1..=3 {
        let (status, _) = send(router.clone(), vision_request(body.clone())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(backend.clear_count(), expected);
    }
}

// =============================================================================
// Concurrency
// =============================================================================

/// Test 17: Concurrent requests never run generation at the same time
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_are_serialized() {
    let backend = Arc::new(ScriptedBackend {
        delay: Duration::from_millis(30),
        ..ScriptedBackend::default()
    });
    let router = router_for(backend.clone(), true);
    let body = images_body(&[png_base64(64, 64)]);

    let mut handles = Vec::new();
    for _ in 0..4 {
        let router = router.clone();
        let body = body.clone();
        handles.push(tokio::spawn(async move {
            send(router, vision_request(body)).await.0
        }));
    }

    for handle in handles {
        assert_eq!(handle.await.unwrap(), StatusCode::OK);
    }
    assert_eq!(backend.max_active.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert_eq!(backend.recorded_calls().len(), 8);
}

// =============================================================================
// Health
// =============================================================================

/// Test 18: /health reports model, device and mode
#[tokio::test]
async fn test_health_endpoint() {
    let backend = Arc::new(ScriptedBackend::default());
    let router = router_for(backend, true);

    let request = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(router, request).await;

    assert_eq!(status, StatusCode::OK);
    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["status"], "ok");
    assert_eq!(json["model"], "scripted-florence");
    assert_eq!(json["device"], "cpu");
    assert_eq!(json["sceneContext"], true);
}

// =============================================================================
// Large photos
// =============================================================================

/// Test 19: An image above 10MB but inside the body limit is analyzed
#[tokio::test]
async fn test_large_image_within_body_limit_succeeds() {
    let backend = Arc::new(ScriptedBackend::default());
    let router = router_for(backend.clone(), false);

    // ~10.8MB bitmap, ~14.4MB once base64-encoded in the JSON body
    let body = images_body(&[crate::common::bmp_base64(1900, 1900)]);
    assert!(body.len() < DEFAULT_MAX_BODY_BYTES);

    let (status, body) = send(router, vision_request(body)).await;

    assert_eq!(status, StatusCode::OK, "body: {}", body);
    let calls = backend.recorded_calls();
    assert_eq!(calls[0].image_size, (1900, 1900));
}
