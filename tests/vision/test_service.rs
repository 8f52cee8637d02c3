// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! VisionService pipeline tests
//!
//! Verifies pass ordering, decoding parameters, cache release and error
//! propagation without any model files.

use std::sync::Arc;
use vision_bridge::{
    config::{BridgeConfig, GenerationParams},
    vision::{florence::TaskPrompt, VisionError, VisionService, UNKNOWN_SCENE},
};

use crate::common::{png_base64, ScriptedBackend};

fn service(backend: Arc<ScriptedBackend>, scene_context: bool) -> VisionService {
    let config = BridgeConfig {
        scene_context,
        ..BridgeConfig::default()
    };
    VisionService::new(backend, &config)
}

// =============================================================================
// Pass ordering and parameters
// =============================================================================

/// Test 1: Scene mode runs the region pass first, then the caption pass
#[test]
fn test_scene_mode_runs_two_passes_in_order() {
    let backend = Arc::new(ScriptedBackend::default());
    let analysis = service(backend.clone(), true)
        .analyze(&png_base64(200, 100))
        .unwrap();

    let calls = backend.recorded_calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].task, TaskPrompt::DenseRegionCaption);
    assert_eq!(calls[1].task, TaskPrompt::DetailedCaption);
    assert!(calls.iter().all(|c| c.image_size == (200, 100)));
    assert!(analysis.context.is_some());
}

/// Test 2: Single-task mode runs only the region pass
#[test]
fn test_single_mode_runs_one_pass() {
    let backend = Arc::new(ScriptedBackend::default());
    let analysis = service(backend.clone(), false)
        .analyze(&png_base64(50, 50))
        .unwrap();

    assert_eq!(backend.recorded_calls().len(), 1);
    assert!(analysis.context.is_none());
}

/// Test 3: Configured decoding parameters reach the backend unchanged
#[test]
fn test_generation_params_forwarded() {
    let backend = Arc::new(ScriptedBackend::default());
    let detection = GenerationParams::new(64, 1.3);
    let caption = GenerationParams::new(32, 1.4);
    VisionService::with_params(backend.clone(), detection, Some(caption))
        .analyze(&png_base64(10, 10))
        .unwrap();

    let calls = backend.recorded_calls();
    assert_eq!(calls[0].params, detection);
    assert_eq!(calls[1].params, caption);
}

/// Test 4: Defaults stay inside the documented decoding ranges
#[test]
fn test_default_params_in_range() {
    let service = service(Arc::new(ScriptedBackend::default()), true);
    let detection = service.detection_params();
    assert!((64..=128).contains(&detection.max_new_tokens));
    assert!((1.3..=1.5).contains(&detection.repetition_penalty));
    assert_eq!(service.caption_params().unwrap().max_new_tokens, 32);
}

// =============================================================================
// Output shape
// =============================================================================

/// Test 5: Analysis carries image size and normalized detections
#[test]
fn test_analysis_contents() {
    let backend = Arc::new(ScriptedBackend::default());
    let analysis = service(backend, false).analyze(&png_base64(640, 480)).unwrap();

    assert_eq!((analysis.width, analysis.height), (640, 480));
    assert_eq!(analysis.detections.len(), 2);
    // <loc_100> on a 640px-wide image: (100.5 * 0.64) px -> 100.5 normalized
    assert!((analysis.detections[0].box_2d[0] - 100.5).abs() < 1e-9);
    assert!((analysis.detections[0].box_2d[3] - 400.5).abs() < 1e-9);
}

/// Test 6: Whitespace-only caption becomes the fallback context
#[test]
fn test_blank_caption_fallback() {
    let backend = Arc::new(ScriptedBackend::with_caption_output("<s>   </s>"));
    let analysis = service(backend, true).analyze(&png_base64(8, 8)).unwrap();
    assert_eq!(analysis.context.as_deref(), Some(UNKNOWN_SCENE));
}

// =============================================================================
// Errors and cache release
// =============================================================================

/// Test 7: Exactly one cache release per analysis on success
#[test]
fn test_cache_released_once_on_success() {
    let backend = Arc::new(ScriptedBackend::default());
    service(backend.clone(), true)
        .analyze(&png_base64(8, 8))
        .unwrap();
    assert_eq!(backend.clear_count(), 1);
}

/// Test 8: Decode failure is an image error, with the cache released
#[test]
fn test_decode_failure() {
    let backend = Arc::new(ScriptedBackend::default());
    let err = service(backend.clone(), true).analyze("").unwrap_err();

    assert!(matches!(err, VisionError::Image(_)));
    assert!(backend.recorded_calls().is_empty());
    assert_eq!(backend.clear_count(), 1);
}

/// Test 9: Backend failure stops the pipeline before the caption pass
#[test]
fn test_backend_failure_stops_pipeline() {
    let backend = Arc::new(ScriptedBackend::failing("session lost"));
    let err = service(backend.clone(), true)
        .analyze(&png_base64(8, 8))
        .unwrap_err();

    assert!(matches!(err, VisionError::Inference(_)));
    assert!(err.to_string().contains("session lost"));
    assert_eq!(backend.recorded_calls().len(), 1);
    assert_eq!(backend.clear_count(), 1);
}

/// Test 10: Grayscale input is analyzed as RGB at its original size
#[test]
fn test_grayscale_input() {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use image::{DynamicImage, ImageFormat};
    use std::io::Cursor;

    let gray = DynamicImage::new_luma8(30, 20);
    let mut buffer = Cursor::new(Vec::new());
    gray.write_to(&mut buffer, ImageFormat::Png).unwrap();
    let encoded = STANDARD.encode(buffer.into_inner());

    let backend = Arc::new(ScriptedBackend::default());
    let analysis = service(backend, false).analyze(&encoded).unwrap();
    assert_eq!((analysis.width, analysis.height), (30, 20));
}
