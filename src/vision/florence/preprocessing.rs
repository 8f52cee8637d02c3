// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Image preprocessing for Florence-2

use image::imageops::FilterType;
use image::{DynamicImage, Rgb, RgbImage};
use ndarray::Array4;

/// Target size for Florence-2 vision encoder
pub const FLORENCE_INPUT_SIZE: u32 = 768;

/// ImageNet normalization mean values (Florence-2 uses ImageNet, not CLIP)
pub const MEAN: [f32; 3] = [0.485, 0.456, 0.406];

/// ImageNet normalization std values
pub const STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Preprocess an image for the Florence-2 vision encoder
///
/// Steps:
/// 1. Stretch-resize to FLORENCE_INPUT_SIZE x FLORENCE_INPUT_SIZE (bicubic)
/// 2. Normalize: (pixel/255 - mean) / std
/// 3. Convert to NCHW tensor format [1, 3, H, W]
///
/// The whole frame is kept (no crop) because `<loc_N>` bins are relative
/// to the full image; cropping would shift every returned box.
pub fn preprocess_for_florence(image: &DynamicImage) -> Array4<f32> {
    let rgb = resize_for_encoder(image, FLORENCE_INPUT_SIZE);

    let size = FLORENCE_INPUT_SIZE as usize;
    let mut tensor = Array4::zeros((1, 3, size, size));

    for (x, y, pixel) in rgb.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = (pixel[c] as f32 / 255.0 - MEAN[c]) / STD[c];
        }
    }

    tensor
}

/// Resize to a square RGB8 image of `target_size`
pub fn resize_for_encoder(image: &DynamicImage, target_size: u32) -> RgbImage {
    if image.width() == 0 || image.height() == 0 {
        return RgbImage::from_pixel(target_size, target_size, Rgb([128, 128, 128]));
    }

    image
        .resize_exact(target_size, target_size, FilterType::CatmullRom)
        .into_rgb8()
}
