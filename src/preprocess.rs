// Copyright 2025 Statiq Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Letterbox image preprocessing for detector inputs
//!
//! Turns an image file into the fixed-shape tensor a YOLO-family detector
//! expects: resized with preserved aspect ratio, padded with centered black
//! borders to a square, RGB channel order, values in [0, 1], CHW layout with
//! a leading batch dimension of 1.

use crate::Result;
use image::imageops::FilterType;
use image::DynamicImage;
use ndarray::Array4;
use std::path::Path;

/// Placement of a resized image inside the square target canvas
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LetterboxGeometry {
    pub new_width: u32,
    pub new_height: u32,
    pub pad_top: u32,
    pub pad_bottom: u32,
    pub pad_left: u32,
    pub pad_right: u32,
}

/// Compute the resize dimensions and padding for fitting `width` x `height`
/// into a `target` x `target` square without distortion.
///
/// The uniform scale is `min(target/width, target/height)` so the longer side
/// exactly fits the target. Padding is centered; when the remainder is odd the
/// extra pixel goes to the bottom/right side.
pub fn letterbox_geometry(width: u32, height: u32, target: u32) -> LetterboxGeometry {
    let scale = (target as f32 / width as f32).min(target as f32 / height as f32);
    let new_width = (width as f32 * scale).round() as u32;
    let new_height = (height as f32 * scale).round() as u32;

    let pad_w = target - new_width;
    let pad_h = target - new_height;

    LetterboxGeometry {
        new_width,
        new_height,
        pad_top: pad_h / 2,
        pad_bottom: pad_h - pad_h / 2,
        pad_left: pad_w / 2,
        pad_right: pad_w - pad_w / 2,
    }
}

/// Preprocess an image file into a `(1, 3, target, target)` tensor.
///
/// Propagates IO and decode failures. Images with fewer than three channels
/// are expanded to RGB by the decoder.
pub fn preprocess_image<P: AsRef<Path>>(path: P, target: u32) -> Result<Array4<f32>> {
    let img = image::open(path.as_ref())?;
    Ok(preprocess_dynamic(&img, target))
}

/// Preprocess an already decoded image into a `(1, 3, target, target)` tensor.
pub fn preprocess_dynamic(img: &DynamicImage, target: u32) -> Array4<f32> {
    let rgb = img.to_rgb8();
    let geometry = letterbox_geometry(rgb.width(), rgb.height(), target);

    let resized = image::imageops::resize(
        &rgb,
        geometry.new_width,
        geometry.new_height,
        FilterType::Lanczos3,
    );

    // Zeroed canvas doubles as the black letterbox border
    let t = target as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, t, t));

    for (x, y, pixel) in resized.enumerate_pixels() {
        let row = (y + geometry.pad_top) as usize;
        let col = (x + geometry.pad_left) as usize;
        for c in 0..3 {
            tensor[[0, c, row, col]] = pixel[c] as f32 / 255.0;
        }
    }

    tensor
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn test_reference_geometry_1280x720() {
        let g = letterbox_geometry(1280, 720, 640);
        assert_eq!(g.new_width, 640);
        assert_eq!(g.new_height, 360);
        assert_eq!(g.pad_top, 140);
        assert_eq!(g.pad_bottom, 140);
        assert_eq!(g.pad_left, 0);
        assert_eq!(g.pad_right, 0);
    }

    #[test]
    fn test_geometry_square_input() {
        let g = letterbox_geometry(500, 500, 640);
        assert_eq!(g.new_width, 640);
        assert_eq!(g.new_height, 640);
        assert_eq!(g.pad_top + g.pad_bottom + g.pad_left + g.pad_right, 0);
    }

    #[test]
    fn test_geometry_odd_padding_goes_to_trailing_side() {
        // 445 * 0.64 rounds to 285, leaving an odd 355 px remainder
        let g = letterbox_geometry(1000, 445, 640);
        assert_eq!(g.new_width, 640);
        assert_eq!(g.new_height, 285);
        let pad = 640 - 285;
        assert_eq!(g.pad_top, pad / 2);
        assert_eq!(g.pad_bottom, pad - pad / 2);
        assert!(g.pad_bottom == g.pad_top + 1);
    }

    #[test]
    fn test_geometry_centered_within_one_pixel() {
        for (w, h) in [(123, 77), (1920, 1080), (33, 701), (640, 640)] {
            let g = letterbox_geometry(w, h, 640);
            assert!(g.pad_top.abs_diff(g.pad_bottom) <= 1, "{}x{}", w, h);
            assert!(g.pad_left.abs_diff(g.pad_right) <= 1, "{}x{}", w, h);
            assert_eq!(g.new_width + g.pad_left + g.pad_right, 640);
            assert_eq!(g.new_height + g.pad_top + g.pad_bottom, 640);
        }
    }

    #[test]
    fn test_tensor_shape_and_value_range() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(64, 32, Rgb([255, 128, 0])));
        let tensor = preprocess_dynamic(&img, 96);

        assert_eq!(tensor.shape(), &[1, 3, 96, 96]);
        for &v in tensor.iter() {
            assert!((0.0..=1.0).contains(&v), "value out of range: {}", v);
        }
    }

    #[test]
    fn test_padding_is_black_and_content_is_not() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(64, 32, Rgb([255, 255, 255])));
        let tensor = preprocess_dynamic(&img, 64);
        let g = letterbox_geometry(64, 32, 64);

        // Top padding rows are zero on every channel
        assert_eq!(tensor[[0, 0, 0, 0]], 0.0);
        assert_eq!(tensor[[0, 2, (g.pad_top - 1) as usize, 32]], 0.0);

        // Center of the letterboxed content is white
        assert!((tensor[[0, 0, 32, 32]] - 1.0).abs() < 1e-6);
        assert!((tensor[[0, 1, 32, 32]] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_channel_order_is_rgb() {
        // Pure red image: channel 0 saturated, channels 1 and 2 near zero
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(32, 32, Rgb([255, 0, 0])));
        let tensor = preprocess_dynamic(&img, 32);

        assert!((tensor[[0, 0, 16, 16]] - 1.0).abs() < 1e-6);
        assert!(tensor[[0, 1, 16, 16]].abs() < 1e-6);
        assert!(tensor[[0, 2, 16, 16]].abs() < 1e-6);
    }

    #[test]
    fn test_grayscale_is_expanded() {
        let img = DynamicImage::ImageLuma8(image::GrayImage::from_pixel(20, 20, image::Luma([200])));
        let tensor = preprocess_dynamic(&img, 32);
        assert_eq!(tensor.shape(), &[1, 3, 32, 32]);
    }

    #[test]
    fn test_missing_file_propagates_error() {
        let result = preprocess_image("/nonexistent/image.jpg", 640);
        assert!(result.is_err());
    }
}
