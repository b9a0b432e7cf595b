//! Shared test utilities for the rasterkit test suite.
//!
//! Synthetic image builders and comparison helpers, so unit tests never
//! depend on fixture files.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let source = noisy_image(64, 64, 7);
//! let bytes = encode_png(&source);
//! assert!(mean_abs_delta(&source, &source) == 0.0);
//! ```

use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder, Rgba, RgbaImage};

// =========================================================================
// Image builders
// =========================================================================

/// Opaque diagonal gradient. Smooth content, compresses well.
pub fn gradient_image(width: u32, height: u32) -> RgbaImage {
    RgbaImage::from_fn(width, height, |x, y| {
        let r = (x * 255 / width.max(1)) as u8;
        let g = (y * 255 / height.max(1)) as u8;
        let b = ((x + y) * 255 / (width + height).max(1)) as u8;
        Rgba([r, g, b, 255])
    })
}

/// Opaque pseudo-random noise from a small LCG. Same seed, same pixels.
pub fn noisy_image(width: u32, height: u32, seed: u64) -> RgbaImage {
    let mut state = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
    let mut next = move || {
        state = state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        (state >> 33) as u8
    };
    RgbaImage::from_fn(width, height, |_, _| Rgba([next(), next(), next(), 255]))
}

pub fn solid_image(width: u32, height: u32, color: Rgba<u8>) -> RgbaImage {
    RgbaImage::from_pixel(width, height, color)
}

// =========================================================================
// Encoding and comparison
// =========================================================================

/// Encode as PNG in memory.
pub fn encode_png(image: &RgbaImage) -> Vec<u8> {
    let mut bytes = Vec::new();
    PngEncoder::new(&mut bytes)
        .write_image(
            image.as_raw(),
            image.width(),
            image.height(),
            ExtendedColorType::Rgba8,
        )
        .unwrap();
    bytes
}

/// Mean absolute difference over the R, G, B channels.
pub fn mean_abs_delta(a: &RgbaImage, b: &RgbaImage) -> f64 {
    assert_eq!(a.dimensions(), b.dimensions(), "images differ in size");
    let total: u64 = a
        .pixels()
        .zip(b.pixels())
        .map(|(p, q)| (0..3).map(|c| p[c].abs_diff(q[c]) as u64).sum::<u64>())
        .sum();
    total as f64 / (a.width() as f64 * a.height() as f64 * 3.0)
}
