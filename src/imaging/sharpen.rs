//! Sharpening: a 5-tap Laplacian blended back into the source.
//!
//! ```text
//!         0  -1   0
//!        -1   5  -1     raw = 5·P − (left + right + up + down)
//!         0  -1   0     out = clamp(mix·raw + (1 − mix)·P, 0, 255)
//! ```
//!
//! Only interior pixels and the R, G, B channels change. Every tap reads
//! from an unmodified copy of the input so results do not bleed along the
//! scan direction.

use super::params::SharpenLevel;
use super::store::WorkingBuffer;
use image::RgbaImage;
use tracing::debug;

/// Sharpen `buffer` in place. [`SharpenLevel::None`] leaves it untouched.
#[tracing::instrument(skip(buffer), fields(width = buffer.width(), height = buffer.height()))]
pub fn sharpen(buffer: &mut WorkingBuffer, level: SharpenLevel) {
    let Some(mix) = level.mix() else {
        return;
    };
    debug!(mix, "applying laplacian sharpen");
    sharpen_image(buffer.image_mut(), mix);
}

pub(crate) fn sharpen_image(image: &mut RgbaImage, mix: f32) {
    let (width, height) = image.dimensions();
    if width < 3 || height < 3 {
        return;
    }
    let source = image.clone();
    let stride = width as usize * 4;
    let src = source.as_raw();
    let dst: &mut [u8] = image;

    for y in 1..height as usize - 1 {
        for x in 1..width as usize - 1 {
            let i = y * stride + x * 4;
            for c in 0..3 {
                let center = src[i + c] as f32;
                let raw = 5.0 * center
                    - src[i - 4 + c] as f32
                    - src[i + 4 + c] as f32
                    - src[i - stride + c] as f32
                    - src[i + stride + c] as f32;
                let blended = mix * raw + (1.0 - mix) * center;
                dst[i + c] = blended.round().clamp(0.0, 255.0) as u8;
            }
        }
    }
}
