//! Color filters baked into the working buffer.
//!
//! Steps run in a fixed order, each skipped when it is neutral:
//!
//! ```text
//! brightness ─► contrast ─► saturate ─► grayscale ─► sepia ─► hue-rotate ─► blur
//! (scale)       (around     (3×3 color matrices)              (imageops)     (imageops,
//!                mid-gray)                                                    Gaussian)
//! ```
//!
//! The color steps use the CSS filter-function definitions over straight
//! RGB and leave alpha alone. Blur averages alpha along with color.

use super::error::ImagingError;
use super::params::FilterParams;
use super::store::WorkingBuffer;
use image::RgbaImage;
use image::imageops;
use tracing::debug;

/// Largest accepted blur sigma in pixels.
pub const MAX_BLUR_SIGMA: f32 = 100.0;

type Matrix = [[f32; 3]; 3];

pub fn validate(params: &FilterParams) -> Result<(), ImagingError> {
    let non_negative = |name: &str, value: f32| {
        if value.is_finite() && value >= 0.0 {
            Ok(())
        } else {
            Err(ImagingError::InvalidParameter(format!(
                "{name} must be a non-negative percentage, got {value}"
            )))
        }
    };
    let bounded = |name: &str, value: f32, max: f32| {
        if value.is_finite() && (0.0..=max).contains(&value) {
            Ok(())
        } else {
            Err(ImagingError::InvalidParameter(format!(
                "{name} must be within [0, {max}], got {value}"
            )))
        }
    };
    non_negative("brightness", params.brightness)?;
    non_negative("contrast", params.contrast)?;
    non_negative("saturation", params.saturation)?;
    bounded("grayscale", params.grayscale, 100.0)?;
    bounded("sepia", params.sepia, 100.0)?;
    bounded("blur", params.blur, MAX_BLUR_SIGMA)?;
    if !params.hue_rotate.is_finite() {
        return Err(ImagingError::InvalidParameter(
            "hue rotation must be finite".into(),
        ));
    }
    Ok(())
}

/// Apply `params` to `buffer` in place. On error the buffer is unchanged.
#[tracing::instrument(skip(buffer), fields(width = buffer.width(), height = buffer.height()))]
pub fn apply_filter(buffer: &mut WorkingBuffer, params: &FilterParams) -> Result<(), ImagingError> {
    validate(params)?;
    if params.is_identity() {
        return Ok(());
    }
    let image = buffer.image_mut();

    if params.brightness != 100.0 {
        let factor = params.brightness / 100.0;
        map_rgb(image, |c| c * factor);
    }
    if params.contrast != 100.0 {
        let factor = params.contrast / 100.0;
        map_rgb(image, |c| (c - 127.5) * factor + 127.5);
    }
    if params.saturation != 100.0 {
        apply_matrix(image, &saturate(params.saturation / 100.0));
    }
    if params.grayscale > 0.0 {
        apply_matrix(image, &grayscale(params.grayscale / 100.0));
    }
    if params.sepia > 0.0 {
        apply_matrix(image, &sepia(params.sepia / 100.0));
    }
    let hue = params.hue_rotate.rem_euclid(360.0).round() as i32;
    if hue % 360 != 0 {
        *image = imageops::huerotate(&*image, hue);
    }
    if params.blur > 0.0 {
        debug!(sigma = params.blur, "gaussian blur");
        *image = imageops::blur(&*image, params.blur);
    }
    Ok(())
}

fn map_rgb(image: &mut RgbaImage, f: impl Fn(f32) -> f32) {
    for pixel in image.pixels_mut() {
        for c in 0..3 {
            pixel[c] = f(pixel[c] as f32).round().clamp(0.0, 255.0) as u8;
        }
    }
}

fn apply_matrix(image: &mut RgbaImage, m: &Matrix) {
    for pixel in image.pixels_mut() {
        let [r, g, b] = [pixel[0] as f32, pixel[1] as f32, pixel[2] as f32];
        for (c, row) in m.iter().enumerate() {
            let value = row[0] * r + row[1] * g + row[2] * b;
            pixel[c] = value.round().clamp(0.0, 255.0) as u8;
        }
    }
}

fn saturate(s: f32) -> Matrix {
    [
        [0.213 + 0.787 * s, 0.715 - 0.715 * s, 0.072 - 0.072 * s],
        [0.213 - 0.213 * s, 0.715 + 0.285 * s, 0.072 - 0.072 * s],
        [0.213 - 0.213 * s, 0.715 - 0.715 * s, 0.072 + 0.928 * s],
    ]
}

fn grayscale(amount: f32) -> Matrix {
    let g = 1.0 - amount.min(1.0);
    [
        [0.2126 + 0.7874 * g, 0.7152 - 0.7152 * g, 0.0722 - 0.0722 * g],
        [0.2126 - 0.2126 * g, 0.7152 + 0.2848 * g, 0.0722 - 0.0722 * g],
        [0.2126 - 0.2126 * g, 0.7152 - 0.7152 * g, 0.0722 + 0.9278 * g],
    ]
}

fn sepia(amount: f32) -> Matrix {
    let s = 1.0 - amount.min(1.0);
    [
        [0.393 + 0.607 * s, 0.769 - 0.769 * s, 0.189 - 0.189 * s],
        [0.349 - 0.349 * s, 0.686 + 0.314 * s, 0.168 - 0.168 * s],
        [0.272 - 0.272 * s, 0.534 - 0.534 * s, 0.131 + 0.869 * s],
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::store::Asset;
    use crate::test_helpers::{noisy_image, solid_image};
    use image::Rgba;
    use std::sync::Arc;

    fn buffer(image: RgbaImage) -> WorkingBuffer {
        WorkingBuffer::from_asset(&Arc::new(Asset::from_rgba(image)))
    }

    fn filtered(image: RgbaImage, params: FilterParams) -> RgbaImage {
        let mut buf = buffer(image);
        apply_filter(&mut buf, &params).unwrap();
        buf.into_image()
    }

    fn with(f: impl FnOnce(&mut FilterParams)) -> FilterParams {
        let mut params = FilterParams::default();
        f(&mut params);
        params
    }

    #[test]
    fn neutral_filter_is_byte_identical() {
        let source = noisy_image(20, 20, 5);
        assert_eq!(filtered(source.clone(), FilterParams::default()), source);
    }

    #[test]
    fn brightness_scales_channels() {
        let out = filtered(
            solid_image(2, 2, Rgba([200, 100, 50, 255])),
            with(|p| p.brightness = 50.0),
        );
        assert_eq!(out.get_pixel(0, 0), &Rgba([100, 50, 25, 255]));
    }

    #[test]
    fn zero_contrast_is_mid_gray() {
        let out = filtered(noisy_image(8, 8, 3), with(|p| p.contrast = 0.0));
        assert!(out.pixels().all(|p| p[0] == 128 && p[1] == 128 && p[2] == 128));
    }

    #[test]
    fn full_grayscale_and_zero_saturation_drop_color() {
        for params in [with(|p| p.grayscale = 100.0), with(|p| p.saturation = 0.0)] {
            let out = filtered(noisy_image(8, 8, 9), params);
            for p in out.pixels() {
                assert!(p[0].abs_diff(p[1]) <= 1 && p[1].abs_diff(p[2]) <= 1, "{p:?}");
            }
        }
    }

    #[test]
    fn full_sepia_warms_white() {
        let out = filtered(
            solid_image(1, 1, Rgba([255, 255, 255, 255])),
            with(|p| p.sepia = 100.0),
        );
        assert_eq!(out.get_pixel(0, 0), &Rgba([255, 255, 239, 255]));
    }

    #[test]
    fn hue_rotation_moves_red() {
        let red = solid_image(2, 2, Rgba([255, 0, 0, 255]));
        let turned = filtered(red.clone(), with(|p| p.hue_rotate = 180.0));
        assert!(turned.get_pixel(0, 0)[0] < 128, "{:?}", turned.get_pixel(0, 0));
        assert_eq!(filtered(red.clone(), with(|p| p.hue_rotate = 360.0)), red);
    }

    #[test]
    fn blur_spreads_a_single_pixel() {
        let mut dot = solid_image(9, 9, Rgba([0, 0, 0, 255]));
        dot.put_pixel(4, 4, Rgba([255, 255, 255, 255]));
        let out = filtered(dot, with(|p| p.blur = 1.5));
        assert!(out.get_pixel(4, 4)[0] < 255);
        assert!(out.get_pixel(5, 4)[0] > 0);
    }

    #[test]
    fn alpha_is_preserved() {
        let out = filtered(
            solid_image(3, 3, Rgba([90, 120, 30, 77])),
            with(|p| {
                p.brightness = 140.0;
                p.sepia = 60.0;
            }),
        );
        assert!(out.pixels().all(|p| p[3] == 77));
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let cases = [
            with(|p| p.brightness = -1.0),
            with(|p| p.contrast = f32::NAN),
            with(|p| p.grayscale = 101.0),
            with(|p| p.sepia = -5.0),
            with(|p| p.blur = MAX_BLUR_SIGMA + 1.0),
            with(|p| p.hue_rotate = f32::INFINITY),
        ];
        for params in cases {
            let source = noisy_image(4, 4, 1);
            let mut buf = buffer(source.clone());
            let err = apply_filter(&mut buf, &params).unwrap_err();
            assert!(matches!(err, ImagingError::InvalidParameter(_)), "{params:?}");
            assert_eq!(buf.image(), &source);
        }
    }
}
