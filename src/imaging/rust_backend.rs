//! Codec backend over the `image` crate, plus `webp` for lossy WebP.
//!
//! Everything is statically linked into the binary; libwebp is built from
//! source by `libwebp-sys`.
//!
//! ## Crate mapping
//!
//! | Operation | Crate / function |
//! |---|---|
//! | Identify | `ImageReader::with_guessed_format` + `into_dimensions` |
//! | Decode (JPEG, PNG, TIFF, WebP, BMP, ICO) | `image` crate (pure Rust decoders) |
//! | Encode → JPEG | `image::codecs::jpeg::JpegEncoder` (quality 1–100) |
//! | Encode → WebP | `webp::Encoder` (libwebp, lossy, quality 1–100) |
//! | Encode → AVIF | `image::codecs::avif::AvifEncoder` (rav1e, speed 6) |
//! | Encode → PNG / BMP / ICO | lossless `image` encoders (BMP as RGB) |

use super::backend::{BackendError, DecodedImage, Dimensions, ImageBackend, SourceInfo};
use super::params::{OutputFormat, Quality};
use image::codecs::avif::AvifEncoder;
use image::codecs::bmp::BmpEncoder;
use image::codecs::ico::IcoEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{ExtendedColorType, ImageEncoder, ImageFormat, ImageReader, RgbaImage};
use std::io::Cursor;

/// AVIF encoder speed (1 = slowest/best, 10 = fastest).
const AVIF_SPEED: u8 = 6;

/// Production backend using the `image` crate ecosystem.
///
/// See the [module docs](self) for the crate-to-operation mapping.
pub struct RustBackend;

impl RustBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RustBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn reader(bytes: &[u8]) -> Result<ImageReader<Cursor<&[u8]>>, BackendError> {
    let reader = ImageReader::new(Cursor::new(bytes)).with_guessed_format()?;
    if reader.format().is_none() {
        return Err(BackendError::Decode("unrecognized image format".into()));
    }
    Ok(reader)
}

/// Drop the alpha channel. Callers flatten beforehand when it matters.
fn rgba_to_rgb(image: &RgbaImage) -> Vec<u8> {
    image
        .pixels()
        .flat_map(|p| [p[0], p[1], p[2]])
        .collect()
}

/// Lossy WebP at `quality`, alpha kept.
fn encode_webp(image: &RgbaImage, quality: Quality) -> Result<Vec<u8>, BackendError> {
    let (width, height) = image.dimensions();
    let encoded = webp::Encoder::from_rgba(image.as_raw(), width, height)
        .encode_simple(false, quality.value() as f32)
        .map_err(|e| BackendError::Encode(format!("WebP encode failed: {e:?}")))?;
    Ok(encoded.to_vec())
}

impl ImageBackend for RustBackend {
    fn identify(&self, bytes: &[u8]) -> Result<SourceInfo, BackendError> {
        let reader = reader(bytes)?;
        let format = reader
            .format()
            .ok_or_else(|| BackendError::Decode("unrecognized image format".into()))?;
        let (width, height) = reader
            .into_dimensions()
            .map_err(|e| BackendError::Decode(format!("Failed to read dimensions: {e}")))?;
        Ok(SourceInfo {
            dimensions: Dimensions { width, height },
            format,
        })
    }

    fn decode(&self, bytes: &[u8]) -> Result<DecodedImage, BackendError> {
        let reader = reader(bytes)?;
        let format = reader.format().unwrap_or(ImageFormat::Png);
        let decoded = reader
            .decode()
            .map_err(|e| BackendError::Decode(format!("Failed to decode {format:?}: {e}")))?;
        Ok(DecodedImage {
            pixels: decoded.to_rgba8(),
            format,
        })
    }

    fn encode(
        &self,
        image: &RgbaImage,
        format: OutputFormat,
        quality: Quality,
    ) -> Result<Vec<u8>, BackendError> {
        let (width, height) = image.dimensions();
        let mut buffer = Vec::new();
        let result = match format {
            OutputFormat::Jpeg => {
                let rgb = rgba_to_rgb(image);
                JpegEncoder::new_with_quality(&mut buffer, quality.value() as u8).write_image(
                    &rgb,
                    width,
                    height,
                    ExtendedColorType::Rgb8,
                )
            }
            OutputFormat::Avif => AvifEncoder::new_with_speed_quality(
                &mut buffer,
                AVIF_SPEED,
                quality.value() as u8,
            )
            .write_image(image.as_raw(), width, height, ExtendedColorType::Rgba8),
            OutputFormat::Png => PngEncoder::new_with_quality(
                &mut buffer,
                CompressionType::Default,
                FilterType::Adaptive,
            )
            .write_image(image.as_raw(), width, height, ExtendedColorType::Rgba8),
            OutputFormat::Bmp => {
                let rgb = rgba_to_rgb(image);
                BmpEncoder::new(&mut buffer).write_image(&rgb, width, height, ExtendedColorType::Rgb8)
            }
            OutputFormat::Ico => IcoEncoder::new(&mut buffer).write_image(
                image.as_raw(),
                width,
                height,
                ExtendedColorType::Rgba8,
            ),
            OutputFormat::WebP => return encode_webp(image, quality),
        };
        result.map_err(|e| BackendError::Encode(format!("{format} encode failed: {e}")))?;
        Ok(buffer)
    }
}
