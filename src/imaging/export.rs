//! Export Unit: encode a working buffer and report what came out.

use super::backend::ImageBackend;
use super::error::ImagingError;
use super::params::{Color, OutputFormat, Quality};
use super::store::WorkingBuffer;
use image::{Rgba, RgbaImage};
use serde::Serialize;
use std::borrow::Cow;
use tracing::debug;

/// Largest edge the ICO container can hold.
pub const ICO_MAX_DIMENSION: u32 = 256;

/// What to encode and how.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExportRequest {
    pub format: OutputFormat,
    /// Ignored for lossless formats. `None` uses [`Quality::default`].
    pub quality: Option<Quality>,
    /// Flatten color for formats without alpha.
    pub background: Color,
}

impl ExportRequest {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            quality: None,
            background: Color::WHITE,
        }
    }

    pub fn with_quality(mut self, quality: Quality) -> Self {
        self.quality = Some(quality);
        self
    }

    pub fn with_background(mut self, background: Color) -> Self {
        self.background = background;
        self
    }
}

/// Final encoded bytes with their declared format and measured length.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EncodedOutput {
    #[serde(skip)]
    pub bytes: Vec<u8>,
    pub format: OutputFormat,
    pub byte_length: u64,
    pub width: u32,
    pub height: u32,
    /// Quality the encoder ran at; `None` for lossless formats.
    pub quality: Option<u32>,
}

impl EncodedOutput {
    pub fn mime(&self) -> &'static str {
        self.format.mime()
    }

    pub fn extension(&self) -> &'static str {
        self.format.extension()
    }
}

/// Encode `buffer` without mutating it.
#[tracing::instrument(skip(backend, buffer), fields(width = buffer.width(), height = buffer.height()))]
pub fn encode(
    backend: &(impl ImageBackend + ?Sized),
    buffer: &WorkingBuffer,
    request: &ExportRequest,
) -> Result<EncodedOutput, ImagingError> {
    encode_image(backend, buffer.image(), request)
}

pub(crate) fn encode_image(
    backend: &(impl ImageBackend + ?Sized),
    image: &RgbaImage,
    request: &ExportRequest,
) -> Result<EncodedOutput, ImagingError> {
    let format = request.format;
    let (width, height) = image.dimensions();
    if format == OutputFormat::Ico && (width > ICO_MAX_DIMENSION || height > ICO_MAX_DIMENSION) {
        return Err(ImagingError::Encode(format!(
            "ICO holds at most {ICO_MAX_DIMENSION}x{ICO_MAX_DIMENSION}, got {width}x{height}"
        )));
    }

    let pixels = prepare_pixels(image, format, request.background);
    let quality = request.quality.unwrap_or_default();
    let bytes = backend.encode(&pixels, format, quality)?;
    debug!(format = %format, bytes = bytes.len(), "encoded");

    Ok(EncodedOutput {
        byte_length: bytes.len() as u64,
        bytes,
        format,
        width,
        height,
        quality: format.is_lossy().then_some(quality.value()),
    })
}

/// Flatten against `background` when the format cannot carry alpha and
/// the image actually has transparency. Otherwise borrow as-is.
pub(crate) fn prepare_pixels(
    image: &RgbaImage,
    format: OutputFormat,
    background: Color,
) -> Cow<'_, RgbaImage> {
    if format.supports_alpha() || image.pixels().all(|p| p[3] == 255) {
        Cow::Borrowed(image)
    } else {
        Cow::Owned(flatten(image, background))
    }
}

/// Composite over an opaque background color.
pub fn flatten(image: &RgbaImage, background: Color) -> RgbaImage {
    let bg = [background.r, background.g, background.b];
    RgbaImage::from_fn(image.width(), image.height(), |x, y| {
        let p = image.get_pixel(x, y);
        let a = p[3] as u32;
        let mix = |c: usize| ((p[c] as u32 * a + bg[c] as u32 * (255 - a) + 127) / 255) as u8;
        Rgba([mix(0), mix(1), mix(2), 255])
    })
}
