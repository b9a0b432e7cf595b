//! Parameter types for image operations.
//!
//! These structs describe *what* to do, not *how* to do it. A full edit is a
//! single immutable [`TransformParameters`] value: changing a slider means
//! building a new value and re-running the pipeline, never mutating one that
//! a running preview may still be reading.
//!
//! ## Types
//!
//! - [`Quality`]: Lossy encoding quality (1–100, default 92). Clamped on construction.
//! - [`OutputFormat`]: Export container, with MIME type and capability flags.
//! - [`GeometryParams`]: Crop region, target size / aspect lock / scale preset, filter.
//! - [`SharpenLevel`]: Post-resample sharpening strength.
//! - [`FilterParams`]: Brightness, contrast, saturation, grayscale, sepia, hue, blur.
//! - [`WatermarkSpec`]: Text or image overlay with opacity, rotation and placement.
//! - [`OutputParams`]: Format, quality, optional target byte size, flatten background.

use image::ImageFormat;
use image::imageops::FilterType;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Quality used when an export names neither a quality nor a target size.
pub const DEFAULT_QUALITY: u32 = 92;

/// Quality setting for lossy image encoding (1-100).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Quality(pub u32);

impl Quality {
    pub fn new(value: u32) -> Self {
        Self(value.clamp(1, 100))
    }

    /// Map a fractional quality in `[0.01, 1.0]` onto the encoder scale.
    pub fn from_fraction(fraction: f64) -> Self {
        Self::new((fraction * 100.0).round() as u32)
    }

    pub fn value(self) -> u32 {
        self.0
    }

    pub fn fraction(self) -> f64 {
        self.0 as f64 / 100.0
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self(DEFAULT_QUALITY)
    }
}

/// Export container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Jpeg,
    Png,
    /// Lossy, encoded through libwebp.
    WebP,
    Avif,
    Bmp,
    Ico,
}

impl OutputFormat {
    pub const ALL: [OutputFormat; 6] = [
        OutputFormat::Jpeg,
        OutputFormat::Png,
        OutputFormat::WebP,
        OutputFormat::Avif,
        OutputFormat::Bmp,
        OutputFormat::Ico,
    ];

    /// Resolve a format from a file extension (case-insensitive).
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.trim().trim_start_matches('.').to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "png" => Some(Self::Png),
            "webp" => Some(Self::WebP),
            "avif" => Some(Self::Avif),
            "bmp" => Some(Self::Bmp),
            "ico" => Some(Self::Ico),
            _ => None,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Jpeg => "jpg",
            Self::Png => "png",
            Self::WebP => "webp",
            Self::Avif => "avif",
            Self::Bmp => "bmp",
            Self::Ico => "ico",
        }
    }

    pub fn mime(self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::WebP => "image/webp",
            Self::Avif => "image/avif",
            Self::Bmp => "image/bmp",
            Self::Ico => "image/x-icon",
        }
    }

    /// Whether the encoder exposes a quality knob.
    pub fn is_lossy(self) -> bool {
        matches!(self, Self::Jpeg | Self::WebP | Self::Avif)
    }

    /// JPEG and BMP are written as RGB; transparent pixels get flattened.
    pub fn supports_alpha(self) -> bool {
        !matches!(self, Self::Jpeg | Self::Bmp)
    }

    pub fn image_format(self) -> ImageFormat {
        match self {
            Self::Jpeg => ImageFormat::Jpeg,
            Self::Png => ImageFormat::Png,
            Self::WebP => ImageFormat::WebP,
            Self::Avif => ImageFormat::Avif,
            Self::Bmp => ImageFormat::Bmp,
            Self::Ico => ImageFormat::Ico,
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Jpeg => "JPEG",
            Self::Png => "PNG",
            Self::WebP => "WebP",
            Self::Avif => "AVIF",
            Self::Bmp => "BMP",
            Self::Ico => "ICO",
        };
        f.write_str(label)
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_extension(s).ok_or_else(|| format!("unsupported output format: {s}"))
    }
}

/// An sRGB color with straight alpha.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const WHITE: Color = Color::rgb(255, 255, 255);
    pub const BLACK: Color = Color::rgb(0, 0, 0);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    /// Parse `#RRGGBB` or `#RRGGBBAA` (the `#` is optional).
    pub fn parse_hex(input: &str) -> Option<Self> {
        let hex = input.trim().trim_start_matches('#');
        if !(hex.len() == 6 || hex.len() == 8) || !hex.is_ascii() {
            return None;
        }
        let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
        let a = if hex.len() == 8 { channel(6)? } else { 255 };
        Some(Self {
            r: channel(0)?,
            g: channel(2)?,
            b: channel(4)?,
            a,
        })
    }

    pub fn to_hex(self) -> String {
        if self.a == 255 {
            format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
        } else {
            format!("#{:02x}{:02x}{:02x}{:02x}", self.r, self.g, self.b, self.a)
        }
    }
}

impl Default for Color {
    fn default() -> Self {
        Self::WHITE
    }
}

impl FromStr for Color {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_hex(s).ok_or_else(|| format!("invalid color '{s}', expected #RRGGBB"))
    }
}

/// Interpolation used when resampling.
///
/// Nearest-neighbour is only ever used when asked for by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResampleFilter {
    Nearest,
    Bilinear,
    Bicubic,
    #[default]
    Lanczos3,
}

impl ResampleFilter {
    pub fn filter_type(self) -> FilterType {
        match self {
            Self::Nearest => FilterType::Nearest,
            Self::Bilinear => FilterType::Triangle,
            Self::Bicubic => FilterType::CatmullRom,
            Self::Lanczos3 => FilterType::Lanczos3,
        }
    }
}

impl FromStr for ResampleFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "nearest" => Ok(Self::Nearest),
            "bilinear" | "triangle" => Ok(Self::Bilinear),
            "bicubic" | "catmullrom" => Ok(Self::Bicubic),
            "lanczos3" | "lanczos" => Ok(Self::Lanczos3),
            other => Err(format!("unknown resample filter: {other}")),
        }
    }
}

/// A rectangle in source-pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Requested output size.
///
/// `scale_percent` wins over explicit dimensions and always multiplies the
/// original size. With `aspect_locked` and both dimensions given, width
/// drives and height is recomputed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SizeRequest {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub aspect_locked: bool,
    pub scale_percent: Option<f64>,
}

impl Default for SizeRequest {
    fn default() -> Self {
        Self {
            width: None,
            height: None,
            aspect_locked: true,
            scale_percent: None,
        }
    }
}

impl SizeRequest {
    pub fn width(width: u32) -> Self {
        Self {
            width: Some(width),
            ..Self::default()
        }
    }

    pub fn height(height: u32) -> Self {
        Self {
            height: Some(height),
            ..Self::default()
        }
    }

    pub fn exact(width: u32, height: u32) -> Self {
        Self {
            width: Some(width),
            height: Some(height),
            aspect_locked: false,
            scale_percent: None,
        }
    }

    pub fn scale(percent: f64) -> Self {
        Self {
            scale_percent: Some(percent),
            ..Self::default()
        }
    }
}

/// Geometry stage parameters: optional crop, then resample.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GeometryParams {
    pub crop: Option<CropRegion>,
    pub size: SizeRequest,
    pub filter: ResampleFilter,
}

/// Post-resample sharpening strength.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SharpenLevel {
    #[default]
    None,
    Standard,
    Strong,
}

impl SharpenLevel {
    /// Blend factor between the sharpened and the original value.
    pub fn mix(self) -> Option<f32> {
        match self {
            Self::None => None,
            Self::Standard => Some(0.5),
            Self::Strong => Some(0.9),
        }
    }
}

impl FromStr for SharpenLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "off" => Ok(Self::None),
            "standard" | "normal" => Ok(Self::Standard),
            "strong" | "high" => Ok(Self::Strong),
            other => Err(format!("unknown sharpen level: {other}")),
        }
    }
}

/// Color adjustments baked into the pixels.
///
/// Percentages follow CSS filter functions: 100 leaves brightness, contrast
/// and saturation alone, 0 leaves grayscale and sepia alone.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterParams {
    pub brightness: f32,
    pub contrast: f32,
    pub saturation: f32,
    pub grayscale: f32,
    pub sepia: f32,
    /// Degrees around the color wheel.
    pub hue_rotate: f32,
    /// Gaussian sigma in pixels.
    pub blur: f32,
}

impl Default for FilterParams {
    fn default() -> Self {
        Self {
            brightness: 100.0,
            contrast: 100.0,
            saturation: 100.0,
            grayscale: 0.0,
            sepia: 0.0,
            hue_rotate: 0.0,
            blur: 0.0,
        }
    }
}

impl FilterParams {
    pub fn is_identity(&self) -> bool {
        *self == Self::default()
    }
}

/// What the watermark draws.
#[derive(Debug, Clone, PartialEq)]
pub enum WatermarkSource {
    Text {
        text: String,
        font_size: f32,
        color: Color,
    },
    /// Encoded overlay bytes, decoded at composite time. `scale` is the
    /// overlay width as a fraction of the canvas width.
    Image { bytes: Vec<u8>, scale: f32 },
}

/// Fixed anchor positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anchor {
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
    Center,
}

/// Where the watermark goes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Placement {
    Anchor(Anchor),
    /// Repeat across the whole canvas, `gap` pixels between stamps.
    Tile { gap: f32 },
}

impl FromStr for Placement {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let anchor = match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "top-left" => Anchor::TopLeft,
            "top-right" => Anchor::TopRight,
            "bottom-left" => Anchor::BottomLeft,
            "bottom-right" => Anchor::BottomRight,
            "center" => Anchor::Center,
            "tile" => return Ok(Placement::Tile { gap: 50.0 }),
            other => return Err(format!("unknown watermark position: {other}")),
        };
        Ok(Placement::Anchor(anchor))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WatermarkSpec {
    pub source: WatermarkSource,
    /// Global alpha for the whole watermark, in `[0, 1]`.
    pub opacity: f32,
    pub rotation_degrees: f32,
    pub placement: Placement,
}

impl WatermarkSpec {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            source: WatermarkSource::Text {
                text: text.into(),
                font_size: 48.0,
                color: Color::WHITE,
            },
            opacity: 0.5,
            rotation_degrees: -45.0,
            placement: Placement::Anchor(Anchor::BottomRight),
        }
    }
}

/// A post-geometry effect. Effects run in list order.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Sharpen(SharpenLevel),
    Filter(FilterParams),
    Watermark(WatermarkSpec),
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutputParams {
    pub format: OutputFormat,
    /// Ignored by lossless formats and when `target_bytes` is set.
    pub quality: Option<Quality>,
    /// Search encoder quality to land near this size (lossy formats only).
    pub target_bytes: Option<u64>,
    /// Flatten color for formats without alpha.
    pub background: Color,
}

impl Default for OutputParams {
    fn default() -> Self {
        Self {
            format: OutputFormat::Jpeg,
            quality: None,
            target_bytes: None,
            background: Color::WHITE,
        }
    }
}

/// One complete edit, passed by value into every pipeline run.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TransformParameters {
    pub geometry: GeometryParams,
    pub effects: Vec<Effect>,
    pub output: OutputParams,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quality_clamps_to_valid_range() {
        assert_eq!(Quality::new(0).value(), 1);
        assert_eq!(Quality::new(50).value(), 50);
        assert_eq!(Quality::new(150).value(), 100);
    }

    #[test]
    fn quality_default_matches_export_default() {
        assert_eq!(Quality::default().value(), DEFAULT_QUALITY);
        assert_eq!(DEFAULT_QUALITY, 92);
    }

    #[test]
    fn quality_from_fraction_maps_search_bounds() {
        assert_eq!(Quality::from_fraction(0.01).value(), 1);
        assert_eq!(Quality::from_fraction(0.25).value(), 25);
        assert_eq!(Quality::from_fraction(1.0).value(), 100);
        assert_eq!(Quality::from_fraction(0.0).value(), 1);
    }

    #[test]
    fn format_from_extension_is_case_insensitive() {
        assert_eq!(OutputFormat::from_extension("JPG"), Some(OutputFormat::Jpeg));
        assert_eq!(OutputFormat::from_extension(".webp"), Some(OutputFormat::WebP));
        assert_eq!(OutputFormat::from_extension("gif"), None);
    }

    #[test]
    fn jpeg_webp_and_avif_are_lossy() {
        let lossy: Vec<_> = OutputFormat::ALL
            .iter()
            .filter(|f| f.is_lossy())
            .copied()
            .collect();
        assert_eq!(
            lossy,
            vec![OutputFormat::Jpeg, OutputFormat::WebP, OutputFormat::Avif]
        );
    }

    #[test]
    fn jpeg_and_bmp_have_no_alpha() {
        assert!(!OutputFormat::Jpeg.supports_alpha());
        assert!(!OutputFormat::Bmp.supports_alpha());
        assert!(OutputFormat::Png.supports_alpha());
        assert!(OutputFormat::WebP.supports_alpha());
    }

    #[test]
    fn color_parses_rgb_and_rgba() {
        assert_eq!(Color::parse_hex("#FFFFFF"), Some(Color::WHITE));
        assert_eq!(
            Color::parse_hex("10203040"),
            Some(Color {
                r: 0x10,
                g: 0x20,
                b: 0x30,
                a: 0x40
            })
        );
        assert_eq!(Color::parse_hex("#fff"), None);
        assert_eq!(Color::parse_hex("#gggggg"), None);
    }

    #[test]
    fn color_formats_as_hex() {
        assert_eq!(Color::rgb(1, 2, 255).to_hex(), "#0102ff");
    }

    #[test]
    fn sharpen_mix_values() {
        assert_eq!(SharpenLevel::None.mix(), None);
        assert_eq!(SharpenLevel::Standard.mix(), Some(0.5));
        assert_eq!(SharpenLevel::Strong.mix(), Some(0.9));
    }

    #[test]
    fn default_filter_is_identity() {
        assert!(FilterParams::default().is_identity());
        let warm = FilterParams {
            sepia: 30.0,
            ..FilterParams::default()
        };
        assert!(!warm.is_identity());
    }

    #[test]
    fn placement_parses_positions() {
        assert_eq!(
            "bottom_right".parse::<Placement>().unwrap(),
            Placement::Anchor(Anchor::BottomRight)
        );
        assert!(matches!(
            "tile".parse::<Placement>().unwrap(),
            Placement::Tile { .. }
        ));
        assert!("middle".parse::<Placement>().is_err());
    }

    #[test]
    fn size_request_defaults_to_locked() {
        assert!(SizeRequest::default().aspect_locked);
        assert!(!SizeRequest::exact(10, 10).aspect_locked);
    }
}
