//! Watermark Compositor.
//!
//! A watermark is built in three steps:
//!
//! 1. **Stamp**: the text (through [`FontMetrics`]) or overlay image is
//!    rendered at full strength, then rotated about its center with
//!    `imageproc`.
//! 2. **Layer**: stamps are drawn onto a transparent canvas-sized layer,
//!    once at an anchor or repeatedly on a [`TileGrid`]. Overlapping stamps
//!    take the union of their coverage, so intersections never darken.
//! 3. **Composite**: the layer is blended onto the working buffer with the
//!    global opacity.

use super::backend::{Dimensions, ImageBackend};
use super::calculations::{TileGrid, calculate_tile_grid};
use super::error::ImagingError;
use super::font::FontMetrics;
use super::params::{Anchor, Placement, WatermarkSource, WatermarkSpec};
use super::store::{MAX_PIXELS, WorkingBuffer};
use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};
use imageproc::geometric_transformations::{Interpolation, rotate_about_center};
use tracing::debug;

/// Shrink factor applied when an image overlay would not fit the canvas.
const OVERSIZE_SHRINK: f32 = 0.9;

/// Largest accepted text size in pixels.
pub const MAX_FONT_SIZE: f32 = 1000.0;

const TRANSPARENT: Rgba<u8> = Rgba([0, 0, 0, 0]);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WatermarkSettings {
    /// Distance between an anchored stamp and the canvas edge.
    pub padding: u32,
    /// Upper bound on stamps drawn in tile mode.
    pub max_tiles: usize,
}

impl Default for WatermarkSettings {
    fn default() -> Self {
        Self {
            padding: 40,
            max_tiles: 250_000,
        }
    }
}

/// Reject specs that cannot produce a meaningful watermark.
pub fn validate(spec: &WatermarkSpec) -> Result<(), ImagingError> {
    let invalid = |msg: String| Err(ImagingError::InvalidParameter(msg));

    if !(0.0..=1.0).contains(&spec.opacity) {
        return invalid(format!("opacity must be within [0, 1], got {}", spec.opacity));
    }
    if !spec.rotation_degrees.is_finite() {
        return invalid("rotation must be finite".into());
    }
    if let Placement::Tile { gap } = spec.placement
        && (!gap.is_finite() || gap < 0.0)
    {
        return invalid(format!("tile gap must be non-negative, got {gap}"));
    }
    match &spec.source {
        WatermarkSource::Text {
            text, font_size, ..
        } => {
            if text.trim().is_empty() {
                return invalid("watermark text is empty".into());
            }
            if !font_size.is_finite() || *font_size <= 0.0 {
                return invalid(format!("font size must be positive, got {font_size}"));
            }
            if *font_size > MAX_FONT_SIZE {
                return invalid(format!(
                    "font size must be at most {MAX_FONT_SIZE}, got {font_size}"
                ));
            }
        }
        WatermarkSource::Image { scale, .. } => {
            if !scale.is_finite() || *scale <= 0.0 {
                return invalid(format!("overlay scale must be positive, got {scale}"));
            }
        }
    }
    Ok(())
}

/// Draw `spec` onto `buffer`.
///
/// On error the buffer is left unchanged.
#[tracing::instrument(skip_all, fields(width = buffer.width(), height = buffer.height()))]
pub fn composite(
    backend: &(impl ImageBackend + ?Sized),
    fonts: &(impl FontMetrics + ?Sized),
    buffer: &mut WorkingBuffer,
    spec: &WatermarkSpec,
    settings: &WatermarkSettings,
) -> Result<(), ImagingError> {
    validate(spec)?;
    let layer = render_layer(backend, fonts, buffer.dimensions(), spec, settings)?;
    blend_layer(buffer.image_mut(), &layer, spec.opacity);
    Ok(())
}

/// The watermark layer at full strength, before opacity is applied.
pub fn render_layer(
    backend: &(impl ImageBackend + ?Sized),
    fonts: &(impl FontMetrics + ?Sized),
    canvas: Dimensions,
    spec: &WatermarkSpec,
    settings: &WatermarkSettings,
) -> Result<RgbaImage, ImagingError> {
    let stamp = build_stamp(backend, fonts, canvas, &spec.source)?;
    let (stamp_w, stamp_h) = stamp.dimensions();
    let mut layer = RgbaImage::new(canvas.width, canvas.height);
    if stamp_w == 0 || stamp_h == 0 {
        return Ok(layer);
    }

    match spec.placement {
        Placement::Anchor(anchor) => {
            let rotated = rotate_stamp(&stamp, spec.rotation_degrees);
            let (left, top) = anchor_origin(canvas, rotated.dimensions(), anchor, settings.padding);
            draw_union(&mut layer, &rotated, left, top);
        }
        Placement::Tile { gap } => {
            let grid = calculate_tile_grid(
                canvas,
                stamp_w as f32,
                stamp_h as f32,
                spec.rotation_degrees,
                gap,
            );
            check_tile_budget(&grid, settings.max_tiles)?;
            let rotated = rotate_stamp(&stamp, spec.rotation_degrees);
            draw_tiles(&mut layer, &rotated, &grid);
        }
    }
    Ok(layer)
}

fn check_tile_budget(grid: &TileGrid, max_tiles: usize) -> Result<(), ImagingError> {
    let count = grid.tile_count();
    debug!(
        count,
        step_x = grid.step_x,
        step_y = grid.step_y,
        "tile grid"
    );
    if count > max_tiles {
        return Err(ImagingError::InvalidParameter(format!(
            "tile pattern needs {count} stamps, limit is {max_tiles}; increase the gap"
        )));
    }
    Ok(())
}

fn draw_tiles(layer: &mut RgbaImage, stamp: &RgbaImage, grid: &TileGrid) {
    let (w, h) = stamp.dimensions();
    let (half_w, half_h) = (w as f32 / 2.0, h as f32 / 2.0);
    let (canvas_w, canvas_h) = (layer.width() as f32, layer.height() as f32);

    for (cx, cy) in grid.anchors() {
        let left = cx - half_w;
        let top = cy - half_h;
        if left >= canvas_w || top >= canvas_h || left + w as f32 <= 0.0 || top + h as f32 <= 0.0 {
            continue;
        }
        draw_union(layer, stamp, left.round() as i64, top.round() as i64);
    }
}

/// Top-left corner of an anchored stamp of size `stamp`.
fn anchor_origin(canvas: Dimensions, stamp: (u32, u32), anchor: Anchor, padding: u32) -> (i64, i64) {
    let (cw, ch) = (canvas.width as i64, canvas.height as i64);
    let (sw, sh) = (stamp.0 as i64, stamp.1 as i64);
    let pad = padding as i64;
    match anchor {
        Anchor::TopLeft => (pad, pad),
        Anchor::TopRight => (cw - sw - pad, pad),
        Anchor::BottomLeft => (pad, ch - sh - pad),
        Anchor::BottomRight => (cw - sw - pad, ch - sh - pad),
        Anchor::Center => ((cw - sw) / 2, (ch - sh) / 2),
    }
}

/// Render the unrotated stamp.
fn build_stamp(
    backend: &(impl ImageBackend + ?Sized),
    fonts: &(impl FontMetrics + ?Sized),
    canvas: Dimensions,
    source: &WatermarkSource,
) -> Result<RgbaImage, ImagingError> {
    match source {
        WatermarkSource::Text {
            text,
            font_size,
            color,
        } => {
            let extent = fonts.measure(text, *font_size);
            let pixels = extent.width as u64 * extent.height as u64;
            if pixels > MAX_PIXELS {
                return Err(ImagingError::InvalidParameter(format!(
                    "text stamp would be {}x{}; shorten the text or the font size",
                    extent.width, extent.height
                )));
            }
            let mask = fonts.rasterize(text, *font_size);
            let stamp = RgbaImage::from_fn(mask.width(), mask.height(), |x, y| {
                let coverage = mask.get_pixel(x, y)[0] as u32;
                let alpha = (coverage * color.a as u32 + 127) / 255;
                Rgba([color.r, color.g, color.b, alpha as u8])
            });
            Ok(stamp)
        }
        WatermarkSource::Image { bytes, scale } => {
            let overlay = backend
                .decode(bytes)
                .map_err(|e| ImagingError::WatermarkSource(e.to_string()))?
                .pixels;
            let (w, h) = overlay_size(canvas, overlay.dimensions(), *scale);
            debug!(width = w, height = h, "scaled image overlay");
            Ok(imageops::resize(&overlay, w, h, FilterType::Lanczos3))
        }
    }
}

/// Overlay width is `scale × canvas width`, aspect kept. If that does not
/// fit the canvas it shrinks to 90% of the limiting side.
pub fn overlay_size(canvas: Dimensions, overlay: (u32, u32), scale: f32) -> (u32, u32) {
    let (ow, oh) = (overlay.0.max(1) as f32, overlay.1.max(1) as f32);
    let (cw, ch) = (canvas.width as f32, canvas.height as f32);
    let mut width = cw * scale;
    let mut height = oh / ow * width;
    if width > cw || height > ch {
        let factor = (cw / width).min(ch / height) * OVERSIZE_SHRINK;
        width *= factor;
        height *= factor;
    }
    (
        (width.round() as u32).max(1),
        (height.round() as u32).max(1),
    )
}

/// Rotate clockwise about the stamp center into its expanded bounding box.
///
/// Quarter turns are exact; other angles are resampled bilinearly.
pub fn rotate_stamp(stamp: &RgbaImage, degrees: f32) -> RgbaImage {
    let turn = degrees.rem_euclid(360.0);
    let near = |angle: f32| (turn - angle).abs() < 0.01;
    if near(0.0) || near(360.0) {
        return stamp.clone();
    }
    if near(90.0) {
        return imageops::rotate90(stamp);
    }
    if near(180.0) {
        return imageops::rotate180(stamp);
    }
    if near(270.0) {
        return imageops::rotate270(stamp);
    }

    let (sw, sh) = (stamp.width() as f32, stamp.height() as f32);
    let (sin, cos) = degrees.to_radians().sin_cos();
    // Trim float noise so 45° of a 20x10 stamp is 22x22, not 23x23.
    let bound = |v: f32| ((v - 1e-3).ceil() as u32).max(1);
    let out_w = bound(sw * cos.abs() + sh * sin.abs());
    let out_h = bound(sw * sin.abs() + sh * cos.abs());

    // Pad to a square that holds every rotation, turn, then cut the box out.
    let side = out_w.max(out_h).max(stamp.width()).max(stamp.height());
    let mut padded = RgbaImage::from_pixel(side, side, TRANSPARENT);
    imageops::replace(
        &mut padded,
        stamp,
        ((side - stamp.width()) / 2) as i64,
        ((side - stamp.height()) / 2) as i64,
    );
    let rotated = rotate_about_center(
        &padded,
        degrees.to_radians(),
        Interpolation::Bilinear,
        TRANSPARENT,
    );
    imageops::crop_imm(&rotated, (side - out_w) / 2, (side - out_h) / 2, out_w, out_h).to_image()
}

/// Copy `stamp` onto `layer` at `(left, top)`, keeping whichever pixel has
/// more coverage. Parts outside the layer are clipped.
fn draw_union(layer: &mut RgbaImage, stamp: &RgbaImage, left: i64, top: i64) {
    let (lw, lh) = (layer.width() as i64, layer.height() as i64);
    let x_start = left.max(0);
    let y_start = top.max(0);
    let x_end = (left + stamp.width() as i64).min(lw);
    let y_end = (top + stamp.height() as i64).min(lh);

    for y in y_start..y_end {
        for x in x_start..x_end {
            let src = stamp.get_pixel((x - left) as u32, (y - top) as u32);
            if src[3] == 0 {
                continue;
            }
            let dst = layer.get_pixel_mut(x as u32, y as u32);
            if src[3] > dst[3] {
                *dst = *src;
            }
        }
    }
}

/// Source-over of `layer` onto `target` with an extra global alpha.
fn blend_layer(target: &mut RgbaImage, layer: &RgbaImage, opacity: f32) {
    if opacity <= 0.0 {
        return;
    }
    for (dst, src) in target.pixels_mut().zip(layer.pixels()) {
        if src[3] == 0 {
            continue;
        }
        let sa = src[3] as f32 / 255.0 * opacity;
        let da = dst[3] as f32 / 255.0;
        let out_a = sa + da * (1.0 - sa);
        if out_a <= 0.0 {
            continue;
        }
        for c in 0..3 {
            let value = (src[c] as f32 * sa + dst[c] as f32 * da * (1.0 - sa)) / out_a;
            dst[c] = value.round().clamp(0.0, 255.0) as u8;
        }
        dst[3] = (out_a * 255.0).round().clamp(0.0, 255.0) as u8;
    }
}
