//! Pure calculation functions for image geometry.
//!
//! All functions here are pure and testable without any I/O or images:
//! aspect-locked sizing, scale presets, crop regions and the watermark tile
//! grid.

use super::backend::Dimensions;
use super::error::ImagingError;
use super::params::{CropRegion, SizeRequest};
use super::store::MAX_DIMENSION;

/// Aspect presets offered for cropping, as `(width, height)` ratios.
pub const ASPECT_PRESETS: [(u32, u32); 7] =
    [(1, 1), (16, 9), (9, 16), (4, 5), (2, 1), (3, 4), (4, 3)];

/// Scale presets in percent. 200 and 400 are the upscale factors.
pub const SCALE_PRESETS: [f64; 6] = [25.0, 50.0, 75.0, 100.0, 200.0, 400.0];

/// Couples width and height through a fixed ratio.
///
/// The ratio always comes from the canonical asset (or crop region), never
/// from the last computed pair, so toggling between values never drifts.
///
/// # Examples
/// ```
/// # use rasterkit::imaging::AspectLock;
/// let lock = AspectLock::new(2000, 1000);
/// assert_eq!(lock.height_for_width(1000), 500);
/// assert_eq!(lock.width_for_height(333), 666);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AspectLock {
    ratio: f64,
}

impl AspectLock {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            ratio: width as f64 / height as f64,
        }
    }

    pub fn ratio(self) -> f64 {
        self.ratio
    }

    /// `round(width / ratio)`
    pub fn height_for_width(self, width: u32) -> u32 {
        (width as f64 / self.ratio).round() as u32
    }

    /// `round(height * ratio)`
    pub fn width_for_height(self, height: u32) -> u32 {
        (height as f64 * self.ratio).round() as u32
    }
}

/// Multiply both dimensions by `percent / 100`, rounding each.
///
/// # Examples
/// ```
/// # use rasterkit::imaging::{Dimensions, scale_dimensions};
/// assert_eq!(scale_dimensions(Dimensions::new(2000, 1000), 50.0), Dimensions::new(1000, 500));
/// ```
pub fn scale_dimensions(original: Dimensions, percent: f64) -> Dimensions {
    let factor = percent / 100.0;
    Dimensions::new(
        (original.width as f64 * factor).round() as u32,
        (original.height as f64 * factor).round() as u32,
    )
}

/// Resolve a size request against the original (or cropped) dimensions.
///
/// Precedence: `scale_percent`, then explicit width/height. With the aspect
/// lock on and both given, width drives. Unlocked and only one given, the
/// other keeps its original value.
pub fn resolve_dimensions(
    original: Dimensions,
    request: &SizeRequest,
) -> Result<Dimensions, ImagingError> {
    if let Some(percent) = request.scale_percent {
        if !percent.is_finite() || percent <= 0.0 {
            return Err(ImagingError::InvalidDimensions(format!(
                "scale must be a positive percentage, got {percent}"
            )));
        }
        return check_target(scale_dimensions(original, percent));
    }

    for requested in [request.width, request.height].into_iter().flatten() {
        if requested == 0 {
            return Err(ImagingError::InvalidDimensions(
                "requested dimension must be positive".into(),
            ));
        }
    }

    let lock = AspectLock::new(original.width, original.height);
    let resolved = match (request.width, request.height, request.aspect_locked) {
        (None, None, _) => original,
        (Some(w), _, true) => Dimensions::new(w, lock.height_for_width(w)),
        (None, Some(h), true) => Dimensions::new(lock.width_for_height(h), h),
        (Some(w), Some(h), false) => Dimensions::new(w, h),
        (Some(w), None, false) => Dimensions::new(w, original.height),
        (None, Some(h), false) => Dimensions::new(original.width, h),
    };
    check_target(resolved)
}

fn check_target(dims: Dimensions) -> Result<Dimensions, ImagingError> {
    if dims.width == 0 || dims.height == 0 {
        return Err(ImagingError::InvalidDimensions(format!(
            "{}x{} rounds to an empty image",
            dims.width, dims.height
        )));
    }
    if dims.width > MAX_DIMENSION || dims.height > MAX_DIMENSION {
        return Err(ImagingError::InvalidDimensions(format!(
            "{}x{} exceeds the {MAX_DIMENSION}px limit",
            dims.width, dims.height
        )));
    }
    Ok(dims)
}

/// Parse an aspect preset such as `"16:9"`.
pub fn parse_aspect(input: &str) -> Option<(u32, u32)> {
    let (w, h) = input.trim().split_once(':')?;
    let w: u32 = w.trim().parse().ok()?;
    let h: u32 = h.trim().parse().ok()?;
    (w > 0 && h > 0).then_some((w, h))
}

/// Largest region of the given aspect ratio centered in `dims`.
///
/// # Examples
/// ```
/// # use rasterkit::imaging::{Dimensions, center_crop};
/// let crop = center_crop(Dimensions::new(2000, 1000), (1, 1));
/// assert_eq!((crop.x, crop.y, crop.width, crop.height), (500, 0, 1000, 1000));
/// ```
pub fn center_crop(dims: Dimensions, aspect: (u32, u32)) -> CropRegion {
    let (aspect_w, aspect_h) = aspect;
    let source_aspect = dims.width as f64 / dims.height as f64;
    let target_aspect = aspect_w as f64 / aspect_h as f64;

    let (width, height) = if source_aspect > target_aspect {
        // Source is wider: full height, trim the sides
        let w = (dims.height as f64 * target_aspect).round() as u32;
        (w.clamp(1, dims.width), dims.height)
    } else {
        // Source is taller: full width, trim top and bottom
        let h = (dims.width as f64 / target_aspect).round() as u32;
        (dims.width, h.clamp(1, dims.height))
    };

    CropRegion {
        x: (dims.width - width) / 2,
        y: (dims.height - height) / 2,
        width,
        height,
    }
}

/// A crop must be non-empty and lie inside the image.
pub fn validate_crop(dims: Dimensions, crop: &CropRegion) -> Result<(), ImagingError> {
    if crop.width == 0 || crop.height == 0 {
        return Err(ImagingError::InvalidDimensions(
            "crop region is empty".into(),
        ));
    }
    let right = crop.x as u64 + crop.width as u64;
    let bottom = crop.y as u64 + crop.height as u64;
    if right > dims.width as u64 || bottom > dims.height as u64 {
        return Err(ImagingError::InvalidDimensions(format!(
            "crop {}x{}+{}+{} exceeds image bounds {}x{}",
            crop.width, crop.height, crop.x, crop.y, dims.width, dims.height
        )));
    }
    Ok(())
}

/// Stamp centers for a rotated tile pattern.
#[derive(Debug, Clone, PartialEq)]
pub struct TileGrid {
    pub step_x: f32,
    pub step_y: f32,
    pub columns: usize,
    pub rows: usize,
    pub start: f32,
}

impl TileGrid {
    pub fn tile_count(&self) -> usize {
        self.columns.saturating_mul(self.rows)
    }

    /// Center of every tile, row by row.
    pub fn anchors(&self) -> impl Iterator<Item = (f32, f32)> + '_ {
        (0..self.rows).flat_map(move |row| {
            let y = self.start + row as f32 * self.step_y;
            (0..self.columns).map(move |col| (self.start + col as f32 * self.step_x, y))
        })
    }
}

/// Lay out a tile pattern for a stamp rotated by `rotation_degrees`.
///
/// `d` is the diagonal of the unrotated stamp. Steps are `d·|cos θ| + gap`
/// and `d·|sin θ| + gap`, floored at one pixel. Both axes start at
/// `-max(W, H)` and run until `1.5 ×` the canvas extent, so the rotated
/// footprint leaves no unpainted band at any angle.
pub fn calculate_tile_grid(
    canvas: Dimensions,
    stamp_width: f32,
    stamp_height: f32,
    rotation_degrees: f32,
    gap: f32,
) -> TileGrid {
    let diagonal = (stamp_width * stamp_width + stamp_height * stamp_height).sqrt();
    let theta = rotation_degrees.to_radians();
    let step_x = (diagonal * theta.cos().abs() + gap).max(1.0);
    let step_y = (diagonal * theta.sin().abs() + gap).max(1.0);

    let start = -(canvas.width.max(canvas.height) as f32);
    let count = |extent: u32, step: f32| -> usize {
        let span = extent as f32 * 1.5 - start;
        (span / step).ceil().max(0.0) as usize
    };

    TileGrid {
        step_x,
        step_y,
        columns: count(canvas.width, step_x),
        rows: count(canvas.height, step_y),
        start,
    }
}
