//! Geometry & Resample: crop and resize the canonical asset into a
//! [`WorkingBuffer`].
//!
//! This is always the first stage of a pipeline run and it always reads
//! from the [`Asset`], never from a previous stage's output.

use super::backend::Dimensions;
use super::calculations::{resolve_dimensions, validate_crop};
use super::error::ImagingError;
use super::params::GeometryParams;
use super::store::{Asset, WorkingBuffer};
use image::imageops;
use std::sync::Arc;
use tracing::debug;

/// Crop (optional) and resample `asset` to the requested size.
///
/// Aspect-locked sizes are derived from the crop region when one is given,
/// otherwise from the asset. A same-size request copies pixels unchanged.
#[tracing::instrument(skip_all, fields(source = %format!("{}x{}", asset.width(), asset.height())))]
pub fn resize(asset: &Arc<Asset>, params: &GeometryParams) -> Result<WorkingBuffer, ImagingError> {
    let region = match params.crop {
        Some(crop) => {
            validate_crop(asset.dimensions(), &crop)?;
            Some(crop)
        }
        None => None,
    };
    let basis = region
        .map(|c| Dimensions::new(c.width, c.height))
        .unwrap_or_else(|| asset.dimensions());
    let target = resolve_dimensions(basis, &params.size)?;

    // A borrowed view of the region; pixels are only copied by the resize
    // or by the same-size path below.
    let (x, y) = region.map(|c| (c.x, c.y)).unwrap_or((0, 0));
    let view = imageops::crop_imm(asset.pixels(), x, y, basis.width, basis.height);

    if target == basis {
        debug!("target matches source size, copying pixels");
        return Ok(WorkingBuffer::new(view.to_image(), Arc::clone(asset)));
    }

    debug!(
        width = target.width,
        height = target.height,
        filter = ?params.filter,
        "resampling"
    );
    let resized = imageops::resize(
        &*view,
        target.width,
        target.height,
        params.filter.filter_type(),
    );
    Ok(WorkingBuffer::new(resized, Arc::clone(asset)))
}
