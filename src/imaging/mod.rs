//! Image processing in pure Rust, built on the `image` crate.
//!
//! | Stage | Module | Crate / function |
//! |---|---|---|
//! | **Decode** | [`store`] | `ImageReader::with_guessed_format` → RGBA8 |
//! | **Crop / resize** | [`resample`] | `imageops::crop_imm` + `imageops::resize` |
//! | **Sharpen** | [`sharpen`] | 5-tap Laplacian, hand-rolled |
//! | **Filter** | [`filter`] | `DynamicImage::{brighten, adjust_contrast, huerotate, blur}` |
//! | **Watermark** | [`watermark`] | `font8x8` glyphs, `imageproc` rotation |
//! | **Target size** | [`compress`] | bisection over encoder quality |
//! | **Encode** | [`export`] | JPEG, PNG, WebP (libwebp), AVIF (rav1e), BMP, ICO |
//!
//! The module is split into:
//! - **Calculations**: Pure functions for dimension and tile math (unit testable)
//! - **Parameters**: Data structures describing one edit
//! - **Backend**: [`ImageBackend`] trait + [`RustBackend`]
//! - **Stages**: store, resample, sharpen, filter, watermark, compress, export
//! - **Operations**: The pipeline combining the stages

pub mod backend;
mod calculations;
pub mod cancel;
pub mod compress;
pub mod error;
pub mod export;
pub mod filter;
pub mod font;
pub mod operations;
mod params;
pub mod resample;
pub mod rust_backend;
pub mod sharpen;
pub mod store;
pub mod watermark;

pub use backend::{BackendError, Dimensions, ImageBackend};
pub use calculations::{
    ASPECT_PRESETS, AspectLock, SCALE_PRESETS, TileGrid, calculate_tile_grid, center_crop,
    parse_aspect, resolve_dimensions, scale_dimensions, validate_crop,
};
pub use cancel::CancelToken;
pub use compress::{CompressionTarget, SearchOutcome, SearchSettings, SearchState, search};
pub use error::ImagingError;
pub use export::{EncodedOutput, ExportRequest, encode, flatten};
pub use filter::apply_filter;
pub use font::{BitmapFont, FontMetrics, TextExtent};
pub use operations::{PipelineOutput, PipelineSettings, render_working_buffer, run_pipeline};
pub use params::{
    Anchor, Color, CropRegion, DEFAULT_QUALITY, Effect, FilterParams, GeometryParams, OutputFormat,
    OutputParams, Placement, Quality, ResampleFilter, SharpenLevel, SizeRequest,
    TransformParameters, WatermarkSource, WatermarkSpec,
};
pub use resample::resize;
pub use rust_backend::RustBackend;
pub use sharpen::sharpen;
pub use store::{Asset, BitmapStore, MAX_DIMENSION, MAX_PIXELS, WorkingBuffer};
pub use watermark::{WatermarkSettings, composite};
