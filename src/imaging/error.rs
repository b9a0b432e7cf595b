//! Typed failures for every pipeline stage.
//!
//! None of these are retried: decode and encode are deterministic for the
//! same input. The quality-target search is the one stage that degrades
//! instead of failing (see [`compress`](super::compress)).

use super::backend::BackendError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ImagingError {
    #[error("Decode failed: {0}")]
    Decode(String),
    #[error("Invalid dimensions: {0}")]
    InvalidDimensions(String),
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("Watermark source could not be decoded: {0}")]
    WatermarkSource(String),
    #[error("Encode failed: {0}")]
    Encode(String),
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("No source image loaded")]
    NoAsset,
    #[error("Superseded by a newer request")]
    Cancelled,
}

impl From<BackendError> for ImagingError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Decode(msg) => ImagingError::Decode(msg),
            BackendError::Encode(msg) => ImagingError::Encode(msg),
            BackendError::Io(e) => ImagingError::Decode(e.to_string()),
        }
    }
}
