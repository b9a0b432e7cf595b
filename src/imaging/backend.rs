//! Codec backend trait and shared types.
//!
//! The [`ImageBackend`] trait defines the three operations the engine needs
//! from a codec library: identify, decode, and encode. The engine never
//! parses or writes a container itself.
//!
//! The production implementation is
//! [`RustBackend`](super::rust_backend::RustBackend): pure Rust, built on
//! the `image` crate. Everything is statically linked into the binary.

use super::params::{OutputFormat, Quality};
use image::{ImageFormat, RgbaImage};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Decode(String),
    #[error("{0}")]
    Encode(String),
}

/// Pixel dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn pixel_count(self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// Result of an identify operation: header-level facts, no pixel decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceInfo {
    pub dimensions: Dimensions,
    pub format: ImageFormat,
}

/// A fully decoded source, normalized to RGBA8.
#[derive(Debug, Clone)]
pub struct DecodedImage {
    pub pixels: RgbaImage,
    pub format: ImageFormat,
}

/// Trait for codec backends.
///
/// `Send + Sync` so one backend can be shared by the preview worker and by
/// rayon batch workers.
pub trait ImageBackend: Send + Sync {
    /// Read format and dimensions from the header.
    fn identify(&self, bytes: &[u8]) -> Result<SourceInfo, BackendError>;

    /// Decode into an RGBA8 buffer.
    fn decode(&self, bytes: &[u8]) -> Result<DecodedImage, BackendError>;

    /// Encode an RGBA8 buffer. Lossless formats ignore `quality`; formats
    /// without alpha drop the channel (callers flatten first).
    fn encode(
        &self,
        image: &RgbaImage,
        format: OutputFormat,
        quality: Quality,
    ) -> Result<Vec<u8>, BackendError>;
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Mock backend that records operations and fabricates encoded sizes.
    ///
    /// Encoded length is `size_for_quality(q)` bytes, so search behaviour can
    /// be exercised against a known quality-to-size curve without running a
    /// real encoder. Uses Mutex (not RefCell) so it is Sync and works with
    /// rayon's par_iter.
    pub struct MockBackend {
        pub decode_results: Mutex<Vec<RgbaImage>>,
        pub operations: Mutex<Vec<RecordedOp>>,
        pub size_for_quality: fn(u32) -> usize,
    }

    #[derive(Debug, Clone, PartialEq)]
    pub enum RecordedOp {
        Identify,
        Decode,
        Encode {
            format: OutputFormat,
            quality: u32,
            width: u32,
            height: u32,
        },
    }

    /// 1 KB per quality step: quality 100 → 100_000 bytes.
    pub fn linear_size(quality: u32) -> usize {
        quality as usize * 1000
    }

    impl Default for MockBackend {
        fn default() -> Self {
            Self::with_size_curve(linear_size)
        }
    }

    impl MockBackend {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_size_curve(size_for_quality: fn(u32) -> usize) -> Self {
            Self {
                decode_results: Mutex::new(Vec::new()),
                operations: Mutex::new(Vec::new()),
                size_for_quality,
            }
        }

        pub fn with_decoded(images: Vec<RgbaImage>) -> Self {
            let backend = Self::default();
            *backend.decode_results.lock().unwrap() = images;
            backend
        }

        pub fn get_operations(&self) -> Vec<RecordedOp> {
            self.operations.lock().unwrap().clone()
        }

        pub fn encode_qualities(&self) -> Vec<u32> {
            self.get_operations()
                .into_iter()
                .filter_map(|op| match op {
                    RecordedOp::Encode { quality, .. } => Some(quality),
                    _ => None,
                })
                .collect()
        }
    }

    impl ImageBackend for MockBackend {
        fn identify(&self, _bytes: &[u8]) -> Result<SourceInfo, BackendError> {
            self.operations.lock().unwrap().push(RecordedOp::Identify);
            let results = self.decode_results.lock().unwrap();
            let next = results
                .last()
                .ok_or_else(|| BackendError::Decode("No mock image".to_string()))?;
            Ok(SourceInfo {
                dimensions: Dimensions::new(next.width(), next.height()),
                format: ImageFormat::Png,
            })
        }

        fn decode(&self, _bytes: &[u8]) -> Result<DecodedImage, BackendError> {
            self.operations.lock().unwrap().push(RecordedOp::Decode);
            let pixels = self
                .decode_results
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| BackendError::Decode("No mock image".to_string()))?;
            Ok(DecodedImage {
                pixels,
                format: ImageFormat::Png,
            })
        }

        fn encode(
            &self,
            image: &RgbaImage,
            format: OutputFormat,
            quality: Quality,
        ) -> Result<Vec<u8>, BackendError> {
            let quality = if format.is_lossy() { quality.value() } else { 100 };
            self.operations.lock().unwrap().push(RecordedOp::Encode {
                format,
                quality,
                width: image.width(),
                height: image.height(),
            });
            Ok(vec![0u8; (self.size_for_quality)(quality)])
        }
    }

    #[test]
    fn mock_records_identify_without_consuming() {
        let backend = MockBackend::with_decoded(vec![RgbaImage::new(800, 600)]);

        let info = backend.identify(b"ignored").unwrap();
        assert_eq!(info.dimensions, Dimensions::new(800, 600));

        let decoded = backend.decode(b"ignored").unwrap();
        assert_eq!(decoded.pixels.dimensions(), (800, 600));
        assert_eq!(
            backend.get_operations(),
            vec![RecordedOp::Identify, RecordedOp::Decode]
        );
    }

    #[test]
    fn mock_encode_follows_size_curve() {
        let backend = MockBackend::new();
        let bytes = backend
            .encode(&RgbaImage::new(4, 4), OutputFormat::Jpeg, Quality::new(42))
            .unwrap();
        assert_eq!(bytes.len(), 42_000);
        assert_eq!(backend.encode_qualities(), vec![42]);
    }

    #[test]
    fn mock_decode_without_images_errors() {
        let backend = MockBackend::new();
        assert!(backend.decode(b"").is_err());
    }

    #[test]
    fn dimensions_pixel_count_does_not_overflow() {
        assert_eq!(Dimensions::new(100_000, 100_000).pixel_count(), 10_000_000_000);
    }
}
