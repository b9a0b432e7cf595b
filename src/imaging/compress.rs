//! Quality-Target Compressor: binary search over encoder quality.
//!
//! Encoded size is monotonic-ish in quality for JPEG, WebP and AVIF, so a
//! bounded bisection over `q ∈ [0.01, 1.0]` lands near a byte target in a
//! handful of trial encodes:
//!
//! ```text
//!   low=0.01 high=1.0
//!   repeat max_iterations times: mid=(low+high)/2, encode
//!       |size - target| < tolerance  → accept
//!       size > target                → high = mid
//!       size < target                → low = mid, best = mid
//!       │
//!       ▼ every attempt under target?
//!   one extra encode at 1.0 ── still under? ──► report ceiling
//! ```
//!
//! Running out of iterations is not an error: the closest under-target
//! quality seen is returned with `within_tolerance = false`. Trial bytes are
//! thrown away; the caller exports at the chosen quality.

use super::backend::ImageBackend;
use super::cancel::CancelToken;
use super::error::ImagingError;
use super::export::prepare_pixels;
use super::params::{Color, OutputFormat, Quality};
use super::store::WorkingBuffer;
use serde::Serialize;
use tracing::{debug, info};

/// Lower bound of the quality search.
pub const MIN_QUALITY: f64 = 0.01;
/// Upper bound of the quality search.
pub const MAX_QUALITY: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchSettings {
    /// Accept an encode whose size is within this many bytes of the target.
    pub tolerance_bytes: u64,
    /// Bisection step budget. The ceiling check, when it runs, is one
    /// encode on top of this.
    pub max_iterations: u32,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            tolerance_bytes: 5000,
            max_iterations: 7,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompressionTarget {
    pub format: OutputFormat,
    pub target_bytes: u64,
    pub background: Color,
}

/// Transient bisection state for one search call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchState {
    pub low: f64,
    pub high: f64,
    /// Highest quality tried that came in under the target, with its size.
    pub best: Option<(f64, u64)>,
    pub iterations_used: u32,
}

impl SearchState {
    fn new() -> Self {
        Self {
            low: MIN_QUALITY,
            high: MAX_QUALITY,
            best: None,
            iterations_used: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SearchOutcome {
    /// Chosen quality as a fraction in `[0.01, 1.0]`.
    pub quality: f64,
    pub achieved_bytes: u64,
    pub within_tolerance: bool,
    pub iterations_used: u32,
}

impl SearchOutcome {
    /// Encoder-scale quality to export with.
    pub fn encoder_quality(&self) -> Quality {
        Quality::from_fraction(self.quality)
    }
}

/// Search encoder quality so the encoded size of `buffer` approaches
/// `target.target_bytes`.
#[tracing::instrument(skip(backend, buffer, cancel), fields(width = buffer.width(), height = buffer.height()))]
pub fn search(
    backend: &(impl ImageBackend + ?Sized),
    buffer: &WorkingBuffer,
    target: &CompressionTarget,
    settings: &SearchSettings,
    cancel: &CancelToken,
) -> Result<SearchOutcome, ImagingError> {
    if !target.format.is_lossy() {
        return Err(ImagingError::UnsupportedFormat(format!(
            "{} is lossless; size targeting needs JPEG, WebP or AVIF",
            target.format
        )));
    }
    if target.target_bytes == 0 {
        return Err(ImagingError::InvalidParameter(
            "target size must be positive".into(),
        ));
    }
    if settings.max_iterations == 0 {
        return Err(ImagingError::InvalidParameter(
            "search needs at least one iteration".into(),
        ));
    }

    let pixels = prepare_pixels(buffer.image(), target.format, target.background);
    let tolerance = settings.tolerance_bytes;
    let goal = target.target_bytes;
    let mut state = SearchState::new();

    let attempt = |state: &mut SearchState, fraction: f64| -> Result<u64, ImagingError> {
        cancel.check()?;
        let quality = Quality::from_fraction(fraction);
        let size = backend.encode(&pixels, target.format, quality)?.len() as u64;
        state.iterations_used += 1;
        debug!(
            iteration = state.iterations_used,
            quality = quality.value(),
            size,
            goal,
            "trial encode"
        );
        Ok(size)
    };
    let accept = |fraction: f64, size: u64, state: &SearchState, within: bool| SearchOutcome {
        quality: fraction,
        achieved_bytes: size,
        within_tolerance: within,
        iterations_used: state.iterations_used,
    };

    // Lowest-quality attempt that still came out over the target.
    let mut over: Option<(f64, u64)> = None;

    while state.iterations_used < settings.max_iterations {
        let mid = (state.low + state.high) / 2.0;
        let size = attempt(&mut state, mid)?;
        if size.abs_diff(goal) < tolerance {
            return Ok(accept(mid, size, &state, true));
        }
        if size > goal {
            state.high = mid;
            over = Some((mid, size));
        } else {
            state.low = mid;
            state.best = Some((mid, size));
        }
    }

    if over.is_none() {
        let ceiling = attempt(&mut state, MAX_QUALITY)?;
        if ceiling.abs_diff(goal) < tolerance {
            return Ok(accept(MAX_QUALITY, ceiling, &state, true));
        }
        if ceiling < goal {
            info!(ceiling, goal, "target is above the largest achievable size");
            return Ok(accept(MAX_QUALITY, ceiling, &state, false));
        }
    }

    let Some((quality, size)) = state.best.or(over) else {
        return Err(ImagingError::InvalidParameter(
            "search needs at least one iteration".into(),
        ));
    };
    info!(
        quality,
        size,
        goal,
        iterations = state.iterations_used,
        "quality search did not converge"
    );
    Ok(accept(quality, size, &state, false))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::backend::tests::MockBackend;
    use crate::imaging::store::Asset;
    use crate::test_helpers::gradient_image;
    use std::sync::Arc;
    use std::sync::atomic::AtomicU64;

    fn buffer() -> WorkingBuffer {
        WorkingBuffer::from_asset(&Arc::new(Asset::from_rgba(gradient_image(16, 16))))
    }

    fn jpeg(target_bytes: u64) -> CompressionTarget {
        CompressionTarget {
            format: OutputFormat::Jpeg,
            target_bytes,
            background: Color::WHITE,
        }
    }

    #[test]
    fn converges_on_linear_curve() {
        let backend = MockBackend::new();
        let outcome = search(
            &backend,
            &buffer(),
            &jpeg(42_000),
            &SearchSettings::default(),
            &CancelToken::never(),
        )
        .unwrap();

        assert!(outcome.within_tolerance);
        assert!(outcome.achieved_bytes.abs_diff(42_000) < 5000);
        assert!(outcome.iterations_used <= 7);
        assert_eq!(backend.encode_qualities().len() as u32, outcome.iterations_used);
    }

    #[test]
    fn first_attempt_is_the_midpoint() {
        let backend = MockBackend::new();
        search(
            &backend,
            &buffer(),
            &jpeg(30_000),
            &SearchSettings::default(),
            &CancelToken::never(),
        )
        .unwrap();
        let first = backend.encode_qualities()[0];
        assert!((50..=51).contains(&first), "first attempt at {first}");
        assert!(!backend.encode_qualities().contains(&100));
    }

    #[test]
    fn every_step_counts_toward_bisection() {
        // Only the seventh halving lands within 600 bytes of the target.
        let backend = MockBackend::new();
        let settings = SearchSettings {
            tolerance_bytes: 600,
            max_iterations: 7,
        };
        let outcome = search(
            &backend,
            &buffer(),
            &jpeg(99_200),
            &settings,
            &CancelToken::never(),
        )
        .unwrap();
        assert!(outcome.within_tolerance, "{outcome:?}");
        assert_eq!(outcome.iterations_used, 7);
        assert!(!backend.encode_qualities().contains(&100));
    }

    #[test]
    fn unreachable_high_target_reports_ceiling() {
        let backend = MockBackend::new();
        let outcome = search(
            &backend,
            &buffer(),
            &jpeg(1_000_000),
            &SearchSettings::default(),
            &CancelToken::never(),
        )
        .unwrap();

        assert_eq!(outcome.quality, 1.0);
        assert!(!outcome.within_tolerance);
        assert_eq!(outcome.achieved_bytes, 100_000);
        // Seven bisection attempts, all under target, then the ceiling.
        assert_eq!(outcome.iterations_used, 8);
        assert_eq!(backend.encode_qualities().last(), Some(&100));
    }

    #[test]
    fn unreachable_low_target_returns_lowest_attempt() {
        fn bulky(quality: u32) -> usize {
            50_000 + quality as usize * 1000
        }
        let backend = MockBackend::with_size_curve(bulky);
        let outcome = search(
            &backend,
            &buffer(),
            &jpeg(10_000),
            &SearchSettings::default(),
            &CancelToken::never(),
        )
        .unwrap();

        assert!(!outcome.within_tolerance);
        assert_eq!(outcome.iterations_used, 7);
        let lowest_tried = *backend.encode_qualities().iter().min().unwrap();
        assert_eq!(outcome.encoder_quality().value(), lowest_tried);
        assert_eq!(outcome.achieved_bytes, bulky(lowest_tried) as u64);
    }

    #[test]
    fn non_convergence_returns_best_under_target() {
        let backend = MockBackend::new();
        let settings = SearchSettings {
            tolerance_bytes: 1,
            max_iterations: 7,
        };
        let outcome = search(
            &backend,
            &buffer(),
            &jpeg(42_500),
            &settings,
            &CancelToken::never(),
        )
        .unwrap();

        assert!(!outcome.within_tolerance);
        assert_eq!(outcome.iterations_used, 7);
        assert!(outcome.achieved_bytes < 42_500);
        // Closest under-target attempt of the whole search.
        let best_under = backend
            .encode_qualities()
            .into_iter()
            .map(|q| q as u64 * 1000)
            .filter(|&s| s < 42_500)
            .max()
            .unwrap();
        assert_eq!(outcome.achieved_bytes, best_under);
    }

    #[test]
    fn respects_iteration_budget() {
        let backend = MockBackend::new();
        let settings = SearchSettings {
            tolerance_bytes: 1,
            max_iterations: 3,
        };
        let outcome = search(
            &backend,
            &buffer(),
            &jpeg(42_500),
            &settings,
            &CancelToken::never(),
        )
        .unwrap();
        assert_eq!(outcome.iterations_used, 3);
        assert_eq!(backend.encode_qualities().len(), 3);
    }

    #[test]
    fn lossless_formats_are_unsupported() {
        for format in [
            OutputFormat::Png,
            OutputFormat::Bmp,
            OutputFormat::Ico,
        ] {
            let target = CompressionTarget {
                format,
                target_bytes: 10_000,
                background: Color::WHITE,
            };
            let err = search(
                &MockBackend::new(),
                &buffer(),
                &target,
                &SearchSettings::default(),
                &CancelToken::never(),
            )
            .unwrap_err();
            assert!(matches!(err, ImagingError::UnsupportedFormat(_)), "{format}");
        }
    }

    #[test]
    fn webp_and_avif_are_searchable() {
        for format in [OutputFormat::WebP, OutputFormat::Avif] {
            let target = CompressionTarget {
                format,
                ..jpeg(42_000)
            };
            let outcome = search(
                &MockBackend::new(),
                &buffer(),
                &target,
                &SearchSettings::default(),
                &CancelToken::never(),
            )
            .unwrap();
            assert!(outcome.within_tolerance, "{format}");
        }
    }

    #[test]
    fn zero_target_is_invalid() {
        let err = search(
            &MockBackend::new(),
            &buffer(),
            &jpeg(0),
            &SearchSettings::default(),
            &CancelToken::never(),
        )
        .unwrap_err();
        assert!(matches!(err, ImagingError::InvalidParameter(_)));
    }

    #[test]
    fn cancelled_search_stops_before_probing() {
        let latest = Arc::new(AtomicU64::new(2));
        let token = CancelToken::for_generation(latest, 1);
        let backend = MockBackend::new();
        let err = search(
            &backend,
            &buffer(),
            &jpeg(42_000),
            &SearchSettings::default(),
            &token,
        )
        .unwrap_err();
        assert!(matches!(err, ImagingError::Cancelled));
        assert!(backend.encode_qualities().is_empty());
    }
}
