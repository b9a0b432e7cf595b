//! High-level pipeline operations.
//!
//! These functions combine the individual stages into one run:
//!
//! ```text
//! Asset ─► resize ─► [sharpen | filter | watermark]* ─► search? ─► encode ─► EncodedOutput
//! ```
//!
//! Geometry always goes first and always reads the canonical asset, so a
//! run is a pure function of `(asset, params)`.

use super::backend::{Dimensions, ImageBackend};
use super::cancel::CancelToken;
use super::compress::{CompressionTarget, SearchOutcome, SearchSettings, search};
use super::error::ImagingError;
use super::export::{EncodedOutput, ExportRequest, encode};
use super::filter::apply_filter;
use super::font::FontMetrics;
use super::params::{Effect, Quality, TransformParameters};
use super::resample::resize;
use super::sharpen::sharpen;
use super::store::{Asset, WorkingBuffer};
use super::watermark::{WatermarkSettings, composite};
use std::sync::Arc;
use tracing::debug;

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, ImagingError>;

/// Engine-wide knobs that are not part of an individual edit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineSettings {
    pub search: SearchSettings,
    pub watermark: WatermarkSettings,
    /// Encoder quality when neither a quality nor a target size is given.
    pub default_quality: Quality,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            search: SearchSettings::default(),
            watermark: WatermarkSettings::default(),
            default_quality: Quality::default(),
        }
    }
}

/// Everything a pipeline run produces.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub encoded: EncodedOutput,
    /// Present when the run searched for a target size.
    pub search: Option<SearchOutcome>,
}

impl PipelineOutput {
    pub fn dimensions(&self) -> Dimensions {
        Dimensions::new(self.encoded.width, self.encoded.height)
    }
}

/// Geometry plus effects: the buffer that would be exported.
pub fn render_working_buffer(
    backend: &(impl ImageBackend + ?Sized),
    fonts: &(impl FontMetrics + ?Sized),
    asset: &Arc<Asset>,
    params: &TransformParameters,
    settings: &PipelineSettings,
    cancel: &CancelToken,
) -> Result<WorkingBuffer> {
    cancel.check()?;
    let mut buffer = resize(asset, &params.geometry)?;

    for effect in &params.effects {
        cancel.check()?;
        match effect {
            Effect::Sharpen(level) => sharpen(&mut buffer, *level),
            Effect::Filter(filter) => apply_filter(&mut buffer, filter)?,
            Effect::Watermark(spec) => {
                composite(backend, fonts, &mut buffer, spec, &settings.watermark)?
            }
        }
    }
    Ok(buffer)
}

/// Run a full edit against `asset` and encode the result.
#[tracing::instrument(skip_all, fields(format = %params.output.format))]
pub fn run_pipeline(
    backend: &(impl ImageBackend + ?Sized),
    fonts: &(impl FontMetrics + ?Sized),
    asset: &Arc<Asset>,
    params: &TransformParameters,
    settings: &PipelineSettings,
    cancel: &CancelToken,
) -> Result<PipelineOutput> {
    let buffer = render_working_buffer(backend, fonts, asset, params, settings, cancel)?;
    let output = &params.output;

    let (quality, outcome) = match output.target_bytes {
        Some(target_bytes) => {
            let outcome = search(
                backend,
                &buffer,
                &CompressionTarget {
                    format: output.format,
                    target_bytes,
                    background: output.background,
                },
                &settings.search,
                cancel,
            )?;
            (outcome.encoder_quality(), Some(outcome))
        }
        None => (output.quality.unwrap_or(settings.default_quality), None),
    };

    cancel.check()?;
    let request = ExportRequest::new(output.format)
        .with_quality(quality)
        .with_background(output.background);
    let encoded = encode(backend, &buffer, &request)?;
    debug!(
        bytes = encoded.byte_length,
        width = encoded.width,
        height = encoded.height,
        "pipeline finished"
    );
    Ok(PipelineOutput {
        encoded,
        search: outcome,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::backend::tests::{MockBackend, RecordedOp};
    use crate::imaging::font::BitmapFont;
    use crate::imaging::params::{
        FilterParams, GeometryParams, OutputFormat, OutputParams, SharpenLevel, SizeRequest,
        WatermarkSpec,
    };
    use crate::imaging::sharpen::sharpen_image;
    use crate::test_helpers::{gradient_image, noisy_image};
    use std::sync::atomic::AtomicU64;

    fn asset(w: u32, h: u32) -> Arc<Asset> {
        Arc::new(Asset::from_rgba(noisy_image(w, h, 42)))
    }

    fn params(size: SizeRequest, effects: Vec<Effect>, output: OutputParams) -> TransformParameters {
        TransformParameters {
            geometry: GeometryParams {
                size,
                ..GeometryParams::default()
            },
            effects,
            output,
        }
    }

    #[test]
    fn plain_resize_exports_once_at_default_quality() {
        let backend = MockBackend::new();
        let out = run_pipeline(
            &backend,
            &BitmapFont::new(),
            &asset(200, 100),
            &params(SizeRequest::scale(50.0), vec![], OutputParams::default()),
            &PipelineSettings::default(),
            &CancelToken::never(),
        )
        .unwrap();

        assert_eq!(out.dimensions(), Dimensions::new(100, 50));
        assert!(out.search.is_none());
        assert_eq!(
            backend.get_operations(),
            vec![RecordedOp::Encode {
                format: OutputFormat::Jpeg,
                quality: 92,
                width: 100,
                height: 50
            }]
        );
    }

    #[test]
    fn explicit_quality_wins_over_default() {
        let backend = MockBackend::new();
        let output = OutputParams {
            quality: Some(Quality::new(40)),
            ..OutputParams::default()
        };
        run_pipeline(
            &backend,
            &BitmapFont::new(),
            &asset(20, 20),
            &params(SizeRequest::default(), vec![], output),
            &PipelineSettings::default(),
            &CancelToken::never(),
        )
        .unwrap();
        assert_eq!(backend.encode_qualities(), vec![40]);
    }

    #[test]
    fn target_size_exports_at_searched_quality() {
        let backend = MockBackend::new();
        let output = OutputParams {
            target_bytes: Some(42_000),
            ..OutputParams::default()
        };
        let out = run_pipeline(
            &backend,
            &BitmapFont::new(),
            &asset(20, 20),
            &params(SizeRequest::default(), vec![], output),
            &PipelineSettings::default(),
            &CancelToken::never(),
        )
        .unwrap();

        let outcome = out.search.unwrap();
        let qualities = backend.encode_qualities();
        // Search encodes, then one final export at the chosen quality.
        assert_eq!(qualities.len() as u32, outcome.iterations_used + 1);
        assert_eq!(*qualities.last().unwrap(), outcome.encoder_quality().value());
        assert_eq!(out.encoded.byte_length, outcome.achieved_bytes);
    }

    #[test]
    fn effects_run_after_geometry_in_order() {
        let source = asset(64, 48);
        let backend = MockBackend::new();
        let fonts = BitmapFont::new();
        let settings = PipelineSettings::default();
        let edit = params(
            SizeRequest::width(32),
            vec![Effect::Sharpen(SharpenLevel::Strong)],
            OutputParams::default(),
        );

        let buffer =
            render_working_buffer(&backend, &fonts, &source, &edit, &settings, &CancelToken::never())
                .unwrap();

        let mut expected = resize(&source, &edit.geometry).unwrap();
        sharpen_image(expected.image_mut(), 0.9);
        assert_eq!(buffer.image(), expected.image());
        assert!(Arc::ptr_eq(buffer.origin(), &source));
    }

    #[test]
    fn watermark_effect_changes_pixels() {
        let source = Arc::new(Asset::from_rgba(gradient_image(200, 120)));
        let edit = params(
            SizeRequest::default(),
            vec![Effect::Watermark(WatermarkSpec::text("DRAFT"))],
            OutputParams::default(),
        );
        let buffer = render_working_buffer(
            &MockBackend::new(),
            &BitmapFont::new(),
            &source,
            &edit,
            &PipelineSettings::default(),
            &CancelToken::never(),
        )
        .unwrap();
        assert_ne!(buffer.image(), source.pixels());
    }

    #[test]
    fn filter_effects_run_in_list_order() {
        let source = asset(40, 30);
        let flat = Effect::Filter(FilterParams {
            contrast: 0.0,
            ..FilterParams::default()
        });
        let dark = Effect::Filter(FilterParams {
            brightness: 40.0,
            ..FilterParams::default()
        });
        let render = |effects: Vec<Effect>| {
            render_working_buffer(
                &MockBackend::new(),
                &BitmapFont::new(),
                &source,
                &params(SizeRequest::default(), effects, OutputParams::default()),
                &PipelineSettings::default(),
                &CancelToken::never(),
            )
            .unwrap()
            .into_image()
        };

        let darkened_last = render(vec![flat.clone(), dark.clone()]);
        assert!(darkened_last.pixels().all(|p| p[0] == 51));
        let flattened_last = render(vec![dark, flat]);
        assert!(flattened_last.pixels().all(|p| p[0] == 128));
    }

    #[test]
    fn invalid_filter_fails_the_run() {
        let filter = FilterParams {
            sepia: 400.0,
            ..FilterParams::default()
        };
        let backend = MockBackend::new();
        let err = run_pipeline(
            &backend,
            &BitmapFont::new(),
            &asset(20, 20),
            &params(
                SizeRequest::default(),
                vec![Effect::Filter(filter)],
                OutputParams::default(),
            ),
            &PipelineSettings::default(),
            &CancelToken::never(),
        )
        .unwrap_err();
        assert!(matches!(err, ImagingError::InvalidParameter(_)));
        assert!(backend.get_operations().is_empty());
    }

    #[test]
    fn invalid_watermark_fails_the_run() {
        let mut spec = WatermarkSpec::text("x");
        spec.opacity = 2.0;
        let err = run_pipeline(
            &MockBackend::new(),
            &BitmapFont::new(),
            &asset(20, 20),
            &params(
                SizeRequest::default(),
                vec![Effect::Watermark(spec)],
                OutputParams::default(),
            ),
            &PipelineSettings::default(),
            &CancelToken::never(),
        )
        .unwrap_err();
        assert!(matches!(err, ImagingError::InvalidParameter(_)));
    }

    #[test]
    fn cancelled_run_encodes_nothing() {
        let backend = MockBackend::new();
        let token = CancelToken::for_generation(Arc::new(AtomicU64::new(5)), 4);
        let err = run_pipeline(
            &backend,
            &BitmapFont::new(),
            &asset(20, 20),
            &params(SizeRequest::default(), vec![], OutputParams::default()),
            &PipelineSettings::default(),
            &token,
        )
        .unwrap_err();
        assert!(matches!(err, ImagingError::Cancelled));
        assert!(backend.get_operations().is_empty());
    }

    #[test]
    fn repeated_runs_read_the_canonical_asset() {
        // Downscale, then "resize back": the second run must start from the
        // asset, so it equals a direct same-size run.
        let source = asset(80, 60);
        let backend = MockBackend::new();
        let fonts = BitmapFont::new();
        let settings = PipelineSettings::default();
        let never = CancelToken::never();

        let small = params(SizeRequest::scale(25.0), vec![], OutputParams::default());
        render_working_buffer(&backend, &fonts, &source, &small, &settings, &never).unwrap();

        let full = params(SizeRequest::width(80), vec![], OutputParams::default());
        let back = render_working_buffer(&backend, &fonts, &source, &full, &settings, &never).unwrap();

        assert!(Arc::ptr_eq(back.origin(), &source));
        assert_eq!(back.image(), source.pixels());
    }
}
