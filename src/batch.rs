//! Batch processing: one edit applied to many sources.
//!
//! Sources are decoded and processed in parallel on the rayon pool. Each
//! source gets its own [`BitmapStore`], so nothing mutable is shared between
//! workers, and a failure in one source never affects the others:
//!
//! ```text
//! items ─► par_iter ─► load ─► run_pipeline ─► BatchResult (Ok | Err)
//!                 │
//!                 └─► progress: Started / Finished / Failed
//! ```
//!
//! Results come back in input order regardless of completion order.
//! [`bundle`] hands the successful outputs to an [`ArchiveWriter`].

use crate::archive::{ArchiveError, ArchiveWriter};
use crate::imaging::{
    BitmapStore, CancelToken, FontMetrics, ImageBackend, ImagingError, OutputFormat,
    PipelineOutput, PipelineSettings, TransformParameters, run_pipeline,
};
use rayon::prelude::*;
use std::collections::HashSet;
use std::path::Path;
use std::sync::mpsc::Sender;
use tracing::{debug, warn};

/// One named source.
#[derive(Debug, Clone)]
pub struct BatchItem {
    pub name: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug)]
pub struct BatchResult {
    /// Name of the source item.
    pub name: String,
    /// Proposed name of the exported file.
    pub output_name: String,
    pub result: Result<PipelineOutput, ImagingError>,
}

/// Progress reported while a batch runs. `index` is 1-based.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchEvent {
    Started {
        index: usize,
        total: usize,
        name: String,
    },
    Finished {
        index: usize,
        total: usize,
        name: String,
        output_name: String,
        width: u32,
        height: u32,
        bytes: u64,
    },
    Failed {
        index: usize,
        total: usize,
        name: String,
        error: String,
    },
}

/// Replace the extension of `original` with the one for `format`.
pub fn output_name(original: &str, format: OutputFormat) -> String {
    let stem = Path::new(original)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "image".to_string());
    format!("{}.{}", stem, format.extension())
}

/// Process every item with the same parameters.
#[tracing::instrument(skip_all, fields(items = items.len()))]
pub fn process_batch(
    backend: &(impl ImageBackend + ?Sized),
    fonts: &(impl FontMetrics + ?Sized),
    items: &[BatchItem],
    params: &TransformParameters,
    settings: &PipelineSettings,
    progress: Option<Sender<BatchEvent>>,
) -> Vec<BatchResult> {
    let total = items.len();
    let emit = |event: BatchEvent| {
        if let Some(tx) = &progress {
            // The receiver may have hung up; progress is best effort.
            let _ = tx.send(event);
        }
    };

    items
        .par_iter()
        .enumerate()
        .map(|(i, item)| {
            let index = i + 1;
            emit(BatchEvent::Started {
                index,
                total,
                name: item.name.clone(),
            });

            let output_name = output_name(&item.name, params.output.format);
            let result = process_item(backend, fonts, item, params, settings);
            match &result {
                Ok(output) => {
                    debug!(name = %item.name, bytes = output.encoded.byte_length, "item done");
                    emit(BatchEvent::Finished {
                        index,
                        total,
                        name: item.name.clone(),
                        output_name: output_name.clone(),
                        width: output.encoded.width,
                        height: output.encoded.height,
                        bytes: output.encoded.byte_length,
                    });
                }
                Err(e) => {
                    warn!(name = %item.name, error = %e, "item failed");
                    emit(BatchEvent::Failed {
                        index,
                        total,
                        name: item.name.clone(),
                        error: e.to_string(),
                    });
                }
            }
            BatchResult {
                name: item.name.clone(),
                output_name,
                result,
            }
        })
        .collect()
}

fn process_item(
    backend: &(impl ImageBackend + ?Sized),
    fonts: &(impl FontMetrics + ?Sized),
    item: &BatchItem,
    params: &TransformParameters,
    settings: &PipelineSettings,
) -> Result<PipelineOutput, ImagingError> {
    let mut store = BitmapStore::new();
    let asset = store.load(backend, &item.bytes)?;
    run_pipeline(
        backend,
        fonts,
        &asset,
        params,
        settings,
        &CancelToken::never(),
    )
}

/// First free variant of `name`: `a.jpg`, `a-2.jpg`, `a-3.jpg`, ...
fn unique_name(name: &str, taken: &HashSet<String>) -> String {
    if !taken.contains(name) {
        return name.to_string();
    }
    let path = Path::new(name);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    (2..)
        .map(|n| format!("{stem}-{n}{ext}"))
        .find(|candidate| !taken.contains(candidate))
        .unwrap_or_else(|| name.to_string())
}

/// Write every successful result into `archive`. Failed items are skipped.
/// Returns the entry names in input order.
pub fn bundle(
    results: &[BatchResult],
    archive: &mut impl ArchiveWriter,
) -> Result<Vec<String>, ArchiveError> {
    let mut taken = HashSet::new();
    let mut written = Vec::new();
    for item in results {
        let Ok(output) = &item.result else { continue };
        let name = unique_name(&item.output_name, &taken);
        archive.add_entry(&name, &output.encoded.bytes)?;
        taken.insert(name.clone());
        written.push(name);
    }
    Ok(written)
}
