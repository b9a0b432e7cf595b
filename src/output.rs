//! CLI output formatting for every subcommand.
//!
//! # Information-First Display
//!
//! Every entity (a source image, an exported file) leads with its name, with
//! measurements shown as indented context lines underneath. The same
//! two-level pattern is used by `info`, `transform`, and `batch`, so a source
//! reads the same wherever it appears.
//!
//! # Output Format
//!
//! ## Info
//!
//! ```text
//! sunset.png
//!     Dimensions: 2000 x 1000 (2.00:1)
//!     Format: PNG
//!     File size: 1.4 MB
//!     Transparency: no
//!     Fingerprint: 9f2c…
//! ```
//!
//! ## Transform
//!
//! ```text
//! sunset.png → sunset.jpg
//!     Dimensions: 1000 x 500
//!     Format: JPEG (quality 63)
//!     File size: 195.3 KB
//!     Target: reached in 5 attempts
//! ```
//!
//! ## Batch
//!
//! ```text
//! 001 sunset.png → sunset.jpg
//!     1000 x 500, 195.3 KB
//! 002 broken.png
//!     Failed: Decode failed: unrecognized image format
//!
//! Processed 2 images: 1 written, 1 failed → out/
//! ```
//!
//! A `.zip` destination is shown without the trailing slash.
//!
//! # Architecture
//!
//! Each subcommand has a `format_*` function returning `Vec<String>` for
//! testability. Format functions are pure: no I/O, no side effects.

use crate::archive::is_zip_path;
use crate::batch::{BatchEvent, BatchResult};
use crate::imaging::{Asset, Dimensions, PipelineOutput, SearchOutcome};
use std::path::Path;

// ============================================================================
// Shared display helpers
// ============================================================================

/// Format a 1-based positional index as 3-digit zero-padded.
fn format_index(pos: usize) -> String {
    format!("{:0>3}", pos)
}

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

/// Human-readable byte count in binary units.
///
/// ```text
/// 512 B
/// 195.3 KB
/// 1.4 MB
/// ```
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}

fn format_dimensions(dims: Dimensions) -> String {
    format!("{} x {}", dims.width, dims.height)
}

fn search_line(outcome: &SearchOutcome) -> String {
    if outcome.within_tolerance {
        format!("Target: reached in {} attempts", outcome.iterations_used)
    } else {
        format!(
            "Target: not reached after {} attempts, closest {}",
            outcome.iterations_used,
            format_bytes(outcome.achieved_bytes)
        )
    }
}

// ============================================================================
// info
// ============================================================================

/// Describe a decoded source.
pub fn format_asset_info(name: &str, asset: &Asset) -> Vec<String> {
    let format = asset
        .format()
        .map(|f| format!("{:?}", f).to_uppercase())
        .unwrap_or_else(|| "raw".to_string());
    vec![
        name.to_string(),
        format!(
            "{}Dimensions: {} ({:.2}:1)",
            indent(1),
            format_dimensions(asset.dimensions()),
            asset.aspect_ratio()
        ),
        format!("{}Format: {}", indent(1), format),
        format!(
            "{}File size: {}",
            indent(1),
            format_bytes(asset.source_len() as u64)
        ),
        format!(
            "{}Transparency: {}",
            indent(1),
            if asset.has_transparency() { "yes" } else { "no" }
        ),
        format!("{}Fingerprint: {}", indent(1), asset.fingerprint()),
    ]
}

// ============================================================================
// transform
// ============================================================================

/// Describe one finished export.
pub fn format_transform_report(
    source: &str,
    destination: &str,
    output: &PipelineOutput,
) -> Vec<String> {
    let encoded = &output.encoded;
    let format = match encoded.quality {
        Some(q) => format!("{} (quality {})", encoded.format, q),
        None => encoded.format.to_string(),
    };
    let mut lines = vec![
        format!("{} \u{2192} {}", source, destination),
        format!(
            "{}Dimensions: {}",
            indent(1),
            format_dimensions(output.dimensions())
        ),
        format!("{}Format: {}", indent(1), format),
        format!(
            "{}File size: {}",
            indent(1),
            format_bytes(encoded.byte_length)
        ),
    ];
    if let Some(outcome) = &output.search {
        lines.push(format!("{}{}", indent(1), search_line(outcome)));
    }
    lines
}

// ============================================================================
// batch
// ============================================================================

/// Format a single batch progress event as display lines.
///
/// `Started` has no lines of its own; an item is reported once it settles.
pub fn format_batch_event(event: &BatchEvent) -> Vec<String> {
    match event {
        BatchEvent::Started { .. } => Vec::new(),
        BatchEvent::Finished {
            index,
            name,
            output_name,
            width,
            height,
            bytes,
            ..
        } => vec![
            format!("{} {} \u{2192} {}", format_index(*index), name, output_name),
            format!(
                "{}{} x {}, {}",
                indent(1),
                width,
                height,
                format_bytes(*bytes)
            ),
        ],
        BatchEvent::Failed {
            index, name, error, ..
        } => vec![
            format!("{} {}", format_index(*index), name),
            format!("{}Failed: {}", indent(1), error),
        ],
    }
}

/// Closing summary after a batch has been bundled.
pub fn format_batch_summary(
    results: &[BatchResult],
    written: &[String],
    destination: &Path,
) -> Vec<String> {
    let failed = results.iter().filter(|r| r.result.is_err()).count();
    let noun = if results.len() == 1 { "image" } else { "images" };
    let slash = if is_zip_path(destination) { "" } else { "/" };
    vec![
        String::new(),
        format!(
            "Processed {} {}: {} written, {} failed \u{2192} {}{}",
            results.len(),
            noun,
            written.len(),
            failed,
            destination.display(),
            slash
        ),
    ]
}
