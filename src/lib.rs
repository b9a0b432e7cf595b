//! # Rasterkit
//!
//! A local raster-image transformation engine: decode once, then resize,
//! crop, filter, sharpen, watermark and encode to a chosen format or a target file
//! size. Nothing leaves the machine.
//!
//! # Architecture: One Pipeline, Fixed Order
//!
//! Every edit is a [`TransformParameters`](imaging::TransformParameters)
//! value run against the decoded source:
//!
//! ```text
//! bytes ─► BitmapStore ─► resize ─► [sharpen | filter | watermark]* ─► search? ─► encode
//!          (decode once)  (crop)     (in the order given)             (target    (format,
//!                                                                      size)      quality)
//! ```
//!
//! Geometry always reads the canonical decoded asset, never a previous
//! output, so changing parameters back and forth never accumulates loss.
//! Every stage is also callable on its own.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`imaging`] | The stages: store, resample, sharpen, filter, watermark, compress, export, and the pipeline combining them |
//! | [`session`] | Interactive edit sessions with a debounced, cancellable preview worker |
//! | [`batch`] | One edit over many sources in parallel, with progress events |
//! | [`archive`] | Bundling exported files (`ArchiveWriter`, `DirectoryArchive`, `ZipBundle`) |
//! | [`config`] | `config.toml` loading, default layer, overrides, validation |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## Decode Once, Share Immutably
//!
//! The decoded source is an `Arc<Asset>` that no stage mutates. Working
//! buffers are fresh copies produced by the geometry stage. Loading the same
//! bytes again is detected by SHA-256 fingerprint and keeps the existing
//! asset.
//!
//! ## Bounded Size Search
//!
//! Target-size export bisects encoder quality over `[0.01, 1.0]` for a
//! configured number of steps, trying full quality once more only when every
//! step came in under the target. When nothing lands within tolerance the
//! search still returns its best result and says so, rather than failing.
//!
//! ## Supersede, Don't Queue
//!
//! Interactive previews only care about the newest parameters. The session
//! worker debounces bursts, drops stale jobs, and cancels an in-flight run at
//! the next stage boundary. Final exports bypass the worker entirely.
//!
//! ## Codecs
//!
//! Decoding and encoding go through the `image` crate (AVIF via `rav1e`).
//! Lossy WebP is the one exception: it uses libwebp through the `webp`
//! crate, compiled from source by `libwebp-sys`. Codec access sits behind the
//! [`ImageBackend`](imaging::ImageBackend) trait so tests can record
//! encoder calls without encoding anything.

pub mod archive;
pub mod batch;
pub mod config;
pub mod imaging;
pub mod output;
pub mod session;

#[cfg(test)]
pub(crate) mod test_helpers;
