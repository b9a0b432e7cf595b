//! Cooperative cancellation for pipeline runs.
//!
//! A run is tagged with the generation that was current when it was
//! scheduled. Bumping the shared counter supersedes it; the pipeline polls
//! between stages and between search attempts.

use super::error::ImagingError;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    latest: Option<Arc<AtomicU64>>,
    generation: u64,
}

impl CancelToken {
    /// A token that is never cancelled. Used by one-shot CLI runs and batches.
    pub fn never() -> Self {
        Self::default()
    }

    /// Cancelled as soon as `latest` moves past `generation`.
    pub fn for_generation(latest: Arc<AtomicU64>, generation: u64) -> Self {
        Self {
            latest: Some(latest),
            generation,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_cancelled(&self) -> bool {
        self.latest
            .as_ref()
            .is_some_and(|latest| latest.load(Ordering::SeqCst) != self.generation)
    }

    pub fn check(&self) -> Result<(), ImagingError> {
        if self.is_cancelled() {
            Err(ImagingError::Cancelled)
        } else {
            Ok(())
        }
    }
}
