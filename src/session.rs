//! Edit sessions and the debounced preview worker.
//!
//! An [`EditSession`] owns the [`BitmapStore`] for one source and a single
//! background thread that runs preview pipelines. The caller never blocks on
//! pixel work: [`EditSession::schedule`] returns a [`PreviewTicket`]
//! immediately.
//!
//! ```text
//!  caller ── schedule(p1) ─┐
//!         ── schedule(p2) ─┼──► mpsc ──► worker: wait `debounce` for quiet,
//!         ── schedule(p3) ─┘                     keep only the newest job,
//!                                                run with a CancelToken
//! ```
//!
//! Every schedule bumps a shared generation counter. Jobs replaced during
//! the debounce window are dropped, and a run already in progress sees its
//! token cancelled at the next stage boundary or search attempt. A ticket
//! resolves to `Some(result)` only if its run was still the newest when it
//! finished; otherwise it resolves to `None`.

use crate::config::EngineConfig;
use crate::imaging::{
    Asset, BitmapFont, BitmapStore, CancelToken, FontMetrics, ImageBackend, ImagingError,
    PipelineOutput, PipelineSettings, RustBackend, TransformParameters, run_pipeline,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

type PreviewResult = Result<PipelineOutput, ImagingError>;

struct Job {
    generation: u64,
    asset: Arc<Asset>,
    params: TransformParameters,
    reply: Sender<PreviewResult>,
}

/// Handle to one scheduled preview.
#[derive(Debug)]
pub struct PreviewTicket {
    generation: u64,
    reply: Receiver<PreviewResult>,
}

impl PreviewTicket {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Block until the run finishes or is superseded.
    pub fn wait(self) -> Option<PreviewResult> {
        self.reply.recv().ok()
    }

    /// Like [`wait`](Self::wait) but gives up after `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<PreviewResult> {
        self.reply.recv_timeout(timeout).ok()
    }
}

/// Shared pieces the worker needs.
#[derive(Clone)]
struct Engine {
    backend: Arc<dyn ImageBackend>,
    fonts: Arc<dyn FontMetrics>,
    settings: PipelineSettings,
}

/// One source image and its preview worker.
pub struct EditSession {
    store: BitmapStore,
    engine: Engine,
    latest: Arc<AtomicU64>,
    sender: Option<Sender<Job>>,
    worker: Option<JoinHandle<()>>,
}

impl EditSession {
    pub fn new(
        backend: Arc<dyn ImageBackend>,
        fonts: Arc<dyn FontMetrics>,
        settings: PipelineSettings,
        debounce: Duration,
    ) -> Self {
        let engine = Engine {
            backend,
            fonts,
            settings,
        };
        let latest = Arc::new(AtomicU64::new(0));
        let (sender, receiver) = mpsc::channel::<Job>();

        let worker_engine = engine.clone();
        let worker_latest = Arc::clone(&latest);
        let worker =
            thread::spawn(move || worker_loop(receiver, worker_engine, worker_latest, debounce));

        Self {
            store: BitmapStore::new(),
            engine,
            latest,
            sender: Some(sender),
            worker: Some(worker),
        }
    }

    /// Session over the production backend and the embedded font.
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(
            Arc::new(RustBackend::new()),
            Arc::new(BitmapFont::new()),
            config.pipeline_settings(),
            config.debounce(),
        )
    }

    /// Decode a new source. Pending previews of the previous source are
    /// superseded; reloading identical bytes keeps them.
    pub fn load(&mut self, bytes: &[u8]) -> Result<Arc<Asset>, ImagingError> {
        let previous = self.store.get();
        let asset = self.store.load(self.engine.backend.as_ref(), bytes)?;
        if !previous.is_some_and(|p| Arc::ptr_eq(&p, &asset)) {
            self.cancel_pending();
        }
        Ok(asset)
    }

    /// The canonical asset, if one is loaded.
    pub fn asset(&self) -> Option<Arc<Asset>> {
        self.store.get()
    }

    /// Queue a preview run for `params`, superseding every earlier one.
    pub fn schedule(&self, params: TransformParameters) -> Result<PreviewTicket, ImagingError> {
        let asset = self.store.get().ok_or(ImagingError::NoAsset)?;
        let generation = self.latest.fetch_add(1, Ordering::SeqCst) + 1;
        let (reply, receiver) = mpsc::channel();
        debug!(generation, "scheduling preview");

        let job = Job {
            generation,
            asset,
            params,
            reply,
        };
        if let Some(sender) = &self.sender
            && sender.send(job).is_err()
        {
            warn!("preview worker has stopped");
        }
        Ok(PreviewTicket {
            generation,
            reply: receiver,
        })
    }

    /// Run `params` on the calling thread, bypassing the debounce. Used for
    /// final exports, which must not be superseded.
    pub fn run_now(&self, params: &TransformParameters) -> Result<PipelineOutput, ImagingError> {
        let asset = self.store.get().ok_or(ImagingError::NoAsset)?;
        run_pipeline(
            self.engine.backend.as_ref(),
            self.engine.fonts.as_ref(),
            &asset,
            params,
            &self.engine.settings,
            &CancelToken::never(),
        )
    }

    /// Supersede every scheduled or running preview.
    pub fn cancel_pending(&self) {
        self.latest.fetch_add(1, Ordering::SeqCst);
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.engine.settings
    }
}

impl Drop for EditSession {
    fn drop(&mut self) {
        self.cancel_pending();
        // Closing the channel ends the worker loop.
        self.sender.take();
        if let Some(worker) = self.worker.take()
            && worker.join().is_err()
        {
            warn!("preview worker panicked");
        }
    }
}

fn worker_loop(jobs: Receiver<Job>, engine: Engine, latest: Arc<AtomicU64>, debounce: Duration) {
    while let Ok(mut job) = jobs.recv() {
        // Debounce: restart the quiet period whenever a newer job arrives.
        loop {
            match jobs.recv_timeout(debounce) {
                Ok(newer) => {
                    debug!(dropped = job.generation, "preview superseded while debouncing");
                    job = newer;
                }
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => return,
            }
        }

        let token = CancelToken::for_generation(Arc::clone(&latest), job.generation);
        if token.is_cancelled() {
            continue;
        }
        let result = run_pipeline(
            engine.backend.as_ref(),
            engine.fonts.as_ref(),
            &job.asset,
            &job.params,
            &engine.settings,
            &token,
        );
        match result {
            Err(ImagingError::Cancelled) => {
                debug!(generation = job.generation, "preview cancelled mid-run");
            }
            _ if token.is_cancelled() => {
                debug!(generation = job.generation, "preview finished after being superseded");
            }
            result => {
                // The ticket may already be gone; nobody to tell.
                let _ = job.reply.send(result);
            }
        }
    }
}
