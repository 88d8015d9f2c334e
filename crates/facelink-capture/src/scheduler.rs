//! [`CaptureScheduler`] – periodic, single-flight capture-and-recognize loop.
//!
//! A ticker task sleeps for the current interval, then tries to claim the
//! busy flag.  If the previous recognition is still outstanding the tick is
//! skipped (never queued).  Otherwise a cycle task is spawned that captures a
//! frame, calls the [`Recognizer`], aggregates the response and publishes the
//! outcome as a [`CaptureSnapshot`] on a `tokio::sync::watch` channel.
//!
//! # Run identity
//!
//! Every [`start`][CaptureScheduler::start] bumps `run_id`.  A cycle only
//! publishes its results if the snapshot still carries the run it was spawned
//! under and the scheduler is active, so a recognition that straddles a
//! `stop()`/`start()` pair is dropped on the floor.
//!
//! # Cadence
//!
//! [`set_interval`][CaptureScheduler::set_interval] takes effect on the next
//! sleep.  A wait already in progress keeps its original deadline.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use facelink_types::{FaceError, RecognitionParams, RecognitionResult};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::aggregator::aggregate;
use crate::recognition_client::{DEFAULT_RECOGNITION_TIMEOUT, Recognizer};
use crate::source::FrameSource;

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Named cadences offered to operators, slowest first.
pub const INTERVAL_PRESETS: [(&str, u64); 4] = [
    ("Slow", 3000),
    ("Normal", 2000),
    ("Fast", 1000),
    ("Very fast", 500),
];

const DEFAULT_INTERVAL_MS: u64 = 2000;

/// Timing parameters for a [`CaptureScheduler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleConfig {
    /// Delay between ticks in milliseconds; always `> 0`.
    pub interval_ms: u64,
    /// Upper bound for one recognition call.
    pub recognition_timeout: Duration,
}

impl ScheduleConfig {
    /// # Errors
    ///
    /// Returns [`FaceError::Config`] if `interval_ms` is zero.
    pub fn new(interval_ms: u64) -> Result<Self, FaceError> {
        validate_interval(interval_ms)?;
        Ok(Self {
            interval_ms,
            ..Self::default()
        })
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_INTERVAL_MS,
            recognition_timeout: DEFAULT_RECOGNITION_TIMEOUT,
        }
    }
}

fn validate_interval(interval_ms: u64) -> Result<(), FaceError> {
    if interval_ms == 0 {
        return Err(FaceError::Config("capture interval must be > 0 ms".into()));
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Snapshot
// ─────────────────────────────────────────────────────────────────────────────

/// What a renderer needs to draw the current recognition state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CaptureSnapshot {
    /// Incremented on every `start()`.
    pub run_id: u64,
    pub active: bool,
    /// A recognition call is outstanding.
    pub processing: bool,
    /// Result set of the latest successful cycle of the current run.
    pub results: Vec<RecognitionResult>,
    /// Classification of the latest failed cycle; cleared by the next success.
    pub error: Option<FaceError>,
    pub completed_cycles: u64,
    pub failed_cycles: u64,
    /// Ticks that found a recognition still in flight.
    pub skipped_ticks: u64,
}

// ─────────────────────────────────────────────────────────────────────────────
// CaptureScheduler
// ─────────────────────────────────────────────────────────────────────────────

struct Inner {
    source: Arc<dyn FrameSource>,
    recognizer: Arc<dyn Recognizer>,
    params: RecognitionParams,
    recognition_timeout: Duration,
    interval_ms: AtomicU64,
    busy: AtomicBool,
    snapshot: watch::Sender<CaptureSnapshot>,
}

/// Releases the single-flight flag when the cycle ends, even on panic.
struct BusyGuard(Arc<Inner>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.busy.store(false, Ordering::Release);
    }
}

/// Drives a [`FrameSource`] and a [`Recognizer`] on a fixed cadence.
///
/// `start()` spawns onto the ambient Tokio runtime, so it must be called from
/// within one.
pub struct CaptureScheduler {
    inner: Arc<Inner>,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl CaptureScheduler {
    pub fn new(
        source: Arc<dyn FrameSource>,
        recognizer: Arc<dyn Recognizer>,
        params: RecognitionParams,
        config: ScheduleConfig,
    ) -> Self {
        let (snapshot, _) = watch::channel(CaptureSnapshot::default());
        Self {
            inner: Arc::new(Inner {
                source,
                recognizer,
                params,
                recognition_timeout: config.recognition_timeout,
                interval_ms: AtomicU64::new(config.interval_ms.max(1)),
                busy: AtomicBool::new(false),
                snapshot,
            }),
            ticker: Mutex::new(None),
        }
    }

    /// Begin ticking.  The first cycle runs one interval from now.
    ///
    /// Clears the displayed results and error.  Calling `start()` while
    /// already running is a no-op.
    pub fn start(&self) {
        let mut ticker = self.ticker.lock().unwrap_or_else(PoisonError::into_inner);
        if ticker.is_some() {
            return;
        }

        let busy = self.inner.busy.load(Ordering::Acquire);
        let mut run_id = 0;
        self.inner.snapshot.send_modify(|s| {
            s.run_id += 1;
            run_id = s.run_id;
            s.active = true;
            s.processing = busy;
            s.results.clear();
            s.error = None;
        });
        info!(
            run_id,
            source = self.inner.source.id(),
            interval_ms = self.interval_ms(),
            "capture loop started"
        );

        let inner = Arc::clone(&self.inner);
        *ticker = Some(tokio::spawn(tick_loop(inner, run_id)));
    }

    /// Cancel the pending tick and clear the displayed results.
    ///
    /// An in-flight recognition is left to finish; its outcome is discarded.
    pub fn stop(&self) {
        let handle = self
            .ticker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(handle) = handle else {
            return;
        };
        handle.abort();

        let mut run_id = 0;
        self.inner.snapshot.send_modify(|s| {
            run_id = s.run_id;
            s.active = false;
            s.results.clear();
        });
        info!(run_id, "capture loop stopped");
    }

    pub fn is_running(&self) -> bool {
        self.ticker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Change the cadence.  Applies to the next wait, never the current one.
    ///
    /// # Errors
    ///
    /// Returns [`FaceError::Config`] if `interval_ms` is zero.
    pub fn set_interval(&self, interval_ms: u64) -> Result<(), FaceError> {
        validate_interval(interval_ms)?;
        self.inner.interval_ms.store(interval_ms, Ordering::Release);
        debug!(interval_ms, "capture interval changed");
        Ok(())
    }

    pub fn interval_ms(&self) -> u64 {
        self.inner.interval_ms.load(Ordering::Acquire)
    }

    pub fn source_id(&self) -> &str {
        self.inner.source.id()
    }

    /// Receiver that observes every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<CaptureSnapshot> {
        self.inner.snapshot.subscribe()
    }

    /// Copy of the current snapshot.
    pub fn snapshot(&self) -> CaptureSnapshot {
        self.inner.snapshot.borrow().clone()
    }
}

impl Drop for CaptureScheduler {
    fn drop(&mut self) {
        let ticker = self
            .ticker
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = ticker.take() {
            handle.abort();
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Loop internals
// ─────────────────────────────────────────────────────────────────────────────

async fn tick_loop(inner: Arc<Inner>, run_id: u64) {
    loop {
        let delay = Duration::from_millis(inner.interval_ms.load(Ordering::Acquire));
        tokio::time::sleep(delay).await;

        if inner
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            inner.snapshot.send_modify(|s| s.skipped_ticks += 1);
            debug!(run_id, "tick skipped, recognition still in flight");
            continue;
        }

        let guard = BusyGuard(Arc::clone(&inner));
        tokio::spawn(run_cycle(Arc::clone(&inner), run_id, guard));
    }
}

async fn run_cycle(inner: Arc<Inner>, run_id: u64, _guard: BusyGuard) {
    inner.snapshot.send_modify(|s| s.processing = true);

    let outcome = cycle(&inner).await;

    inner.snapshot.send_modify(|s| {
        s.processing = false;
        if s.run_id != run_id || !s.active {
            debug!(run_id, current = s.run_id, "discarding stale cycle outcome");
            return;
        }
        match outcome {
            Ok(Some(results)) => {
                s.results = results;
                s.error = None;
                s.completed_cycles += 1;
            }
            Ok(None) => {}
            Err(e) => {
                match e {
                    FaceError::NoFaceDetected => debug!(run_id, "no face in frame"),
                    ref other => warn!(run_id, error = %other, "capture cycle failed"),
                }
                s.results.clear();
                s.error = Some(e);
                s.failed_cycles += 1;
            }
        }
    });
}

/// One capture → recognize → aggregate pass.  `Ok(None)` means no frame.
async fn cycle(inner: &Inner) -> Result<Option<Vec<RecognitionResult>>, FaceError> {
    // File and device reads block; keep them off the async workers.
    let source = Arc::clone(&inner.source);
    let captured = tokio::task::spawn_blocking(move || source.capture())
        .await
        .map_err(|e| FaceError::Source(format!("capture task failed: {e}")))??;
    let Some(frame) = captured else {
        debug!(source = inner.source.id(), "no frame available, cycle skipped");
        return Ok(None);
    };

    let call = inner.recognizer.recognize(&frame, &inner.params);
    let response = match tokio::time::timeout(inner.recognition_timeout, call).await {
        Ok(result) => result?,
        Err(_) => {
            return Err(FaceError::RecognitionService {
                status: None,
                message: format!(
                    "timed out after {} ms",
                    inner.recognition_timeout.as_millis()
                ),
            });
        }
    };

    Ok(Some(aggregate(&response, inner.params.max_results)))
}
