//! [`QueryDispatcher`] and the per-session [`SessionWorker`].
//!
//! A dispatch emits exactly `Processing`, then exactly one of `Answer` or
//! `Error`.  Each relay session owns one worker that runs its jobs strictly
//! in arrival order, so a second query sent while the first is still being
//! answered waits its turn instead of interleaving.  Different sessions have
//! different workers and never wait on each other.  A full queue is reported
//! to the caller of [`SessionWorker::try_submit`] instead of parking it.

use std::sync::Arc;
use std::time::Duration;

use facelink_types::{FaceError, RelayMessage};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::query_client::{DEFAULT_QUERY_TIMEOUT, QueryBackend};

/// Jobs a session may have waiting behind the one in progress.
pub const JOB_QUEUE_CAPACITY: usize = 8;

// ─────────────────────────────────────────────────────────────────────────────
// QueryDispatcher
// ─────────────────────────────────────────────────────────────────────────────

/// Turns one query into the `Processing → Answer | Error` sequence.
pub struct QueryDispatcher {
    backend: Arc<dyn QueryBackend>,
    query_timeout: Duration,
}

impl QueryDispatcher {
    pub fn new(backend: Arc<dyn QueryBackend>) -> Self {
        Self {
            backend,
            query_timeout: DEFAULT_QUERY_TIMEOUT,
        }
    }

    /// Override the per-query upper bound (builder-style).
    pub fn with_timeout(mut self, query_timeout: Duration) -> Self {
        self.query_timeout = query_timeout;
        self
    }

    /// Answer `query`, writing the status sequence to `out`.
    ///
    /// Backend failures become an `Error` message; the session stays usable.
    ///
    /// # Errors
    ///
    /// Returns [`FaceError::Transport`] only if `out` is closed.
    pub async fn dispatch(
        &self,
        query: &str,
        out: &mpsc::Sender<RelayMessage>,
    ) -> Result<(), FaceError> {
        emit(out, RelayMessage::Processing).await?;

        let outcome = match tokio::time::timeout(self.query_timeout, self.backend.ask(query)).await
        {
            Ok(result) => result,
            Err(_) => Err(FaceError::QueryService {
                status: None,
                message: format!("timed out after {} s", self.query_timeout.as_secs()),
            }),
        };

        let reply = match outcome {
            Ok(answer) => RelayMessage::Answer {
                text: answer.answer,
                sources: answer.sources,
            },
            Err(e) => {
                warn!(error = %e, "query failed");
                RelayMessage::Error(format!("Error processing message: {e}"))
            }
        };
        emit(out, reply).await
    }
}

async fn emit(out: &mpsc::Sender<RelayMessage>, msg: RelayMessage) -> Result<(), FaceError> {
    out.send(msg)
        .await
        .map_err(|_| FaceError::Transport("session output closed".into()))
}

// ─────────────────────────────────────────────────────────────────────────────
// SessionWorker
// ─────────────────────────────────────────────────────────────────────────────

/// Unit of work queued on a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Job {
    /// A validated, trimmed query.
    Query(String),
    /// An inbound frame that was refused; the text goes back as an `Error`.
    Reject(String),
}

/// Outcome of [`SessionWorker::try_submit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Queued,
    /// [`JOB_QUEUE_CAPACITY`] jobs are already waiting; the job was dropped.
    Full,
}

/// FIFO executor for one session's jobs.
///
/// Dropping or [`shutdown`][Self::shutdown]-ing the worker aborts the job in
/// progress; its result is never emitted.
pub struct SessionWorker {
    jobs: mpsc::Sender<Job>,
    handle: JoinHandle<()>,
}

impl SessionWorker {
    pub fn spawn(
        dispatcher: Arc<QueryDispatcher>,
        out: mpsc::Sender<RelayMessage>,
        session_id: Uuid,
    ) -> Self {
        let (jobs, mut rx) = mpsc::channel::<Job>(JOB_QUEUE_CAPACITY);
        let handle = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                let result = match job {
                    Job::Query(query) => {
                        info!(%session_id, query = %query, "dispatching query");
                        dispatcher.dispatch(&query, &out).await
                    }
                    Job::Reject(reason) => emit(&out, RelayMessage::Error(reason)).await,
                };
                if result.is_err() {
                    debug!(%session_id, "session output gone, worker exiting");
                    break;
                }
            }
        });
        Self { jobs, handle }
    }

    /// Queue a job, waiting for room if the queue is full.
    ///
    /// # Errors
    ///
    /// Returns [`FaceError::Transport`] if the worker has exited.
    pub async fn submit(&self, job: Job) -> Result<(), FaceError> {
        self.jobs
            .send(job)
            .await
            .map_err(|_| FaceError::Transport("session worker stopped".into()))
    }

    /// Queue a job without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`FaceError::Transport`] if the worker has exited.
    pub fn try_submit(&self, job: Job) -> Result<Admission, FaceError> {
        match self.jobs.try_send(job) {
            Ok(()) => Ok(Admission::Queued),
            Err(TrySendError::Full(_)) => Ok(Admission::Full),
            Err(TrySendError::Closed(_)) => {
                Err(FaceError::Transport("session worker stopped".into()))
            }
        }
    }

    /// Cancel the in-flight job and drop everything still queued.
    pub fn shutdown(self) {
        self.handle.abort();
    }
}

impl Drop for SessionWorker {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
