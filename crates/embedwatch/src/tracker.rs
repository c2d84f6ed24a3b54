//! Job tracker: follows one embedding job to its terminal outcome.
//!
//! The tracker consumes snapshots from a [`TransportReconciler`], enforces the
//! job state machine and fires exactly one terminal callback. Terminal status
//! is sticky: once applied, nothing changes any more. A lost connection is
//! not a job outcome; the tracker can be started again and still finish.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, info, warn};
use secrecy::SecretString;
use tokio::sync::{mpsc, watch};
use tracing::Instrument;
use uuid::Uuid;

use crate::api::{CancelAck, HttpApiClient, JobApi};
use crate::config::WatchConfig;
use crate::error::{ApiError, TransportError};
use crate::progress::{display_percentage, JobStatus, ProgressSnapshot};
use crate::transport::{
    PushConnector, ReconcilerSettings, TransportEvent, TransportReconciler, TransportState,
    WsConnector,
};

/// Message passed to `on_error` when the failed job reported no error text.
pub const DEFAULT_FAILURE_MESSAGE: &str = "Embedding job failed";

type CompleteFn = Box<dyn FnMut(bool) + Send>;
type ErrorFn = Box<dyn FnMut(String) + Send>;
type CancelFn = Box<dyn FnMut() + Send>;

/// Terminal callbacks. At most one of them fires per tracker.
#[derive(Default)]
pub struct TrackerCallbacks {
    on_complete: Option<CompleteFn>,
    on_error: Option<ErrorFn>,
    on_cancel: Option<CancelFn>,
}

impl TrackerCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called with `true` when the job completed without failed documents.
    pub fn on_complete(mut self, f: impl FnMut(bool) + Send + 'static) -> Self {
        self.on_complete = Some(Box::new(f));
        self
    }

    /// Called with the most recent error message of a failed job.
    pub fn on_error(mut self, f: impl FnMut(String) + Send + 'static) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }

    pub fn on_cancel(mut self, f: impl FnMut() + Send + 'static) -> Self {
        self.on_cancel = Some(Box::new(f));
        self
    }
}

impl std::fmt::Debug for TrackerCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackerCallbacks")
            .field("on_complete", &self.on_complete.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_cancel", &self.on_cancel.is_some())
            .finish()
    }
}

/// Where the tracker is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerPhase {
    /// No snapshot received yet.
    Connecting,
    /// Job is running in the given pipeline status.
    Active(JobStatus),
    /// Job reached a terminal status.
    Finished(JobStatus),
}

/// Observable state for the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackerView {
    pub job_id: String,
    pub phase: TrackerPhase,
    pub snapshot: Option<ProgressSnapshot>,
    /// Never decreases while the job runs; 100 once completed.
    pub display_percentage: f64,
    /// Why updates stopped. Cleared when a new observation starts.
    pub connection_lost: Option<String>,
    pub cancel_pending: bool,
    pub cancel_error: Option<String>,
}

impl TrackerView {
    fn new(job_id: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            phase: TrackerPhase::Connecting,
            snapshot: None,
            display_percentage: 0.0,
            connection_lost: None,
            cancel_pending: false,
            cancel_error: None,
        }
    }
}

/// Result of feeding one snapshot to the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotOutcome {
    Applied,
    /// Applied and the job is now finished.
    Terminal,
    /// Out of order, for another job, or after the terminal status.
    Ignored,
}

/// How a tracking session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerOutcome {
    Completed { clean: bool },
    Failed { message: String },
    Cancelled,
    ConnectionLost { reason: String },
}

/// Result of a cancel request.
#[derive(Debug, Clone, PartialEq)]
pub enum CancelOutcome {
    /// The server accepted the request; the job is cancelled once the tracked
    /// channel reports it.
    Requested(CancelAck),
    /// Another cancel request is still in flight.
    AlreadyPending,
    /// The job already finished.
    AlreadyFinished,
}

/// Clonable handle that cancels the tracked job while the tracker runs.
#[derive(Clone)]
pub struct CancelHandle {
    job_id: String,
    api: Arc<dyn JobApi>,
    in_flight: Arc<AtomicBool>,
    view: Arc<watch::Sender<TrackerView>>,
}

impl CancelHandle {
    pub fn is_pending(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Sends a cancel request. Does not change the tracked job state.
    pub async fn cancel(&self) -> Result<CancelOutcome, ApiError> {
        if matches!(self.view.borrow().phase, TrackerPhase::Finished(_)) {
            return Ok(CancelOutcome::AlreadyFinished);
        }
        if self.in_flight.swap(true, Ordering::AcqRel) {
            debug!("Cancel for job {} already in flight", self.job_id);
            return Ok(CancelOutcome::AlreadyPending);
        }

        let pending = PendingCancel {
            in_flight: &self.in_flight,
            view: &self.view,
        };
        self.view.send_modify(|view| {
            view.cancel_pending = true;
            view.cancel_error = None;
        });

        let result = self.api.cancel_job(&self.job_id).await;
        drop(pending);

        if let Err(e) = &result {
            let message = e.to_string();
            self.view.send_modify(|view| view.cancel_error = Some(message));
        }

        match result {
            Ok(ack) => {
                info!("Cancel requested for job {}", self.job_id);
                Ok(CancelOutcome::Requested(ack))
            }
            Err(e) => {
                warn!("Cancel request for job {} rejected: {}", self.job_id, e);
                Err(e)
            }
        }
    }
}

/// Clears the pending flag when a cancel request ends, including when the
/// caller drops the request future.
struct PendingCancel<'a> {
    in_flight: &'a AtomicBool,
    view: &'a watch::Sender<TrackerView>,
}

impl Drop for PendingCancel<'_> {
    fn drop(&mut self) {
        self.in_flight.store(false, Ordering::Release);
        self.view
            .send_if_modified(|view| std::mem::replace(&mut view.cancel_pending, false));
    }
}

/// Tracks a single embedding job.
pub struct JobTracker {
    job_id: String,
    session_id: Uuid,
    credential: Option<SecretString>,
    reconciler: TransportReconciler,
    events: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    callbacks: TrackerCallbacks,
    last_rank: Option<u8>,
    /// Set once, by the terminal snapshot.
    outcome: Option<TrackerOutcome>,
    view: Arc<watch::Sender<TrackerView>>,
    cancel: CancelHandle,
}

impl JobTracker {
    pub fn new(
        job_id: &str,
        credential: Option<SecretString>,
        job_api: Arc<dyn JobApi>,
        push: Option<Arc<dyn PushConnector>>,
        settings: ReconcilerSettings,
    ) -> Self {
        let (view, _) = watch::channel(TrackerView::new(job_id));
        let view = Arc::new(view);
        let cancel = CancelHandle {
            job_id: job_id.to_string(),
            api: Arc::clone(&job_api),
            in_flight: Arc::new(AtomicBool::new(false)),
            view: Arc::clone(&view),
        };

        Self {
            job_id: job_id.to_string(),
            session_id: Uuid::new_v4(),
            credential,
            reconciler: TransportReconciler::new(job_api, push, settings),
            events: None,
            callbacks: TrackerCallbacks::default(),
            last_rank: None,
            outcome: None,
            view,
            cancel,
        }
    }

    /// Creates a tracker talking HTTP and WebSocket to the configured server.
    pub fn from_config(
        job_id: &str,
        credential: Option<SecretString>,
        config: &WatchConfig,
    ) -> Result<Self, ApiError> {
        let api: Arc<dyn JobApi> = Arc::new(HttpApiClient::from_config(config, credential.clone())?);
        let push: Arc<dyn PushConnector> = Arc::new(WsConnector::from_config(config));
        Ok(Self::new(
            job_id,
            credential,
            api,
            Some(push),
            ReconcilerSettings::from_config(config),
        ))
    }

    /// Replaces the terminal callbacks.
    pub fn set_callbacks(&mut self, callbacks: TrackerCallbacks) {
        self.callbacks = callbacks;
    }

    pub fn subscribe(&self) -> watch::Receiver<TrackerView> {
        self.view.subscribe()
    }

    pub fn view(&self) -> TrackerView {
        self.view.borrow().clone()
    }

    pub fn transport_state(&self) -> TransportState {
        self.reconciler.state()
    }

    pub fn outcome(&self) -> Option<&TrackerOutcome> {
        self.outcome.as_ref()
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub async fn cancel(&self) -> Result<CancelOutcome, ApiError> {
        self.cancel.cancel().await
    }

    pub fn dismiss_cancel_error(&self) {
        self.view.send_modify(|view| view.cancel_error = None);
    }

    /// Opens the update channel, replacing a lost one. No-op once the job
    /// has finished.
    pub fn start(&mut self) -> Result<(), TransportError> {
        if self.outcome.is_some() {
            return Ok(());
        }
        let events = self.reconciler.open(&self.job_id, self.credential.as_ref())?;
        self.events = Some(events);
        self.view
            .send_if_modified(|view| view.connection_lost.take().is_some());
        Ok(())
    }

    /// Follows the job until it finishes or updates stop. After a
    /// `ConnectionLost` return, calling `run` again opens a new observation.
    pub async fn run(&mut self) -> Result<TrackerOutcome, TransportError> {
        let span = tracing::info_span!(
            "embedwatch.track",
            job_id = %self.job_id,
            session = %self.session_id
        );
        self.run_inner().instrument(span).await
    }

    async fn run_inner(&mut self) -> Result<TrackerOutcome, TransportError> {
        if let Some(outcome) = &self.outcome {
            return Ok(outcome.clone());
        }
        if self.events.is_none() {
            self.start()?;
        }

        loop {
            let event = match self.events.as_mut() {
                Some(events) => events.recv().await,
                None => None,
            };

            let error = match event {
                Some(TransportEvent::Snapshot(snapshot)) => {
                    if self.on_snapshot(snapshot) == SnapshotOutcome::Terminal {
                        if let Some(outcome) = &self.outcome {
                            return Ok(outcome.clone());
                        }
                    }
                    continue;
                }
                Some(TransportEvent::Lost(error)) => error,
                None => TransportError::PushClosed("update channel ended".to_string()),
            };

            self.on_transport_error(&error);
            return Ok(TrackerOutcome::ConnectionLost {
                reason: error.to_string(),
            });
        }
    }

    /// Applies one snapshot.
    pub fn on_snapshot(&mut self, snapshot: ProgressSnapshot) -> SnapshotOutcome {
        if self.outcome.is_some() {
            debug!(
                "Ignoring {} snapshot for finished job {}",
                snapshot.status.as_str(),
                self.job_id
            );
            return SnapshotOutcome::Ignored;
        }
        if snapshot.job_id != self.job_id {
            debug!("Ignoring snapshot for unrelated job {}", snapshot.job_id);
            return SnapshotOutcome::Ignored;
        }

        if let (Some(rank), Some(last)) = (snapshot.status.pipeline_rank(), self.last_rank) {
            if rank < last {
                debug!(
                    "Ignoring out-of-order {} snapshot for job {}",
                    snapshot.status.as_str(),
                    self.job_id
                );
                return SnapshotOutcome::Ignored;
            }
        }

        let status = snapshot.status;
        if let Some(rank) = status.pipeline_rank() {
            self.last_rank = Some(rank);
            let pct = display_percentage(&snapshot);
            self.view.send_modify(|view| {
                view.phase = TrackerPhase::Active(status);
                view.display_percentage = view.display_percentage.max(pct);
                view.snapshot = Some(snapshot);
                view.connection_lost = None;
            });
            return SnapshotOutcome::Applied;
        }

        let previous = self.view.borrow().snapshot.clone();
        let outcome = terminal_outcome(&snapshot, previous.as_ref());
        self.view.send_modify(|view| {
            view.phase = TrackerPhase::Finished(status);
            if status == JobStatus::Completed {
                view.display_percentage = 100.0;
            }
            view.snapshot = Some(snapshot);
            view.connection_lost = None;
        });

        info!("Job {} finished: {:?}", self.job_id, outcome);
        self.outcome = Some(outcome.clone());
        self.fire_terminal(outcome);
        self.close();
        SnapshotOutcome::Terminal
    }

    /// Records a channel failure and closes the channel. Never fires
    /// `on_error` and never finishes the job: it may still be running.
    pub fn on_transport_error(&mut self, error: &TransportError) {
        if self.outcome.is_some() {
            return;
        }
        let reason = error.to_string();
        warn!("Lost connection to job {}: {}", self.job_id, reason);

        self.view
            .send_modify(|view| view.connection_lost = Some(reason));
        self.close();
    }

    /// Only called for the snapshot that set `outcome`, so it runs once.
    fn fire_terminal(&mut self, outcome: TrackerOutcome) {
        match outcome {
            TrackerOutcome::Completed { clean } => {
                if let Some(f) = self.callbacks.on_complete.as_mut() {
                    f(clean);
                }
            }
            TrackerOutcome::Failed { message } => {
                if let Some(f) = self.callbacks.on_error.as_mut() {
                    f(message);
                }
            }
            TrackerOutcome::Cancelled => {
                if let Some(f) = self.callbacks.on_cancel.as_mut() {
                    f();
                }
            }
            TrackerOutcome::ConnectionLost { .. } => {}
        }
    }

    /// Stops the update channel. Idempotent.
    pub fn close(&mut self) {
        self.reconciler.close();
        self.events = None;
    }
}

/// Outcome for a terminal snapshot. A status-only terminal snapshot falls back
/// to the previous snapshot for error text and failure counts.
fn terminal_outcome(snapshot: &ProgressSnapshot, previous: Option<&ProgressSnapshot>) -> TrackerOutcome {
    match snapshot.status {
        JobStatus::Completed => {
            let failed = snapshot
                .failed_documents
                .max(previous.map_or(0, |p| p.failed_documents));
            TrackerOutcome::Completed { clean: failed == 0 }
        }
        JobStatus::Cancelled => TrackerOutcome::Cancelled,
        _ => {
            let message = snapshot
                .latest_error()
                .or_else(|| previous.and_then(ProgressSnapshot::latest_error))
                .unwrap_or(DEFAULT_FAILURE_MESSAGE)
                .to_string();
            TrackerOutcome::Failed { message }
        }
    }
}
