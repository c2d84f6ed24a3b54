//! Owns the single active update channel for one job observation.
//!
//! The reconciler runs one tokio task per observation. The task walks an
//! explicit state machine:
//!
//! ```text
//! Idle ──► PushConnecting ──► PushActive ──► Closed
//!   │             │                │
//!   │             └──── error ─────┴──► Polling ──► Closed
//!   └──────── no credential ───────────►
//! ```
//!
//! Only `PushActive` holds a socket and only `Polling` holds a poll timer, so
//! the two transports are never active at the same time. Push is attempted at
//! most once per observation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{BoxFuture, OptionFuture};
use log::{debug, info, warn};
use secrecy::SecretString;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::Instrument;

use super::push::PushConnector;
use crate::api::JobApi;
use crate::config::WatchConfig;
use crate::credentials::is_usable;
use crate::error::{ApiError, TransportError};
use crate::progress::ProgressSnapshot;

/// Which transport, if any, is currently live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Idle,
    PushConnecting,
    PushActive,
    Polling,
    Closed,
}

/// Item delivered to the consumer of an observation.
#[derive(Debug)]
pub enum TransportEvent {
    /// A normalized update from either channel.
    Snapshot(ProgressSnapshot),
    /// Polling failed; the observation is over without a job outcome.
    Lost(TransportError),
}

/// Timing knobs of the reconciler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcilerSettings {
    pub poll_interval: Duration,
    pub push_connect_timeout: Duration,
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            push_connect_timeout: Duration::from_secs(10),
        }
    }
}

impl ReconcilerSettings {
    pub fn from_config(config: &WatchConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            push_connect_timeout: config.push_connect_timeout(),
        }
    }
}

/// Delivers a best-effort stream of snapshots for one job at a time.
pub struct TransportReconciler {
    job_api: Arc<dyn JobApi>,
    push: Option<Arc<dyn PushConnector>>,
    settings: ReconcilerSettings,
    state: Arc<watch::Sender<TransportState>>,
    active: Option<ActiveObservation>,
}

struct ActiveObservation {
    task: JoinHandle<()>,
    shutdown: Arc<AtomicBool>,
}

impl TransportReconciler {
    /// Creates a reconciler. Without a push connector it always polls.
    pub fn new(
        job_api: Arc<dyn JobApi>,
        push: Option<Arc<dyn PushConnector>>,
        settings: ReconcilerSettings,
    ) -> Self {
        let (state, _) = watch::channel(TransportState::Idle);
        Self {
            job_api,
            push,
            settings,
            state: Arc::new(state),
            active: None,
        }
    }

    /// Current transport state.
    pub fn state(&self) -> TransportState {
        *self.state.borrow()
    }

    /// Receiver that observes every state change.
    pub fn watch_state(&self) -> watch::Receiver<TransportState> {
        self.state.subscribe()
    }

    pub fn is_open(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|active| !active.task.is_finished())
    }

    /// Starts observing `job_id`.
    ///
    /// Without a usable credential the push channel is skipped and polling
    /// starts immediately. Any previous observation is closed first. Must be
    /// called from within a tokio runtime.
    pub fn open(
        &mut self,
        job_id: &str,
        credential: Option<&SecretString>,
    ) -> Result<mpsc::UnboundedReceiver<TransportEvent>, TransportError> {
        if job_id.trim().is_empty() {
            return Err(TransportError::EmptyJobId);
        }
        self.close();

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        self.state.send_replace(TransportState::Idle);

        let push = match (&self.push, credential) {
            (Some(connector), Some(credential)) if is_usable(Some(credential)) => {
                Some((Arc::clone(connector), credential.clone()))
            }
            _ => None,
        };

        let shutdown = Arc::new(AtomicBool::new(false));
        let observation = Observation {
            job_id: job_id.to_string(),
            job_api: Arc::clone(&self.job_api),
            settings: self.settings,
            state: Arc::clone(&self.state),
            events: events_tx,
            shutdown: Arc::clone(&shutdown),
        };
        let span = tracing::info_span!("embedwatch.observe", job_id = %job_id);
        let task = tokio::spawn(observation.run(push).instrument(span));
        self.active = Some(ActiveObservation { task, shutdown });

        Ok(events_rx)
    }

    /// Stops whichever transport is active. Idempotent.
    pub fn close(&mut self) {
        if let Some(active) = self.active.take() {
            // The flag keeps a task that is mid-poll on another worker from
            // publishing after this point.
            active.shutdown.store(true, Ordering::Release);
            active.task.abort();
            self.state.send_replace(TransportState::Closed);
            debug!("Transport closed");
        }
    }
}

impl Drop for TransportReconciler {
    fn drop(&mut self) {
        self.close();
    }
}

/// State owned by the observation task.
struct Observation {
    job_id: String,
    job_api: Arc<dyn JobApi>,
    settings: ReconcilerSettings,
    state: Arc<watch::Sender<TransportState>>,
    events: mpsc::UnboundedSender<TransportEvent>,
    shutdown: Arc<AtomicBool>,
}

enum PushOutcome {
    /// Terminal snapshot delivered or consumer gone; nothing left to do.
    Done,
    /// Channel unavailable or broken before a terminal snapshot.
    Failed(String),
}

impl Observation {
    async fn run(self, push: Option<(Arc<dyn PushConnector>, SecretString)>) {
        match push {
            Some((connector, credential)) => {
                match self.run_push(connector.as_ref(), &credential).await {
                    PushOutcome::Done => {
                        self.set_state(TransportState::Closed);
                        return;
                    }
                    PushOutcome::Failed(reason) => {
                        warn!(
                            "Push channel for job {} unavailable ({}), falling back to polling",
                            self.job_id, reason
                        );
                    }
                }
            }
            None => info!("Polling job {} without push channel", self.job_id),
        }

        self.run_poll().await;
        self.set_state(TransportState::Closed);
    }

    fn is_shut_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    fn set_state(&self, state: TransportState) {
        if !self.is_shut_down() {
            self.state.send_replace(state);
        }
    }

    /// Returns false when the consumer is gone or the observation was closed.
    fn deliver(&self, snapshot: ProgressSnapshot) -> bool {
        !self.is_shut_down() && self.events.send(TransportEvent::Snapshot(snapshot)).is_ok()
    }

    async fn run_push(&self, connector: &dyn PushConnector, credential: &SecretString) -> PushOutcome {
        self.set_state(TransportState::PushConnecting);

        let connect = connector.connect(&self.job_id, credential);
        let mut channel = match tokio::time::timeout(self.settings.push_connect_timeout, connect).await
        {
            Ok(Ok(channel)) => channel,
            Ok(Err(e)) => return PushOutcome::Failed(e.to_string()),
            Err(_) => {
                return PushOutcome::Failed(format!(
                    "no connection after {:?}",
                    self.settings.push_connect_timeout
                ))
            }
        };

        self.set_state(TransportState::PushActive);
        info!("Push channel established for job {}", self.job_id);

        loop {
            let message = match channel.next_message().await {
                Some(Ok(message)) => message,
                Some(Err(e)) => return PushOutcome::Failed(e.to_string()),
                None => return PushOutcome::Failed("closed by server".to_string()),
            };

            if message.job_id() != self.job_id {
                debug!(
                    "Ignoring push message for job {} on channel of {}",
                    message.job_id(),
                    self.job_id
                );
                continue;
            }
            let Some(snapshot) = message.into_snapshot() else {
                continue;
            };

            let terminal = snapshot.is_terminal();
            if !self.deliver(snapshot) || terminal {
                channel.close().await;
                return PushOutcome::Done;
            }
        }
    }

    async fn run_poll(&self) {
        self.set_state(TransportState::Polling);

        let mut ticker = tokio::time::interval(self.settings.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut in_flight: Option<BoxFuture<'static, Result<ProgressSnapshot, ApiError>>> = None;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if in_flight.is_some() {
                        debug!("Poll for job {} still in flight, skipping tick", self.job_id);
                        continue;
                    }
                    let api = Arc::clone(&self.job_api);
                    let job_id = self.job_id.clone();
                    in_flight = Some(Box::pin(async move { api.job_status(&job_id).await }));
                }
                Some(result) = OptionFuture::from(in_flight.as_mut()), if in_flight.is_some() => {
                    in_flight = None;
                    match result {
                        Ok(snapshot) => {
                            let terminal = snapshot.is_terminal();
                            if !self.deliver(snapshot) || terminal {
                                return;
                            }
                        }
                        Err(e) => {
                            warn!("Polling job {} failed, giving up: {}", self.job_id, e);
                            let _ = self.events.send(TransportEvent::Lost(TransportError::Poll(e)));
                            return;
                        }
                    }
                }
            }
        }
    }
}
