//! In-memory stand-ins for the server side of the tracker.
//!
//! `PushGauge` counts open push channels so tests can assert that polling never
//! overlaps with a live socket.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::{mpsc, Notify};

use embedwatch::api::{CancelAck, JobApi};
use embedwatch::error::{ApiError, TransportError};
use embedwatch::progress::{JobStatus, ProgressSnapshot};
use embedwatch::transport::{PushChannel, PushConnector, PushMessage};

/// Snapshot of `job_id` with `processed` of `total` documents done.
pub fn snapshot(job_id: &str, status: JobStatus, processed: u64, total: u64) -> ProgressSnapshot {
    let mut snapshot = ProgressSnapshot::new(job_id, status);
    snapshot.processed_documents = processed;
    snapshot.total_documents = total;
    if total > 0 {
        snapshot.progress_percentage = processed as f64 * 100.0 / total as f64;
    }
    snapshot
}

/// Number of push channels currently open.
#[derive(Clone, Default)]
pub struct PushGauge(Arc<AtomicUsize>);

impl PushGauge {
    pub fn open(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

/// Job API answering status requests from a script.
///
/// Once the script runs out, the last successful snapshot is repeated.
#[derive(Default)]
pub struct FakeJobApi {
    script: Mutex<VecDeque<Result<ProgressSnapshot, ApiError>>>,
    last: Mutex<Option<ProgressSnapshot>>,
    status_delay: Option<Duration>,
    cancel_gate: Option<Arc<Notify>>,
    cancel_error: Mutex<Option<ApiError>>,
    gauge: Option<PushGauge>,
    pub status_calls: AtomicUsize,
    pub cancel_calls: AtomicUsize,
    /// Status requests issued while a push channel was open.
    pub overlapping_polls: AtomicUsize,
}

impl FakeJobApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(self, result: Result<ProgressSnapshot, ApiError>) -> Self {
        self.script.lock().unwrap().push_back(result);
        self
    }

    pub fn snapshots(self, snapshots: impl IntoIterator<Item = ProgressSnapshot>) -> Self {
        self.script
            .lock()
            .unwrap()
            .extend(snapshots.into_iter().map(Ok));
        self
    }

    pub fn with_status_delay(mut self, delay: Duration) -> Self {
        self.status_delay = Some(delay);
        self
    }

    /// Cancel requests wait until the gate is notified.
    pub fn with_cancel_gate(mut self, gate: Arc<Notify>) -> Self {
        self.cancel_gate = Some(gate);
        self
    }

    pub fn with_cancel_error(self, error: ApiError) -> Self {
        *self.cancel_error.lock().unwrap() = Some(error);
        self
    }

    pub fn watching(mut self, gauge: &PushGauge) -> Self {
        self.gauge = Some(gauge.clone());
        self
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn cancel_calls(&self) -> usize {
        self.cancel_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobApi for FakeJobApi {
    async fn job_status(&self, job_id: &str) -> Result<ProgressSnapshot, ApiError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        if self.gauge.as_ref().is_some_and(|g| g.open() > 0) {
            self.overlapping_polls.fetch_add(1, Ordering::SeqCst);
        }
        if let Some(delay) = self.status_delay {
            tokio::time::sleep(delay).await;
        }

        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Ok(snapshot)) => {
                *self.last.lock().unwrap() = Some(snapshot.clone());
                Ok(snapshot)
            }
            Some(Err(e)) => Err(e),
            None => self
                .last
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| ApiError::NotFound(job_id.to_string())),
        }
    }

    async fn cancel_job(&self, _job_id: &str) -> Result<CancelAck, ApiError> {
        self.cancel_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.cancel_gate {
            gate.notified().await;
        }
        match self.cancel_error.lock().unwrap().take() {
            Some(e) => Err(e),
            None => Ok(CancelAck {
                message: Some("Cancellation requested".to_string()),
            }),
        }
    }
}

/// How `FakePushConnector::connect` behaves.
pub enum ConnectBehavior {
    /// Hand out the scripted channel.
    Accept,
    /// Refuse immediately.
    Refuse,
    /// Never answer.
    Hang,
}

/// Server side of a fake push channel.
pub struct PushServer {
    tx: mpsc::UnboundedSender<Result<PushMessage, TransportError>>,
}

impl PushServer {
    pub fn send(&self, message: PushMessage) {
        let _ = self.tx.send(Ok(message));
    }

    pub fn progress(&self, snapshot: ProgressSnapshot) {
        self.send(PushMessage::Progress(snapshot));
    }

    pub fn finished(&self, job_id: &str, status: JobStatus) {
        self.send(PushMessage::JobFinished {
            job_id: job_id.to_string(),
            status,
        });
    }

    pub fn fail(&self, reason: &str) {
        let _ = self.tx.send(Err(TransportError::PushClosed(reason.to_string())));
    }
}

pub struct FakePushConnector {
    behavior: ConnectBehavior,
    channel: Mutex<Option<mpsc::UnboundedReceiver<Result<PushMessage, TransportError>>>>,
    gauge: PushGauge,
    pub connects: AtomicUsize,
    pub closed: Arc<AtomicBool>,
    pub last_credential: Mutex<Option<String>>,
}

impl FakePushConnector {
    pub fn new(behavior: ConnectBehavior) -> (Self, PushServer) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = Self {
            behavior,
            channel: Mutex::new(Some(rx)),
            gauge: PushGauge::default(),
            connects: AtomicUsize::new(0),
            closed: Arc::new(AtomicBool::new(false)),
            last_credential: Mutex::new(None),
        };
        (connector, PushServer { tx })
    }

    pub fn gauge(&self) -> PushGauge {
        self.gauge.clone()
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn was_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PushConnector for FakePushConnector {
    async fn connect(
        &self,
        job_id: &str,
        credential: &SecretString,
    ) -> Result<Box<dyn PushChannel>, TransportError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        *self.last_credential.lock().unwrap() = Some(credential.expose_secret().to_string());

        match self.behavior {
            ConnectBehavior::Refuse => Err(TransportError::PushConnect(format!(
                "connection refused for {}",
                job_id
            ))),
            ConnectBehavior::Hang => {
                std::future::pending::<Result<Box<dyn PushChannel>, TransportError>>().await
            }
            ConnectBehavior::Accept => {
                let rx = self
                    .channel
                    .lock()
                    .unwrap()
                    .take()
                    .ok_or_else(|| TransportError::PushConnect("already connected".to_string()))?;
                self.gauge.0.fetch_add(1, Ordering::SeqCst);
                Ok(Box::new(FakeChannel {
                    rx,
                    gauge: self.gauge.clone(),
                    closed: Arc::clone(&self.closed),
                }))
            }
        }
    }
}

struct FakeChannel {
    rx: mpsc::UnboundedReceiver<Result<PushMessage, TransportError>>,
    gauge: PushGauge,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl PushChannel for FakeChannel {
    async fn next_message(&mut self) -> Option<Result<PushMessage, TransportError>> {
        self.rx.recv().await
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

impl Drop for FakeChannel {
    fn drop(&mut self) {
        self.gauge.0.fetch_sub(1, Ordering::SeqCst);
    }
}
