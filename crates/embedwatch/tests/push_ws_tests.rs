//! WebSocket push channel tests against a local tungstenite server.

use std::sync::{Arc, Mutex};

use futures_util::{SinkExt, StreamExt};
use secrecy::SecretString;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;

use embedwatch::api::{CancelAck, JobApi};
use embedwatch::error::ApiError;
use embedwatch::progress::{JobStatus, ProgressSnapshot};
use embedwatch::tracker::{JobTracker, TrackerCallbacks, TrackerOutcome};
use embedwatch::transport::{PushConnector, ReconcilerSettings, WsConnector};

/// Job API that must never be reached while the push channel works.
struct UnreachableApi;

#[async_trait::async_trait]
impl JobApi for UnreachableApi {
    async fn job_status(&self, job_id: &str) -> Result<ProgressSnapshot, ApiError> {
        Err(ApiError::Request(format!("unexpected poll for {}", job_id)))
    }

    async fn cancel_job(&self, job_id: &str) -> Result<CancelAck, ApiError> {
        Err(ApiError::Request(format!("unexpected cancel for {}", job_id)))
    }
}

/// Accepts one connection, records its request path and sends `frames`.
async fn serve_once(frames: Vec<String>) -> (String, Arc<Mutex<Option<String>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let seen = Arc::new(Mutex::new(None));
    let record = Arc::clone(&seen);

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let callback = |req: &Request, resp: Response| {
            *record.lock().unwrap() = Some(req.uri().to_string());
            Ok::<Response, ErrorResponse>(resp)
        };
        let mut ws = tokio_tungstenite::accept_hdr_async(stream, callback)
            .await
            .unwrap();
        for frame in frames {
            if ws.send(Message::text(frame)).await.is_err() {
                return;
            }
        }
        // Drain until the client closes.
        while let Some(Ok(_)) = ws.next().await {}
    });

    (format!("ws://{}", addr), seen)
}

#[tokio::test]
async fn test_ws_connector_delivers_progress_and_finish() {
    let (url, seen) = serve_once(vec![
        r#"{"type": "progress", "job_id": "job-42", "status": "embedding",
            "processed_documents": 40, "total_documents": 100, "progress_percentage": 40.0}"#
            .to_string(),
        "not json".to_string(),
        r#"{"type": "job_finished", "job_id": "job-42", "status": "COMPLETED"}"#.to_string(),
        r#"{"type": "job_finished", "job_id": "job-42", "status": "COMPLETED"}"#.to_string(),
    ])
    .await;

    let completions = Arc::new(Mutex::new(0));
    let counter = Arc::clone(&completions);
    let connector: Arc<dyn PushConnector> = Arc::new(WsConnector::new(&url));
    let mut tracker = JobTracker::new(
        "job-42",
        Some(SecretString::from("tok")),
        Arc::new(UnreachableApi),
        Some(connector),
        ReconcilerSettings::default(),
    );
    tracker.set_callbacks(TrackerCallbacks::new().on_complete(move |clean| {
        assert!(clean);
        *counter.lock().unwrap() += 1;
    }));

    let outcome = tracker.run().await.unwrap();
    assert_eq!(outcome, TrackerOutcome::Completed { clean: true });
    assert_eq!(*completions.lock().unwrap(), 1);
    assert_eq!(
        seen.lock().unwrap().as_deref(),
        Some("/ws/embeddings/job-42?token=tok")
    );
}

#[tokio::test]
async fn test_ws_channel_ends_on_server_close() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        let _ = ws.close(None).await;
        while let Some(Ok(_)) = ws.next().await {}
    });

    let connector = WsConnector::new(&format!("ws://{}", addr));
    let mut channel = connector
        .connect("job-1", &SecretString::from("tok"))
        .await
        .unwrap();

    assert!(channel.next_message().await.is_none());
}

#[tokio::test]
async fn test_ws_connect_refused() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let connector = WsConnector::new(&format!("ws://{}", addr));
    let result = connector.connect("job-1", &SecretString::from("tok")).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_progress_snapshot_status_parses() {
    let (url, _seen) = serve_once(vec![
        r#"{"type": "progress", "job_id": "job-5", "status": "STORING", "progress_percentage": 97.5}"#
            .to_string(),
    ])
    .await;

    let connector = WsConnector::new(&url);
    let mut channel = connector
        .connect("job-5", &SecretString::from("tok"))
        .await
        .unwrap();

    let snapshot = channel
        .next_message()
        .await
        .unwrap()
        .unwrap()
        .into_snapshot()
        .unwrap();
    assert_eq!(snapshot.status, JobStatus::Storing);
    assert_eq!(snapshot.progress_percentage, 97.5);
    channel.close().await;
}
