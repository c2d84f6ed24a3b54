//! Push channel: server-initiated job updates over a WebSocket.

use async_trait::async_trait;
use futures_util::StreamExt;
use log::debug;
use reqwest::Url;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::config::WatchConfig;
use crate::error::TransportError;
use crate::progress::{JobStatus, ProgressSnapshot};

/// Message received on the push channel, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushMessage {
    /// Full progress update.
    Progress(ProgressSnapshot),
    /// The job reached its final status.
    JobFinished { job_id: String, status: JobStatus },
}

impl PushMessage {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn job_id(&self) -> &str {
        match self {
            PushMessage::Progress(snapshot) => &snapshot.job_id,
            PushMessage::JobFinished { job_id, .. } => job_id,
        }
    }

    /// Normalizes the message into a snapshot.
    ///
    /// `job_finished` becomes a status-only snapshot. Returns `None` for a
    /// `job_finished` that carries a non-terminal status.
    pub fn into_snapshot(self) -> Option<ProgressSnapshot> {
        match self {
            PushMessage::Progress(snapshot) => Some(snapshot),
            PushMessage::JobFinished { job_id, status } if status.is_terminal() => {
                Some(ProgressSnapshot::terminal(&job_id, status))
            }
            PushMessage::JobFinished { job_id, status } => {
                log::warn!(
                    "Ignoring job_finished for {} with non-terminal status {}",
                    job_id,
                    status.as_str()
                );
                None
            }
        }
    }
}

/// Opens push channels for jobs.
#[async_trait]
pub trait PushConnector: Send + Sync {
    async fn connect(
        &self,
        job_id: &str,
        credential: &SecretString,
    ) -> Result<Box<dyn PushChannel>, TransportError>;
}

/// An established push channel.
#[async_trait]
pub trait PushChannel: Send {
    /// Next decoded message. `None` means the server closed the channel.
    async fn next_message(&mut self) -> Option<Result<PushMessage, TransportError>>;

    async fn close(&mut self);
}

/// WebSocket connector.
///
/// The credential travels as a `token` query parameter because the browser
/// WebSocket API the server was built for cannot set headers.
pub struct WsConnector {
    base_url: String,
}

impl WsConnector {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn from_config(config: &WatchConfig) -> Self {
        Self::new(&config.push_base_url())
    }

    /// `{base}/ws/embeddings/{job_id}?token={credential}`
    pub fn channel_url(&self, job_id: &str, credential: &SecretString) -> Result<Url, TransportError> {
        let mut url = Url::parse(&self.base_url).map_err(|e| {
            TransportError::PushConnect(format!("invalid push URL '{}': {}", self.base_url, e))
        })?;
        url.path_segments_mut()
            .map_err(|_| {
                TransportError::PushConnect(format!("push URL '{}' cannot carry a path", self.base_url))
            })?
            .pop_if_empty()
            .extend(["ws", "embeddings", job_id]);
        url.query_pairs_mut()
            .append_pair("token", credential.expose_secret());
        Ok(url)
    }
}

#[async_trait]
impl PushConnector for WsConnector {
    async fn connect(
        &self,
        job_id: &str,
        credential: &SecretString,
    ) -> Result<Box<dyn PushChannel>, TransportError> {
        let url = self.channel_url(job_id, credential)?;
        debug!("Connecting push channel for job {} at {}", job_id, self.base_url);

        let (stream, _) = connect_async(url.as_str())
            .await
            .map_err(|e| TransportError::PushConnect(e.to_string()))?;

        Ok(Box::new(WsChannel { stream }))
    }
}

struct WsChannel {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl PushChannel for WsChannel {
    async fn next_message(&mut self) -> Option<Result<PushMessage, TransportError>> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => match PushMessage::parse(text.as_str()) {
                    Ok(message) => return Some(Ok(message)),
                    Err(e) => debug!("Ignoring undecodable push message: {}", e),
                },
                Some(Ok(Message::Close(frame))) => {
                    debug!("Push channel closed by server: {:?}", frame);
                    return None;
                }
                // Pings are answered by tungstenite while reading.
                Some(Ok(_)) => {}
                Some(Err(e)) => return Some(Err(TransportError::PushClosed(e.to_string()))),
                None => return None,
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            debug!("Error while closing push channel: {}", e);
        }
    }
}
