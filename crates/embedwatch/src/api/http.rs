//! reqwest implementation of the job and schedule APIs.

use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info};
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;

use super::{CancelAck, JobApi, ScheduleApi, TriggerAck};
use crate::config::WatchConfig;
use crate::error::ApiError;
use crate::progress::ProgressSnapshot;
use crate::schedule::ScheduleDescriptor;

/// Default connect timeout for HTTP requests (10 seconds).
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default request timeout for HTTP requests (30 seconds).
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

fn create_http_client(connect_timeout: Duration, timeout: Duration) -> Result<Client, ApiError> {
    Client::builder()
        .connect_timeout(connect_timeout)
        .timeout(timeout)
        .build()
        .map_err(|e| ApiError::Client(e.to_string()))
}

/// HTTP client for the embedding server.
pub struct HttpApiClient {
    client: Client,
    base_url: Url,
    credential: Option<SecretString>,
}

impl HttpApiClient {
    /// Creates a client with the default timeouts.
    pub fn new(base_url: &str, credential: Option<SecretString>) -> Result<Self, ApiError> {
        Self::with_timeouts(
            base_url,
            credential,
            DEFAULT_CONNECT_TIMEOUT,
            DEFAULT_REQUEST_TIMEOUT,
        )
    }

    /// Creates a client using the URL and timeouts from a config.
    pub fn from_config(
        config: &WatchConfig,
        credential: Option<SecretString>,
    ) -> Result<Self, ApiError> {
        Self::with_timeouts(
            &config.api_url,
            credential,
            config.connect_timeout(),
            config.request_timeout(),
        )
    }

    pub fn with_timeouts(
        base_url: &str,
        credential: Option<SecretString>,
        connect_timeout: Duration,
        timeout: Duration,
    ) -> Result<Self, ApiError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| ApiError::Client(format!("Invalid base URL '{}': {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(ApiError::Client(format!(
                "Base URL '{}' cannot carry a path",
                base_url
            )));
        }

        Ok(Self {
            client: create_http_client(connect_timeout, timeout)?,
            base_url,
            credential,
        })
    }

    /// Builds `base/segments...` with each segment percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.credential {
            Some(token) => builder.bearer_auth(token.expose_secret()),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder, what: &str) -> Result<Response, ApiError> {
        let response = self
            .authorized(builder)
            .send()
            .await
            .map_err(|e| ApiError::Request(format!("{}: {}", what, e)))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(ApiError::NotFound(what.to_string()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response)
    }

    async fn decode<T: DeserializeOwned>(response: Response, what: &str) -> Result<T, ApiError> {
        response
            .json()
            .await
            .map_err(|e| ApiError::Decode(format!("{}: {}", what, e)))
    }

    /// Decodes an acknowledgement body, which may be empty or plain text.
    async fn decode_ack<T>(response: Response, plain: impl FnOnce(String) -> T) -> T
    where
        T: DeserializeOwned + Default,
    {
        let body = response.text().await.unwrap_or_default();
        if body.trim().is_empty() {
            return T::default();
        }
        serde_json::from_str(&body).unwrap_or_else(|_| plain(body))
    }
}

#[async_trait]
impl JobApi for HttpApiClient {
    async fn job_status(&self, job_id: &str) -> Result<ProgressSnapshot, ApiError> {
        let url = self.endpoint(&["api", "embeddings", "jobs", job_id]);
        debug!("Fetching job status from {}", url);

        let what = format!("job '{}'", job_id);
        let response = self.send(self.client.get(url), &what).await?;
        Self::decode(response, &what).await
    }

    async fn cancel_job(&self, job_id: &str) -> Result<CancelAck, ApiError> {
        let url = self.endpoint(&["api", "embeddings", "jobs", job_id, "cancel"]);
        info!("Requesting cancellation of job {}", job_id);

        let what = format!("job '{}'", job_id);
        let response = self.send(self.client.post(url), &what).await?;
        Ok(Self::decode_ack(response, |text| CancelAck {
            message: Some(text),
        })
        .await)
    }
}

#[async_trait]
impl ScheduleApi for HttpApiClient {
    async fn get_schedule(&self, target: &str) -> Result<Option<ScheduleDescriptor>, ApiError> {
        let url = self.endpoint(&["api", "schedules", target]);
        let what = format!("schedule '{}'", target);

        match self.send(self.client.get(url), &what).await {
            Ok(response) => Self::decode(response, &what).await.map(Some),
            Err(ApiError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn save_schedule(
        &self,
        descriptor: &ScheduleDescriptor,
    ) -> Result<ScheduleDescriptor, ApiError> {
        let url = self.endpoint(&["api", "schedules", &descriptor.vector_db_name]);
        info!(
            "Saving {} schedule for {}",
            descriptor.schedule_type, descriptor.vector_db_name
        );

        let what = format!("schedule '{}'", descriptor.vector_db_name);
        let response = self
            .send(self.client.post(url).json(descriptor), &what)
            .await?;
        Self::decode(response, &what).await
    }

    async fn delete_schedule(&self, target: &str) -> Result<(), ApiError> {
        let url = self.endpoint(&["api", "schedules", target]);
        info!("Deleting schedule for {}", target);

        let what = format!("schedule '{}'", target);
        self.send(self.client.delete(url), &what).await?;
        Ok(())
    }

    async fn trigger_schedule(&self, target: &str) -> Result<TriggerAck, ApiError> {
        let url = self.endpoint(&["api", "schedules", target, "trigger"]);
        info!("Triggering immediate run for {}", target);

        let what = format!("schedule '{}'", target);
        let response = self.send(self.client.post(url), &what).await?;
        Ok(Self::decode_ack(response, |text| TriggerAck {
            message: Some(text),
            job_id: None,
        })
        .await)
    }
}
