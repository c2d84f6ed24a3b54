//! Boundary to the server's job-control and schedule APIs.
//!
//! The tracker and the countdown engine only talk to these traits, so tests
//! and alternative transports can stand in for the HTTP client.

pub mod http;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::progress::ProgressSnapshot;
use crate::schedule::ScheduleDescriptor;

pub use http::HttpApiClient;

/// Acknowledgement of a cancel request. The job is not cancelled until the
/// server reports `cancelled` through the tracked channel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CancelAck {
    #[serde(default)]
    pub message: Option<String>,
}

/// Acknowledgement of an out-of-band schedule run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TriggerAck {
    #[serde(default)]
    pub message: Option<String>,
    /// Id of the job started by the trigger, when the server reports one.
    #[serde(default)]
    pub job_id: Option<String>,
}

/// Job status query and cancellation.
#[async_trait]
pub trait JobApi: Send + Sync {
    /// Fetches the current state of a job. A missing job is `ApiError::NotFound`.
    async fn job_status(&self, job_id: &str) -> Result<ProgressSnapshot, ApiError>;

    /// Asks the server to cancel a job.
    async fn cancel_job(&self, job_id: &str) -> Result<CancelAck, ApiError>;
}

/// Schedule CRUD and manual trigger, keyed by target vector database.
#[async_trait]
pub trait ScheduleApi: Send + Sync {
    /// Returns `Ok(None)` when no schedule exists for the target.
    async fn get_schedule(&self, target: &str) -> Result<Option<ScheduleDescriptor>, ApiError>;

    /// Creates or replaces a schedule; the response carries a fresh countdown.
    async fn save_schedule(
        &self,
        descriptor: &ScheduleDescriptor,
    ) -> Result<ScheduleDescriptor, ApiError>;

    async fn delete_schedule(&self, target: &str) -> Result<(), ApiError>;

    /// Starts an immediate run without touching the recurring schedule.
    async fn trigger_schedule(&self, target: &str) -> Result<TriggerAck, ApiError>;
}
