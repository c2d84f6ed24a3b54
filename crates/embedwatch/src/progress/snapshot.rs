//! Point-in-time state of an embedding job.

use serde::{Deserialize, Serialize};

use super::status::JobStatus;

/// Maximum number of recent errors shown to a user.
pub const MAX_DISPLAYED_ERRORS: usize = 3;

/// One immutable observation of a job.
///
/// Every update from either channel produces a fresh snapshot that replaces the
/// previous one wholesale. Counts are taken as reported: the server may briefly
/// report `processed + failed > total` and that is tolerated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    /// Job identifier, stable for the job's lifetime.
    pub job_id: String,
    /// Current status.
    pub status: JobStatus,
    /// Free-text description of the current activity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(default)]
    pub total_documents: u64,
    #[serde(default)]
    pub processed_documents: u64,
    #[serde(default)]
    pub failed_documents: u64,
    /// Server-computed progress in percent (0-100).
    #[serde(default)]
    pub progress_percentage: f64,
    #[serde(default)]
    pub current_batch: u32,
    #[serde(default)]
    pub total_batches: u32,
    #[serde(default)]
    pub documents_per_second: Option<f64>,
    /// Negative means unknown. Zero means almost done.
    #[serde(default)]
    pub estimated_time_remaining_seconds: Option<f64>,
    #[serde(default)]
    pub elapsed_seconds: Option<f64>,
    #[serde(default)]
    pub errors_count: u64,
    /// Oldest first; the server keeps this list bounded.
    #[serde(default)]
    pub recent_errors: Vec<String>,
}

impl ProgressSnapshot {
    /// Creates an empty snapshot for a job in the given status.
    pub fn new(job_id: &str, status: JobStatus) -> Self {
        Self {
            job_id: job_id.to_string(),
            status,
            phase: None,
            total_documents: 0,
            processed_documents: 0,
            failed_documents: 0,
            progress_percentage: 0.0,
            current_batch: 0,
            total_batches: 0,
            documents_per_second: None,
            estimated_time_remaining_seconds: None,
            elapsed_seconds: None,
            errors_count: 0,
            recent_errors: vec![],
        }
    }

    /// Creates a status-only terminal snapshot, as produced from a
    /// `job_finished` push message.
    pub fn terminal(job_id: &str, status: JobStatus) -> Self {
        debug_assert!(status.is_terminal());
        Self::new(job_id, status)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// The most recent error message, if any.
    pub fn latest_error(&self) -> Option<&str> {
        self.recent_errors
            .iter()
            .rev()
            .map(String::as_str)
            .find(|message| !message.trim().is_empty())
    }

    /// The errors to show, most recent last, at most [`MAX_DISPLAYED_ERRORS`].
    pub fn displayed_errors(&self) -> &[String] {
        let skip = self.recent_errors.len().saturating_sub(MAX_DISPLAYED_ERRORS);
        &self.recent_errors[skip..]
    }

    /// Remaining time estimate with the server's sentinel values decoded.
    pub fn eta(&self) -> Eta {
        match self.estimated_time_remaining_seconds {
            None => Eta::Unknown,
            Some(secs) if secs.is_nan() || secs < 0.0 => Eta::Unknown,
            Some(secs) if secs == 0.0 => Eta::AlmostDone,
            Some(secs) => Eta::Remaining(secs.ceil() as u64),
        }
    }
}

/// Decoded remaining-time estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eta {
    Unknown,
    AlmostDone,
    Remaining(u64),
}
