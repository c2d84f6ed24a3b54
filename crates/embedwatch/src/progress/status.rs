//! Embedding job status, ordered by pipeline phase.

use serde::{Deserialize, Serialize};

/// Status of an embedding job.
///
/// The non-terminal variants are declared in pipeline order. `Completed`,
/// `Failed` and `Cancelled` are terminal: once reached, the job never moves
/// again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    #[serde(alias = "QUEUED")]
    Queued,
    #[serde(alias = "PREPARING")]
    Preparing,
    #[serde(alias = "EMBEDDING")]
    Embedding,
    #[serde(alias = "VALIDATING")]
    Validating,
    #[serde(alias = "STORING")]
    Storing,
    #[serde(alias = "COMPLETED")]
    Completed,
    #[serde(alias = "FAILED")]
    Failed,
    #[serde(alias = "CANCELLED", alias = "canceled", alias = "CANCELED")]
    Cancelled,
}

impl JobStatus {
    /// Returns true for `Completed`, `Failed` and `Cancelled`.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Position in the pipeline, or `None` for terminal statuses.
    pub fn pipeline_rank(self) -> Option<u8> {
        match self {
            JobStatus::Queued => Some(0),
            JobStatus::Preparing => Some(1),
            JobStatus::Embedding => Some(2),
            JobStatus::Validating => Some(3),
            JobStatus::Storing => Some(4),
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled => None,
        }
    }

    /// Wire name of the status.
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Preparing => "preparing",
            JobStatus::Embedding => "embedding",
            JobStatus::Validating => "validating",
            JobStatus::Storing => "storing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Queued => write!(f, "Queued"),
            JobStatus::Preparing => write!(f, "Preparing documents"),
            JobStatus::Embedding => write!(f, "Embedding"),
            JobStatus::Validating => write!(f, "Validating"),
            JobStatus::Storing => write!(f, "Storing vectors"),
            JobStatus::Completed => write!(f, "Completed"),
            JobStatus::Failed => write!(f, "Failed"),
            JobStatus::Cancelled => write!(f, "Cancelled"),
        }
    }
}
