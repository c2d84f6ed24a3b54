//! Job progress model and its display helpers.

pub mod format;
pub mod snapshot;
pub mod status;

pub use format::{display_percentage, format_duration, summary_line};
pub use snapshot::{Eta, ProgressSnapshot, MAX_DISPLAYED_ERRORS};
pub use status::JobStatus;
