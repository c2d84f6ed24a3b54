//! Human-readable rendering of progress values.

use super::snapshot::{Eta, ProgressSnapshot};
use super::status::JobStatus;

/// Percentage to display for a snapshot.
///
/// Completed jobs always show 100; anything else is clamped to 0-100.
pub fn display_percentage(snapshot: &ProgressSnapshot) -> f64 {
    if snapshot.status == JobStatus::Completed {
        return 100.0;
    }
    let pct = snapshot.progress_percentage;
    if pct.is_nan() {
        0.0
    } else {
        pct.clamp(0.0, 100.0)
    }
}

/// Formats a duration in seconds as `45s`, `3m 05s`, `2h 03m 05s` or
/// `1d 02h 03m`.
pub fn format_duration(total_secs: u64) -> String {
    let days = total_secs / 86_400;
    let hours = (total_secs % 86_400) / 3_600;
    let minutes = (total_secs % 3_600) / 60;
    let seconds = total_secs % 60;

    if days > 0 {
        format!("{}d {:02}h {:02}m", days, hours, minutes)
    } else if hours > 0 {
        format!("{}h {:02}m {:02}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {:02}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

pub fn format_eta(eta: Eta) -> String {
    match eta {
        Eta::Unknown => "unknown".to_string(),
        Eta::AlmostDone => "almost done".to_string(),
        Eta::Remaining(secs) => format_duration(secs),
    }
}

pub fn format_throughput(documents_per_second: Option<f64>) -> String {
    match documents_per_second {
        Some(rate) if rate.is_finite() && rate >= 0.0 => format!("{:.1} docs/s", rate),
        _ => "n/a".to_string(),
    }
}

/// One-line summary of a snapshot, e.g.
/// `Embedding: 40/100 documents (40.0%), batch 2/5, 12.5 docs/s, ETA 5s`.
pub fn summary_line(snapshot: &ProgressSnapshot) -> String {
    let mut line = format!(
        "{}: {}/{} documents ({:.1}%)",
        snapshot.status,
        snapshot.processed_documents,
        snapshot.total_documents,
        display_percentage(snapshot)
    );

    if snapshot.failed_documents > 0 {
        line.push_str(&format!(", {} failed", snapshot.failed_documents));
    }
    if snapshot.total_batches > 0 {
        line.push_str(&format!(
            ", batch {}/{}",
            snapshot.current_batch, snapshot.total_batches
        ));
    }
    if !snapshot.is_terminal() {
        line.push_str(&format!(
            ", {}, ETA {}",
            format_throughput(snapshot.documents_per_second),
            format_eta(snapshot.eta())
        ));
    }

    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completed_displays_full_percentage() {
        let mut snapshot = ProgressSnapshot::new("j", JobStatus::Completed);
        snapshot.progress_percentage = 97.0;
        assert_eq!(display_percentage(&snapshot), 100.0);
    }

    #[test]
    fn test_percentage_is_clamped() {
        let mut snapshot = ProgressSnapshot::new("j", JobStatus::Embedding);
        snapshot.progress_percentage = 140.0;
        assert_eq!(display_percentage(&snapshot), 100.0);
        snapshot.progress_percentage = -3.0;
        assert_eq!(display_percentage(&snapshot), 0.0);
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0), "0s");
        assert_eq!(format_duration(45), "45s");
        assert_eq!(format_duration(185), "3m 05s");
        assert_eq!(format_duration(7_385), "2h 03m 05s");
        assert_eq!(format_duration(93_780), "1d 02h 03m");
    }

    #[test]
    fn test_format_eta_and_throughput() {
        assert_eq!(format_eta(Eta::Unknown), "unknown");
        assert_eq!(format_eta(Eta::AlmostDone), "almost done");
        assert_eq!(format_eta(Eta::Remaining(65)), "1m 05s");
        assert_eq!(format_throughput(Some(12.345)), "12.3 docs/s");
        assert_eq!(format_throughput(None), "n/a");
    }

    #[test]
    fn test_summary_line() {
        let mut snapshot = ProgressSnapshot::new("j", JobStatus::Embedding);
        snapshot.total_documents = 100;
        snapshot.processed_documents = 40;
        snapshot.progress_percentage = 40.0;
        snapshot.current_batch = 2;
        snapshot.total_batches = 5;

        assert_eq!(
            summary_line(&snapshot),
            "Embedding: 40/100 documents (40.0%), batch 2/5, n/a, ETA unknown"
        );
    }
}
