//! Human-readable descriptions of schedules and countdowns.

use super::descriptor::{ScheduleDescriptor, ScheduleType};
use crate::progress::format_duration;

/// Shown for a custom schedule without a cron expression.
pub const EMPTY_CRON_PLACEHOLDER: &str = "Custom schedule (no cron expression)";

const DAY_NAMES: [&str; 7] = [
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
    "Sunday",
];

/// Name of a weekday, 0 = Monday.
pub fn day_name(day_of_week: u32) -> Option<&'static str> {
    DAY_NAMES.get(day_of_week as usize).copied()
}

/// Describes when a schedule runs. Pure function of the descriptor.
pub fn describe(descriptor: &ScheduleDescriptor) -> String {
    let hour = descriptor.hour.unwrap_or(0);
    let minute = descriptor.minute.unwrap_or(0);

    match descriptor.schedule_type {
        ScheduleType::Hourly => format!("Every hour at minute :{:02}", minute),
        ScheduleType::Interval => {
            let gap = descriptor.minute.unwrap_or(1).max(1);
            if gap == 1 {
                "Every 1 minute".to_string()
            } else {
                format!("Every {} minutes", gap)
            }
        }
        ScheduleType::Daily => format!("Daily at {:02}:{:02}", hour, minute),
        ScheduleType::Weekly => {
            let day = descriptor.day_of_week.unwrap_or(0);
            match day_name(day) {
                Some(name) => format!("Every {} at {:02}:{:02}", name, hour, minute),
                None => format!("Every day {} at {:02}:{:02}", day, hour, minute),
            }
        }
        ScheduleType::Custom => match descriptor.cron_expression.as_deref().map(str::trim) {
            Some(cron) if !cron.is_empty() => cron.to_string(),
            _ => EMPTY_CRON_PLACEHOLDER.to_string(),
        },
    }
}

/// Formats a countdown value for display.
pub fn format_countdown(seconds: u64) -> String {
    if seconds == 0 {
        "due now".to_string()
    } else {
        format!("in {}", format_duration(seconds))
    }
}
