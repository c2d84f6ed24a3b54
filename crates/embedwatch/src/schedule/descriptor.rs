//! Declarative timing rule of a recurring embedding job.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ScheduleError;

/// Kind of recurrence. Decides which descriptor fields are meaningful.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleType {
    /// Once per hour at `minute`.
    Hourly,
    /// Every `minute` minutes.
    Interval,
    /// Once per day at `hour:minute`.
    Daily,
    /// Once per week on `day_of_week` at `hour:minute`.
    Weekly,
    /// Free-form 5-field cron expression.
    Custom,
}

impl std::fmt::Display for ScheduleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScheduleType::Hourly => write!(f, "hourly"),
            ScheduleType::Interval => write!(f, "interval"),
            ScheduleType::Daily => write!(f, "daily"),
            ScheduleType::Weekly => write!(f, "weekly"),
            ScheduleType::Custom => write!(f, "custom"),
        }
    }
}

/// A schedule as stored by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleDescriptor {
    /// Target vector database; the key of the schedule.
    pub vector_db_name: String,
    #[serde(default)]
    pub enabled: bool,
    pub schedule_type: ScheduleType,
    /// 0-23, for daily and weekly.
    #[serde(default)]
    pub hour: Option<u32>,
    /// 0-59; for `interval` this is the gap between runs in minutes.
    #[serde(default)]
    pub minute: Option<u32>,
    /// 0 = Monday .. 6 = Sunday, for weekly.
    #[serde(default)]
    pub day_of_week: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cron_expression: Option<String>,
    /// Seconds until the next run, computed by the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub countdown_seconds: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_status: Option<String>,
}

impl ScheduleDescriptor {
    /// Creates an enabled descriptor with no timing fields set.
    pub fn new(vector_db_name: &str, schedule_type: ScheduleType) -> Self {
        Self {
            vector_db_name: vector_db_name.to_string(),
            enabled: true,
            schedule_type,
            hour: None,
            minute: None,
            day_of_week: None,
            cron_expression: None,
            countdown_seconds: None,
            last_run_at: None,
            last_run_status: None,
        }
    }

    pub fn hourly(vector_db_name: &str, minute: u32) -> Self {
        Self {
            minute: Some(minute),
            ..Self::new(vector_db_name, ScheduleType::Hourly)
        }
    }

    pub fn interval(vector_db_name: &str, every_minutes: u32) -> Self {
        Self {
            minute: Some(every_minutes),
            ..Self::new(vector_db_name, ScheduleType::Interval)
        }
    }

    pub fn daily(vector_db_name: &str, hour: u32, minute: u32) -> Self {
        Self {
            hour: Some(hour),
            minute: Some(minute),
            ..Self::new(vector_db_name, ScheduleType::Daily)
        }
    }

    pub fn weekly(vector_db_name: &str, day_of_week: u32, hour: u32, minute: u32) -> Self {
        Self {
            hour: Some(hour),
            minute: Some(minute),
            day_of_week: Some(day_of_week),
            ..Self::new(vector_db_name, ScheduleType::Weekly)
        }
    }

    pub fn custom(vector_db_name: &str, cron_expression: &str) -> Self {
        Self {
            cron_expression: Some(cron_expression.to_string()),
            ..Self::new(vector_db_name, ScheduleType::Custom)
        }
    }

    /// Server countdown with negative values treated as "due now".
    pub fn countdown(&self) -> Option<u64> {
        self.countdown_seconds.map(|secs| secs.max(0) as u64)
    }

    /// Parses `last_run_at`, accepting RFC 3339 and naive UTC timestamps.
    pub fn last_run_time(&self) -> Option<DateTime<Utc>> {
        let raw = self.last_run_at.as_deref()?.trim();
        if raw.is_empty() {
            return None;
        }
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Some(dt.with_timezone(&Utc));
        }
        match NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
            Ok(naive) => Some(naive.and_utc()),
            Err(e) => {
                log::warn!("Unparseable last_run_at '{}': {}", raw, e);
                None
            }
        }
    }

    /// Checks the fields that are active for this schedule type.
    pub fn validate(&self) -> Result<(), ScheduleError> {
        if self.vector_db_name.trim().is_empty() {
            return Err(ScheduleError::Invalid(
                "vector_db_name must not be empty".to_string(),
            ));
        }

        match self.schedule_type {
            ScheduleType::Hourly => {
                check_minute(self.minute)?;
            }
            ScheduleType::Interval => match self.minute {
                Some(gap) if gap >= 1 => {}
                _ => {
                    return Err(ScheduleError::Invalid(
                        "interval must be at least 1 minute".to_string(),
                    ))
                }
            },
            ScheduleType::Daily => {
                check_hour(self.hour)?;
                check_minute(self.minute)?;
            }
            ScheduleType::Weekly => {
                check_hour(self.hour)?;
                check_minute(self.minute)?;
                if self.day_of_week.unwrap_or(0) > 6 {
                    return Err(ScheduleError::Invalid(format!(
                        "day_of_week must be 0-6, got {}",
                        self.day_of_week.unwrap_or(0)
                    )));
                }
            }
            ScheduleType::Custom => {
                let cron = self.cron_expression.as_deref().unwrap_or("").trim();
                let fields = cron.split_whitespace().count();
                if fields != 5 {
                    return Err(ScheduleError::Invalid(format!(
                        "cron expression must have 5 fields, got {}",
                        fields
                    )));
                }
            }
        }

        Ok(())
    }
}

fn check_hour(hour: Option<u32>) -> Result<(), ScheduleError> {
    match hour.unwrap_or(0) {
        0..=23 => Ok(()),
        other => Err(ScheduleError::Invalid(format!(
            "hour must be 0-23, got {}",
            other
        ))),
    }
}

fn check_minute(minute: Option<u32>) -> Result<(), ScheduleError> {
    match minute.unwrap_or(0) {
        0..=59 => Ok(()),
        other => Err(ScheduleError::Invalid(format!(
            "minute must be 0-59, got {}",
            other
        ))),
    }
}
