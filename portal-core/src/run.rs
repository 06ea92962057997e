//! Service run history rows.

use crate::wire::null_as_default;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Lifecycle status of a service run or one of its tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Queued,
    Running,
    Success,
    Failure,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Queued => "QUEUED",
            RunStatus::Running => "RUNNING",
            RunStatus::Success => "SUCCESS",
            RunStatus::Failure => "FAILURE",
        };
        f.write_str(s)
    }
}

/// One execution of a service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceRun {
    pub id: String,
    pub created_at: String,
    pub updated_at: String,
    pub status: RunStatus,
    #[serde(default)]
    pub input_payload: Value,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tasks: Vec<RunTask>,
}

impl ServiceRun {
    /// Creation time, accepting RFC 3339 and the backend's display format.
    pub fn created_at_utc(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.created_at)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunTask {
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_validate_output: Option<PostValidateOutput>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostValidateOutput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_time_in_millis: Option<u64>,
}

/// Display row for the run history table.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub created_at: Option<DateTime<Utc>>,
    pub service_name: Option<String>,
    pub status: RunStatus,
    /// Share of successful tasks, 0.0 when the run has none.
    pub success_ratio: f64,
    pub total_execution_ms: u64,
    pub execution_time: String,
}

impl RunSummary {
    pub fn from_run(run: &ServiceRun) -> Self {
        let total_execution_ms = run
            .tasks
            .iter()
            .filter_map(|task| task.post_validate_output.as_ref())
            .filter_map(|output| output.execution_time_in_millis)
            .sum();
        let succeeded = run
            .tasks
            .iter()
            .filter(|task| task.status == RunStatus::Success)
            .count();
        let success_ratio = if run.tasks.is_empty() {
            0.0
        } else {
            succeeded as f64 / run.tasks.len() as f64
        };

        Self {
            created_at: run.created_at_utc(),
            service_name: run
                .input_payload
                .get("name")
                .and_then(Value::as_str)
                .map(str::to_string),
            status: run.status,
            success_ratio,
            total_execution_ms,
            execution_time: format_duration_ms(total_execution_ms),
        }
    }
}

/// Format a duration as `HH:MM:SS.d` (tenths of a second, hours wrap at 24).
pub fn format_duration_ms(duration_ms: u64) -> String {
    let tenths = (duration_ms % 1000) / 100;
    let seconds = (duration_ms / 1000) % 60;
    let minutes = (duration_ms / (1000 * 60)) % 60;
    let hours = (duration_ms / (1000 * 60 * 60)) % 24;
    format!("{:02}:{:02}:{:02}.{}", hours, minutes, seconds, tenths)
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    let trimmed = raw.trim_end_matches(" UTC");
    NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}
