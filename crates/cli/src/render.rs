//! Table rows and formatting helpers

use chrono::{DateTime, Utc};
use formpilot_core::domain::{ErrorLogEntry, JobRecord, JobStatus};
use tabled::Tabled;

const MESSAGE_WIDTH: usize = 60;

/// `YYYY-MM-DD HH:MM:SS` (UTC), or `-`
pub fn format_timestamp(millis: Option<i64>) -> String {
    millis
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string())
}

/// Single-line, at most `max` characters
pub fn truncate(text: &str, max: usize) -> String {
    let line = text.lines().next().unwrap_or_default();
    if line.chars().count() <= max && !text.contains('\n') {
        return line.to_string();
    }
    let kept: String = line.chars().take(max.saturating_sub(1)).collect();
    format!("{}…", kept)
}

#[derive(Tabled)]
pub struct StatusRow {
    pub status: String,
    pub count: i64,
}

impl StatusRow {
    pub fn new(status: JobStatus, count: i64) -> Self {
        Self {
            status: status.to_string(),
            count,
        }
    }
}

#[derive(Tabled)]
pub struct FailedJobRow {
    pub id: String,
    pub reference: String,
    pub attempts: String,
    pub failed_at: String,
    pub error: String,
}

impl From<&JobRecord> for FailedJobRow {
    fn from(job: &JobRecord) -> Self {
        let error = job
            .final_error
            .as_ref()
            .map(|e| format!("[{}] {}", e.error_type, e.error_message))
            .unwrap_or_else(|| "-".to_string());

        Self {
            id: job.id.clone(),
            reference: job.source_reference.clone().unwrap_or_else(|| "-".to_string()),
            attempts: format!("{}/{}", job.attempts, job.max_attempts),
            failed_at: format_timestamp(job.failed_at),
            error: truncate(&error, MESSAGE_WIDTH),
        }
    }
}

#[derive(Tabled)]
pub struct ErrorLogRow {
    pub attempt: i32,
    pub at: String,
    #[tabled(rename = "type")]
    pub error_type: String,
    pub message: String,
    pub screenshot: String,
}

impl From<&ErrorLogEntry> for ErrorLogRow {
    fn from(entry: &ErrorLogEntry) -> Self {
        Self {
            attempt: entry.attempt_number,
            at: format_timestamp(Some(entry.timestamp)),
            error_type: entry.error_type.clone(),
            message: truncate(&entry.error_message, MESSAGE_WIDTH),
            screenshot: entry
                .screenshot_url
                .clone()
                .or_else(|| entry.screenshot_key.clone())
                .unwrap_or_else(|| "-".to_string()),
        }
    }
}
