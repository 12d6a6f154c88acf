// Job Domain Model

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Job ID (UUID v4)
pub type JobId = String;

/// Attempt cap applied when the submitter does not choose one
pub const DEFAULT_MAX_ATTEMPTS: i32 = 3;

/// Error type recorded when the worker does not classify a failure
pub const DEFAULT_ERROR_TYPE: &str = "Error";

/// Job Status
///
/// `Pending -> Processing -> {Completed | Pending (retry) | Failed}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Completed and failed jobs never transition again
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = crate::domain::error::DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(crate::domain::error::DomainError::ValidationError(format!(
                "Unknown job status: {}",
                other
            ))),
        }
    }
}

/// Form payload (opaque JSON, never inspected by the engine)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobPayload(serde_json::Value);

impl JobPayload {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }

    pub fn into_value(self) -> serde_json::Value {
        self.0
    }
}

/// One failed execution attempt
///
/// Screenshot fields only reference artifacts stored elsewhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorLogEntry {
    pub timestamp: i64, // epoch ms
    pub attempt_number: i32,
    pub error_message: String,
    #[serde(default = "default_error_type")]
    pub error_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_stack: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot_key: Option<String>,
}

fn default_error_type() -> String {
    DEFAULT_ERROR_TYPE.to_string()
}

impl ErrorLogEntry {
    pub fn new(timestamp: i64, attempt_number: i32, error_message: impl Into<String>) -> Self {
        Self {
            timestamp,
            attempt_number,
            error_message: error_message.into(),
            error_type: default_error_type(),
            error_stack: None,
            screenshot_url: None,
            screenshot_key: None,
        }
    }

    pub fn with_type(mut self, error_type: impl Into<String>) -> Self {
        self.error_type = error_type.into();
        self
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.error_stack = Some(stack.into());
        self
    }

    pub fn with_screenshot(mut self, url: Option<String>, key: Option<String>) -> Self {
        self.screenshot_url = url;
        self.screenshot_key = key;
        self
    }
}

/// Job Record - one form submission and its full history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    // Identity
    pub id: JobId,
    pub source_reference: Option<String>, // weak ref to e.g. a captcha challenge
    pub payload: JobPayload,
    pub status: JobStatus,

    // Timestamps (epoch ms)
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub failed_at: Option<i64>,
    pub last_attempt_at: Option<i64>,
    pub next_retry_at: Option<i64>,
    pub recovered_at: Option<i64>,

    // Attempts
    pub attempts: i32,
    pub max_attempts: i32,
    pub completed_attempt: Option<i32>,

    // Error history
    pub error_logs: Vec<ErrorLogEntry>,
    pub last_error: Option<String>,
    pub last_error_timestamp: Option<i64>,
    pub final_error: Option<ErrorLogEntry>,
}

impl JobRecord {
    /// Create a new pending job
    ///
    /// # Arguments
    ///
    /// * `id` - Unique job ID (injected, not generated)
    /// * `created_at` - Creation timestamp in epoch ms (injected, not system time)
    /// * `payload` - Form data supplied by the submitter
    pub fn new(id: impl Into<String>, created_at: i64, payload: JobPayload) -> Self {
        Self {
            id: id.into(),
            source_reference: None,
            payload,
            status: JobStatus::Pending,
            created_at,
            started_at: None,
            completed_at: None,
            failed_at: None,
            last_attempt_at: None,
            next_retry_at: None,
            recovered_at: None,
            attempts: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            completed_attempt: None,
            error_logs: Vec::new(),
            last_error: None,
            last_error_timestamp: None,
            final_error: None,
        }
    }

    /// Create a test job with deterministic ID and timestamp.
    ///
    /// Uses a simple counter for deterministic test IDs (test-1, test-2, ...).
    /// Timestamps start at 1000 and increment by 1000.
    ///
    /// **Note**: This method should only be used in tests. For production code,
    /// always inject ID and time via providers.
    pub fn new_test(payload: JobPayload) -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static TEST_COUNTER: AtomicU64 = AtomicU64::new(1);

        let counter = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
        Self::new(format!("test-{}", counter), (counter * 1000) as i64, payload)
    }

    pub fn with_source_reference(mut self, reference: impl Into<String>) -> Self {
        self.source_reference = Some(reference.into());
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Pending because an earlier attempt failed (as opposed to freshly created)
    pub fn is_retry_pending(&self) -> bool {
        self.status == JobStatus::Pending && self.next_retry_at.is_some()
    }
}
