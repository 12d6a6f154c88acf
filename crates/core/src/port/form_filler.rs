// Form Filler Port
// Abstraction over the browser automation that actually submits a form

use crate::domain::{ErrorLogEntry, JobRecord};
use async_trait::async_trait;
use thiserror::Error;

/// Result of a successful form submission
#[derive(Debug, Clone)]
pub struct FillReport {
    pub duration_ms: i64,
    pub output: Option<String>,
}

/// Form filling errors
///
/// Every variant is retried the same way; the variant only decides the
/// `error_type` written to the job's error log.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FillError {
    #[error("Spawn failed: {0}")]
    SpawnFailed(String),

    #[error("Form fill timed out after {0}ms")]
    Timeout(i64),

    #[error("{message}")]
    Automation {
        message: String,
        error_type: String,
        stack: Option<String>,
        screenshot_url: Option<String>,
        screenshot_key: Option<String>,
    },

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Form filler panicked: {0}")]
    Panicked(String),
}

impl FillError {
    /// Automation failure with only a message (type defaults to "Error")
    pub fn automation(message: impl Into<String>) -> Self {
        FillError::Automation {
            message: message.into(),
            error_type: crate::domain::job::DEFAULT_ERROR_TYPE.to_string(),
            stack: None,
            screenshot_url: None,
            screenshot_key: None,
        }
    }

    pub fn error_type(&self) -> &str {
        match self {
            FillError::SpawnFailed(_) => "SpawnError",
            FillError::Timeout(_) => "TimeoutError",
            FillError::Automation { error_type, .. } => error_type,
            FillError::InvalidPayload(_) => "InvalidPayload",
            FillError::Io(_) => "IoError",
            FillError::Panicked(_) => "Panic",
        }
    }

    /// Build the error log entry for the attempt that produced this error
    pub fn to_error_log(&self, timestamp: i64, attempt_number: i32) -> ErrorLogEntry {
        let entry = ErrorLogEntry::new(timestamp, attempt_number, self.to_string())
            .with_type(self.error_type());

        match self {
            FillError::Automation {
                stack,
                screenshot_url,
                screenshot_key,
                ..
            } => {
                let entry = entry.with_screenshot(screenshot_url.clone(), screenshot_key.clone());
                match stack {
                    Some(stack) => entry.with_stack(stack.clone()),
                    None => entry,
                }
            }
            _ => entry,
        }
    }
}

/// Form Filler trait
///
/// Implementations:
/// - SubprocessFormFiller: spawns the browser automation script
#[async_trait]
pub trait FormFiller: Send + Sync {
    /// Submit the job's form once
    ///
    /// # Errors
    /// Any `FillError` counts as one failed attempt for the job.
    async fn fill(&self, job: &JobRecord) -> Result<FillReport, FillError>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Mock filler behavior
    #[derive(Debug, Clone)]
    pub enum MockBehavior {
        /// Always succeed
        Success,
        /// Always fail with message
        Fail(String),
        /// Fail the first N calls, then succeed
        FailTimes(usize),
        /// Panic with message (for panic isolation testing)
        Panic(String),
        /// Report a timeout of N ms
        Timeout(i64),
    }

    /// Mock Form Filler for testing
    pub struct MockFormFiller {
        behavior: Arc<Mutex<MockBehavior>>,
        call_count: Arc<Mutex<usize>>,
    }

    impl MockFormFiller {
        pub fn new(behavior: MockBehavior) -> Self {
            Self {
                behavior: Arc::new(Mutex::new(behavior)),
                call_count: Arc::new(Mutex::new(0)),
            }
        }
        pub fn new_success() -> Self {
            Self::new(MockBehavior::Success)
        }
        pub fn new_fail(message: impl Into<String>) -> Self {
            Self::new(MockBehavior::Fail(message.into()))
        }
        pub fn new_panic_inducing(message: impl Into<String>) -> Self {
            Self::new(MockBehavior::Panic(message.into()))
        }
        pub fn call_count(&self) -> usize {
            *self.call_count.lock().unwrap()
        }
    }

    #[async_trait]
    impl FormFiller for MockFormFiller {
        async fn fill(&self, _job: &JobRecord) -> Result<FillReport, FillError> {
            let call = {
                let mut count = self.call_count.lock().unwrap();
                *count += 1;
                *count
            };

            let behavior = self.behavior.lock().unwrap().clone();

            match behavior {
                MockBehavior::Success => Ok(FillReport {
                    duration_ms: 100,
                    output: Some("mock submission".to_string()),
                }),
                MockBehavior::Fail(msg) => Err(FillError::automation(msg)),
                MockBehavior::FailTimes(n) if call <= n => {
                    Err(FillError::automation(format!("mock failure #{}", call)))
                }
                MockBehavior::FailTimes(_) => Ok(FillReport {
                    duration_ms: 100,
                    output: None,
                }),
                MockBehavior::Panic(msg) => {
                    panic!("{}", msg); // Actually panic for panic isolation testing
                }
                MockBehavior::Timeout(ms) => Err(FillError::Timeout(ms)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_automation_error_carries_screenshot_into_log() {
        let err = FillError::Automation {
            message: "submit button not found".to_string(),
            error_type: "SelectorError".to_string(),
            stack: Some("at fill (form.js:10)".to_string()),
            screenshot_url: Some("https://bucket/shot.png".to_string()),
            screenshot_key: Some("shots/job-1.png".to_string()),
        };

        let log = err.to_error_log(1_000, 2);

        assert_eq!(log.attempt_number, 2);
        assert_eq!(log.error_message, "submit button not found");
        assert_eq!(log.error_type, "SelectorError");
        assert_eq!(log.error_stack.as_deref(), Some("at fill (form.js:10)"));
        assert_eq!(log.screenshot_key.as_deref(), Some("shots/job-1.png"));
    }

    #[test]
    fn test_timeout_error_type() {
        let log = FillError::Timeout(30_000).to_error_log(5, 1);
        assert_eq!(log.error_type, "TimeoutError");
        assert!(log.error_message.contains("30000"));
        assert!(log.screenshot_url.is_none());
    }
}
