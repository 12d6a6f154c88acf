// Retry scheduling
use crate::application::worker::constants::DEFAULT_RETRY_DELAY_MS;
use crate::domain::{JobRecord, JobStatus};

/// Retry scheduler
///
/// Fixed delay between attempts. The error type of a failure is not
/// consulted: every failure is retried until `max_attempts`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryScheduler {
    delay_ms: i64,
}

impl Default for RetryScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_RETRY_DELAY_MS)
    }
}

impl RetryScheduler {
    /// Create a new retry scheduler
    ///
    /// # Arguments
    /// * `delay_ms` - Delay before a failed job becomes eligible again (default: 60000)
    ///
    /// # Example
    /// ```text
    /// let scheduler = RetryScheduler::new(60_000);
    /// let next = scheduler.next_retry_at(now);
    /// ```
    pub fn new(delay_ms: i64) -> Self {
        Self {
            delay_ms: delay_ms.max(0),
        }
    }

    pub fn delay_ms(&self) -> i64 {
        self.delay_ms
    }

    /// `now + delay`
    pub fn next_retry_at(&self, now_millis: i64) -> i64 {
        now_millis + self.delay_ms
    }
}

/// `status == pending && next_retry_at <= now`
///
/// Freshly created jobs (no `next_retry_at`) are not retry-ready.
pub fn is_retry_ready(job: &JobRecord, now_millis: i64) -> bool {
    job.status == JobStatus::Pending && job.next_retry_at.is_some_and(|at| at <= now_millis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::JobPayload;

    fn job_with_retry(next_retry_at: Option<i64>) -> JobRecord {
        let mut job = JobRecord::new_test(JobPayload::new(serde_json::json!({})));
        job.next_retry_at = next_retry_at;
        job
    }

    #[test]
    fn test_default_delay_is_one_minute() {
        let scheduler = RetryScheduler::default();
        assert_eq!(scheduler.delay_ms(), 60_000);
        assert_eq!(scheduler.next_retry_at(1_000), 61_000);
    }

    #[test]
    fn test_negative_delay_clamped() {
        assert_eq!(RetryScheduler::new(-5).next_retry_at(100), 100);
    }

    #[test]
    fn test_is_retry_ready_boundary() {
        let job = job_with_retry(Some(5_000));
        assert!(!is_retry_ready(&job, 4_999));
        assert!(is_retry_ready(&job, 5_000));
        assert!(is_retry_ready(&job, 5_001));
    }

    #[test]
    fn test_fresh_pending_is_not_retry_ready() {
        assert!(!is_retry_ready(&job_with_retry(None), i64::MAX));
    }

    #[test]
    fn test_non_pending_is_not_retry_ready() {
        let mut job = job_with_retry(Some(0));
        job.status = JobStatus::Processing;
        assert!(!is_retry_ready(&job, 10));
    }
}
