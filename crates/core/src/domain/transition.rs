//! Pure lifecycle transitions
//!
//! Every function takes a record snapshot and returns the next snapshot plus
//! the store mutation that persists it. Nothing here touches storage or clocks,
//! so the state machine can be exercised without a database.

use crate::domain::error::{DomainError, Result};
use crate::domain::job::{ErrorLogEntry, JobRecord, JobStatus};

/// How a transition must be written back to the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreMutation {
    /// Compare-and-swap on status; only applied if the stored status still equals `expected`
    Claim { expected: JobStatus },
    /// Plain read-modify-write by the current owner
    Update,
}

/// Next record state and the mutation that persists it
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub record: JobRecord,
    pub mutation: StoreMutation,
}

impl Transition {
    fn update(record: JobRecord) -> Self {
        Self {
            record,
            mutation: StoreMutation::Update,
        }
    }

    pub fn into_record(self) -> JobRecord {
        self.record
    }
}

fn require_status(job: &JobRecord, expected: JobStatus, to: &str) -> Result<()> {
    if job.status != expected {
        return Err(DomainError::InvalidStateTransition {
            from: job.status.to_string(),
            to: to.to_string(),
        });
    }
    Ok(())
}

/// `attempts >= max_attempts`
pub fn has_reached_max_attempts(job: &JobRecord) -> bool {
    job.attempts >= job.max_attempts
}

/// pending -> processing
pub fn claim(job: &JobRecord, now_millis: i64) -> Result<Transition> {
    require_status(job, JobStatus::Pending, "processing")?;

    let mut record = job.clone();
    record.status = JobStatus::Processing;
    record.started_at = Some(now_millis);
    record.next_retry_at = None;

    Ok(Transition {
        record,
        mutation: StoreMutation::Claim {
            expected: JobStatus::Pending,
        },
    })
}

/// processing -> completed
///
/// `attempt_number` defaults to `attempts + 1` (the attempt that just ran).
pub fn succeed(job: &JobRecord, attempt_number: Option<i32>, now_millis: i64) -> Result<Transition> {
    require_status(job, JobStatus::Processing, "completed")?;

    let mut record = job.clone();
    record.status = JobStatus::Completed;
    record.completed_at = Some(now_millis);
    record.completed_attempt = Some(attempt_number.unwrap_or(job.attempts + 1));
    record.next_retry_at = None;

    Ok(Transition::update(record))
}

/// Append an error to the history of a processing job
///
/// Status is left untouched; the caller follows up with [`fail`] or [`retry`].
pub fn record_error(job: &JobRecord, log: ErrorLogEntry, now_millis: i64) -> Result<Transition> {
    require_status(job, JobStatus::Processing, "processing")?;
    if has_reached_max_attempts(job) {
        return Err(DomainError::RetryExhausted {
            job_id: job.id.clone(),
            attempts: job.attempts,
            max_attempts: job.max_attempts,
        });
    }

    let mut record = job.clone();
    record.last_error = Some(log.error_message.clone());
    record.last_error_timestamp = Some(log.timestamp);
    record.last_attempt_at = Some(now_millis);
    record.error_logs.push(log);
    record.attempts += 1;

    Ok(Transition::update(record))
}

/// processing -> failed (terminal)
pub fn fail(job: &JobRecord, final_error: ErrorLogEntry, now_millis: i64) -> Result<Transition> {
    require_status(job, JobStatus::Processing, "failed")?;

    let mut record = job.clone();
    record.status = JobStatus::Failed;
    record.failed_at = Some(now_millis);
    record.final_error = Some(final_error);
    record.next_retry_at = None;

    Ok(Transition::update(record))
}

/// Error recorded when a job is found with no attempts left but no error history
pub const EXHAUSTED_ERROR_TYPE: &str = "AttemptsExhausted";

/// processing -> failed for a job claimed again after its last attempt
///
/// Happens when a worker died between recording the final error and failing
/// the job. The last logged error becomes `final_error`.
pub fn fail_exhausted(job: &JobRecord, now_millis: i64) -> Result<Transition> {
    require_status(job, JobStatus::Processing, "failed")?;
    if !has_reached_max_attempts(job) {
        return Err(DomainError::InvalidStateTransition {
            from: format!("processing ({}/{} attempts)", job.attempts, job.max_attempts),
            to: "failed".to_string(),
        });
    }

    let final_error = match job.error_logs.last() {
        Some(last) => last.clone(),
        None => ErrorLogEntry::new(
            now_millis,
            job.attempts,
            format!("No attempts left ({}/{})", job.attempts, job.max_attempts),
        )
        .with_type(EXHAUSTED_ERROR_TYPE),
    };
    fail(job, final_error, now_millis)
}

/// processing -> pending, eligible again at `next_retry_at`
pub fn retry(job: &JobRecord, next_retry_at: i64) -> Result<Transition> {
    require_status(job, JobStatus::Processing, "pending")?;
    if has_reached_max_attempts(job) {
        return Err(DomainError::RetryExhausted {
            job_id: job.id.clone(),
            attempts: job.attempts,
            max_attempts: job.max_attempts,
        });
    }

    let mut record = job.clone();
    record.status = JobStatus::Pending;
    record.next_retry_at = Some(next_retry_at);

    Ok(Transition::update(record))
}

/// processing -> pending after a worker crash
///
/// A crash is not an observed failure, so `attempts` is not incremented.
pub fn recover(job: &JobRecord, now_millis: i64) -> Result<Transition> {
    require_status(job, JobStatus::Processing, "pending")?;

    let mut record = job.clone();
    record.status = JobStatus::Pending;
    record.recovered_at = Some(now_millis);

    Ok(Transition::update(record))
}
