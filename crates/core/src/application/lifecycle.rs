//! Lifecycle Controller - applies pure transitions to the job store
//!
//! Only `claim` contends with other workers and it goes through the store's
//! compare-and-swap. The remaining transitions are issued by the worker that
//! won the claim, so a plain `update` is enough.

use crate::application::retry::RetryScheduler;
use crate::domain::transition::{self, StoreMutation, Transition};
use crate::domain::{ErrorLogEntry, JobRecord};
use crate::error::{AppError, Result};
use crate::port::{JobStore, TimeProvider};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of a claim attempt
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    /// This caller now owns the job (fresh copy read back from the store)
    Claimed(JobRecord),
    /// Another worker claimed it first; move on to the next candidate
    Conflict,
}

/// What happened after a failed attempt was reported
#[derive(Debug, Clone, PartialEq)]
pub enum FailureOutcome {
    /// Back to pending, eligible at `next_retry_at`
    Retrying(JobRecord),
    /// Attempts exhausted, terminal
    Failed(JobRecord),
}

impl FailureOutcome {
    pub fn record(&self) -> &JobRecord {
        match self {
            FailureOutcome::Retrying(job) | FailureOutcome::Failed(job) => job,
        }
    }
}

pub struct LifecycleController {
    store: Arc<dyn JobStore>,
    time_provider: Arc<dyn TimeProvider>,
    retry_scheduler: RetryScheduler,
}

impl LifecycleController {
    pub fn new(
        store: Arc<dyn JobStore>,
        time_provider: Arc<dyn TimeProvider>,
        retry_scheduler: RetryScheduler,
    ) -> Self {
        Self {
            store,
            time_provider,
            retry_scheduler,
        }
    }

    /// Persist a transition according to its mutation kind
    ///
    /// Returns `false` only when a claim's compare-and-swap lost.
    async fn apply(&self, t: &Transition) -> Result<bool> {
        match t.mutation {
            StoreMutation::Claim { expected } => {
                let started_at = t
                    .record
                    .started_at
                    .unwrap_or_else(|| self.time_provider.now_millis());
                self.store
                    .atomic_claim(&t.record.id, expected, started_at)
                    .await
            }
            StoreMutation::Update => {
                self.store.update(&t.record).await?;
                Ok(true)
            }
        }
    }

    async fn persist(&self, t: Transition) -> Result<JobRecord> {
        self.apply(&t).await?;
        Ok(t.into_record())
    }

    /// pending -> processing via the store's conditional update
    pub async fn claim(&self, job: &JobRecord) -> Result<ClaimOutcome> {
        let now = self.time_provider.now_millis();
        let t = transition::claim(job, now)?;

        if !self.apply(&t).await? {
            debug!(job_id = %job.id, "Claim lost to another worker");
            return Ok(ClaimOutcome::Conflict);
        }

        // The candidate snapshot may predate another worker's attempt; reload it
        let claimed = self
            .store
            .find_by_id(&job.id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Job {} vanished after claim", job.id)))?;

        info!(job_id = %claimed.id, attempt = claimed.attempts + 1, "Job claimed");
        Ok(ClaimOutcome::Claimed(claimed))
    }

    /// processing -> completed
    pub async fn succeed(&self, job: &JobRecord, attempt_number: Option<i32>) -> Result<JobRecord> {
        let now = self.time_provider.now_millis();
        let done = self.persist(transition::succeed(job, attempt_number, now)?).await?;

        info!(
            job_id = %done.id,
            completed_attempt = ?done.completed_attempt,
            "Job completed"
        );
        Ok(done)
    }

    /// Append an error log; status is unchanged (follow with `fail` or `retry`)
    pub async fn record_error(&self, job: &JobRecord, log: ErrorLogEntry) -> Result<JobRecord> {
        let now = self.time_provider.now_millis();
        self.persist(transition::record_error(job, log, now)?).await
    }

    pub fn has_reached_max_attempts(&self, job: &JobRecord) -> bool {
        transition::has_reached_max_attempts(job)
    }

    /// processing -> failed
    pub async fn fail(&self, job: &JobRecord, final_error: ErrorLogEntry) -> Result<JobRecord> {
        let now = self.time_provider.now_millis();
        let failed = self.persist(transition::fail(job, final_error, now)?).await?;

        warn!(
            job_id = %failed.id,
            attempts = failed.attempts,
            max_attempts = failed.max_attempts,
            "Job failed permanently"
        );
        Ok(failed)
    }

    /// processing -> pending; `delay_ms` falls back to the scheduler's delay
    pub async fn retry(&self, job: &JobRecord, delay_ms: Option<i64>) -> Result<JobRecord> {
        let now = self.time_provider.now_millis();
        let scheduler = delay_ms.map_or(self.retry_scheduler, RetryScheduler::new);
        let next_retry_at = scheduler.next_retry_at(now);
        let pending = self.persist(transition::retry(job, next_retry_at)?).await?;

        info!(
            job_id = %pending.id,
            attempts = pending.attempts,
            next_retry_at = ?pending.next_retry_at,
            "Job scheduled for retry"
        );
        Ok(pending)
    }

    /// Record a failed attempt and move the job to `failed` or back to `pending`
    ///
    /// The error and the resulting status are written in one update. When the
    /// error uses up the last attempt, that same error becomes `final_error`.
    pub async fn report_failure(&self, job: &JobRecord, log: ErrorLogEntry) -> Result<FailureOutcome> {
        let now = self.time_provider.now_millis();
        let recorded = transition::record_error(job, log.clone(), now)?.into_record();

        if transition::has_reached_max_attempts(&recorded) {
            let t = transition::fail(&recorded, log, now)?;
            let failed = self.persist(t).await?;
            warn!(
                job_id = %failed.id,
                attempts = failed.attempts,
                last_error = ?failed.last_error,
                "Job failed after max attempts"
            );
            Ok(FailureOutcome::Failed(failed))
        } else {
            let t = transition::retry(&recorded, self.retry_scheduler.next_retry_at(now))?;
            let pending = self.persist(t).await?;
            info!(
                job_id = %pending.id,
                attempts = pending.attempts,
                max_attempts = pending.max_attempts,
                next_retry_at = ?pending.next_retry_at,
                last_error = ?pending.last_error,
                "Job attempt failed, retry scheduled"
            );
            Ok(FailureOutcome::Retrying(pending))
        }
    }

    /// processing -> failed for a claimed job that has no attempts left
    ///
    /// The form is not filled again; the last logged error becomes `final_error`.
    pub async fn fail_exhausted(&self, job: &JobRecord) -> Result<JobRecord> {
        let now = self.time_provider.now_millis();
        let failed = self.persist(transition::fail_exhausted(job, now)?).await?;

        warn!(
            job_id = %failed.id,
            attempts = failed.attempts,
            max_attempts = failed.max_attempts,
            "Claimed job had no attempts left, failed without filling"
        );
        Ok(failed)
    }

    /// processing -> pending for a single job abandoned by a dead worker
    ///
    /// `attempts` is left as is. Periodic sweeps use the store's bulk recover.
    pub async fn recover(&self, job: &JobRecord) -> Result<JobRecord> {
        let now = self.time_provider.now_millis();
        let recovered = self.persist(transition::recover(job, now)?).await?;

        info!(job_id = %recovered.id, attempts = recovered.attempts, "Job recovered");
        Ok(recovered)
    }

    /// Worker-facing success report; same as `succeed`
    pub async fn report_success(&self, job: &JobRecord, attempt_number: Option<i32>) -> Result<JobRecord> {
        self.succeed(job, attempt_number).await
    }
}
