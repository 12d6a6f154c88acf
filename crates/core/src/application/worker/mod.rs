// Worker - Job dispatch loop

pub mod constants;
mod panic_guard;
mod shutdown;

use constants::*;
pub use panic_guard::{execute_guarded, PanicGuardResult};
pub use shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};

use crate::application::lifecycle::{ClaimOutcome, FailureOutcome, LifecycleController};
use crate::domain::JobRecord;
use crate::error::Result;
use crate::port::{FillError, FormFiller, JobStore, TimeProvider};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// What one dispatch step did
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    /// No claimable job
    Idle,
    Completed(JobRecord),
    Retrying(JobRecord),
    Failed(JobRecord),
}

/// Worker claims jobs and hands them to the form filler
///
/// Several workers (in one process or many) may share a store; the claim's
/// compare-and-swap is the only coordination between them.
pub struct Worker {
    name: String,
    store: Arc<dyn JobStore>,
    controller: Arc<LifecycleController>,
    filler: Arc<dyn FormFiller>,
    time_provider: Arc<dyn TimeProvider>,
    poll_interval: Duration,
    pending_batch: i64,
}

impl Worker {
    pub fn new(
        name: impl Into<String>,
        store: Arc<dyn JobStore>,
        controller: Arc<LifecycleController>,
        filler: Arc<dyn FormFiller>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            name: name.into(),
            store,
            controller,
            filler,
            time_provider,
            poll_interval: IDLE_SLEEP_DURATION,
            pending_batch: DEFAULT_PENDING_BATCH,
        }
    }

    /// Idle sleep between empty polls
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_pending_batch(mut self, pending_batch: i64) -> Self {
        self.pending_batch = pending_batch.max(1);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run worker loop with graceful shutdown support
    pub async fn run(&self, mut shutdown: ShutdownToken) -> Result<()> {
        info!(worker = %self.name, "Worker started");
        loop {
            if shutdown.is_shutdown() {
                info!(worker = %self.name, "Worker shutting down");
                break;
            }
            match self.process_next_job().await {
                Ok(ProcessOutcome::Idle) => {
                    if shutdown.sleep(self.poll_interval).await {
                        info!(worker = %self.name, "Worker interrupted during idle");
                        break;
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    error!(worker = %self.name, error = %e, "Worker error");
                    if shutdown.sleep(ERROR_RECOVERY_SLEEP_DURATION).await {
                        info!(worker = %self.name, "Worker interrupted during error recovery");
                        break;
                    }
                }
            }
        }
        info!(worker = %self.name, "Worker stopped");
        Ok(())
    }

    /// Claim the next eligible job: retry-ready first, then fresh pending
    ///
    /// A lost claim is not an error; the next candidate is tried.
    pub async fn claim_next(&self) -> Result<Option<JobRecord>> {
        let now = self.time_provider.now_millis();

        let retry_ready = self.store.list_retry_ready(now).await?;
        let fresh = self
            .store
            .list_pending(self.pending_batch)
            .await?
            .into_iter()
            .filter(|job| !job.is_retry_pending());

        for candidate in retry_ready.into_iter().chain(fresh) {
            match self.controller.claim(&candidate).await? {
                ClaimOutcome::Claimed(job) => return Ok(Some(job)),
                ClaimOutcome::Conflict => {
                    debug!(worker = %self.name, job_id = %candidate.id, "Candidate taken, trying next");
                }
            }
        }
        Ok(None)
    }

    /// Claim one job, run the filler, and record the outcome
    pub async fn process_next_job(&self) -> Result<ProcessOutcome> {
        let job = match self.claim_next().await? {
            Some(job) => job,
            None => return Ok(ProcessOutcome::Idle),
        };

        if self.controller.has_reached_max_attempts(&job) {
            let failed = self.controller.fail_exhausted(&job).await?;
            return Ok(ProcessOutcome::Failed(failed));
        }

        let attempt = job.attempts + 1;
        info!(
            worker = %self.name,
            job_id = %job.id,
            attempt,
            max_attempts = job.max_attempts,
            "Processing job"
        );

        let filler = Arc::clone(&self.filler);
        let job_for_fill = job.clone();
        let result = match execute_guarded(async move { filler.fill(&job_for_fill).await }).await {
            PanicGuardResult::Success(result) => result,
            PanicGuardResult::Panicked(msg) => Err(FillError::Panicked(msg)),
        };

        match result {
            Ok(report) => {
                debug!(job_id = %job.id, duration_ms = report.duration_ms, "Form filled");
                let done = self.controller.report_success(&job, Some(attempt)).await?;
                Ok(ProcessOutcome::Completed(done))
            }
            Err(e) => {
                warn!(
                    worker = %self.name,
                    job_id = %job.id,
                    attempt,
                    error_type = e.error_type(),
                    error = %e,
                    "Form fill failed"
                );
                let log = e.to_error_log(self.time_provider.now_millis(), attempt);
                match self.controller.report_failure(&job, log).await? {
                    FailureOutcome::Retrying(job) => Ok(ProcessOutcome::Retrying(job)),
                    FailureOutcome::Failed(job) => Ok(ProcessOutcome::Failed(job)),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::recovery::CrashRecoveryService;
    use crate::application::retry::RetryScheduler;
    use crate::domain::{ErrorLogEntry, JobPayload, JobStatus};
    use crate::port::form_filler::mocks::{MockBehavior, MockFormFiller};
    use crate::port::job_store::mocks::InMemoryJobStore;
    use crate::port::time_provider::mocks::ManualClock;

    struct Fixture {
        clock: Arc<ManualClock>,
        store: Arc<InMemoryJobStore>,
        controller: Arc<LifecycleController>,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let store = Arc::new(InMemoryJobStore::new(clock.clone()));
        let controller = Arc::new(LifecycleController::new(
            store.clone(),
            clock.clone(),
            RetryScheduler::default(),
        ));
        Fixture {
            clock,
            store,
            controller,
        }
    }

    fn worker(f: &Fixture, filler: Arc<MockFormFiller>) -> Worker {
        Worker::new(
            "test-worker",
            f.store.clone(),
            f.controller.clone(),
            filler,
            f.clock.clone(),
        )
    }

    async fn insert(f: &Fixture) -> JobRecord {
        let job = JobRecord::new_test(JobPayload::new(serde_json::json!({"form": "coi"})));
        f.store.insert(&job).await.unwrap();
        job
    }

    #[tokio::test]
    async fn test_idle_when_queue_empty() {
        let f = fixture();
        let w = worker(&f, Arc::new(MockFormFiller::new_success()));

        assert_eq!(w.process_next_job().await.unwrap(), ProcessOutcome::Idle);
    }

    #[tokio::test]
    async fn test_success_completes_job() {
        let f = fixture();
        let job = insert(&f).await;
        let filler = Arc::new(MockFormFiller::new_success());
        let w = worker(&f, filler.clone());

        let outcome = w.process_next_job().await.unwrap();

        let done = match outcome {
            ProcessOutcome::Completed(done) => done,
            other => panic!("expected completion, got {:?}", other),
        };
        assert_eq!(done.id, job.id);
        assert_eq!(done.completed_attempt, Some(1));
        assert_eq!(filler.call_count(), 1);
    }

    #[tokio::test]
    async fn test_failure_schedules_retry_and_waits_for_delay() {
        let f = fixture();
        let job = insert(&f).await;
        let w = worker(&f, Arc::new(MockFormFiller::new(MockBehavior::FailTimes(1))));

        let outcome = w.process_next_job().await.unwrap();
        assert!(matches!(outcome, ProcessOutcome::Retrying(ref j) if j.attempts == 1));

        // Retry-pending job is not picked up as a fresh job
        assert_eq!(w.process_next_job().await.unwrap(), ProcessOutcome::Idle);

        f.clock.advance(60_000);
        let outcome = w.process_next_job().await.unwrap();
        let done = match outcome {
            ProcessOutcome::Completed(done) => done,
            other => panic!("expected completion, got {:?}", other),
        };
        assert_eq!(done.id, job.id);
        assert_eq!(done.completed_attempt, Some(2));
        assert_eq!(done.error_logs.len(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_attempts_fail_job() {
        let f = fixture();
        insert(&f).await;
        let w = worker(&f, Arc::new(MockFormFiller::new_fail("captcha")));

        let mut last = ProcessOutcome::Idle;
        for _ in 0..3 {
            last = w.process_next_job().await.unwrap();
            f.clock.advance(60_000);
        }

        let failed = match last {
            ProcessOutcome::Failed(failed) => failed,
            other => panic!("expected failure, got {:?}", other),
        };
        assert_eq!(failed.attempts, 3);
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(
            failed.final_error.as_ref().map(|e| e.error_message.as_str()),
            Some("captcha")
        );
    }

    #[tokio::test]
    async fn test_recovered_job_without_attempts_left_fails_without_filling() {
        let f = fixture();
        let mut job = insert(&f).await;
        job.max_attempts = 1;
        f.store.update(&job).await.unwrap();

        // Worker records the last error, then dies before failing the job
        let running = match f.controller.claim(&job).await.unwrap() {
            ClaimOutcome::Claimed(running) => running,
            ClaimOutcome::Conflict => panic!("claim lost"),
        };
        let log = ErrorLogEntry::new(f.clock.now_millis(), 1, "portal timeout");
        f.controller.record_error(&running, log.clone()).await.unwrap();

        f.clock.advance(15 * 60_000);
        let recovery = CrashRecoveryService::new(f.store.clone(), f.clock.clone(), None);
        assert_eq!(recovery.recover_stuck_jobs().await.unwrap(), 1);

        let filler = Arc::new(MockFormFiller::new_fail("should not run"));
        let w = worker(&f, filler.clone());
        let outcome = w.process_next_job().await.unwrap();

        let failed = match outcome {
            ProcessOutcome::Failed(failed) => failed,
            other => panic!("expected failure, got {:?}", other),
        };
        assert_eq!(filler.call_count(), 0);
        assert_eq!(failed.attempts, 1);
        assert_eq!(failed.error_logs.len(), 1);
        assert_eq!(failed.final_error, Some(log));

        // Terminal: nothing left to claim
        assert_eq!(w.process_next_job().await.unwrap(), ProcessOutcome::Idle);
    }

    #[tokio::test]
    async fn test_panic_recorded_as_error() {
        let f = fixture();
        insert(&f).await;
        let w = worker(&f, Arc::new(MockFormFiller::new_panic_inducing("browser crashed")));

        let outcome = w.process_next_job().await.unwrap();

        let job = match outcome {
            ProcessOutcome::Retrying(job) => job,
            other => panic!("expected retry, got {:?}", other),
        };
        assert_eq!(job.error_logs[0].error_type, "Panic");
        assert!(job.error_logs[0].error_message.contains("browser crashed"));
    }

    #[tokio::test]
    async fn test_retry_ready_served_before_fresh() {
        let f = fixture();
        let retrying = insert(&f).await;
        let w = worker(&f, Arc::new(MockFormFiller::new(MockBehavior::FailTimes(1))));
        w.process_next_job().await.unwrap();

        let fresh = insert(&f).await;
        f.clock.advance(60_000);

        let claimed = w.claim_next().await.unwrap().unwrap();
        assert_eq!(claimed.id, retrying.id);
        let claimed = w.claim_next().await.unwrap().unwrap();
        assert_eq!(claimed.id, fresh.id);
    }

    #[tokio::test]
    async fn test_run_exits_on_shutdown() {
        let f = fixture();
        insert(&f).await;
        let w = Arc::new(
            worker(&f, Arc::new(MockFormFiller::new_success()))
                .with_poll_interval(Duration::from_millis(10)),
        );
        let (tx, token) = shutdown_channel();

        let runner = Arc::clone(&w);
        let handle = tokio::spawn(async move { runner.run(token).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.shutdown();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        assert_eq!(f.store.count_by_status(JobStatus::Completed).await.unwrap(), 1);
    }
}
