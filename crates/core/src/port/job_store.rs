// Job Store Port (Interface)

use crate::domain::{JobId, JobRecord, JobStatus};
use crate::error::Result;
use async_trait::async_trait;

/// Durable collection of job records
///
/// The store is the only synchronization point between workers. `atomic_claim`
/// and the two bulk operations must each be a single conditional statement at
/// the storage layer; everything else is plain read/write by the owning worker.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new job, returning its id
    async fn insert(&self, job: &JobRecord) -> Result<JobId>;

    /// Find job by ID
    async fn find_by_id(&self, id: &str) -> Result<Option<JobRecord>>;

    /// Find job by its originating verification artifact
    async fn find_by_reference(&self, reference: &str) -> Result<Option<JobRecord>>;

    /// Pending jobs, oldest `created_at` first
    async fn list_pending(&self, limit: i64) -> Result<Vec<JobRecord>>;

    /// Pending jobs whose `next_retry_at <= now`, earliest first
    async fn list_retry_ready(&self, now_millis: i64) -> Result<Vec<JobRecord>>;

    /// Failed jobs, most recent `failed_at` first
    async fn list_failed(&self, limit: i64) -> Result<Vec<JobRecord>>;

    /// Count jobs by status
    async fn count_by_status(&self, status: JobStatus) -> Result<i64>;

    /// Move a job to processing only if its stored status is still `expected`
    ///
    /// Sets `started_at` and clears `next_retry_at` in the same statement.
    /// Returns `false` when another actor changed the status first.
    async fn atomic_claim(&self, id: &str, expected: JobStatus, started_at: i64) -> Result<bool>;

    /// Persist a mutated record (error logs are append-only)
    async fn update(&self, job: &JobRecord) -> Result<()>;

    /// Return every processing job with `started_at` missing or older than
    /// `older_than` to pending, stamping `recovered_at`
    async fn bulk_recover_stuck(&self, older_than: i64) -> Result<u64>;

    /// Delete completed jobs with `completed_at < cutoff` (failed jobs are kept)
    async fn delete_terminal_older_than(&self, cutoff: i64) -> Result<u64>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::application::retry::is_retry_ready;
    use crate::error::AppError;
    use crate::port::TimeProvider;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    /// In-memory JobStore; a single mutex makes every operation atomic
    pub struct InMemoryJobStore {
        jobs: Mutex<HashMap<JobId, JobRecord>>,
        time_provider: Arc<dyn TimeProvider>,
        fail_writes: Mutex<bool>,
    }

    impl InMemoryJobStore {
        pub fn new(time_provider: Arc<dyn TimeProvider>) -> Self {
            Self {
                jobs: Mutex::new(HashMap::new()),
                time_provider,
                fail_writes: Mutex::new(false),
            }
        }

        /// Make subsequent writes fail with a database error
        pub fn set_fail_writes(&self, fail: bool) {
            *self.fail_writes.lock().unwrap() = fail;
        }

        pub fn len(&self) -> usize {
            self.jobs.lock().unwrap().len()
        }

        pub fn is_empty(&self) -> bool {
            self.len() == 0
        }

        fn check_writable(&self) -> Result<()> {
            if *self.fail_writes.lock().unwrap() {
                return Err(AppError::Database("store unavailable".to_string()));
            }
            Ok(())
        }

        fn collect<F, K>(&self, filter: F, sort_key: K) -> Vec<JobRecord>
        where
            F: Fn(&JobRecord) -> bool,
            K: Fn(&JobRecord) -> (i64, String),
        {
            let jobs = self.jobs.lock().unwrap();
            let mut matched: Vec<JobRecord> = jobs.values().filter(|j| filter(j)).cloned().collect();
            matched.sort_by_key(|j| sort_key(j));
            matched
        }
    }

    #[async_trait]
    impl JobStore for InMemoryJobStore {
        async fn insert(&self, job: &JobRecord) -> Result<JobId> {
            self.check_writable()?;
            let mut jobs = self.jobs.lock().unwrap();
            if jobs.contains_key(&job.id) {
                return Err(AppError::Database(format!(
                    "Unique constraint violation: {}",
                    job.id
                )));
            }
            jobs.insert(job.id.clone(), job.clone());
            Ok(job.id.clone())
        }

        async fn find_by_id(&self, id: &str) -> Result<Option<JobRecord>> {
            Ok(self.jobs.lock().unwrap().get(id).cloned())
        }

        async fn find_by_reference(&self, reference: &str) -> Result<Option<JobRecord>> {
            Ok(self
                .collect(
                    |j| j.source_reference.as_deref() == Some(reference),
                    |j| (j.created_at, j.id.clone()),
                )
                .into_iter()
                .next())
        }

        async fn list_pending(&self, limit: i64) -> Result<Vec<JobRecord>> {
            let mut jobs = self.collect(
                |j| j.status == JobStatus::Pending,
                |j| (j.created_at, j.id.clone()),
            );
            jobs.truncate(limit.max(0) as usize);
            Ok(jobs)
        }

        async fn list_retry_ready(&self, now_millis: i64) -> Result<Vec<JobRecord>> {
            Ok(self.collect(
                |j| is_retry_ready(j, now_millis),
                |j| (j.next_retry_at.unwrap_or_default(), j.id.clone()),
            ))
        }

        async fn list_failed(&self, limit: i64) -> Result<Vec<JobRecord>> {
            let mut jobs = self.collect(
                |j| j.status == JobStatus::Failed,
                |j| (-j.failed_at.unwrap_or_default(), j.id.clone()),
            );
            jobs.truncate(limit.max(0) as usize);
            Ok(jobs)
        }

        async fn count_by_status(&self, status: JobStatus) -> Result<i64> {
            let jobs = self.jobs.lock().unwrap();
            Ok(jobs.values().filter(|j| j.status == status).count() as i64)
        }

        async fn atomic_claim(&self, id: &str, expected: JobStatus, started_at: i64) -> Result<bool> {
            self.check_writable()?;
            let mut jobs = self.jobs.lock().unwrap();
            match jobs.get_mut(id) {
                Some(job) if job.status == expected => {
                    job.status = JobStatus::Processing;
                    job.started_at = Some(started_at);
                    job.next_retry_at = None;
                    Ok(true)
                }
                _ => Ok(false),
            }
        }

        async fn update(&self, job: &JobRecord) -> Result<()> {
            self.check_writable()?;
            let mut jobs = self.jobs.lock().unwrap();
            match jobs.get_mut(&job.id) {
                Some(stored) => {
                    *stored = job.clone();
                    Ok(())
                }
                None => Err(AppError::NotFound(format!("Job {} not found", job.id))),
            }
        }

        async fn bulk_recover_stuck(&self, older_than: i64) -> Result<u64> {
            self.check_writable()?;
            let now = self.time_provider.now_millis();
            let mut jobs = self.jobs.lock().unwrap();
            let mut count = 0;
            for job in jobs.values_mut() {
                let stale = job.started_at.map_or(true, |s| s < older_than);
                if job.status == JobStatus::Processing && stale {
                    job.status = JobStatus::Pending;
                    job.recovered_at = Some(now);
                    count += 1;
                }
            }
            Ok(count)
        }

        async fn delete_terminal_older_than(&self, cutoff: i64) -> Result<u64> {
            self.check_writable()?;
            let mut jobs = self.jobs.lock().unwrap();
            let before = jobs.len();
            jobs.retain(|_, j| {
                !(j.status == JobStatus::Completed && j.completed_at.is_some_and(|c| c < cutoff))
            });
            Ok((before - jobs.len()) as u64)
        }
    }
}
