// SQLite JobStore Implementation

use crate::error::map_sqlx_error;
use async_trait::async_trait;
use formpilot_core::domain::{ErrorLogEntry, JobId, JobPayload, JobRecord, JobStatus};
use formpilot_core::error::{AppError, Result};
use formpilot_core::port::{JobStore, TimeProvider};
use sqlx::{SqliteConnection, SqlitePool};
use std::sync::Arc;
use tracing::debug;

pub struct SqliteJobStore {
    pool: SqlitePool,
    time_provider: Arc<dyn TimeProvider>,
}

impl SqliteJobStore {
    pub fn new(pool: SqlitePool, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            pool,
            time_provider,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Rows plus their error logs, read inside one transaction for a consistent snapshot
    async fn fetch_records(&self, sql: &str, binds: &[i64]) -> Result<Vec<JobRecord>> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        let mut query = sqlx::query_as::<_, JobRow>(sql);
        for value in binds {
            query = query.bind(*value);
        }
        let rows = query.fetch_all(&mut *tx).await.map_err(map_sqlx_error)?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let logs = load_error_logs(&mut tx, &row.id).await?;
            records.push(row.into_record(logs)?);
        }

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(records)
    }

    async fn fetch_one_by(&self, column: &str, value: &str) -> Result<Option<JobRecord>> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        let sql = format!(
            "SELECT * FROM jobs WHERE {} = ? ORDER BY created_at ASC, id ASC LIMIT 1",
            column
        );
        let row = sqlx::query_as::<_, JobRow>(&sql)
            .bind(value)
            .fetch_optional(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        let record = match row {
            Some(row) => {
                let logs = load_error_logs(&mut tx, &row.id).await?;
                Some(row.into_record(logs)?)
            }
            None => None,
        };

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(record)
    }
}

async fn load_error_logs(conn: &mut SqliteConnection, job_id: &str) -> Result<Vec<ErrorLogEntry>> {
    let rows = sqlx::query_as::<_, ErrorLogRow>(
        r#"
        SELECT timestamp, attempt_number, error_message, error_type,
               error_stack, screenshot_url, screenshot_key
        FROM job_error_logs
        WHERE job_id = ?
        ORDER BY position ASC
        "#,
    )
    .bind(job_id)
    .fetch_all(conn)
    .await
    .map_err(map_sqlx_error)?;

    Ok(rows.into_iter().map(ErrorLogRow::into_entry).collect())
}

/// Store logs from `from_position` on; positions already stored are left alone
async fn append_error_logs(
    conn: &mut SqliteConnection,
    job_id: &str,
    logs: &[ErrorLogEntry],
    from_position: usize,
) -> Result<()> {
    for (position, entry) in logs.iter().enumerate().skip(from_position) {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO job_error_logs (
                job_id, position, timestamp, attempt_number, error_message,
                error_type, error_stack, screenshot_url, screenshot_key
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(job_id)
        .bind(position as i64)
        .bind(entry.timestamp)
        .bind(entry.attempt_number)
        .bind(&entry.error_message)
        .bind(&entry.error_type)
        .bind(&entry.error_stack)
        .bind(&entry.screenshot_url)
        .bind(&entry.screenshot_key)
        .execute(&mut *conn)
        .await
        .map_err(map_sqlx_error)?;
    }
    Ok(())
}

fn encode_final_error(job: &JobRecord) -> Result<Option<String>> {
    Ok(job
        .final_error
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?)
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn insert(&self, job: &JobRecord) -> Result<JobId> {
        let final_error = encode_final_error(job)?;
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        sqlx::query(
            r#"
            INSERT INTO jobs (
                id, source_reference, payload, status,
                created_at, started_at, completed_at, failed_at,
                last_attempt_at, next_retry_at, recovered_at,
                attempts, max_attempts, completed_attempt,
                last_error, last_error_timestamp, final_error
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&job.id)
        .bind(&job.source_reference)
        .bind(job.payload.as_value().to_string())
        .bind(job.status.as_str())
        .bind(job.created_at)
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(job.failed_at)
        .bind(job.last_attempt_at)
        .bind(job.next_retry_at)
        .bind(job.recovered_at)
        .bind(job.attempts)
        .bind(job.max_attempts)
        .bind(job.completed_attempt)
        .bind(&job.last_error)
        .bind(job.last_error_timestamp)
        .bind(&final_error)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        append_error_logs(&mut tx, &job.id, &job.error_logs, 0).await?;

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(job.id.clone())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<JobRecord>> {
        self.fetch_one_by("id", id).await
    }

    async fn find_by_reference(&self, reference: &str) -> Result<Option<JobRecord>> {
        self.fetch_one_by("source_reference", reference).await
    }

    async fn list_pending(&self, limit: i64) -> Result<Vec<JobRecord>> {
        self.fetch_records(
            r#"
            SELECT * FROM jobs
            WHERE status = 'pending'
            ORDER BY created_at ASC, id ASC
            LIMIT ?
            "#,
            &[limit.max(0)],
        )
        .await
    }

    async fn list_retry_ready(&self, now_millis: i64) -> Result<Vec<JobRecord>> {
        self.fetch_records(
            r#"
            SELECT * FROM jobs
            WHERE status = 'pending'
              AND next_retry_at IS NOT NULL
              AND next_retry_at <= ?
            ORDER BY next_retry_at ASC, id ASC
            "#,
            &[now_millis],
        )
        .await
    }

    async fn list_failed(&self, limit: i64) -> Result<Vec<JobRecord>> {
        self.fetch_records(
            r#"
            SELECT * FROM jobs
            WHERE status = 'failed'
            ORDER BY failed_at DESC, id ASC
            LIMIT ?
            "#,
            &[limit.max(0)],
        )
        .await
    }

    async fn count_by_status(&self, status: JobStatus) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE status = ?")
            .bind(status.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(count)
    }

    async fn atomic_claim(&self, id: &str, expected: JobStatus, started_at: i64) -> Result<bool> {
        // Compare-and-swap on status: the WHERE clause is the ownership check
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = ?, started_at = ?, next_retry_at = NULL
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(JobStatus::Processing.as_str())
        .bind(started_at)
        .bind(id)
        .bind(expected.as_str())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let claimed = result.rows_affected() == 1;
        debug!(job_id = %id, claimed, "Atomic claim");
        Ok(claimed)
    }

    async fn update(&self, job: &JobRecord) -> Result<()> {
        let final_error = encode_final_error(job)?;
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET source_reference = ?, payload = ?, status = ?,
                started_at = ?, completed_at = ?, failed_at = ?,
                last_attempt_at = ?, next_retry_at = ?, recovered_at = ?,
                attempts = ?, max_attempts = ?, completed_attempt = ?,
                last_error = ?, last_error_timestamp = ?, final_error = ?
            WHERE id = ?
            "#,
        )
        .bind(&job.source_reference)
        .bind(job.payload.as_value().to_string())
        .bind(job.status.as_str())
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(job.failed_at)
        .bind(job.last_attempt_at)
        .bind(job.next_retry_at)
        .bind(job.recovered_at)
        .bind(job.attempts)
        .bind(job.max_attempts)
        .bind(job.completed_attempt)
        .bind(&job.last_error)
        .bind(job.last_error_timestamp)
        .bind(&final_error)
        .bind(&job.id)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Job {} not found", job.id)));
        }

        let stored: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM job_error_logs WHERE job_id = ?")
            .bind(&job.id)
            .fetch_one(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        append_error_logs(&mut tx, &job.id, &job.error_logs, stored.max(0) as usize).await?;

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn bulk_recover_stuck(&self, older_than: i64) -> Result<u64> {
        let now = self.time_provider.now_millis();

        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = ?, recovered_at = ?
            WHERE status = ?
              AND (started_at IS NULL OR started_at < ?)
            "#,
        )
        .bind(JobStatus::Pending.as_str())
        .bind(now)
        .bind(JobStatus::Processing.as_str())
        .bind(older_than)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected())
    }

    async fn delete_terminal_older_than(&self, cutoff: i64) -> Result<u64> {
        // Error logs go with the job via ON DELETE CASCADE
        let result = sqlx::query(
            r#"
            DELETE FROM jobs
            WHERE status = ?
              AND completed_at IS NOT NULL
              AND completed_at < ?
            "#,
        )
        .bind(JobStatus::Completed.as_str())
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected())
    }
}

/// SQLite row representation of `jobs`
#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: String,
    source_reference: Option<String>,
    payload: String,
    status: String,
    created_at: i64,
    started_at: Option<i64>,
    completed_at: Option<i64>,
    failed_at: Option<i64>,
    last_attempt_at: Option<i64>,
    next_retry_at: Option<i64>,
    recovered_at: Option<i64>,
    attempts: i32,
    max_attempts: i32,
    completed_attempt: Option<i32>,
    last_error: Option<String>,
    last_error_timestamp: Option<i64>,
    final_error: Option<String>,
}

impl JobRow {
    fn into_record(self, error_logs: Vec<ErrorLogEntry>) -> Result<JobRecord> {
        let status: JobStatus = self.status.parse().map_err(|e| {
            AppError::Database(format!("Corrupt status for job {}: {}", self.id, e))
        })?;

        let payload: serde_json::Value = serde_json::from_str(&self.payload)?;
        let final_error = self
            .final_error
            .as_deref()
            .map(serde_json::from_str::<ErrorLogEntry>)
            .transpose()?;

        Ok(JobRecord {
            id: self.id,
            source_reference: self.source_reference,
            payload: JobPayload::new(payload),
            status,
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            failed_at: self.failed_at,
            last_attempt_at: self.last_attempt_at,
            next_retry_at: self.next_retry_at,
            recovered_at: self.recovered_at,
            attempts: self.attempts,
            max_attempts: self.max_attempts,
            completed_attempt: self.completed_attempt,
            error_logs,
            last_error: self.last_error,
            last_error_timestamp: self.last_error_timestamp,
            final_error,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ErrorLogRow {
    timestamp: i64,
    attempt_number: i32,
    error_message: String,
    error_type: String,
    error_stack: Option<String>,
    screenshot_url: Option<String>,
    screenshot_key: Option<String>,
}

impl ErrorLogRow {
    fn into_entry(self) -> ErrorLogEntry {
        ErrorLogEntry {
            timestamp: self.timestamp,
            attempt_number: self.attempt_number,
            error_message: self.error_message,
            error_type: self.error_type,
            error_stack: self.error_stack,
            screenshot_url: self.screenshot_url,
            screenshot_key: self.screenshot_key,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{create_pool, run_migrations};
    use formpilot_core::port::time_provider::mocks::ManualClock;

    const NOW: i64 = 1_700_000_000_000;

    async fn setup_test_db() -> (SqliteJobStore, Arc<ManualClock>) {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        let clock = Arc::new(ManualClock::new(NOW));
        (SqliteJobStore::new(pool, clock.clone()), clock)
    }

    fn new_job() -> JobRecord {
        JobRecord::new_test(JobPayload::new(serde_json::json!({
            "insured": "Acme Roofing",
            "fields": {"policy": "GL-123", "limits": [1000000, 2000000]}
        })))
    }

    fn job_with_status(status: JobStatus) -> JobRecord {
        let mut job = new_job();
        job.status = status;
        job
    }

    #[tokio::test]
    async fn test_insert_and_find() {
        let (store, _) = setup_test_db().await;
        let job = new_job().with_source_reference("verification-42");

        store.insert(&job).await.unwrap();

        let found = store.find_by_id(&job.id).await.unwrap().unwrap();
        assert_eq!(found, job);

        let by_ref = store.find_by_reference("verification-42").await.unwrap().unwrap();
        assert_eq!(by_ref.id, job.id);
        assert!(store.find_by_reference("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_insert_is_unique_violation() {
        let (store, _) = setup_test_db().await;
        let job = new_job();
        store.insert(&job).await.unwrap();

        let err = store.insert(&job).await.unwrap_err();
        assert!(err.to_string().contains("Unique constraint"));
    }

    #[tokio::test]
    async fn test_atomic_claim_only_once() {
        let (store, _) = setup_test_db().await;
        let mut job = new_job();
        job.next_retry_at = Some(NOW - 1);
        store.insert(&job).await.unwrap();

        assert!(store.atomic_claim(&job.id, JobStatus::Pending, NOW).await.unwrap());
        assert!(!store.atomic_claim(&job.id, JobStatus::Pending, NOW).await.unwrap());

        let stored = store.find_by_id(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Processing);
        assert_eq!(stored.started_at, Some(NOW));
        assert!(stored.next_retry_at.is_none());
    }

    #[tokio::test]
    async fn test_atomic_claim_missing_job() {
        let (store, _) = setup_test_db().await;
        assert!(!store.atomic_claim("nope", JobStatus::Pending, NOW).await.unwrap());
    }

    #[tokio::test]
    async fn test_update_appends_error_logs_without_duplicates() {
        let (store, _) = setup_test_db().await;
        let mut job = job_with_status(JobStatus::Processing);
        store.insert(&job).await.unwrap();

        let first = ErrorLogEntry::new(NOW, 1, "timeout").with_type("TimeoutError");
        job.error_logs.push(first.clone());
        job.attempts = 1;
        store.update(&job).await.unwrap();

        let second = ErrorLogEntry::new(NOW + 10, 2, "captcha")
            .with_stack("at solve (captcha.js:3)")
            .with_screenshot(Some("https://s3/shot.png".into()), Some("shot.png".into()));
        job.error_logs.push(second.clone());
        job.attempts = 2;
        job.status = JobStatus::Failed;
        job.failed_at = Some(NOW + 10);
        job.final_error = Some(second.clone());
        store.update(&job).await.unwrap();
        store.update(&job).await.unwrap();

        let stored = store.find_by_id(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.error_logs, vec![first, second.clone()]);
        assert_eq!(stored.final_error, Some(second));
        assert_eq!(stored.attempts, 2);
    }

    #[tokio::test]
    async fn test_update_missing_job_not_found() {
        let (store, _) = setup_test_db().await;
        let err = store.update(&new_job()).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_list_pending_oldest_first_with_limit() {
        let (store, _) = setup_test_db().await;
        for offset in [300, 100, 200] {
            let mut job = new_job();
            job.created_at = NOW + offset;
            store.insert(&job).await.unwrap();
        }
        store.insert(&job_with_status(JobStatus::Completed)).await.unwrap();

        let pending = store.list_pending(2).await.unwrap();

        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].created_at, NOW + 100);
        assert_eq!(pending[1].created_at, NOW + 200);
    }

    #[tokio::test]
    async fn test_list_retry_ready() {
        let (store, _) = setup_test_db().await;
        let mut later = new_job();
        later.next_retry_at = Some(NOW + 5_000);
        let mut soon = new_job();
        soon.next_retry_at = Some(NOW - 5_000);
        let mut now = new_job();
        now.next_retry_at = Some(NOW);
        let fresh = new_job();
        for job in [&later, &soon, &now, &fresh] {
            store.insert(job).await.unwrap();
        }

        let ready = store.list_retry_ready(NOW).await.unwrap();

        let ids: Vec<_> = ready.iter().map(|j| j.id.as_str()).collect();
        assert_eq!(ids, vec![soon.id.as_str(), now.id.as_str()]);
    }

    #[tokio::test]
    async fn test_list_failed_most_recent_first() {
        let (store, _) = setup_test_db().await;
        for failed_at in [NOW - 100, NOW, NOW - 50] {
            let mut job = job_with_status(JobStatus::Failed);
            job.failed_at = Some(failed_at);
            job.final_error = Some(ErrorLogEntry::new(failed_at, 3, "gave up"));
            store.insert(&job).await.unwrap();
        }

        let failed = store.list_failed(10).await.unwrap();
        let times: Vec<_> = failed.iter().map(|j| j.failed_at.unwrap()).collect();
        assert_eq!(times, vec![NOW, NOW - 50, NOW - 100]);
    }

    #[tokio::test]
    async fn test_count_by_status() {
        let (store, _) = setup_test_db().await;
        store.insert(&new_job()).await.unwrap();
        store.insert(&new_job()).await.unwrap();
        store.insert(&job_with_status(JobStatus::Processing)).await.unwrap();

        assert_eq!(store.count_by_status(JobStatus::Pending).await.unwrap(), 2);
        assert_eq!(store.count_by_status(JobStatus::Processing).await.unwrap(), 1);
        assert_eq!(store.count_by_status(JobStatus::Failed).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_bulk_recover_stuck() {
        let (store, clock) = setup_test_db().await;
        let minute = 60_000;

        let mut stuck = job_with_status(JobStatus::Processing);
        stuck.started_at = Some(NOW - 15 * minute);
        stuck.attempts = 1;
        let mut no_start = job_with_status(JobStatus::Processing);
        no_start.started_at = None;
        let mut active = job_with_status(JobStatus::Processing);
        active.started_at = Some(NOW - minute);
        for job in [&stuck, &no_start, &active] {
            store.insert(job).await.unwrap();
        }

        clock.advance(1);
        let recovered = store.bulk_recover_stuck(NOW - 10 * minute).await.unwrap();
        assert_eq!(recovered, 2);

        let stuck = store.find_by_id(&stuck.id).await.unwrap().unwrap();
        assert_eq!(stuck.status, JobStatus::Pending);
        assert_eq!(stuck.recovered_at, Some(NOW + 1));
        assert_eq!(stuck.attempts, 1);

        let active = store.find_by_id(&active.id).await.unwrap().unwrap();
        assert_eq!(active.status, JobStatus::Processing);
    }

    #[tokio::test]
    async fn test_delete_completed_older_than_cutoff() {
        let (store, _) = setup_test_db().await;
        let day = 24 * 60 * 60 * 1000;

        let mut old = job_with_status(JobStatus::Completed);
        old.completed_at = Some(NOW - 31 * day);
        old.error_logs.push(ErrorLogEntry::new(NOW - 31 * day, 1, "flaky"));
        old.attempts = 1;
        let mut recent = job_with_status(JobStatus::Completed);
        recent.completed_at = Some(NOW - 29 * day);
        let mut ancient_failure = job_with_status(JobStatus::Failed);
        ancient_failure.failed_at = Some(NOW - 400 * day);
        for job in [&old, &recent, &ancient_failure] {
            store.insert(job).await.unwrap();
        }

        let deleted = store.delete_terminal_older_than(NOW - 30 * day).await.unwrap();
        assert_eq!(deleted, 1);

        assert!(store.find_by_id(&old.id).await.unwrap().is_none());
        assert!(store.find_by_id(&recent.id).await.unwrap().is_some());
        assert!(store.find_by_id(&ancient_failure.id).await.unwrap().is_some());

        let orphan_logs: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM job_error_logs WHERE job_id = ?")
            .bind(&old.id)
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(orphan_logs, 0);
    }
}
