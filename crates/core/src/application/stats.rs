// Derived queue and job metrics (computed, never stored)

use crate::domain::{JobRecord, JobStatus};
use crate::error::Result;
use crate::port::JobStore;
use serde::Serialize;

/// Job counts per status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
}

impl QueueStats {
    pub async fn collect(store: &dyn JobStore) -> Result<Self> {
        Ok(Self {
            pending: store.count_by_status(JobStatus::Pending).await?,
            processing: store.count_by_status(JobStatus::Processing).await?,
            completed: store.count_by_status(JobStatus::Completed).await?,
            failed: store.count_by_status(JobStatus::Failed).await?,
        })
    }

    pub fn total(&self) -> i64 {
        self.pending + self.processing + self.completed + self.failed
    }

    /// `completed / (completed + failed)`; `None` until some job is terminal
    pub fn success_rate(&self) -> Option<f64> {
        let terminal = self.completed + self.failed;
        if terminal == 0 {
            return None;
        }
        Some(self.completed as f64 / terminal as f64)
    }
}

/// Time from claim to terminal state
pub fn processing_time_ms(job: &JobRecord) -> Option<i64> {
    let started = job.started_at?;
    let finished = job.completed_at.or(job.failed_at)?;
    Some(finished - started)
}
