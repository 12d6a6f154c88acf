// Submission Service - entry point for the form-submission front end

pub mod enqueue;
#[cfg(test)]
mod enqueue_test;

pub use enqueue::EnqueueRequest;

use crate::domain::JobId;
use crate::error::Result;
use crate::port::{IdProvider, JobStore, TimeProvider};
use std::sync::Arc;

/// Submission Service
pub struct SubmissionService {
    store: Arc<dyn JobStore>,
    id_provider: Arc<dyn IdProvider>,
    time_provider: Arc<dyn TimeProvider>,
}

impl SubmissionService {
    pub fn new(
        store: Arc<dyn JobStore>,
        id_provider: Arc<dyn IdProvider>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            store,
            id_provider,
            time_provider,
        }
    }

    /// Enqueue a new job
    pub async fn enqueue(&self, req: EnqueueRequest) -> Result<JobId> {
        enqueue::execute(
            self.store.as_ref(),
            self.id_provider.as_ref(),
            self.time_provider.as_ref(),
            req,
        )
        .await
    }
}
