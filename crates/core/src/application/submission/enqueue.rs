// Enqueue Use Case

use crate::domain::{JobId, JobPayload, JobRecord, DEFAULT_MAX_ATTEMPTS};
use crate::error::{AppError, Result};
use crate::port::{IdProvider, JobStore, TimeProvider};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Upper bound on `max_attempts` accepted from callers
pub const MAX_ATTEMPTS_LIMIT: i32 = 100;

/// Enqueue request
///
/// The payload is stored as-is; the engine never inspects it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueRequest {
    pub payload: serde_json::Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_reference: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<i32>,
}

impl EnqueueRequest {
    pub fn new(payload: serde_json::Value) -> Self {
        Self {
            payload,
            source_reference: None,
            max_attempts: None,
        }
    }

    pub fn with_source_reference(mut self, reference: impl Into<String>) -> Self {
        self.source_reference = Some(reference.into());
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }
}

/// Validate enqueue request
pub(crate) fn validate_request(req: &EnqueueRequest) -> Result<()> {
    if let Some(max_attempts) = req.max_attempts {
        if !(1..=MAX_ATTEMPTS_LIMIT).contains(&max_attempts) {
            return Err(AppError::Validation(format!(
                "max_attempts must be between 1 and {}, got {}",
                MAX_ATTEMPTS_LIMIT, max_attempts
            )));
        }
    }

    if let Some(reference) = &req.source_reference {
        if reference.trim().is_empty() {
            return Err(AppError::Validation(
                "source_reference cannot be blank".to_string(),
            ));
        }
    }

    Ok(())
}

/// Execute enqueue use case
///
/// # Arguments
///
/// * `store` - Job store
/// * `id_provider` - ID generator (injected for determinism)
/// * `time_provider` - Time provider (injected for determinism)
/// * `req` - Enqueue request
pub async fn execute(
    store: &dyn JobStore,
    id_provider: &dyn IdProvider,
    time_provider: &dyn TimeProvider,
    req: EnqueueRequest,
) -> Result<JobId> {
    validate_request(&req)?;

    let job_id = id_provider.generate_id();
    let created_at = time_provider.now_millis();

    let mut job = JobRecord::new(job_id, created_at, JobPayload::new(req.payload))
        .with_max_attempts(req.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS));
    if let Some(reference) = req.source_reference {
        job = job.with_source_reference(reference);
    }

    let id = store.insert(&job).await?;

    info!(
        job_id = %id,
        source_reference = ?job.source_reference,
        max_attempts = job.max_attempts,
        "Job enqueued"
    );
    Ok(id)
}
