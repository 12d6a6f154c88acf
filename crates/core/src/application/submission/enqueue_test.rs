//! Unit tests for enqueue

use super::enqueue::{validate_request, MAX_ATTEMPTS_LIMIT};
use super::*;
use crate::domain::JobStatus;
use crate::error::AppError;
use crate::port::id_provider::mocks::SequentialIdProvider;
use crate::port::job_store::mocks::InMemoryJobStore;
use crate::port::time_provider::mocks::ManualClock;
use serde_json::json;

fn service() -> (Arc<InMemoryJobStore>, SubmissionService) {
    let clock = Arc::new(ManualClock::new(5_000));
    let store = Arc::new(InMemoryJobStore::new(clock.clone()));
    let service = SubmissionService::new(
        store.clone(),
        Arc::new(SequentialIdProvider::new("job")),
        clock,
    );
    (store, service)
}

#[test]
fn test_validate_zero_max_attempts() {
    let req = EnqueueRequest::new(json!({})).with_max_attempts(0);

    let result = validate_request(&req);
    assert!(result.is_err());
    assert!(result.unwrap_err().to_string().contains("max_attempts"));
}

#[test]
fn test_validate_max_attempts_too_large() {
    let req = EnqueueRequest::new(json!({})).with_max_attempts(MAX_ATTEMPTS_LIMIT + 1);
    assert!(validate_request(&req).is_err());
}

#[test]
fn test_validate_blank_reference() {
    let req = EnqueueRequest::new(json!({})).with_source_reference("  ");
    assert!(validate_request(&req).is_err());
}

#[test]
fn test_request_deserializes_camel_case() {
    let req: EnqueueRequest = serde_json::from_value(json!({
        "payload": {"policy": "GL"},
        "sourceReference": "verification-9"
    }))
    .unwrap();

    assert_eq!(req.source_reference.as_deref(), Some("verification-9"));
    assert!(req.max_attempts.is_none());
}

#[tokio::test]
async fn test_enqueue_creates_fresh_pending_job() {
    let (store, service) = service();

    let id = service
        .enqueue(EnqueueRequest::new(json!({"company": "acme"})).with_source_reference("ver-1"))
        .await
        .unwrap();

    assert_eq!(id, "job-1");
    let job = store.find_by_id(&id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.attempts, 0);
    assert_eq!(job.max_attempts, 3);
    assert!(job.error_logs.is_empty());
    assert!(job.next_retry_at.is_none());
    assert_eq!(job.created_at, 5_000);
    assert_eq!(job.payload.as_value(), &json!({"company": "acme"}));

    let by_ref = store.find_by_reference("ver-1").await.unwrap().unwrap();
    assert_eq!(by_ref.id, id);
}

#[tokio::test]
async fn test_enqueue_custom_max_attempts() {
    let (store, service) = service();

    let id = service
        .enqueue(EnqueueRequest::new(json!({})).with_max_attempts(5))
        .await
        .unwrap();

    assert_eq!(store.find_by_id(&id).await.unwrap().unwrap().max_attempts, 5);
}

#[tokio::test]
async fn test_enqueue_invalid_request_writes_nothing() {
    let (store, service) = service();

    let err = service
        .enqueue(EnqueueRequest::new(json!({})).with_max_attempts(0))
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Validation(_)));
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_enqueue_store_failure() {
    let (store, service) = service();
    store.set_fail_writes(true);

    let err = service.enqueue(EnqueueRequest::new(json!({}))).await.unwrap_err();
    assert!(matches!(err, AppError::Database(_)));
}
