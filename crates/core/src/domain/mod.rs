// Domain Layer - Job records and pure lifecycle transitions

pub mod error;
pub mod job;
pub mod transition;

// Re-exports
pub use error::DomainError;
pub use job::{ErrorLogEntry, JobId, JobPayload, JobRecord, JobStatus, DEFAULT_MAX_ATTEMPTS};
pub use transition::{StoreMutation, Transition};
