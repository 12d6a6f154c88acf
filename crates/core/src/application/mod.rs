// Application Layer - Use Cases and Business Logic

pub mod lifecycle;
pub mod recovery;
pub mod retention;
pub mod retry;
pub mod stats;
pub mod submission;
pub mod worker;

// Re-exports
pub use lifecycle::{ClaimOutcome, FailureOutcome, LifecycleController};
pub use recovery::CrashRecoveryService;
pub use retention::RetentionCleaner;
pub use retry::{is_retry_ready, RetryScheduler};
pub use stats::{processing_time_ms, QueueStats};
pub use submission::{EnqueueRequest, SubmissionService};
pub use worker::{shutdown_channel, ProcessOutcome, ShutdownSender, ShutdownToken, Worker};
