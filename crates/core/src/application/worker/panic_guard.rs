// Panic isolation for form-fill tasks
use std::any::Any;
use std::future::Future;
use tokio::task::JoinError;
use tracing::error;

/// Result of a panic-guarded execution
#[derive(Debug)]
pub enum PanicGuardResult<T> {
    /// Execution completed
    Success(T),
    /// Execution panicked (or the task was cancelled)
    Panicked(String),
}

/// Run a future on its own tokio task so a panic cannot unwind into the worker
///
/// # Example
/// ```text
/// match execute_guarded(async { panic!("boom") }).await {
///     PanicGuardResult::Panicked(msg) => assert_eq!(msg, "boom"),
///     PanicGuardResult::Success(_) => unreachable!(),
/// }
/// ```
pub async fn execute_guarded<F, T>(future: F) -> PanicGuardResult<T>
where
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    match tokio::spawn(future).await {
        Ok(value) => PanicGuardResult::Success(value),
        Err(join_err) => {
            let panic_msg = join_error_message(join_err);
            error!(panic_msg = %panic_msg, "Form fill task panicked");
            PanicGuardResult::Panicked(panic_msg)
        }
    }
}

fn join_error_message(join_err: JoinError) -> String {
    if join_err.is_cancelled() {
        return "task cancelled".to_string();
    }
    match join_err.try_into_panic() {
        Ok(payload) => panic_message(payload.as_ref()),
        Err(other) => other.to_string(),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_guarded_success() {
        match execute_guarded(async { 42 }).await {
            PanicGuardResult::Success(v) => assert_eq!(v, 42),
            PanicGuardResult::Panicked(msg) => panic!("unexpected panic: {}", msg),
        }
    }

    #[tokio::test]
    async fn test_guarded_panic_message() {
        let result: PanicGuardResult<()> =
            execute_guarded(async { panic!("selector exploded") }).await;

        match result {
            PanicGuardResult::Panicked(msg) => assert_eq!(msg, "selector exploded"),
            PanicGuardResult::Success(_) => panic!("panic was not caught"),
        }
    }

    #[tokio::test]
    async fn test_guarded_formatted_panic_message() {
        let n = 7;
        let result: PanicGuardResult<()> = execute_guarded(async move { panic!("step {}", n) }).await;

        assert!(matches!(result, PanicGuardResult::Panicked(msg) if msg == "step 7"));
    }
}
