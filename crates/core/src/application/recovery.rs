// Crash recovery
use crate::application::worker::constants::{
    DEFAULT_RECOVERY_INTERVAL, DEFAULT_RECOVERY_THRESHOLD_MS,
};
use crate::application::worker::ShutdownToken;
use crate::error::Result;
use crate::port::{JobStore, TimeProvider};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// Crash recovery service
///
/// Returns jobs left in `processing` by a dead worker to `pending`. There is no
/// heartbeat, so `started_at` age is the only signal separating a stuck job
/// from one that is still running.
pub struct CrashRecoveryService {
    store: Arc<dyn JobStore>,
    time_provider: Arc<dyn TimeProvider>,
    threshold_ms: i64,
    interval: Duration,
}

impl CrashRecoveryService {
    /// Create a new recovery service
    ///
    /// # Arguments
    /// * `store` - Job store
    /// * `time_provider` - Time provider
    /// * `threshold_ms` - Optional staleness threshold (default: 10 minutes)
    ///
    /// # Example
    /// ```ignore
    /// let recovery = CrashRecoveryService::new(store, time_provider, None);
    /// let recovered = recovery.recover_stuck_jobs().await?;
    /// ```
    pub fn new(
        store: Arc<dyn JobStore>,
        time_provider: Arc<dyn TimeProvider>,
        threshold_ms: Option<i64>,
    ) -> Self {
        Self {
            store,
            time_provider,
            threshold_ms: threshold_ms.unwrap_or(DEFAULT_RECOVERY_THRESHOLD_MS),
            interval: DEFAULT_RECOVERY_INTERVAL,
        }
    }

    /// Interval used by `run`
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn threshold_ms(&self) -> i64 {
        self.threshold_ms
    }

    /// Sweep once; one bulk conditional update at the store
    ///
    /// # Returns
    /// Number of jobs recovered
    pub async fn recover_stuck_jobs(&self) -> Result<u64> {
        let now = self.time_provider.now_millis();
        let cutoff = now - self.threshold_ms;

        let recovered = self.store.bulk_recover_stuck(cutoff).await?;

        if recovered > 0 {
            info!(
                recovered,
                cutoff,
                threshold_ms = self.threshold_ms,
                "Recovered stuck jobs"
            );
        }
        Ok(recovered)
    }

    /// Periodic sweep until shutdown (spawn in tokio::spawn)
    pub async fn run(self, mut shutdown: ShutdownToken) {
        info!(
            interval_secs = self.interval.as_secs(),
            threshold_ms = self.threshold_ms,
            "Crash recovery sweep started"
        );

        loop {
            if shutdown.sleep(self.interval).await {
                break;
            }
            if let Err(e) = self.recover_stuck_jobs().await {
                error!(error = %e, "Crash recovery sweep failed");
            }
        }

        info!("Crash recovery sweep stopped");
    }
}
