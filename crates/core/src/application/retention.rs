// Retention cleanup
// Completed jobs are purged after the retention window; failed jobs are kept
// for audit regardless of age.

use crate::application::worker::constants::{
    DEFAULT_RETENTION_DAYS, DEFAULT_RETENTION_INTERVAL_HOURS, MILLIS_PER_DAY,
};
use crate::application::worker::ShutdownToken;
use crate::error::{AppError, Result};
use crate::port::{JobStore, TimeProvider};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// Retention cleaner
///
/// Runs periodic purges in the background
pub struct RetentionCleaner {
    store: Arc<dyn JobStore>,
    time_provider: Arc<dyn TimeProvider>,
    retention_days: i64,
    interval_hours: u64,
}

impl RetentionCleaner {
    /// Create a new retention cleaner
    ///
    /// # Arguments
    /// * `store` - Job store
    /// * `time_provider` - Time provider
    ///
    /// Defaults to a 30 day window purged every 24 hours.
    pub fn new(store: Arc<dyn JobStore>, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            store,
            time_provider,
            retention_days: DEFAULT_RETENTION_DAYS,
            interval_hours: DEFAULT_RETENTION_INTERVAL_HOURS,
        }
    }

    pub fn with_retention_days(mut self, days: i64) -> Self {
        self.retention_days = days;
        self
    }

    pub fn with_interval_hours(mut self, hours: u64) -> Self {
        self.interval_hours = hours;
        self
    }

    pub fn retention_days(&self) -> i64 {
        self.retention_days
    }

    /// Delete completed jobs older than the retention window
    pub async fn purge(&self) -> Result<u64> {
        self.purge_older_than_days(self.retention_days).await
    }

    /// Delete completed jobs with `completed_at` more than `days` ago
    pub async fn purge_older_than_days(&self, days: i64) -> Result<u64> {
        if days < 0 {
            return Err(AppError::Validation(format!(
                "retention days must be non-negative, got {}",
                days
            )));
        }

        let cutoff = self.time_provider.now_millis() - days * MILLIS_PER_DAY;
        let deleted = self.store.delete_terminal_older_than(cutoff).await?;

        info!(deleted, retention_days = days, cutoff, "Retention purge completed");
        Ok(deleted)
    }

    /// Run purge loop until shutdown (spawn in tokio::spawn)
    pub async fn run(self, mut shutdown: ShutdownToken) {
        info!(
            interval_hours = self.interval_hours,
            retention_days = self.retention_days,
            "Retention cleaner started"
        );

        let period = Duration::from_secs(self.interval_hours.max(1) * 3600);

        loop {
            if shutdown.sleep(period).await {
                break;
            }
            if let Err(e) = self.purge().await {
                error!(error = ?e, "Scheduled retention purge failed");
            }
        }

        info!("Retention cleaner stopped");
    }
}
