// Engine constants (No magic values)
use std::time::Duration;

/// Sleep duration when no jobs are available (1s)
pub const IDLE_SLEEP_DURATION: Duration = Duration::from_secs(1);

/// Sleep duration after worker error before retry (1s)
pub const ERROR_RECOVERY_SLEEP_DURATION: Duration = Duration::from_secs(1);

/// Fresh pending jobs fetched per poll
pub const DEFAULT_PENDING_BATCH: i64 = 10;

/// Delay before a failed job becomes eligible again (60s)
pub const DEFAULT_RETRY_DELAY_MS: i64 = 60 * 1000;

/// A processing job older than this is considered orphaned (10 minutes)
pub const DEFAULT_RECOVERY_THRESHOLD_MS: i64 = 10 * 60 * 1000;

/// How often the periodic crash-recovery sweep runs (5 minutes)
pub const DEFAULT_RECOVERY_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Completed jobs are kept this long before purge (days)
pub const DEFAULT_RETENTION_DAYS: i64 = 30;

/// How often the retention purge runs (hours)
pub const DEFAULT_RETENTION_INTERVAL_HOURS: u64 = 24;

pub const MILLIS_PER_DAY: i64 = 24 * 60 * 60 * 1000;
