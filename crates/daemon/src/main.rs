//! FormPilot Daemon - Main Entry Point
//! Worker pool + crash recovery + retention over the SQLite job store

mod settings;
mod telemetry;

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use settings::{LogFormat, Settings};
use formpilot_core::application::{
    shutdown_channel, CrashRecoveryService, LifecycleController, QueueStats, RetentionCleaner,
    RetryScheduler, Worker,
};
use formpilot_core::port::time_provider::SystemTimeProvider;
use formpilot_core::port::{FormFiller, JobStore, TimeProvider};
use formpilot_infra_sqlite::{create_pool, resolve_database_url, run_migrations, SqliteJobStore};
use formpilot_infra_system::{FillerConfig, SubprocessFormFiller};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const DEFAULT_LOG_FILTER: &str = "formpilot=info";
const LOG_FILE_PREFIX: &str = "formpilot-daemon.log";
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Install the global subscriber
///
/// The returned guard flushes the file writer and must live until exit.
fn init_logging(settings: &Settings) -> Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(DEFAULT_LOG_FILTER))
        .context("Failed to create env filter")?;

    let stdout_layer = match settings.log_format {
        // Production: JSON structured logging
        LogFormat::Json => fmt::layer().json().boxed(),
        // Development: Pretty formatting with colors
        LogFormat::Pretty => fmt::layer().pretty().boxed(),
    };

    let (file_layer, guard) = match &settings.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().json().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .with(telemetry::otel_layer()?)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Configuration, then logging
    let settings = Settings::load()?;
    let _log_guard = init_logging(&settings)?;

    info!("FormPilot daemon v{} starting...", VERSION);

    // 2. Initialize database
    let database_url = resolve_database_url(&settings.database_url, true)
        .with_context(|| format!("Invalid database path {}", settings.database_url))?;
    info!(database_url = %database_url, "Initializing database...");

    let pool = create_pool(&database_url)
        .await
        .context("DB pool creation failed")?;
    run_migrations(&pool).await.context("Migration failed")?;

    // 3. Setup dependencies (DI wiring)
    let time_provider: Arc<dyn TimeProvider> = Arc::new(SystemTimeProvider);
    let store: Arc<dyn JobStore> = Arc::new(SqliteJobStore::new(pool.clone(), time_provider.clone()));
    let controller = Arc::new(LifecycleController::new(
        store.clone(),
        time_provider.clone(),
        RetryScheduler::new(settings.retry_delay_ms),
    ));
    let filler: Arc<dyn FormFiller> = Arc::new(SubprocessFormFiller::new(
        FillerConfig::new(&settings.filler_command)
            .with_args(settings.filler_args.clone())
            .with_env_allowlist(settings.filler_env_allowlist.clone())
            .with_timeout_ms(settings.filler_timeout_ms),
        time_provider.clone(),
    ));

    // 4. Crash recovery before any worker claims
    let recovery = CrashRecoveryService::new(
        store.clone(),
        time_provider.clone(),
        Some(settings.recovery_threshold_ms),
    )
    .with_interval(Duration::from_secs(settings.recovery_interval_secs));

    info!("Running crash recovery...");
    match recovery.recover_stuck_jobs().await {
        Ok(count) => info!(recovered_jobs = count, "Crash recovery completed"),
        Err(e) => error!(error = ?e, "Crash recovery failed"),
    }

    match QueueStats::collect(store.as_ref()).await {
        Ok(stats) => info!(
            pending = stats.pending,
            processing = stats.processing,
            completed = stats.completed,
            failed = stats.failed,
            "Queue state"
        ),
        Err(e) => warn!(error = %e, "Could not read queue stats"),
    }

    // 5. Start workers and periodic sweeps
    let (shutdown_tx, _shutdown_rx) = shutdown_channel();
    let mut handles = Vec::with_capacity(settings.workers + 2);

    info!(workers = settings.workers, "Starting workers...");
    for index in 0..settings.workers {
        let worker = Worker::new(
            format!("worker-{}", index + 1),
            store.clone(),
            controller.clone(),
            filler.clone(),
            time_provider.clone(),
        )
        .with_poll_interval(Duration::from_millis(settings.poll_interval_ms));
        let token = shutdown_tx.subscribe();

        handles.push(tokio::spawn(async move {
            if let Err(e) = worker.run(token).await {
                error!(worker = %worker.name(), error = ?e, "Worker failed");
            }
        }));
    }

    handles.push(tokio::spawn(recovery.run(shutdown_tx.subscribe())));

    let retention = RetentionCleaner::new(store.clone(), time_provider.clone())
        .with_retention_days(settings.retention_days)
        .with_interval_hours(settings.retention_interval_hours);
    handles.push(tokio::spawn(retention.run(shutdown_tx.subscribe())));

    info!("System ready. Waiting for jobs...");
    info!("Press Ctrl+C to shutdown");

    // 6. Wait for shutdown signal
    tokio::signal::ctrl_c().await?;

    info!("Shutdown signal received. Exiting gracefully...");

    // 7. Graceful shutdown: in-flight fills finish or are abandoned to recovery
    shutdown_tx.shutdown();
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, futures::future::join_all(handles))
        .await
        .is_err()
    {
        warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Workers did not stop in time; stuck jobs will be recovered on next start"
        );
    }
    pool.close().await;

    info!("Shutdown complete.");

    Ok(())
}
