//! FormPilot CLI - operational tooling over the job store
//! Talks to the SQLite database directly; the daemon does not need to be running.

mod render;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::sync::Arc;
use tabled::Table;

use formpilot_core::application::{
    processing_time_ms, CrashRecoveryService, EnqueueRequest, QueueStats, RetentionCleaner,
    SubmissionService,
};
use formpilot_core::domain::JobStatus;
use formpilot_core::port::id_provider::UuidProvider;
use formpilot_core::port::time_provider::SystemTimeProvider;
use formpilot_core::port::{JobStore, TimeProvider};
use formpilot_infra_sqlite::{
    create_pool_with_options, resolve_database_url, run_migrations, PoolSettings, SqliteJobStore,
};
use render::{format_timestamp, ErrorLogRow, FailedJobRow, StatusRow};

const DEFAULT_DATABASE_URL: &str = "~/.formpilot/jobs.db";
const MILLIS_PER_MINUTE: i64 = 60 * 1000;

#[derive(Parser)]
#[command(name = "formpilot")]
#[command(about = "FormPilot job queue CLI", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// SQLite database (path or sqlite:// URL)
    #[arg(long, env = "FORMPILOT_DATABASE_URL", default_value = DEFAULT_DATABASE_URL)]
    database_url: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Return jobs stuck in processing to pending
    Recover {
        /// Jobs processing longer than this are considered stuck
        #[arg(long, default_value = "10")]
        threshold_minutes: i64,
    },

    /// Show job counts per status
    Status,

    /// List failed jobs, most recent first
    Failed {
        #[arg(short = 'n', long, default_value = "20")]
        limit: i64,
    },

    /// Delete completed jobs older than the retention window
    Cleanup {
        #[arg(long, default_value = "30")]
        days: i64,
    },

    /// Enqueue a new form submission
    Enqueue {
        /// Form payload as JSON string
        #[arg(long)]
        payload: String,

        /// Originating verification reference
        #[arg(short, long)]
        reference: Option<String>,

        /// Attempts before the job fails permanently (default: 3)
        #[arg(long, env = "FORMPILOT_MAX_ATTEMPTS")]
        max_attempts: Option<i32>,
    },

    /// Show one job with its error log
    Show {
        /// Job ID
        job_id: String,
    },
}

/// Open the job store; only `create` may bring a new database file into existence
async fn open_store(database_url: &str, create: bool) -> Result<Arc<SqliteJobStore>> {
    let database_url = resolve_database_url(database_url, create)
        .with_context(|| format!("Invalid database path {}", database_url))?;

    let settings = PoolSettings {
        create_if_missing: create,
        ..Default::default()
    };
    let pool = create_pool_with_options(&database_url, settings)
        .await
        .with_context(|| format!("Failed to open database {}", database_url))?;
    run_migrations(&pool).await.context("Migration failed")?;

    Ok(Arc::new(SqliteJobStore::new(pool, Arc::new(SystemTimeProvider))))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let create = matches!(cli.command, Commands::Enqueue { .. });
    let store = open_store(&cli.database_url, create).await?;
    let time_provider: Arc<dyn TimeProvider> = Arc::new(SystemTimeProvider);

    match cli.command {
        Commands::Recover { threshold_minutes } => {
            if threshold_minutes <= 0 {
                bail!("--threshold-minutes must be positive");
            }
            let recovery = CrashRecoveryService::new(
                store.clone(),
                time_provider,
                Some(threshold_minutes * MILLIS_PER_MINUTE),
            );

            let recovered = recovery
                .recover_stuck_jobs()
                .await
                .context("Recovery failed")?;

            if recovered == 0 {
                println!("{}", "No stuck jobs found".green());
            } else {
                println!(
                    "{}",
                    format!("✓ Recovered {} stuck job(s) to pending", recovered)
                        .green()
                        .bold()
                );
            }
        }

        Commands::Status => {
            let stats = QueueStats::collect(store.as_ref()).await?;

            println!("{}", "Queue Status".cyan().bold());
            println!();

            let rows = vec![
                StatusRow::new(JobStatus::Pending, stats.pending),
                StatusRow::new(JobStatus::Processing, stats.processing),
                StatusRow::new(JobStatus::Completed, stats.completed),
                StatusRow::new(JobStatus::Failed, stats.failed),
            ];
            println!("{}", Table::new(rows));
            println!();
            println!("Total: {}", stats.total());

            match stats.success_rate() {
                Some(rate) => println!("Success rate: {}", format!("{:.1}%", rate * 100.0).bold()),
                None => println!("Success rate: {}", "n/a".dimmed()),
            }
        }

        Commands::Failed { limit } => {
            let failed = store.list_failed(limit).await?;

            if failed.is_empty() {
                println!("{}", "No failed jobs".green());
            } else {
                println!("{}", format!("{} failed job(s)", failed.len()).red().bold());
                println!();
                let rows: Vec<FailedJobRow> = failed.iter().map(FailedJobRow::from).collect();
                println!("{}", Table::new(rows));
            }
        }

        Commands::Cleanup { days } => {
            let cleaner = RetentionCleaner::new(store.clone(), time_provider);
            let deleted = cleaner.purge_older_than_days(days).await?;

            println!(
                "{}",
                format!("✓ Deleted {} completed job(s) older than {} days", deleted, days)
                    .green()
                    .bold()
            );
        }

        Commands::Enqueue {
            payload,
            reference,
            max_attempts,
        } => {
            let payload_json: serde_json::Value =
                serde_json::from_str(&payload).context("Invalid JSON payload")?;

            let mut request = EnqueueRequest::new(payload_json);
            if let Some(reference) = reference {
                request = request.with_source_reference(reference);
            }
            if let Some(max_attempts) = max_attempts {
                request = request.with_max_attempts(max_attempts);
            }

            let service = SubmissionService::new(store.clone(), Arc::new(UuidProvider), time_provider);
            let job_id = service.enqueue(request).await?;

            println!("{}", "✓ Job enqueued successfully".green().bold());
            println!("Job ID: {}", job_id);
        }

        Commands::Show { job_id } => {
            let job = match store.find_by_id(&job_id).await? {
                Some(job) => job,
                None => bail!("Job {} not found", job_id),
            };

            let status = match job.status {
                JobStatus::Completed => job.status.to_string().green(),
                JobStatus::Failed => job.status.to_string().red(),
                JobStatus::Processing => job.status.to_string().yellow(),
                JobStatus::Pending => job.status.to_string().normal(),
            };

            println!("{} {}", "Job".cyan().bold(), job.id.bold());
            println!("  status:        {}", status);
            println!(
                "  reference:     {}",
                job.source_reference.as_deref().unwrap_or("-")
            );
            println!("  attempts:      {}/{}", job.attempts, job.max_attempts);
            println!("  created:       {}", format_timestamp(Some(job.created_at)));
            println!("  started:       {}", format_timestamp(job.started_at));
            println!("  completed:     {}", format_timestamp(job.completed_at));
            println!("  failed:        {}", format_timestamp(job.failed_at));
            println!("  next retry:    {}", format_timestamp(job.next_retry_at));
            println!("  recovered:     {}", format_timestamp(job.recovered_at));
            if let Some(ms) = processing_time_ms(&job) {
                println!("  processing:    {} ms", ms);
            }
            if let Some(attempt) = job.completed_attempt {
                println!("  completed on:  attempt {}", attempt);
            }
            println!();
            println!("{}", "Payload".cyan().bold());
            println!("{}", serde_json::to_string_pretty(job.payload.as_value())?);

            if !job.error_logs.is_empty() {
                println!();
                println!("{}", "Error log".cyan().bold());
                let rows: Vec<ErrorLogRow> = job.error_logs.iter().map(ErrorLogRow::from).collect();
                println!("{}", Table::new(rows));
            }
        }
    }

    Ok(())
}
