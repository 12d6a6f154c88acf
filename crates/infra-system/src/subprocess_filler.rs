// Subprocess form filler
// Runs the browser automation script as an isolated child process
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info};

use formpilot_core::domain::JobRecord;
use formpilot_core::port::{FillError, FillReport, FormFiller, TimeProvider};

/// Variables passed through to the filler when no allowlist is configured
pub const DEFAULT_ENV_ALLOWLIST: &[&str] = &["PATH", "HOME", "USER", "LANG", "TMPDIR"];

/// Default per-attempt timeout (2 minutes)
pub const DEFAULT_FILL_TIMEOUT_MS: i64 = 2 * 60 * 1000;

/// How to launch the automation script
#[derive(Debug, Clone)]
pub struct FillerConfig {
    pub command: String,
    pub args: Vec<String>,
    pub env_allowlist: Vec<String>,
    pub timeout_ms: i64,
}

impl FillerConfig {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            env_allowlist: DEFAULT_ENV_ALLOWLIST.iter().map(|s| s.to_string()).collect(),
            timeout_ms: DEFAULT_FILL_TIMEOUT_MS,
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_env_allowlist(mut self, allowlist: Vec<String>) -> Self {
        self.env_allowlist = allowlist;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: i64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }
}

/// Written to the child's stdin
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FillRequest<'a> {
    job_id: &'a str,
    attempt: i32,
    payload: &'a serde_json::Value,
}

/// Last stdout line of a failed run, when the script reports one
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FailureReport {
    error_message: String,
    error_type: Option<String>,
    error_stack: Option<String>,
    screenshot_url: Option<String>,
    screenshot_key: Option<String>,
}

/// Subprocess form filler
/// Spawns the configured command with an environment allowlist
pub struct SubprocessFormFiller {
    config: FillerConfig,
    time_provider: Arc<dyn TimeProvider>,
}

impl SubprocessFormFiller {
    /// Create a new subprocess form filler
    ///
    /// # Example
    /// ```ignore
    /// let filler = SubprocessFormFiller::new(
    ///     FillerConfig::new("node").with_args(vec!["fill-form.js".into()]),
    ///     Arc::new(SystemTimeProvider),
    /// );
    /// ```
    pub fn new(config: FillerConfig, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            config,
            time_provider,
        }
    }

    /// Keep only allowlisted variables
    fn filter_env(&self, env: impl Iterator<Item = (String, String)>) -> HashMap<String, String> {
        env.filter(|(k, _)| self.config.env_allowlist.contains(k))
            .collect()
    }

    fn build_request(job: &JobRecord) -> Result<Vec<u8>, FillError> {
        let request = FillRequest {
            job_id: &job.id,
            attempt: job.attempts + 1,
            payload: job.payload.as_value(),
        };
        serde_json::to_vec(&request).map_err(|e| FillError::InvalidPayload(e.to_string()))
    }

    /// Spawn child process, feed stdin and wait for output
    async fn spawn_and_wait(&self, input: &[u8]) -> Result<std::process::Output, FillError> {
        let mut command = Command::new(&self.config.command);
        command
            .args(&self.config.args)
            .env_clear()
            .envs(self.filter_env(std::env::vars()))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command
            .spawn()
            .map_err(|e| FillError::SpawnFailed(format!("{}: {}", self.config.command, e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            match stdin.write_all(input).await {
                Ok(()) => {}
                // Script exited without reading its input; its exit status decides
                Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
                Err(e) => return Err(FillError::Io(e.to_string())),
            }
        }

        let timeout_ms = self.config.timeout_ms.max(1);
        match timeout(
            Duration::from_millis(timeout_ms as u64),
            child.wait_with_output(),
        )
        .await
        {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(FillError::Io(e.to_string())),
            // Child is killed when the dropped future releases it
            Err(_) => Err(FillError::Timeout(timeout_ms)),
        }
    }

    /// Turn a non-zero exit into an automation error
    fn failure_from_output(output: &std::process::Output) -> FillError {
        let stdout = String::from_utf8_lossy(&output.stdout);
        let report = last_line(&stdout).and_then(|line| serde_json::from_str::<FailureReport>(line).ok());

        if let Some(report) = report {
            return FillError::Automation {
                message: report.error_message,
                error_type: report
                    .error_type
                    .unwrap_or_else(|| formpilot_core::domain::job::DEFAULT_ERROR_TYPE.to_string()),
                stack: report.error_stack,
                screenshot_url: report.screenshot_url,
                screenshot_key: report.screenshot_key,
            };
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let message = match stderr.trim() {
            "" => format!("Form filler exited with {}", output.status),
            text => text.to_string(),
        };
        FillError::automation(message)
    }
}

fn last_line(text: &str) -> Option<&str> {
    text.lines().map(str::trim).filter(|l| !l.is_empty()).last()
}

#[async_trait]
impl FormFiller for SubprocessFormFiller {
    async fn fill(&self, job: &JobRecord) -> Result<FillReport, FillError> {
        let input = Self::build_request(job)?;
        let start_time = self.time_provider.now_millis();

        info!(
            job_id = %job.id,
            attempt = job.attempts + 1,
            command = %self.config.command,
            timeout_ms = self.config.timeout_ms,
            "Starting form filler"
        );

        let output = self.spawn_and_wait(&input).await?;
        let duration_ms = self.time_provider.now_millis() - start_time;

        debug!(
            job_id = %job.id,
            duration_ms,
            exit_code = ?output.status.code(),
            "Form filler exited"
        );

        if !output.status.success() {
            return Err(Self::failure_from_output(&output));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(FillReport {
            duration_ms,
            output: last_line(&stdout).map(str::to_string),
        })
    }
}
