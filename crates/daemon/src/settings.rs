//! Daemon settings: defaults overridden by `FORMPILOT_*` environment variables

use anyhow::{bail, Context, Result};
use config::{Config, Environment};
use formpilot_core::application::worker::constants::{
    DEFAULT_RECOVERY_INTERVAL, DEFAULT_RECOVERY_THRESHOLD_MS, DEFAULT_RETENTION_DAYS,
    DEFAULT_RETENTION_INTERVAL_HOURS, DEFAULT_RETRY_DELAY_MS, IDLE_SLEEP_DURATION,
};
use formpilot_infra_system::{DEFAULT_ENV_ALLOWLIST, DEFAULT_FILL_TIMEOUT_MS};
use serde::Deserialize;
use std::collections::HashMap;

/// Environment variable prefix for configuration overrides
const ENV_PREFIX: &str = "FORMPILOT";

pub const DEFAULT_DB_PATH: &str = "~/.formpilot/jobs.db";
const DEFAULT_WORKERS: i64 = 2;
const DEFAULT_FILLER_COMMAND: &str = "node";
const DEFAULT_FILLER_SCRIPT: &str = "scripts/fill-form.js";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub database_url: String,
    pub workers: usize,
    pub poll_interval_ms: u64,
    pub retry_delay_ms: i64,
    pub recovery_threshold_ms: i64,
    pub recovery_interval_secs: u64,
    pub retention_days: i64,
    pub retention_interval_hours: u64,
    pub filler_command: String,
    pub filler_args: Vec<String>,
    pub filler_env_allowlist: Vec<String>,
    pub filler_timeout_ms: i64,
    pub log_format: LogFormat,
    pub log_dir: Option<String>,
}

impl Settings {
    /// Load from the process environment
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load with an explicit environment map (`None` reads the process environment)
    pub fn load_from(env: Option<HashMap<String, String>>) -> Result<Self> {
        let config = Config::builder()
            .set_default("database_url", DEFAULT_DB_PATH)?
            .set_default("workers", DEFAULT_WORKERS)?
            .set_default("poll_interval_ms", IDLE_SLEEP_DURATION.as_millis() as i64)?
            .set_default("retry_delay_ms", DEFAULT_RETRY_DELAY_MS)?
            .set_default("recovery_threshold_ms", DEFAULT_RECOVERY_THRESHOLD_MS)?
            .set_default(
                "recovery_interval_secs",
                DEFAULT_RECOVERY_INTERVAL.as_secs() as i64,
            )?
            .set_default("retention_days", DEFAULT_RETENTION_DAYS)?
            .set_default(
                "retention_interval_hours",
                DEFAULT_RETENTION_INTERVAL_HOURS as i64,
            )?
            .set_default("filler_command", DEFAULT_FILLER_COMMAND)?
            .set_default("filler_args", vec![DEFAULT_FILLER_SCRIPT])?
            .set_default("filler_env_allowlist", DEFAULT_ENV_ALLOWLIST.to_vec())?
            .set_default("filler_timeout_ms", DEFAULT_FILL_TIMEOUT_MS)?
            .set_default("log_format", "pretty")?
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .try_parsing(true)
                    .list_separator(" ")
                    .with_list_parse_key("filler_args")
                    .with_list_parse_key("filler_env_allowlist")
                    .source(env),
            )
            .build()
            .context("Failed to build configuration")?;

        let settings: Settings = config
            .try_deserialize()
            .context("Invalid FORMPILOT_* configuration")?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            bail!("FORMPILOT_WORKERS must be at least 1");
        }
        if self.poll_interval_ms == 0 {
            bail!("FORMPILOT_POLL_INTERVAL_MS must be positive");
        }
        if self.retry_delay_ms < 0 {
            bail!("FORMPILOT_RETRY_DELAY_MS must be non-negative");
        }
        if self.recovery_threshold_ms <= 0 {
            bail!("FORMPILOT_RECOVERY_THRESHOLD_MS must be positive");
        }
        if self.recovery_interval_secs == 0 {
            bail!("FORMPILOT_RECOVERY_INTERVAL_SECS must be positive");
        }
        if self.retention_days < 0 {
            bail!("FORMPILOT_RETENTION_DAYS must be non-negative");
        }
        if self.filler_command.trim().is_empty() {
            bail!("FORMPILOT_FILLER_COMMAND cannot be empty");
        }
        if self.filler_timeout_ms <= 0 {
            bail!("FORMPILOT_FILLER_TIMEOUT_MS must be positive");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> Option<HashMap<String, String>> {
        Some(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::load_from(env(&[])).unwrap();

        assert_eq!(settings.database_url, DEFAULT_DB_PATH);
        assert_eq!(settings.workers, 2);
        assert_eq!(settings.retry_delay_ms, 60_000);
        assert_eq!(settings.recovery_threshold_ms, 600_000);
        assert_eq!(settings.recovery_interval_secs, 300);
        assert_eq!(settings.retention_days, 30);
        assert_eq!(settings.retention_interval_hours, 24);
        assert_eq!(settings.filler_args, vec![DEFAULT_FILLER_SCRIPT.to_string()]);
        assert_eq!(settings.log_format, LogFormat::Pretty);
        assert!(settings.log_dir.is_none());
    }

    #[test]
    fn test_env_overrides() {
        let settings = Settings::load_from(env(&[
            ("FORMPILOT_DATABASE_URL", "/tmp/formpilot-test.db"),
            ("FORMPILOT_WORKERS", "4"),
            ("FORMPILOT_RETRY_DELAY_MS", "5000"),
            ("FORMPILOT_FILLER_COMMAND", "python3"),
            ("FORMPILOT_FILLER_ARGS", "fill.py --headless"),
            ("FORMPILOT_LOG_FORMAT", "json"),
        ]))
        .unwrap();

        assert_eq!(settings.database_url, "/tmp/formpilot-test.db");
        assert_eq!(settings.workers, 4);
        assert_eq!(settings.retry_delay_ms, 5_000);
        assert_eq!(settings.filler_command, "python3");
        assert_eq!(settings.filler_args, vec!["fill.py", "--headless"]);
        assert_eq!(settings.log_format, LogFormat::Json);
    }

    #[test]
    fn test_zero_workers_rejected() {
        let err = Settings::load_from(env(&[("FORMPILOT_WORKERS", "0")])).unwrap_err();
        assert!(err.to_string().contains("FORMPILOT_WORKERS"));
    }

    #[test]
    fn test_unparseable_number_rejected() {
        assert!(Settings::load_from(env(&[("FORMPILOT_RETENTION_DAYS", "soon")])).is_err());
    }
}
