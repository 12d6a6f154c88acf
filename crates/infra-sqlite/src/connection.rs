// SQLite Connection Pool Setup

use crate::error::map_sqlx_error;
use formpilot_core::error::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Pool tuning
#[derive(Debug, Clone, Copy)]
pub struct PoolSettings {
    pub max_connections: u32,
    pub busy_timeout: Duration,
    /// Create the database file when it does not exist
    pub create_if_missing: bool,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 10,
            busy_timeout: Duration::from_secs(5),
            create_if_missing: true,
        }
    }
}

/// Create SQLite connection pool with WAL mode and default settings
pub async fn create_pool(database_url: &str) -> Result<SqlitePool> {
    create_pool_with_options(database_url, PoolSettings::default()).await
}

/// Create SQLite connection pool
///
/// Foreign keys are enabled on every connection so error logs cascade
/// with their job on delete.
pub async fn create_pool_with_options(
    database_url: &str,
    settings: PoolSettings,
) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)
        .map_err(map_sqlx_error)?
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(settings.busy_timeout)
        .foreign_keys(true)
        .create_if_missing(settings.create_if_missing);

    SqlitePoolOptions::new()
        .max_connections(settings.max_connections)
        .connect_with(options)
        .await
        .map_err(map_sqlx_error)
}

/// Expand `~` in a database path or `sqlite:` URL
///
/// With `create_parent`, the directory holding the database file is created.
/// In-memory URLs are returned unchanged.
pub fn resolve_database_url(raw: &str, create_parent: bool) -> Result<String> {
    let expanded = shellexpand::tilde(raw).into_owned();

    let path = expanded
        .strip_prefix("sqlite://")
        .or_else(|| expanded.strip_prefix("sqlite:"))
        .unwrap_or(&expanded);
    let path = path.split('?').next().unwrap_or(path);

    if path.is_empty() || path == ":memory:" {
        return Ok(expanded);
    }

    if create_parent {
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
    }

    Ok(expanded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_create_pool() {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        assert!(pool.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn test_foreign_keys_enabled() {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        let enabled: i64 = sqlx::query_scalar("PRAGMA foreign_keys")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(enabled, 1);
    }

    #[tokio::test]
    async fn test_missing_file_not_created_when_disabled() {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("absent.db");
        let settings = PoolSettings {
            create_if_missing: false,
            ..Default::default()
        };

        let result = create_pool_with_options(&format!("sqlite://{}", db.display()), settings).await;

        assert!(result.is_err());
        assert!(!db.exists());
    }

    #[tokio::test]
    async fn test_existing_file_opens_when_creation_disabled() {
        let dir = TempDir::new().unwrap();
        let url = format!("sqlite://{}", dir.path().join("jobs.db").display());
        create_pool(&url).await.unwrap().close().await;

        let settings = PoolSettings {
            create_if_missing: false,
            ..Default::default()
        };
        let pool = create_pool_with_options(&url, settings).await.unwrap();
        assert!(pool.acquire().await.is_ok());
    }

    #[test]
    fn test_resolve_memory_url_untouched() {
        assert_eq!(
            resolve_database_url("sqlite::memory:", true).unwrap(),
            "sqlite::memory:"
        );
    }

    #[test]
    fn test_resolve_creates_parent_dir() {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("nested").join("jobs.db");
        let url = format!("sqlite://{}?mode=rwc", db.display());

        assert_eq!(resolve_database_url(&url, true).unwrap(), url);
        assert!(dir.path().join("nested").is_dir());
    }

    #[test]
    fn test_resolve_without_create_leaves_filesystem_alone() {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("nested").join("jobs.db");

        let url = resolve_database_url(&db.display().to_string(), false).unwrap();

        assert_eq!(url, db.display().to_string());
        assert!(!dir.path().join("nested").exists());
    }
}
