// FormPilot Infrastructure - SQLite Adapter
// Implements: JobStore

mod connection;
mod error;
mod job_store;
mod migration;

pub use connection::{create_pool, create_pool_with_options, resolve_database_url, PoolSettings};
pub use job_store::SqliteJobStore;
pub use migration::{current_version, run_migrations};

// Note: sqlx::Error conversion goes through error::map_sqlx_error
// (orphan rules forbid From<sqlx::Error> for AppError here)
