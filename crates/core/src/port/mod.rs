// Port Layer - Interfaces for external dependencies

pub mod form_filler;
pub mod id_provider; // For deterministic testing
pub mod job_store;
pub mod time_provider;

// Re-exports
pub use form_filler::{FillError, FillReport, FormFiller};
pub use id_provider::IdProvider;
pub use job_store::JobStore;
pub use time_provider::TimeProvider;
