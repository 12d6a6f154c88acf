// FormPilot Infrastructure - System Adapters
// Implements: FormFiller

pub mod subprocess_filler;

pub use subprocess_filler::{
    FillerConfig, SubprocessFormFiller, DEFAULT_ENV_ALLOWLIST, DEFAULT_FILL_TIMEOUT_MS,
};
