//! Configuration for the podcast knowledge pipeline
//!
//! Settings are layered: built-in defaults, then an optional TOML file,
//! then `PODGRAPH_*` environment variables. A handful of operational knobs
//! (`DISABLE_CHECKPOINTS`, `USE_PAID_KEY_ONLY`, `GEMINI_API_KEY[_n]`) are
//! read from the plain environment for parity with the deployment scripts.

pub mod constants;
pub mod settings;

pub use settings::{
    CheckpointSettings, ContinuationSettings, GraphSettings, KeySelection, LlmSettings,
    PipelineSettings, RateLimits, Settings,
};

use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
