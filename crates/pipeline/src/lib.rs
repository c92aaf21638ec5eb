//! Per-episode pipeline orchestration
//!
//! A linear phase state machine: parse, identify speakers, analyze
//! structure, build units, store the skeleton, extract knowledge, store
//! knowledge, analyze, optionally remap speakers. Checkpoints after every
//! phase make the run resumable; any fatal error after the first write
//! triggers an episode-wide rollback so no partial data survives.

pub mod analysis;
pub mod error;
pub mod orchestrator;
pub mod postprocess;
pub mod result;

pub use error::{ErrorKind, PipelineError};
pub use orchestrator::Pipeline;
pub use result::{ErrorRecord, PipelineResult, PipelineStats, PipelineStatus};

/// Install the process-wide tracing subscriber, honoring `RUST_LOG`.
/// Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .try_init();
}
