//! Phase-keyed durable checkpoints
//!
//! One file per episode under the checkpoint directory, holding the most
//! recent completed phase and a map of phase name to payload. Writes are
//! atomic (temp + rename) and optionally gzip-compressed; a sidecar JSON
//! file carries metadata and a checksum. Checkpointing is an optimization,
//! never a correctness requirement: save failures are logged by the caller
//! and processing continues.

pub mod store;

pub use store::{Checkpoint, CheckpointMetadata, CheckpointStore, CURRENT_VERSION};

use thiserror::Error;

/// Checkpoint store errors
#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt checkpoint for {episode_id}: {reason}")]
    Corrupt { episode_id: String, reason: String },

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}
