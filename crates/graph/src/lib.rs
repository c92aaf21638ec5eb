//! Graph store access and the transactional episode writer
//!
//! The store is consumed through the `GraphStore` trait: an idempotency
//! probe, the two-stage episode write (skeleton, then knowledge), and the
//! cascade delete used for episode-wide rollback. `CypherGraphStore` talks
//! to Neo4j's HTTP transactional endpoint with UNWIND batching and
//! transient-error retries; `MemoryGraph` backs tests and small local runs.

pub mod cypher;
pub mod memory;
pub mod rows;
pub mod store;
pub mod writer;

pub use cypher::CypherGraphStore;
pub use memory::MemoryGraph;
pub use rows::{
    EntityRow, InsightRow, KnowledgeBatch, QuoteRow, RelationshipRow, SentimentRow,
};
pub use store::{EpisodeRef, GraphStore, WriteCounts};
pub use writer::{prepare_knowledge, GraphWriter};

use thiserror::Error;

/// Graph store errors
#[derive(Error, Debug)]
pub enum GraphError {
    /// Deadlocks, unavailability, timeouts; retried by the store impl
    #[error("transient graph error: {0}")]
    Transient(String),

    /// Constraint violations, malformed queries; never retried
    #[error("graph error: {0}")]
    Permanent(String),

    /// The compensating delete itself failed. The only state in which the
    /// database may hold partial episode data.
    #[error("rollback failed for episode {episode_id}: {reason}")]
    RollbackFailed { episode_id: String, reason: String },
}

impl GraphError {
    pub fn is_transient(&self) -> bool {
        matches!(self, GraphError::Transient(_))
    }
}
