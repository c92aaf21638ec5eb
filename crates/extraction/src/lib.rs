//! Conversation analysis and schemaless knowledge extraction
//!
//! Covers the LLM-facing middle of the pipeline:
//! - Speaker identification over windowed context
//! - Conversation structure analysis with a coverage guarantee
//! - MeaningfulUnit construction and embedding attachment
//! - The bounded-concurrency extraction worker pool
//! - Cross-unit entity resolution
//! - Local quote importance and insight complexity scoring

pub mod conversation;
pub mod pool;
pub mod prompts;
pub mod resolve;
pub mod scoring;
pub mod sentiment;
pub mod speakers;
pub mod units;

pub use conversation::ConversationAnalyzer;
pub use pool::{ExtractionBatch, ExtractionPool, UnitExtraction, UnitFailure};
pub use resolve::{entity_canonical_id, resolve_entities, ResolvedEntities};
pub use scoring::{complexity_label, score_quote};
pub use speakers::SpeakerIdentifier;
pub use units::{attach_embeddings, build_units, EmbeddingFailure};

use podgraph_core::LlmError;
use thiserror::Error;

/// Extraction-stage errors. The orchestrator maps each variant onto the
/// pipeline failure policy (all fatal except as absorbed inside the pool).
#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("speaker identification failed: {0}")]
    SpeakerIdentification(String),

    #[error("conversation analysis failed: {0}")]
    ConversationAnalysis(String),

    #[error("knowledge extraction failed for {failed}/{total} units ({rate_pct:.1}% failure rate)")]
    TooManyFailures {
        failed: usize,
        total: usize,
        rate_pct: f64,
    },

    #[error("no meaningful units created from segments")]
    NoUnits,

    #[error("extraction cancelled")]
    Cancelled,

    #[error(transparent)]
    Llm(#[from] LlmError),
}
