//! Core traits and types for the podcast knowledge pipeline
//!
//! This crate provides foundational types used across all other crates:
//! - Transcript segments and conversation structure
//! - MeaningfulUnit semantic spans
//! - Extracted knowledge (entities, quotes, insights, relationships, sentiment)
//! - Episode metadata and processing phases
//! - The `ModelClient` trait fronting every LLM and embedding call

pub mod episode;
pub mod error;
pub mod knowledge;
pub mod phase;
pub mod segment;
pub mod structure;
pub mod traits;
pub mod unit;

pub use episode::{EpisodeMetadata, PodcastInfo, VttMetadata};
pub use error::{LlmError, LlmResult};
pub use knowledge::{
    DiscoveredSentiment, EmotionalMoment, Entity, Insight, Quote, Relationship, SpeakerSentiment,
    UnitSentiment,
};
pub use phase::Phase;
pub use segment::Segment;
pub use structure::{Boundary, ConversationStructure, StructuralUnit, Theme};
pub use traits::{GenerationOptions, ModelClient};
pub use unit::{meaningful_unit_id, MeaningfulUnit};
