//! The graph store seam

use crate::rows::KnowledgeBatch;
use crate::GraphError;
use async_trait::async_trait;
use podgraph_core::{EpisodeMetadata, MeaningfulUnit};
use std::collections::HashMap;

/// Whether a speaker label still looks like a generic diarization label
/// (`SPEAKER_3`, `Speaker 2`) rather than an identified name.
pub fn is_generic_label(name: &str) -> bool {
    let lower = name.trim().to_lowercase();
    let Some(rest) = lower.strip_prefix("speaker") else {
        return false;
    };
    let rest = rest.trim_start_matches(['_', ' ', '-']);
    !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit())
}

/// Node id for the podcast an episode belongs to, falling back to a name
/// slug when the caller supplied no id.
pub fn podcast_node_id(meta: &EpisodeMetadata) -> String {
    if !meta.podcast.id.is_empty() {
        return meta.podcast.id.clone();
    }
    if !meta.podcast.name.is_empty() {
        let slug: String = meta
            .podcast
            .name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_lowercase()
                } else {
                    '-'
                }
            })
            .collect();
        return slug.trim_matches('-').to_string();
    }
    "unknown-podcast".to_string()
}

/// An episode found by the idempotency probe.
#[derive(Debug, Clone, PartialEq)]
pub struct EpisodeRef {
    pub id: String,
    pub title: String,
}

/// Node/edge counts reported by a write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteCounts {
    pub nodes_created: u64,
    pub relationships_created: u64,
}

impl std::ops::Add for WriteCounts {
    type Output = WriteCounts;

    fn add(self, other: WriteCounts) -> WriteCounts {
        WriteCounts {
            nodes_created: self.nodes_created + other.nodes_created,
            relationships_created: self.relationships_created + other.relationships_created,
        }
    }
}

/// Session-level interface to the labeled property graph.
///
/// Each write method runs in a single transaction: it either lands fully or
/// raises, in which case the orchestrator issues the episode-wide rollback
/// via `delete_episode`. Stores never leave a transaction half-applied.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Idempotency probe: an episode already stored from this VTT file.
    async fn find_episode_by_vtt(&self, vtt_filename: &str)
        -> Result<Option<EpisodeRef>, GraphError>;

    /// Stage A: Podcast (merge), Episode, Topic nodes and MeaningfulUnits
    /// with their `PART_OF` edges, in one transaction.
    async fn write_episode_skeleton(
        &self,
        meta: &EpisodeMetadata,
        themes: &[String],
        units: &[MeaningfulUnit],
    ) -> Result<WriteCounts, GraphError>;

    /// Stage B: entities, quotes, insights, sentiments, and relationship
    /// edges, in one transaction.
    async fn write_knowledge(
        &self,
        meta: &EpisodeMetadata,
        batch: &KnowledgeBatch,
    ) -> Result<WriteCounts, GraphError>;

    /// Episode-wide rollback: detach-delete everything reachable from the
    /// episode node (the graph may contain cycles; the traversal is
    /// unbounded on purpose). Returns the number of nodes deleted.
    async fn delete_episode(&self, episode_id: &str) -> Result<u64, GraphError>;

    /// MeaningfulUnits of an episode whose primary speaker still looks like
    /// a generic diarization label. Feeds the opt-in post-processing pass.
    async fn units_with_generic_speakers(
        &self,
        episode_id: &str,
    ) -> Result<Vec<(String, String)>, GraphError>;

    /// Apply a generic-label -> real-name mapping to an episode's units.
    /// Returns the number of units updated.
    async fn update_unit_speakers(
        &self,
        episode_id: &str,
        mapping: &HashMap<String, String>,
    ) -> Result<u64, GraphError>;
}
