//! MeaningfulUnit semantic spans

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// A contiguous (or nearly contiguous) group of segments covering one
/// coherent sub-topic, persisted to the graph as a node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeaningfulUnit {
    /// Deterministic: derived from episode id and unit index
    pub id: String,
    /// Space-joined member segment texts
    pub text: String,
    /// Shifted 2 s earlier than the first member segment (floored at 0)
    /// so links land just before the spoken content
    pub start_time: f64,
    pub end_time: f64,
    /// Plurality winner by spoken duration; "Unknown" when empty
    pub primary_speaker: String,
    /// Speaker -> fraction of spoken duration, summing to 1
    pub speaker_distribution: HashMap<String, f64>,
    pub unit_type: String,
    pub themes: Vec<String>,
    /// Ids of the member segments
    pub segment_refs: Vec<String>,
    /// None when embedding generation failed; recorded for later recovery
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
}

/// Stable unit id: hex-encoded SHA-256 of `episode_id || index`, truncated.
pub fn meaningful_unit_id(episode_id: &str, index: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(episode_id.as_bytes());
    hasher.update(index.to_string().as_bytes());
    let digest = hasher.finalize();
    let hex: String = digest.iter().take(12).map(|b| format!("{b:02x}")).collect();
    format!("unit_{hex}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_id_deterministic() {
        assert_eq!(
            meaningful_unit_id("ep-1", 3),
            meaningful_unit_id("ep-1", 3)
        );
    }

    #[test]
    fn test_unit_id_distinct_per_index_and_episode() {
        let a = meaningful_unit_id("ep-1", 0);
        let b = meaningful_unit_id("ep-1", 1);
        let c = meaningful_unit_id("ep-2", 0);
        assert_ne!(a, b);
        assert_ne!(a, c);
    }
}
