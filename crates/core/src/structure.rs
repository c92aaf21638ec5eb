//! Conversation structure produced by the conversation analyzer

use serde::{Deserialize, Serialize};

/// One structural span over the segment list.
///
/// Indices are inclusive and refer to positions in the identified segment
/// list. Spans may overlap and gaps are allowed; the analyzer enforces a
/// minimum overall coverage instead of exact partitioning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuralUnit {
    pub start_index: usize,
    pub end_index: usize,
    /// Free-form label emitted by the model ("discussion", "q_and_a", ...)
    pub unit_type: String,
    #[serde(default)]
    pub description: String,
}

/// A named thematic span at episode level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Theme {
    pub theme: String,
    #[serde(default)]
    pub description: String,
}

/// A detected topic boundary between two segments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Boundary {
    pub index: usize,
    #[serde(default)]
    pub reason: String,
}

/// Output of conversation analysis: ordered structural units plus
/// episode-level themes and boundaries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationStructure {
    pub units: Vec<StructuralUnit>,
    pub themes: Vec<Theme>,
    pub boundaries: Vec<Boundary>,
}

impl ConversationStructure {
    /// Fraction of segments covered by the union of unit spans.
    ///
    /// Overlapping spans count each segment once, so fully-overlapping
    /// units cannot mask a gap in coverage.
    pub fn coverage(&self, segment_count: usize) -> f64 {
        if segment_count == 0 {
            return 0.0;
        }
        let mut touched = vec![false; segment_count];
        for unit in &self.units {
            if unit.end_index < unit.start_index {
                continue;
            }
            let start = unit.start_index.min(segment_count - 1);
            let end = unit.end_index.min(segment_count - 1);
            for slot in &mut touched[start..=end] {
                *slot = true;
            }
        }
        let covered = touched.iter().filter(|&&t| t).count();
        covered as f64 / segment_count as f64
    }
}
