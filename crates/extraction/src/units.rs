//! MeaningfulUnit construction and embedding attachment

use chrono::{DateTime, Utc};
use podgraph_core::{
    meaningful_unit_id, ConversationStructure, MeaningfulUnit, ModelClient, Segment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// An embedding that could not be generated; collected during unit
/// creation and written to a recovery log at pipeline end.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingFailure {
    pub unit_id: String,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

/// Build MeaningfulUnits from the structural spans.
///
/// - text is the space-joined member texts
/// - start is shifted 2 s earlier (floored at 0) for navigation
/// - primary speaker is the plurality winner by spoken duration, ties
///   broken by first occurrence
/// - ids are deterministic per (episode, index)
pub fn build_units(
    segments: &[Segment],
    structure: &ConversationStructure,
    episode_id: &str,
) -> Vec<MeaningfulUnit> {
    let theme_names: Vec<String> = structure.themes.iter().map(|t| t.theme.clone()).collect();
    let mut units = Vec::with_capacity(structure.units.len());

    for (index, span) in structure.units.iter().enumerate() {
        if segments.is_empty() {
            break;
        }
        let start = span.start_index.min(segments.len() - 1);
        let end = span.end_index.min(segments.len() - 1);
        if end < start {
            continue;
        }
        let members = &segments[start..=end];

        let text = members
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");

        let (primary_speaker, speaker_distribution) = speaker_stats(members);

        units.push(MeaningfulUnit {
            id: meaningful_unit_id(episode_id, index),
            text,
            start_time: (members[0].start_time - 2.0).max(0.0),
            end_time: members[members.len() - 1].end_time,
            primary_speaker,
            speaker_distribution,
            unit_type: span.unit_type.clone(),
            themes: theme_names.clone(),
            segment_refs: members.iter().map(|s| s.id.clone()).collect(),
            embedding: None,
        });
    }

    tracing::info!(units = units.len(), "created meaningful units");
    units
}

/// Plurality speaker by duration plus the normalized distribution. When
/// every member has zero duration the counts take over so the fractions
/// still sum to 1.
fn speaker_stats(members: &[Segment]) -> (String, HashMap<String, f64>) {
    if members.is_empty() {
        return ("Unknown".to_string(), HashMap::new());
    }

    let mut durations: HashMap<&str, f64> = HashMap::new();
    let mut first_seen: Vec<&str> = Vec::new();
    for segment in members {
        if !durations.contains_key(segment.speaker.as_str()) {
            first_seen.push(&segment.speaker);
        }
        *durations.entry(&segment.speaker).or_insert(0.0) += segment.duration();
    }

    let total: f64 = durations.values().sum();
    let weight = |speaker: &str| -> f64 {
        if total > 0.0 {
            durations[speaker]
        } else {
            members.iter().filter(|s| s.speaker == speaker).count() as f64
        }
    };

    // Strictly-greater comparison keeps the earliest speaker on ties.
    let mut primary = first_seen[0];
    for &speaker in &first_seen[1..] {
        if weight(speaker) > weight(primary) {
            primary = speaker;
        }
    }

    let denominator: f64 = first_seen.iter().map(|s| weight(s)).sum();
    let distribution = first_seen
        .iter()
        .map(|&s| (s.to_string(), weight(s) / denominator))
        .collect();

    (primary.to_string(), distribution)
}

/// Generate embeddings for every unit through the model client. Failures
/// leave `embedding = None` and are returned for the recovery log; they
/// never fail the phase.
pub async fn attach_embeddings(
    client: &dyn ModelClient,
    units: &mut [MeaningfulUnit],
) -> Vec<EmbeddingFailure> {
    let mut failures = Vec::new();
    for unit in units.iter_mut() {
        match client.embed(&unit.text).await {
            Ok(vector) => {
                tracing::debug!(unit_id = %unit.id, dims = vector.len(), "embedding generated");
                unit.embedding = Some(vector);
            }
            Err(e) => {
                tracing::warn!(unit_id = %unit.id, error = %e, "embedding failed");
                failures.push(EmbeddingFailure {
                    unit_id: unit.id.clone(),
                    error: e.to_string(),
                    timestamp: Utc::now(),
                });
                unit.embedding = None;
            }
        }
    }
    failures
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use podgraph_core::{GenerationOptions, LlmError, LlmResult, StructuralUnit};
    use serde_json::Value;

    fn seg(id: &str, speaker: &str, start: f64, end: f64) -> Segment {
        Segment {
            id: id.into(),
            text: format!("{id} text"),
            start_time: start,
            end_time: end,
            speaker: speaker.into(),
            confidence: 1.0,
        }
    }

    fn structure(spans: &[(usize, usize)]) -> ConversationStructure {
        ConversationStructure {
            units: spans
                .iter()
                .map(|&(start_index, end_index)| StructuralUnit {
                    start_index,
                    end_index,
                    unit_type: "discussion".into(),
                    description: String::new(),
                })
                .collect(),
            themes: vec![],
            boundaries: vec![],
        }
    }

    #[test]
    fn test_start_shift_floors_at_zero() {
        let segments = vec![seg("a", "Alice", 1.0, 5.0), seg("b", "Alice", 5.0, 9.0)];
        let units = build_units(&segments, &structure(&[(0, 1)]), "ep-1");
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].start_time, 0.0);
        assert_eq!(units[0].end_time, 9.0);
        assert_eq!(units[0].text, "a text b text");
        assert_eq!(units[0].segment_refs, vec!["a", "b"]);
    }

    #[test]
    fn test_start_shift_applied() {
        let segments = vec![seg("a", "Alice", 100.0, 110.0)];
        let units = build_units(&segments, &structure(&[(0, 0)]), "ep-1");
        assert_eq!(units[0].start_time, 98.0);
    }

    #[test]
    fn test_primary_speaker_by_duration() {
        let segments = vec![
            seg("a", "Alice", 0.0, 2.0),
            seg("b", "Bob", 2.0, 12.0),
            seg("c", "Alice", 12.0, 13.0),
        ];
        let units = build_units(&segments, &structure(&[(0, 2)]), "ep-1");
        assert_eq!(units[0].primary_speaker, "Bob");
        let dist = &units[0].speaker_distribution;
        assert!((dist["Bob"] - 10.0 / 13.0).abs() < 1e-9);
        assert!((dist.values().sum::<f64>() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_tie_broken_by_first_occurrence() {
        let segments = vec![seg("a", "Alice", 0.0, 5.0), seg("b", "Bob", 5.0, 10.0)];
        let units = build_units(&segments, &structure(&[(0, 1)]), "ep-1");
        assert_eq!(units[0].primary_speaker, "Alice");
    }

    #[test]
    fn test_ids_deterministic_and_distinct() {
        let segments = vec![seg("a", "Alice", 0.0, 5.0), seg("b", "Bob", 5.0, 10.0)];
        let built_twice = [
            build_units(&segments, &structure(&[(0, 0), (1, 1)]), "ep-1"),
            build_units(&segments, &structure(&[(0, 0), (1, 1)]), "ep-1"),
        ];
        assert_eq!(built_twice[0][0].id, built_twice[1][0].id);
        assert_ne!(built_twice[0][0].id, built_twice[0][1].id);
    }

    struct FlakyEmbedder;

    #[async_trait]
    impl ModelClient for FlakyEmbedder {
        async fn chat(&self, _prompt: &str, _opts: GenerationOptions) -> LlmResult<String> {
            unimplemented!()
        }

        async fn chat_json(&self, _prompt: &str, _schema: Option<&Value>) -> LlmResult<Value> {
            unimplemented!()
        }

        async fn embed(&self, text: &str) -> LlmResult<Vec<f32>> {
            if text.contains("a text") {
                Ok(vec![0.5; 4])
            } else {
                Err(LlmError::Transient("embedding backend down".into()))
            }
        }
    }

    #[tokio::test]
    async fn test_embedding_failures_recorded_not_fatal() {
        let segments = vec![seg("a", "Alice", 0.0, 5.0), seg("b", "Bob", 5.0, 10.0)];
        let mut units = build_units(&segments, &structure(&[(0, 0), (1, 1)]), "ep-1");
        let failures = attach_embeddings(&FlakyEmbedder, &mut units).await;
        assert!(units[0].embedding.is_some());
        assert!(units[1].embedding.is_none());
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].unit_id, units[1].id);
    }
}
