//! Extracted knowledge: entities, quotes, insights, relationships, sentiment
//!
//! Extraction is schemaless: `entity_type`, `rel_type`, and sentiment tags
//! are whatever the model emitted, normalized only by trimming and case at
//! the deduplication boundary. Open attributes live in `properties` maps;
//! structure is enforced only at the graph boundary.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// A named thing discovered in a unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    /// Raw surface form as emitted by the model
    pub value: String,
    /// Free-form type ("person", "company", "research paper", ...)
    #[serde(rename = "type")]
    pub entity_type: String,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    /// Open map; `description` and `meaningful_unit_ids` live here
    #[serde(default)]
    pub properties: Map<String, Value>,
}

fn default_confidence() -> f64 {
    0.85
}

impl Entity {
    /// Deduplication key: lowercased type plus trimmed lowercased value.
    pub fn merge_key(&self) -> (String, String) {
        (
            self.entity_type.trim().to_lowercase(),
            self.value.trim().to_lowercase(),
        )
    }

    pub fn description(&self) -> Option<&str> {
        self.properties.get("description").and_then(Value::as_str)
    }

    /// Unit ids this entity was seen in (singular key accepted for
    /// per-unit extraction output, plural after resolution).
    pub fn unit_ids(&self) -> Vec<String> {
        if let Some(list) = self
            .properties
            .get("meaningful_unit_ids")
            .and_then(Value::as_array)
        {
            return list
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_owned)
                .collect();
        }
        self.properties
            .get("meaningful_unit_id")
            .and_then(Value::as_str)
            .map(|s| vec![s.to_owned()])
            .unwrap_or_default()
    }
}

/// A verbatim quotation attributed to a speaker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub text: String,
    #[serde(default)]
    pub speaker: String,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub quote_type: String,
    /// Scored locally after extraction, no LLM involved
    #[serde(default)]
    pub importance_score: f64,
    /// Back-reference; must be present before the graph write
    #[serde(default)]
    pub meaningful_unit_id: String,
}

/// A synthesized observation derived from a unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Insight {
    pub content: String,
    #[serde(rename = "type", default)]
    pub insight_type: String,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    /// "low" | "medium" | "high", tagged locally
    #[serde(default)]
    pub complexity: String,
    #[serde(default)]
    pub supporting_entities: Vec<String>,
    /// Back-reference; must be present before the graph write
    #[serde(default)]
    pub meaningful_unit_id: String,
}

/// A directed edge between two extracted items, referenced by surface value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    pub source: String,
    pub target: String,
    /// Free-form edge type; becomes the graph relationship type
    #[serde(rename = "type")]
    pub rel_type: String,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    /// `properties.bidirectional = true` mirrors the edge
    #[serde(default)]
    pub properties: Map<String, Value>,
}

impl Relationship {
    pub fn is_bidirectional(&self) -> bool {
        self.properties
            .get("bidirectional")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

/// Per-speaker sentiment inside a unit.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpeakerSentiment {
    pub polarity: String,
    pub score: f64,
    #[serde(default)]
    pub dominant_emotion: String,
}

/// A high-intensity moment within a unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmotionalMoment {
    pub text: String,
    #[serde(default)]
    pub speaker: String,
    pub emotion: String,
    #[serde(default)]
    pub intensity: f64,
}

/// An open-vocabulary sentiment tag discovered by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredSentiment {
    #[serde(rename = "type")]
    pub sentiment_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

/// The per-unit sentiment record persisted alongside extracted knowledge.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnitSentiment {
    pub unit_id: String,
    pub unit_index: usize,
    pub overall_polarity: String,
    pub overall_score: f64,
    #[serde(default)]
    pub speaker_sentiments: HashMap<String, SpeakerSentiment>,
    #[serde(default)]
    pub emotional_moments: Vec<EmotionalMoment>,
    /// Coarse trajectory over the unit ("rising", "flat", ...)
    #[serde(default)]
    pub trajectory: String,
    #[serde(default)]
    pub interaction_harmony: f64,
    #[serde(default)]
    pub discovered_sentiments: Vec<DiscoveredSentiment>,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_entity_merge_key_normalizes() {
        let a = Entity {
            value: "  OpenAI ".into(),
            entity_type: "Company".into(),
            confidence: 0.9,
            properties: Map::new(),
        };
        let b = Entity {
            value: "openai".into(),
            entity_type: "company".into(),
            confidence: 0.7,
            properties: Map::new(),
        };
        assert_eq!(a.merge_key(), b.merge_key());
    }

    #[test]
    fn test_entity_unit_ids_accepts_both_shapes() {
        let mut props = Map::new();
        props.insert("meaningful_unit_id".into(), json!("unit_a"));
        let single = Entity {
            value: "x".into(),
            entity_type: "t".into(),
            confidence: 0.9,
            properties: props,
        };
        assert_eq!(single.unit_ids(), vec!["unit_a".to_string()]);

        let mut props = Map::new();
        props.insert("meaningful_unit_ids".into(), json!(["unit_a", "unit_b"]));
        let plural = Entity {
            value: "x".into(),
            entity_type: "t".into(),
            confidence: 0.9,
            properties: props,
        };
        assert_eq!(plural.unit_ids().len(), 2);
    }

    #[test]
    fn test_relationship_bidirectional_flag() {
        let mut props = Map::new();
        props.insert("bidirectional".into(), json!(true));
        let rel = Relationship {
            source: "a".into(),
            target: "b".into(),
            rel_type: "COLLABORATES_WITH".into(),
            confidence: 0.8,
            properties: props,
        };
        assert!(rel.is_bidirectional());
    }
}
