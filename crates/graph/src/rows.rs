//! Prepared write rows
//!
//! The writer turns extraction output into these flat rows before handing
//! them to a store; node ids are deterministic so re-runs and retries merge
//! instead of duplicating.

use podgraph_core::UnitSentiment;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

fn short_hash(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update(b"|");
    }
    let digest = hasher.finalize();
    digest.iter().take(12).map(|b| format!("{b:02x}")).collect()
}

pub fn quote_id(unit_id: &str, text: &str) -> String {
    format!("quote_{}", short_hash(&[unit_id, text]))
}

pub fn insight_id(unit_id: &str, content: &str) -> String {
    format!("ins_{}", short_hash(&[unit_id, content]))
}

pub fn sentiment_id(unit_id: &str) -> String {
    format!("sent_{unit_id}")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityRow {
    pub id: String,
    pub value: String,
    pub entity_type: String,
    pub confidence: f64,
    pub description: String,
    pub unit_ids: Vec<String>,
    pub properties: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuoteRow {
    pub id: String,
    pub text: String,
    pub speaker: String,
    pub quote_type: String,
    pub importance_score: f64,
    pub confidence: f64,
    pub unit_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsightRow {
    pub id: String,
    pub content: String,
    pub insight_type: String,
    pub confidence: f64,
    pub complexity: String,
    pub supporting_entities: Vec<String>,
    pub unit_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentimentRow {
    pub id: String,
    pub unit_id: String,
    pub sentiment: UnitSentiment,
}

/// A relationship with endpoints already resolved to node ids. The edge
/// type stays free-form; stores escape it at the query boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationshipRow {
    pub source_id: String,
    pub target_id: String,
    pub rel_type: String,
    pub confidence: f64,
    pub bidirectional: bool,
    pub properties: Map<String, Value>,
}

/// Stage B payload: everything written inside the knowledge transaction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KnowledgeBatch {
    pub entities: Vec<EntityRow>,
    pub quotes: Vec<QuoteRow>,
    pub insights: Vec<InsightRow>,
    pub sentiments: Vec<SentimentRow>,
    pub relationships: Vec<RelationshipRow>,
}

impl KnowledgeBatch {
    pub fn node_count(&self) -> u64 {
        (self.entities.len() + self.quotes.len() + self.insights.len() + self.sentiments.len())
            as u64
    }
}
