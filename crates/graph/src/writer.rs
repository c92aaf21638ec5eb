//! The two-stage episode writer
//!
//! Stage A writes the episode skeleton, Stage B the extracted knowledge.
//! Between extraction and Stage B the writer resolves relationship
//! endpoints through the entity id map and then the quote text map;
//! relationships that resolve to neither are dropped with a warning and
//! never fail the episode. Rollback removes every node reachable from the
//! episode; a rollback failure is the single CRITICAL condition in the
//! system.

use crate::rows::{
    insight_id, quote_id, sentiment_id, EntityRow, InsightRow, KnowledgeBatch, QuoteRow,
    RelationshipRow, SentimentRow,
};
use crate::store::{EpisodeRef, GraphStore, WriteCounts};
use crate::GraphError;
use podgraph_core::{
    Entity, EpisodeMetadata, Insight, MeaningfulUnit, Quote, Relationship, UnitSentiment,
};
use std::collections::HashMap;
use std::sync::Arc;

/// Key used for quote-endpoint resolution: the first 100 characters of the
/// quote text, matching how relationships reference quotes.
fn quote_key(text: &str) -> String {
    text.chars().take(100).collect()
}

pub struct GraphWriter {
    store: Arc<dyn GraphStore>,
}

impl GraphWriter {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> Arc<dyn GraphStore> {
        self.store.clone()
    }

    /// Idempotency probe, run before Stage A.
    pub async fn check_already_processed(
        &self,
        vtt_filename: &str,
    ) -> Result<Option<EpisodeRef>, GraphError> {
        self.store.find_episode_by_vtt(vtt_filename).await
    }

    /// Stage A.
    pub async fn write_skeleton(
        &self,
        meta: &EpisodeMetadata,
        themes: &[String],
        units: &[MeaningfulUnit],
    ) -> Result<WriteCounts, GraphError> {
        self.store.write_episode_skeleton(meta, themes, units).await
    }

    /// Stage B.
    pub async fn write_knowledge(
        &self,
        meta: &EpisodeMetadata,
        batch: &KnowledgeBatch,
    ) -> Result<WriteCounts, GraphError> {
        self.store.write_knowledge(meta, batch).await
    }

    /// Episode-wide rollback. Logs the deleted-node count; on failure emits
    /// the CRITICAL marker and returns `RollbackFailed` - the only state in
    /// which partial episode data may remain.
    pub async fn rollback(&self, episode_id: &str) -> Result<u64, GraphError> {
        tracing::warn!(episode_id, "rolling back all graph data for episode");
        match self.store.delete_episode(episode_id).await {
            Ok(deleted) => {
                tracing::info!(episode_id, deleted, "rollback complete");
                Ok(deleted)
            }
            Err(e) => {
                tracing::error!(
                    episode_id,
                    error = %e,
                    "CRITICAL: manual cleanup required - rollback failed"
                );
                Err(GraphError::RollbackFailed {
                    episode_id: episode_id.to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }
}

/// Turn extraction output into the Stage B batch.
///
/// `entity_id_map` maps every raw entity spelling to its canonical node id
/// (from the resolver). Returns the batch plus the number of relationships
/// dropped for unresolvable endpoints.
pub fn prepare_knowledge(
    entities: &[Entity],
    entity_id_map: &HashMap<String, String>,
    quotes: &[Quote],
    insights: &[Insight],
    sentiments: &[UnitSentiment],
    relationships: &[Relationship],
) -> (KnowledgeBatch, usize) {
    let mut batch = KnowledgeBatch::default();

    for entity in entities {
        let Some(id) = entity_id_map.get(&entity.value) else {
            tracing::warn!(value = %entity.value, "entity missing from id map, skipping");
            continue;
        };
        batch.entities.push(EntityRow {
            id: id.clone(),
            value: entity.value.clone(),
            entity_type: entity.entity_type.clone(),
            confidence: entity.confidence,
            description: entity.description().unwrap_or_default().to_string(),
            unit_ids: entity.unit_ids(),
            properties: entity.properties.clone(),
        });
    }

    let mut quote_map: HashMap<String, String> = HashMap::new();
    for quote in quotes {
        if quote.meaningful_unit_id.is_empty() {
            tracing::warn!("quote missing meaningful_unit_id, skipping");
            continue;
        }
        let id = quote_id(&quote.meaningful_unit_id, &quote.text);
        quote_map.insert(quote_key(&quote.text), id.clone());
        batch.quotes.push(QuoteRow {
            id,
            text: quote.text.clone(),
            speaker: quote.speaker.clone(),
            quote_type: quote.quote_type.clone(),
            importance_score: quote.importance_score,
            confidence: quote.confidence,
            unit_id: quote.meaningful_unit_id.clone(),
        });
    }

    for insight in insights {
        if insight.meaningful_unit_id.is_empty() {
            tracing::warn!("insight missing meaningful_unit_id, skipping");
            continue;
        }
        batch.insights.push(InsightRow {
            id: insight_id(&insight.meaningful_unit_id, &insight.content),
            content: insight.content.clone(),
            insight_type: insight.insight_type.clone(),
            confidence: insight.confidence,
            complexity: insight.complexity.clone(),
            supporting_entities: insight.supporting_entities.clone(),
            unit_id: insight.meaningful_unit_id.clone(),
        });
    }

    for sentiment in sentiments {
        batch.sentiments.push(SentimentRow {
            id: sentiment_id(&sentiment.unit_id),
            unit_id: sentiment.unit_id.clone(),
            sentiment: sentiment.clone(),
        });
    }

    let mut dropped = 0;
    for relationship in relationships {
        let resolve = |endpoint: &str| -> Option<String> {
            entity_id_map
                .get(endpoint)
                .or_else(|| quote_map.get(&quote_key(endpoint)))
                .cloned()
        };
        let (Some(source_id), Some(target_id)) =
            (resolve(&relationship.source), resolve(&relationship.target))
        else {
            tracing::warn!(
                source = %relationship.source,
                target = %relationship.target,
                rel_type = %relationship.rel_type,
                "dropping relationship with unresolvable endpoints"
            );
            dropped += 1;
            continue;
        };
        batch.relationships.push(RelationshipRow {
            source_id,
            target_id,
            rel_type: relationship.rel_type.clone(),
            confidence: relationship.confidence,
            bidirectional: relationship.is_bidirectional(),
            properties: relationship.properties.clone(),
        });
    }

    (batch, dropped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::Map;

    fn entity(value: &str) -> Entity {
        Entity {
            value: value.into(),
            entity_type: "person".into(),
            confidence: 0.9,
            properties: Map::new(),
        }
    }

    fn quote(text: &str, unit: &str) -> Quote {
        Quote {
            text: text.into(),
            speaker: "Alice".into(),
            confidence: 0.9,
            quote_type: "insightful".into(),
            importance_score: 0.8,
            meaningful_unit_id: unit.into(),
        }
    }

    fn relationship(source: &str, target: &str) -> Relationship {
        Relationship {
            source: source.into(),
            target: target.into(),
            rel_type: "DISCUSSES".into(),
            confidence: 0.8,
            properties: Map::new(),
        }
    }

    #[test]
    fn test_endpoint_resolution_entity_then_quote() {
        let mut id_map = HashMap::new();
        id_map.insert("Alice".to_string(), "ent_alice".to_string());

        let quotes = vec![quote("focus is the new currency of work", "unit_a")];
        let relationships = vec![
            relationship("Alice", "focus is the new currency of work"),
            relationship("Alice", "nobody ever said this"),
        ];

        let (batch, dropped) = prepare_knowledge(
            &[entity("Alice")],
            &id_map,
            &quotes,
            &[],
            &[],
            &relationships,
        );

        assert_eq!(batch.relationships.len(), 1);
        assert_eq!(batch.relationships[0].source_id, "ent_alice");
        assert_eq!(batch.relationships[0].target_id, batch.quotes[0].id);
        assert_eq!(dropped, 1);
    }

    #[test]
    fn test_quote_without_unit_skipped() {
        let (batch, _) =
            prepare_knowledge(&[], &HashMap::new(), &[quote("text", "")], &[], &[], &[]);
        assert!(batch.quotes.is_empty());
    }

    struct FailingStore;

    #[async_trait]
    impl GraphStore for FailingStore {
        async fn find_episode_by_vtt(&self, _: &str) -> Result<Option<EpisodeRef>, GraphError> {
            Ok(None)
        }

        async fn write_episode_skeleton(
            &self,
            _: &EpisodeMetadata,
            _: &[String],
            _: &[MeaningfulUnit],
        ) -> Result<WriteCounts, GraphError> {
            Err(GraphError::Permanent("down".into()))
        }

        async fn write_knowledge(
            &self,
            _: &EpisodeMetadata,
            _: &KnowledgeBatch,
        ) -> Result<WriteCounts, GraphError> {
            Err(GraphError::Permanent("down".into()))
        }

        async fn delete_episode(&self, _: &str) -> Result<u64, GraphError> {
            Err(GraphError::Transient("unreachable".into()))
        }

        async fn units_with_generic_speakers(
            &self,
            _: &str,
        ) -> Result<Vec<(String, String)>, GraphError> {
            Ok(vec![])
        }

        async fn update_unit_speakers(
            &self,
            _: &str,
            _: &HashMap<String, String>,
        ) -> Result<u64, GraphError> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn test_rollback_failure_is_rollback_failed() {
        let writer = GraphWriter::new(Arc::new(FailingStore));
        let err = writer.rollback("ep-1").await.unwrap_err();
        assert!(matches!(err, GraphError::RollbackFailed { .. }));
    }
}
