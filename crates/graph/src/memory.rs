//! In-memory graph store
//!
//! Backs tests and small local runs with the same contract as the Cypher
//! store: per-stage transactionality (writes land fully before returning),
//! cycle-safe cascade deletes, and merge-by-id semantics for entities.

use crate::rows::KnowledgeBatch;
use crate::store::{is_generic_label, podcast_node_id, EpisodeRef, GraphStore, WriteCounts};
use crate::GraphError;
use async_trait::async_trait;
use parking_lot::Mutex;
use podgraph_core::{EpisodeMetadata, MeaningfulUnit};
use serde_json::{json, Map, Value};
use std::collections::{HashMap, HashSet, VecDeque};

#[derive(Debug, Clone)]
pub struct MemoryNode {
    pub label: String,
    pub props: Map<String, Value>,
}

#[derive(Debug, Clone)]
pub struct MemoryEdge {
    pub source: String,
    pub rel_type: String,
    pub target: String,
    pub props: Map<String, Value>,
}

#[derive(Debug, Default)]
struct Inner {
    nodes: HashMap<String, MemoryNode>,
    edges: Vec<MemoryEdge>,
}

/// Labeled-property-graph store held entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryGraph {
    inner: Mutex<Inner>,
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node_count(&self) -> usize {
        self.inner.lock().nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.inner.lock().edges.len()
    }

    pub fn has_node(&self, id: &str) -> bool {
        self.inner.lock().nodes.contains_key(id)
    }

    pub fn node(&self, id: &str) -> Option<MemoryNode> {
        self.inner.lock().nodes.get(id).cloned()
    }

    pub fn nodes_with_label(&self, label: &str) -> Vec<(String, MemoryNode)> {
        self.inner
            .lock()
            .nodes
            .iter()
            .filter(|(_, node)| node.label == label)
            .map(|(id, node)| (id.clone(), node.clone()))
            .collect()
    }

    pub fn edges_of_type(&self, rel_type: &str) -> Vec<MemoryEdge> {
        self.inner
            .lock()
            .edges
            .iter()
            .filter(|edge| edge.rel_type == rel_type)
            .cloned()
            .collect()
    }

    pub fn edges_from(&self, source: &str) -> Vec<MemoryEdge> {
        self.inner
            .lock()
            .edges
            .iter()
            .filter(|edge| edge.source == source)
            .cloned()
            .collect()
    }

    /// Nodes carrying the given episode id (for the no-partial-data
    /// invariant checks).
    pub fn nodes_for_episode(&self, episode_id: &str) -> usize {
        let inner = self.inner.lock();
        inner
            .nodes
            .iter()
            .filter(|(id, node)| {
                id.as_str() == episode_id
                    || node.props.get("episode_id").and_then(Value::as_str) == Some(episode_id)
            })
            .count()
    }
}

fn unit_props(unit: &MeaningfulUnit, meta: &EpisodeMetadata) -> Map<String, Value> {
    let mut props = Map::new();
    props.insert("text".into(), json!(unit.text));
    props.insert("start_time".into(), json!(unit.start_time));
    props.insert("end_time".into(), json!(unit.end_time));
    props.insert("primary_speaker".into(), json!(unit.primary_speaker));
    props.insert("speaker_distribution".into(), json!(unit.speaker_distribution));
    props.insert("unit_type".into(), json!(unit.unit_type));
    props.insert("themes".into(), json!(unit.themes));
    props.insert("segment_refs".into(), json!(unit.segment_refs));
    props.insert("episode_id".into(), json!(meta.episode_id));
    props.insert("podcast_id".into(), json!(podcast_node_id(meta)));
    if let Some(embedding) = &unit.embedding {
        props.insert("embedding".into(), json!(embedding));
    }
    props
}

#[async_trait]
impl GraphStore for MemoryGraph {
    async fn find_episode_by_vtt(
        &self,
        vtt_filename: &str,
    ) -> Result<Option<EpisodeRef>, GraphError> {
        if vtt_filename.is_empty() {
            return Ok(None);
        }
        let inner = self.inner.lock();
        Ok(inner
            .nodes
            .iter()
            .find(|(_, node)| {
                node.label == "Episode"
                    && node.props.get("vtt_filename").and_then(Value::as_str) == Some(vtt_filename)
            })
            .map(|(id, node)| EpisodeRef {
                id: id.clone(),
                title: node
                    .props
                    .get("title")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            }))
    }

    async fn write_episode_skeleton(
        &self,
        meta: &EpisodeMetadata,
        themes: &[String],
        units: &[MeaningfulUnit],
    ) -> Result<WriteCounts, GraphError> {
        let mut inner = self.inner.lock();
        let mut counts = WriteCounts::default();
        let podcast_id = podcast_node_id(meta);

        if !inner.nodes.contains_key(&podcast_id) {
            let mut props = Map::new();
            props.insert("name".into(), json!(meta.podcast.name));
            props.insert("host".into(), json!(meta.podcast.host));
            props.insert("podcast_id".into(), json!(podcast_id));
            inner.nodes.insert(
                podcast_id.clone(),
                MemoryNode {
                    label: "Podcast".into(),
                    props,
                },
            );
            counts.nodes_created += 1;
        }

        let mut episode_props = Map::new();
        episode_props.insert("title".into(), json!(meta.title));
        episode_props.insert("description".into(), json!(meta.description));
        episode_props.insert("published_date".into(), json!(meta.published_date));
        episode_props.insert("youtube_url".into(), json!(meta.youtube_url));
        episode_props.insert("vtt_filename".into(), json!(meta.vtt_filename));
        episode_props.insert("podcast_id".into(), json!(podcast_id));
        inner.nodes.insert(
            meta.episode_id.clone(),
            MemoryNode {
                label: "Episode".into(),
                props: episode_props,
            },
        );
        counts.nodes_created += 1;
        inner.edges.push(MemoryEdge {
            source: podcast_id.clone(),
            rel_type: "HAS_EPISODE".into(),
            target: meta.episode_id.clone(),
            props: Map::new(),
        });
        counts.relationships_created += 1;

        for theme in themes {
            let topic_id = format!("topic_{podcast_id}_{}", theme.to_lowercase().replace(' ', "-"));
            if !inner.nodes.contains_key(&topic_id) {
                let mut props = Map::new();
                props.insert("name".into(), json!(theme));
                props.insert("podcast_id".into(), json!(podcast_id));
                inner.nodes.insert(
                    topic_id.clone(),
                    MemoryNode {
                        label: "Topic".into(),
                        props,
                    },
                );
                counts.nodes_created += 1;
            }
            inner.edges.push(MemoryEdge {
                source: meta.episode_id.clone(),
                rel_type: "COVERS_TOPIC".into(),
                target: topic_id,
                props: Map::new(),
            });
            counts.relationships_created += 1;
        }

        for unit in units {
            inner.nodes.insert(
                unit.id.clone(),
                MemoryNode {
                    label: "MeaningfulUnit".into(),
                    props: unit_props(unit, meta),
                },
            );
            counts.nodes_created += 1;
            inner.edges.push(MemoryEdge {
                source: unit.id.clone(),
                rel_type: "PART_OF".into(),
                target: meta.episode_id.clone(),
                props: Map::new(),
            });
            counts.relationships_created += 1;
        }

        tracing::info!(
            episode_id = %meta.episode_id,
            nodes = counts.nodes_created,
            edges = counts.relationships_created,
            "episode skeleton stored"
        );
        Ok(counts)
    }

    async fn write_knowledge(
        &self,
        meta: &EpisodeMetadata,
        batch: &KnowledgeBatch,
    ) -> Result<WriteCounts, GraphError> {
        let mut inner = self.inner.lock();
        let mut counts = WriteCounts::default();
        let podcast_id = podcast_node_id(meta);

        for row in &batch.entities {
            let existed = inner.nodes.contains_key(&row.id);
            let mut props = row.properties.clone();
            props.insert("value".into(), json!(row.value));
            props.insert("type".into(), json!(row.entity_type));
            props.insert("confidence".into(), json!(row.confidence));
            props.insert("description".into(), json!(row.description));
            props.insert("episode_id".into(), json!(meta.episode_id));
            props.insert("podcast_id".into(), json!(podcast_id));
            inner.nodes.insert(
                row.id.clone(),
                MemoryNode {
                    label: "Entity".into(),
                    props,
                },
            );
            if !existed {
                counts.nodes_created += 1;
            }
            for unit_id in &row.unit_ids {
                if inner.nodes.contains_key(unit_id) {
                    inner.edges.push(MemoryEdge {
                        source: row.id.clone(),
                        rel_type: "MENTIONED_IN".into(),
                        target: unit_id.clone(),
                        props: Map::new(),
                    });
                    counts.relationships_created += 1;
                }
            }
        }

        for row in &batch.quotes {
            let mut props = Map::new();
            props.insert("text".into(), json!(row.text));
            props.insert("speaker".into(), json!(row.speaker));
            props.insert("quote_type".into(), json!(row.quote_type));
            props.insert("importance_score".into(), json!(row.importance_score));
            props.insert("confidence".into(), json!(row.confidence));
            props.insert("episode_id".into(), json!(meta.episode_id));
            props.insert("podcast_id".into(), json!(podcast_id));
            inner.nodes.insert(
                row.id.clone(),
                MemoryNode {
                    label: "Quote".into(),
                    props,
                },
            );
            counts.nodes_created += 1;
            if inner.nodes.contains_key(&row.unit_id) {
                inner.edges.push(MemoryEdge {
                    source: row.id.clone(),
                    rel_type: "QUOTED_IN".into(),
                    target: row.unit_id.clone(),
                    props: Map::new(),
                });
                counts.relationships_created += 1;
            }
        }

        for row in &batch.insights {
            let mut props = Map::new();
            props.insert("content".into(), json!(row.content));
            props.insert("type".into(), json!(row.insight_type));
            props.insert("confidence".into(), json!(row.confidence));
            props.insert("complexity".into(), json!(row.complexity));
            props.insert("supporting_entities".into(), json!(row.supporting_entities));
            props.insert("episode_id".into(), json!(meta.episode_id));
            props.insert("podcast_id".into(), json!(podcast_id));
            inner.nodes.insert(
                row.id.clone(),
                MemoryNode {
                    label: "Insight".into(),
                    props,
                },
            );
            counts.nodes_created += 1;
            if inner.nodes.contains_key(&row.unit_id) {
                inner.edges.push(MemoryEdge {
                    source: row.id.clone(),
                    rel_type: "DERIVED_FROM".into(),
                    target: row.unit_id.clone(),
                    props: Map::new(),
                });
                counts.relationships_created += 1;
            }
        }

        for row in &batch.sentiments {
            let mut props =
                serde_json::to_value(&row.sentiment).map(|v| match v {
                    Value::Object(map) => map,
                    _ => Map::new(),
                })
                .unwrap_or_default();
            props.insert("episode_id".into(), json!(meta.episode_id));
            props.insert("podcast_id".into(), json!(podcast_id));
            inner.nodes.insert(
                row.id.clone(),
                MemoryNode {
                    label: "Sentiment".into(),
                    props,
                },
            );
            counts.nodes_created += 1;
            if inner.nodes.contains_key(&row.unit_id) {
                inner.edges.push(MemoryEdge {
                    source: row.unit_id.clone(),
                    rel_type: "HAS_SENTIMENT".into(),
                    target: row.id.clone(),
                    props: Map::new(),
                });
                counts.relationships_created += 1;
            }
        }

        for row in &batch.relationships {
            if !inner.nodes.contains_key(&row.source_id) || !inner.nodes.contains_key(&row.target_id)
            {
                continue;
            }
            let mut props = row.properties.clone();
            props.insert("confidence".into(), json!(row.confidence));
            props.insert("episode_id".into(), json!(meta.episode_id));
            inner.edges.push(MemoryEdge {
                source: row.source_id.clone(),
                rel_type: row.rel_type.clone(),
                target: row.target_id.clone(),
                props: props.clone(),
            });
            counts.relationships_created += 1;
            if row.bidirectional {
                inner.edges.push(MemoryEdge {
                    source: row.target_id.clone(),
                    rel_type: row.rel_type.clone(),
                    target: row.source_id.clone(),
                    props,
                });
                counts.relationships_created += 1;
            }
        }

        tracing::info!(
            episode_id = %meta.episode_id,
            nodes = counts.nodes_created,
            edges = counts.relationships_created,
            "knowledge stored"
        );
        Ok(counts)
    }

    async fn delete_episode(&self, episode_id: &str) -> Result<u64, GraphError> {
        let mut inner = self.inner.lock();
        if !inner.nodes.contains_key(episode_id) {
            return Ok(0);
        }

        // Everything reachable from the episode in either direction; the
        // graph can contain cycles, so track visited nodes.
        let mut to_delete: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<String> = VecDeque::new();
        to_delete.insert(episode_id.to_string());
        queue.push_back(episode_id.to_string());
        while let Some(current) = queue.pop_front() {
            for edge in &inner.edges {
                for neighbor in [&edge.source, &edge.target] {
                    if (edge.source == current || edge.target == current)
                        && !to_delete.contains(neighbor.as_str())
                    {
                        // The podcast node survives rollback: other episodes
                        // hang off it.
                        let is_podcast = inner
                            .nodes
                            .get(neighbor.as_str())
                            .map(|n| n.label == "Podcast")
                            .unwrap_or(false);
                        if !is_podcast {
                            to_delete.insert(neighbor.clone());
                            queue.push_back(neighbor.clone());
                        }
                    }
                }
            }
        }

        let deleted = to_delete.len() as u64;
        inner.nodes.retain(|id, _| !to_delete.contains(id));
        inner
            .edges
            .retain(|edge| !to_delete.contains(&edge.source) && !to_delete.contains(&edge.target));
        tracing::info!(episode_id, deleted, "episode rollback complete");
        Ok(deleted)
    }

    async fn units_with_generic_speakers(
        &self,
        episode_id: &str,
    ) -> Result<Vec<(String, String)>, GraphError> {
        let inner = self.inner.lock();
        Ok(inner
            .nodes
            .iter()
            .filter(|(_, node)| {
                node.label == "MeaningfulUnit"
                    && node.props.get("episode_id").and_then(Value::as_str) == Some(episode_id)
            })
            .filter_map(|(id, node)| {
                let speaker = node.props.get("primary_speaker")?.as_str()?;
                is_generic_label(speaker).then(|| (id.clone(), speaker.to_string()))
            })
            .collect())
    }

    async fn update_unit_speakers(
        &self,
        episode_id: &str,
        mapping: &HashMap<String, String>,
    ) -> Result<u64, GraphError> {
        let mut inner = self.inner.lock();
        let mut updated = 0;
        for node in inner.nodes.values_mut() {
            if node.label != "MeaningfulUnit"
                || node.props.get("episode_id").and_then(Value::as_str) != Some(episode_id)
            {
                continue;
            }
            let Some(current) = node.props.get("primary_speaker").and_then(Value::as_str) else {
                continue;
            };
            if let Some(real) = mapping.get(current) {
                node.props.insert("primary_speaker".into(), json!(real));
                updated += 1;
            }
        }
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rows::{quote_id, EntityRow, QuoteRow, RelationshipRow};
    use podgraph_core::PodcastInfo;

    fn meta() -> EpisodeMetadata {
        EpisodeMetadata {
            episode_id: "ep-1".into(),
            title: "On Focus".into(),
            vtt_filename: "ep1.vtt".into(),
            podcast: PodcastInfo {
                id: "deep-questions".into(),
                name: "Deep Questions".into(),
                host: "Cal".into(),
            },
            ..Default::default()
        }
    }

    fn unit(id: &str) -> MeaningfulUnit {
        MeaningfulUnit {
            id: id.into(),
            text: "text".into(),
            start_time: 0.0,
            end_time: 10.0,
            primary_speaker: "Alice".into(),
            speaker_distribution: HashMap::new(),
            unit_type: "discussion".into(),
            themes: vec![],
            segment_refs: vec![],
            embedding: Some(vec![0.1, 0.2]),
        }
    }

    #[tokio::test]
    async fn test_skeleton_chain_intact() {
        let graph = MemoryGraph::new();
        let counts = graph
            .write_episode_skeleton(&meta(), &["focus".into()], &[unit("unit_a"), unit("unit_b")])
            .await
            .unwrap();
        // podcast + episode + topic + 2 units
        assert_eq!(counts.nodes_created, 5);

        assert!(graph.has_node("deep-questions"));
        assert!(graph.has_node("ep-1"));
        let part_of = graph.edges_of_type("PART_OF");
        assert_eq!(part_of.len(), 2);
        assert!(part_of.iter().all(|e| e.target == "ep-1"));
        assert_eq!(graph.edges_of_type("COVERS_TOPIC").len(), 1);
    }

    #[tokio::test]
    async fn test_vtt_idempotency_probe() {
        let graph = MemoryGraph::new();
        graph
            .write_episode_skeleton(&meta(), &[], &[unit("unit_a")])
            .await
            .unwrap();
        let found = graph.find_episode_by_vtt("ep1.vtt").await.unwrap().unwrap();
        assert_eq!(found.id, "ep-1");
        assert_eq!(found.title, "On Focus");
        assert!(graph.find_episode_by_vtt("other.vtt").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rollback_removes_everything_but_podcast() {
        let graph = MemoryGraph::new();
        graph
            .write_episode_skeleton(&meta(), &["focus".into()], &[unit("unit_a")])
            .await
            .unwrap();
        let batch = KnowledgeBatch {
            entities: vec![EntityRow {
                id: "ent_1".into(),
                value: "OpenAI".into(),
                entity_type: "company".into(),
                confidence: 0.9,
                description: String::new(),
                unit_ids: vec!["unit_a".into()],
                properties: Map::new(),
            }],
            quotes: vec![QuoteRow {
                id: quote_id("unit_a", "q"),
                text: "q".into(),
                speaker: "Alice".into(),
                quote_type: "insightful".into(),
                importance_score: 0.9,
                confidence: 0.9,
                unit_id: "unit_a".into(),
            }],
            ..Default::default()
        };
        graph.write_knowledge(&meta(), &batch).await.unwrap();
        assert!(graph.nodes_for_episode("ep-1") > 0);

        let deleted = graph.delete_episode("ep-1").await.unwrap();
        assert!(deleted >= 4);
        assert_eq!(graph.nodes_for_episode("ep-1"), 0);
        // The podcast node survives
        assert!(graph.has_node("deep-questions"));
        // No dangling edges
        assert_eq!(graph.edges_of_type("PART_OF").len(), 0);
        assert_eq!(graph.edges_of_type("QUOTED_IN").len(), 0);
    }

    #[tokio::test]
    async fn test_cyclic_relationships_survive_write_and_rollback() {
        let graph = MemoryGraph::new();
        graph
            .write_episode_skeleton(&meta(), &[], &[unit("unit_a")])
            .await
            .unwrap();
        let entity = |id: &str, value: &str| EntityRow {
            id: id.into(),
            value: value.into(),
            entity_type: "person".into(),
            confidence: 0.9,
            description: String::new(),
            unit_ids: vec!["unit_a".into()],
            properties: Map::new(),
        };
        let rel = |source: &str, target: &str, rel_type: &str| RelationshipRow {
            source_id: source.into(),
            target_id: target.into(),
            rel_type: rel_type.into(),
            confidence: 0.8,
            bidirectional: false,
            properties: Map::new(),
        };
        let batch = KnowledgeBatch {
            entities: vec![entity("ent_a", "Alice"), entity("ent_b", "Bob")],
            relationships: vec![rel("ent_a", "ent_b", "MENTORS"), rel("ent_b", "ent_a", "CHALLENGES")],
            ..Default::default()
        };
        graph.write_knowledge(&meta(), &batch).await.unwrap();
        assert_eq!(graph.edges_of_type("MENTORS").len(), 1);
        assert_eq!(graph.edges_of_type("CHALLENGES").len(), 1);

        // Cycle must not hang or survive the cascade
        graph.delete_episode("ep-1").await.unwrap();
        assert!(!graph.has_node("ent_a"));
        assert!(!graph.has_node("ent_b"));
    }

    #[tokio::test]
    async fn test_dangling_relationship_skipped() {
        let graph = MemoryGraph::new();
        graph
            .write_episode_skeleton(&meta(), &[], &[unit("unit_a")])
            .await
            .unwrap();
        let batch = KnowledgeBatch {
            relationships: vec![RelationshipRow {
                source_id: "missing_a".into(),
                target_id: "missing_b".into(),
                rel_type: "RELATED_TO".into(),
                confidence: 0.5,
                bidirectional: false,
                properties: Map::new(),
            }],
            ..Default::default()
        };
        let counts = graph.write_knowledge(&meta(), &batch).await.unwrap();
        assert_eq!(counts.relationships_created, 0);
    }

    #[tokio::test]
    async fn test_generic_speaker_listing_and_update() {
        let graph = MemoryGraph::new();
        let mut generic = unit("unit_a");
        generic.primary_speaker = "SPEAKER_2".into();
        graph
            .write_episode_skeleton(&meta(), &[], &[generic, unit("unit_b")])
            .await
            .unwrap();

        let found = graph.units_with_generic_speakers("ep-1").await.unwrap();
        assert_eq!(found, vec![("unit_a".to_string(), "SPEAKER_2".to_string())]);

        let mut mapping = HashMap::new();
        mapping.insert("SPEAKER_2".to_string(), "Bob Guest".to_string());
        let updated = graph.update_unit_speakers("ep-1", &mapping).await.unwrap();
        assert_eq!(updated, 1);
        assert!(graph
            .units_with_generic_speakers("ep-1")
            .await
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_is_generic_label() {
        assert!(is_generic_label("SPEAKER_1"));
        assert!(is_generic_label("Speaker 12"));
        assert!(!is_generic_label("Alice Host"));
        assert!(!is_generic_label("Speakerman"));
    }
}
