//! Post-storage analysis over the extracted knowledge
//!
//! Builds an adjacency view of the episode's entity graph and reports
//! degree and connectivity metrics plus type distributions. Results land
//! in the pipeline stats; failures here never fail the episode.

use podgraph_core::{Entity, Relationship};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet, VecDeque};

/// Compute relationship-graph metrics for an episode.
pub fn knowledge_report(entities: &[Entity], relationships: &[Relationship]) -> Value {
    let known: HashSet<&str> = entities.iter().map(|e| e.value.as_str()).collect();

    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    let mut degree: HashMap<&str, usize> = HashMap::new();
    for entity in entities {
        adjacency.entry(&entity.value).or_default();
        degree.entry(&entity.value).or_insert(0);
    }

    let mut entity_types: HashMap<&str, usize> = HashMap::new();
    for entity in entities {
        *entity_types.entry(entity.entity_type.as_str()).or_insert(0) += 1;
    }

    let mut relationship_types: HashMap<&str, usize> = HashMap::new();
    let mut edge_count = 0usize;
    for relationship in relationships {
        *relationship_types
            .entry(relationship.rel_type.as_str())
            .or_insert(0) += 1;
        let (source, target) = (relationship.source.as_str(), relationship.target.as_str());
        if known.contains(source) && known.contains(target) {
            adjacency.entry(source).or_default().push(target);
            *degree.entry(source).or_insert(0) += 1;
            edge_count += 1;
            if relationship.is_bidirectional() {
                adjacency.entry(target).or_default().push(source);
                *degree.entry(target).or_insert(0) += 1;
            } else {
                // Treat edges as undirected for connectivity purposes
                adjacency.entry(target).or_default().push(source);
            }
        }
    }

    let components = connected_components(&adjacency);
    let max_degree = degree.values().copied().max().unwrap_or(0);
    let avg_degree = if degree.is_empty() {
        0.0
    } else {
        degree.values().sum::<usize>() as f64 / degree.len() as f64
    };

    json!({
        "node_count": entities.len(),
        "edge_count": edge_count,
        "avg_degree": avg_degree,
        "max_degree": max_degree,
        "connected_components": components,
        "type_distribution": {
            "entities": entity_types,
            "relationships": relationship_types,
        },
    })
}

fn connected_components(adjacency: &HashMap<&str, Vec<&str>>) -> usize {
    let mut visited: HashSet<&str> = HashSet::new();
    let mut components = 0;
    for &node in adjacency.keys() {
        if visited.contains(node) {
            continue;
        }
        components += 1;
        let mut queue = VecDeque::from([node]);
        visited.insert(node);
        while let Some(current) = queue.pop_front() {
            for &neighbor in adjacency.get(current).into_iter().flatten() {
                if visited.insert(neighbor) {
                    queue.push_back(neighbor);
                }
            }
        }
    }
    components
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn entity(value: &str, entity_type: &str) -> Entity {
        Entity {
            value: value.into(),
            entity_type: entity_type.into(),
            confidence: 0.9,
            properties: Map::new(),
        }
    }

    fn rel(source: &str, target: &str) -> Relationship {
        Relationship {
            source: source.into(),
            target: target.into(),
            rel_type: "RELATED_TO".into(),
            confidence: 0.8,
            properties: Map::new(),
        }
    }

    #[test]
    fn test_components_and_degrees() {
        let entities = vec![
            entity("a", "person"),
            entity("b", "person"),
            entity("c", "company"),
            entity("lonely", "concept"),
        ];
        let relationships = vec![rel("a", "b"), rel("b", "c")];
        let report = knowledge_report(&entities, &relationships);

        assert_eq!(report["node_count"], 4);
        assert_eq!(report["edge_count"], 2);
        // {a,b,c} plus the isolated node
        assert_eq!(report["connected_components"], 2);
        assert_eq!(report["type_distribution"]["entities"]["person"], 2);
    }

    #[test]
    fn test_dangling_relationship_ignored() {
        let entities = vec![entity("a", "person")];
        let relationships = vec![rel("a", "ghost")];
        let report = knowledge_report(&entities, &relationships);
        assert_eq!(report["edge_count"], 0);
        // Still counted in the type distribution, matching extraction output
        assert_eq!(report["type_distribution"]["relationships"]["RELATED_TO"], 1);
    }

    #[test]
    fn test_cycle_terminates() {
        let entities = vec![entity("a", "x"), entity("b", "x")];
        let relationships = vec![rel("a", "b"), rel("b", "a")];
        let report = knowledge_report(&entities, &relationships);
        assert_eq!(report["connected_components"], 1);
    }

    #[test]
    fn test_empty() {
        let report = knowledge_report(&[], &[]);
        assert_eq!(report["node_count"], 0);
        assert_eq!(report["connected_components"], 0);
    }
}
