//! Cross-unit entity resolution

use podgraph_core::Entity;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// Resolver output: the merged entity set plus the map the graph writer
/// uses to rewrite relationship endpoints.
#[derive(Debug, Clone)]
pub struct ResolvedEntities {
    pub entities: Vec<Entity>,
    /// Raw surface value (as emitted anywhere) -> canonical node id
    pub id_map: HashMap<String, String>,
}

/// Deterministic node id for an entity, derived from its merge key so the
/// same entity resolves to the same id across units and runs.
pub fn entity_canonical_id(entity_type: &str, value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(entity_type.trim().to_lowercase().as_bytes());
    hasher.update(b"|");
    hasher.update(value.trim().to_lowercase().as_bytes());
    let digest = hasher.finalize();
    let hex: String = digest.iter().take(12).map(|b| format!("{b:02x}")).collect();
    format!("ent_{hex}")
}

/// Merge entities that share `(lowercased type, normalized value)`:
/// - the highest-confidence record wins scalar fields
/// - distinct descriptions concatenate with "; "
/// - `meaningful_unit_ids` lists union
/// - the first spelling seen stays canonical
///
/// Applying the resolver to its own output is a no-op.
pub fn resolve_entities(raw: Vec<Entity>) -> ResolvedEntities {
    let total = raw.len();
    let mut order: Vec<(String, String)> = Vec::new();
    let mut merged: HashMap<(String, String), Entity> = HashMap::new();
    let mut id_map = HashMap::new();

    for entity in raw {
        let key = entity.merge_key();
        let canonical = entity_canonical_id(&entity.entity_type, &entity.value);
        id_map.entry(entity.value.clone()).or_insert(canonical);

        match merged.get_mut(&key) {
            None => {
                let mut entity = entity;
                normalize_unit_ids(&mut entity);
                order.push(key.clone());
                merged.insert(key, entity);
            }
            Some(existing) => {
                let incoming_units = entity.unit_ids();
                let incoming_description = entity.description().map(str::to_owned);

                if entity.confidence > existing.confidence {
                    existing.confidence = entity.confidence;
                }

                if let Some(new_description) = incoming_description {
                    let current = existing.description().unwrap_or("").to_string();
                    if !new_description.is_empty() && !current.contains(&new_description) {
                        let combined = if current.is_empty() {
                            new_description
                        } else {
                            format!("{current}; {new_description}")
                        };
                        existing
                            .properties
                            .insert("description".into(), Value::String(combined));
                    }
                }

                let mut units = existing.unit_ids();
                for unit in incoming_units {
                    if !units.contains(&unit) {
                        units.push(unit);
                    }
                }
                existing.properties.insert(
                    "meaningful_unit_ids".into(),
                    Value::Array(units.into_iter().map(Value::String).collect()),
                );
                existing.properties.remove("meaningful_unit_id");
            }
        }
    }

    let entities: Vec<Entity> = order
        .into_iter()
        .filter_map(|key| merged.remove(&key))
        .collect();

    tracing::info!(raw = total, unique = entities.len(), "resolved entities");
    ResolvedEntities { entities, id_map }
}

/// Move a singular `meaningful_unit_id` into the plural list form.
fn normalize_unit_ids(entity: &mut Entity) {
    let units = entity.unit_ids();
    if !units.is_empty() {
        entity.properties.insert(
            "meaningful_unit_ids".into(),
            Value::Array(units.into_iter().map(Value::String).collect()),
        );
    }
    entity.properties.remove("meaningful_unit_id");
}
