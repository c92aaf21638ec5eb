//! Conversation structure analysis

use crate::prompts::{conversation_prompt, conversation_schema};
use crate::ExtractionError;
use podgraph_core::{Boundary, ConversationStructure, ModelClient, Segment, StructuralUnit, Theme};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

const ATTEMPTS: u32 = 2;
const RETRY_GAP: Duration = Duration::from_secs(3);
const MIN_COVERAGE: f64 = 0.9;

/// Groups identified segments into themed structural units via a single
/// LLM call, enforcing the coverage guarantee locally before returning.
pub struct ConversationAnalyzer {
    client: Arc<dyn ModelClient>,
}

impl ConversationAnalyzer {
    pub fn new(client: Arc<dyn ModelClient>) -> Self {
        Self { client }
    }

    pub async fn analyze(
        &self,
        segments: &[Segment],
    ) -> Result<ConversationStructure, ExtractionError> {
        tracing::info!(segments = segments.len(), "starting conversation analysis");
        let mut last_error = String::new();

        for attempt in 1..=ATTEMPTS {
            if attempt > 1 {
                tracing::warn!(attempt, error = %last_error, "retrying conversation analysis");
                tokio::time::sleep(RETRY_GAP).await;
            }
            match self.attempt(segments).await {
                Ok(structure) => {
                    tracing::info!(
                        units = structure.units.len(),
                        themes = structure.themes.len(),
                        boundaries = structure.boundaries.len(),
                        "conversation analysis successful"
                    );
                    return Ok(structure);
                }
                Err(e) => last_error = e,
            }
        }

        Err(ExtractionError::ConversationAnalysis(format!(
            "failed after {ATTEMPTS} attempts: {last_error}"
        )))
    }

    async fn attempt(&self, segments: &[Segment]) -> Result<ConversationStructure, String> {
        let prompt = conversation_prompt(segments);
        let schema = conversation_schema();
        let response = self
            .client
            .chat_json(&prompt, Some(&schema))
            .await
            .map_err(|e| e.to_string())?;

        let structure = parse_structure(&response, segments.len());

        if structure.units.is_empty() {
            return Err("no conversation units identified".to_string());
        }
        let coverage = structure.coverage(segments.len());
        if coverage < MIN_COVERAGE {
            return Err(format!(
                "insufficient segment coverage: {:.1}%",
                coverage * 100.0
            ));
        }
        Ok(structure)
    }
}

/// Convert the model's JSON into a structure, clamping indices into range
/// and dropping spans that make no sense rather than failing the call.
fn parse_structure(value: &Value, segment_count: usize) -> ConversationStructure {
    let mut structure = ConversationStructure::default();
    let max_index = segment_count.saturating_sub(1);

    if let Some(units) = value.get("units").and_then(Value::as_array) {
        for unit in units {
            let Some(start) = unit.get("start_index").and_then(Value::as_u64) else {
                continue;
            };
            let Some(end) = unit.get("end_index").and_then(Value::as_u64) else {
                continue;
            };
            let start = (start as usize).min(max_index);
            let end = (end as usize).min(max_index);
            if end < start {
                tracing::debug!(start, end, "dropping inverted unit span");
                continue;
            }
            structure.units.push(StructuralUnit {
                start_index: start,
                end_index: end,
                unit_type: unit
                    .get("unit_type")
                    .and_then(Value::as_str)
                    .unwrap_or("discussion")
                    .to_string(),
                description: unit
                    .get("description")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            });
        }
    }

    if let Some(themes) = value.get("themes").and_then(Value::as_array) {
        for theme in themes {
            let name = match theme {
                Value::String(name) => name.clone(),
                Value::Object(fields) => fields
                    .get("theme")
                    .or_else(|| fields.get("name"))
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                _ => continue,
            };
            if name.is_empty() {
                continue;
            }
            structure.themes.push(Theme {
                theme: name,
                description: theme
                    .get("description")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            });
        }
    }

    if let Some(boundaries) = value.get("boundaries").and_then(Value::as_array) {
        for boundary in boundaries {
            let index = match boundary {
                Value::Number(n) => n.as_u64(),
                Value::Object(fields) => fields.get("index").and_then(Value::as_u64),
                _ => None,
            };
            let Some(index) = index else { continue };
            structure.boundaries.push(Boundary {
                index: (index as usize).min(max_index),
                reason: boundary
                    .get("reason")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            });
        }
    }

    structure
}
