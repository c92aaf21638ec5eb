//! Opt-in post-processing speaker mapping
//!
//! Runs only when `enable_speaker_mapping` is set: a single pass that asks
//! the model to name units whose primary speaker is still a generic
//! diarization label, then applies the mapping with one bulk update.
//! Failures are reported to the caller but never fail the episode.

use podgraph_core::{EpisodeMetadata, ModelClient};
use podgraph_graph::GraphStore;
use serde_json::json;
use std::collections::HashMap;

pub async fn map_generic_speakers(
    store: &dyn GraphStore,
    client: &dyn ModelClient,
    meta: &EpisodeMetadata,
) -> Result<HashMap<String, String>, String> {
    let generic = store
        .units_with_generic_speakers(&meta.episode_id)
        .await
        .map_err(|e| e.to_string())?;
    if generic.is_empty() {
        tracing::info!(episode_id = %meta.episode_id, "no generic speakers left to map");
        return Ok(HashMap::new());
    }

    let mut labels: Vec<&str> = generic.iter().map(|(_, speaker)| speaker.as_str()).collect();
    labels.sort_unstable();
    labels.dedup();

    let prompt = format!(
        "These speakers in a podcast episode could not be identified during \
         processing and still carry generic labels: {labels:?}\n\n\
         Podcast: {}\nEpisode: {}\nDescription:\n{}\n\n\
         Using the description, map each label to a real name. Omit labels you \
         cannot identify. Respond with JSON only: {{\"SPEAKER_N\": \"Name\"}}",
        meta.podcast.name, meta.title, meta.description
    );
    let schema = json!({"type": "object"});
    let response = client
        .chat_json(&prompt, Some(&schema))
        .await
        .map_err(|e| e.to_string())?;

    let mut mapping = HashMap::new();
    if let Some(object) = response.as_object() {
        for (label, value) in object {
            if let Some(name) = value.as_str() {
                if !name.is_empty() && labels.contains(&label.as_str()) {
                    mapping.insert(label.clone(), name.to_string());
                }
            }
        }
    }
    if mapping.is_empty() {
        tracing::info!(episode_id = %meta.episode_id, "model identified none of the generic speakers");
        return Ok(HashMap::new());
    }

    let updated = store
        .update_unit_speakers(&meta.episode_id, &mapping)
        .await
        .map_err(|e| e.to_string())?;
    tracing::info!(
        episode_id = %meta.episode_id,
        mapped = mapping.len(),
        units_updated = updated,
        "speaker post-processing applied"
    );
    Ok(mapping)
}
