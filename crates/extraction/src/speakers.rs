//! Speaker identification
//!
//! Replaces generic diarization labels with best-guess real names. This is
//! the most failure-prone phase in the pipeline and the hardest to salvage
//! afterwards, so partial success is allowed (below-floor mappings keep
//! their generic labels) but silent full failure is not: zero identified
//! speakers after the retry rejects the whole episode.

use crate::prompts::{speaker_prompt, speaker_schema};
use crate::ExtractionError;
use podgraph_core::{EpisodeMetadata, ModelClient, Segment};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

const ATTEMPTS: u32 = 2;
const RETRY_GAP: Duration = Duration::from_secs(2);

pub struct SpeakerIdentifier {
    client: Arc<dyn ModelClient>,
    /// Mappings below this confidence keep their generic labels
    confidence_threshold: f64,
    /// Segments of context handed to the model
    max_context_segments: usize,
    /// Wall-clock budget per attempt
    timeout: Duration,
}

impl SpeakerIdentifier {
    pub fn new(
        client: Arc<dyn ModelClient>,
        confidence_threshold: f64,
        max_context_segments: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            confidence_threshold,
            max_context_segments,
            timeout,
        }
    }

    /// Rewrite speaker labels in place. Returns the number of distinct
    /// speakers after identification.
    pub async fn identify(
        &self,
        segments: &mut [Segment],
        meta: &EpisodeMetadata,
    ) -> Result<usize, ExtractionError> {
        tracing::info!(segments = segments.len(), "starting speaker identification");
        let mut last_error = String::new();

        for attempt in 1..=ATTEMPTS {
            if attempt > 1 {
                tracing::warn!(attempt, error = %last_error, "retrying speaker identification");
                tokio::time::sleep(RETRY_GAP).await;
            }
            match self.attempt(segments, meta).await {
                Ok(mapping) => {
                    for segment in segments.iter_mut() {
                        if let Some(name) = mapping.get(&segment.speaker) {
                            segment.speaker = name.clone();
                        }
                    }
                    let mut speakers: Vec<&str> =
                        segments.iter().map(|s| s.speaker.as_str()).collect();
                    speakers.sort_unstable();
                    speakers.dedup();
                    tracing::info!(
                        mapped = mapping.len(),
                        speakers = ?speakers,
                        "speaker identification successful"
                    );
                    return Ok(speakers.len());
                }
                Err(e) => last_error = e,
            }
        }

        Err(ExtractionError::SpeakerIdentification(format!(
            "failed after {ATTEMPTS} attempts: {last_error}"
        )))
    }

    /// One identification attempt: LLM call, contract parse, confidence
    /// floor. Errors come back as strings so every failure shape feeds the
    /// same retry loop.
    async fn attempt(
        &self,
        segments: &[Segment],
        meta: &EpisodeMetadata,
    ) -> Result<HashMap<String, String>, String> {
        let prompt = speaker_prompt(segments, meta, self.max_context_segments);
        let schema = speaker_schema();

        let response = tokio::time::timeout(self.timeout, self.client.chat_json(&prompt, Some(&schema)))
            .await
            .map_err(|_| format!("timed out after {:?}", self.timeout))?
            .map_err(|e| e.to_string())?;

        let object = response
            .as_object()
            .ok_or_else(|| "mapping is not an object".to_string())?;
        if object.is_empty() {
            return Err("no speakers identified in transcript".to_string());
        }

        let mut mapping = HashMap::new();
        for (label, value) in object {
            let (name, confidence) = match value {
                Value::String(name) => (name.clone(), 1.0),
                Value::Object(fields) => {
                    let name = fields
                        .get("name")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string();
                    let confidence = fields
                        .get("confidence")
                        .and_then(Value::as_f64)
                        .unwrap_or(1.0);
                    (name, confidence)
                }
                _ => continue,
            };
            if name.is_empty() {
                continue;
            }
            if confidence < self.confidence_threshold {
                tracing::debug!(label, %name, confidence, "mapping below confidence floor, keeping generic label");
                continue;
            }
            mapping.insert(label.clone(), name);
        }

        if mapping.is_empty() {
            return Err("all speaker mappings fell below the confidence floor".to_string());
        }
        Ok(mapping)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use podgraph_core::{GenerationOptions, LlmError, LlmResult};
    use serde_json::json;

    struct ScriptedClient {
        responses: Mutex<Vec<LlmResult<Value>>>,
    }

    impl ScriptedClient {
        fn new(responses: Vec<LlmResult<Value>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses),
            })
        }
    }

    #[async_trait]
    impl ModelClient for ScriptedClient {
        async fn chat(&self, _prompt: &str, _opts: GenerationOptions) -> LlmResult<String> {
            Err(LlmError::InvalidResponse("unused".into()))
        }

        async fn chat_json(&self, _prompt: &str, _schema: Option<&Value>) -> LlmResult<Value> {
            let mut responses = self.responses.lock();
            if responses.is_empty() {
                Err(LlmError::Transient("script exhausted".into()))
            } else {
                responses.remove(0)
            }
        }

        async fn embed(&self, _text: &str) -> LlmResult<Vec<f32>> {
            Ok(vec![0.0; 8])
        }
    }

    fn segments() -> Vec<Segment> {
        vec![
            Segment {
                id: "seg_0".into(),
                text: "Welcome".into(),
                start_time: 0.0,
                end_time: 2.0,
                speaker: "SPEAKER_1".into(),
                confidence: 1.0,
            },
            Segment {
                id: "seg_1".into(),
                text: "Thanks".into(),
                start_time: 2.0,
                end_time: 4.0,
                speaker: "SPEAKER_2".into(),
                confidence: 1.0,
            },
        ]
    }

    fn identifier(client: Arc<dyn ModelClient>) -> SpeakerIdentifier {
        SpeakerIdentifier::new(client, 0.5, 50, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_applies_mapping() {
        let client = ScriptedClient::new(vec![Ok(json!({
            "SPEAKER_1": {"name": "Alice Host (host)", "confidence": 0.9},
            "SPEAKER_2": "Bob Guest (guest)",
        }))]);
        let mut segs = segments();
        let count = identifier(client).identify(&mut segs, &EpisodeMetadata::default()).await.unwrap();
        assert_eq!(count, 2);
        assert_eq!(segs[0].speaker, "Alice Host (host)");
        assert_eq!(segs[1].speaker, "Bob Guest (guest)");
    }

    #[tokio::test]
    async fn test_below_floor_keeps_generic_label() {
        let client = ScriptedClient::new(vec![Ok(json!({
            "SPEAKER_1": {"name": "Alice", "confidence": 0.9},
            "SPEAKER_2": {"name": "Maybe Bob", "confidence": 0.2},
        }))]);
        let mut segs = segments();
        identifier(client).identify(&mut segs, &EpisodeMetadata::default()).await.unwrap();
        assert_eq!(segs[0].speaker, "Alice");
        assert_eq!(segs[1].speaker, "SPEAKER_2");
    }

    #[tokio::test]
    async fn test_retries_then_succeeds() {
        let client = ScriptedClient::new(vec![
            Err(LlmError::Transient("503".into())),
            Ok(json!({"SPEAKER_1": "Alice"})),
        ]);
        let mut segs = segments();
        let count = identifier(client).identify(&mut segs, &EpisodeMetadata::default()).await.unwrap();
        assert_eq!(count, 2);
        assert_eq!(segs[0].speaker, "Alice");
    }

    #[tokio::test]
    async fn test_total_failure_rejects_episode() {
        let client = ScriptedClient::new(vec![
            Err(LlmError::Transient("503".into())),
            Err(LlmError::Transient("503".into())),
        ]);
        let mut segs = segments();
        let err = identifier(client).identify(&mut segs, &EpisodeMetadata::default()).await.unwrap_err();
        assert!(matches!(err, ExtractionError::SpeakerIdentification(_)));
        // Labels untouched on failure
        assert_eq!(segs[0].speaker, "SPEAKER_1");
    }

    #[tokio::test]
    async fn test_empty_mapping_is_failure() {
        let client = ScriptedClient::new(vec![Ok(json!({})), Ok(json!({}))]);
        let mut segs = segments();
        let err = identifier(client).identify(&mut segs, &EpisodeMetadata::default()).await.unwrap_err();
        assert!(matches!(err, ExtractionError::SpeakerIdentification(_)));
    }
}
