//! End-to-end pipeline scenarios over the in-memory graph store

use async_trait::async_trait;
use parking_lot::Mutex;
use podgraph_checkpoint::CheckpointStore;
use podgraph_config::{CheckpointSettings, Settings};
use podgraph_core::{
    GenerationOptions, LlmError, LlmResult, MeaningfulUnit, ModelClient, Phase, Segment,
};
use podgraph_graph::MemoryGraph;
use podgraph_pipeline::{ErrorKind, Pipeline, PipelineStatus};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Scripted model: recognizes each pipeline prompt by its marker text.
/// Extraction failures are driven per-unit by a text marker; a quota switch
/// makes every extraction call fail once flipped.
#[derive(Default)]
struct MockModel {
    fail_speakers: bool,
    quota_all_extractions: bool,
    calls: Mutex<Vec<String>>,
}

impl MockModel {
    fn record(&self, kind: &str) {
        self.calls.lock().push(kind.to_string());
    }

    fn count(&self, kind: &str) -> usize {
        self.calls.lock().iter().filter(|c| c.as_str() == kind).count()
    }
}

#[async_trait]
impl ModelClient for MockModel {
    async fn chat(&self, _prompt: &str, _opts: GenerationOptions) -> LlmResult<String> {
        Err(LlmError::InvalidResponse("chat unused in pipeline".into()))
    }

    async fn chat_json(&self, prompt: &str, _schema: Option<&Value>) -> LlmResult<Value> {
        if prompt.contains("Identify the real names") {
            self.record("speakers");
            if self.fail_speakers {
                return Err(LlmError::Transient("speaker model unavailable".into()));
            }
            return Ok(json!({
                "SPEAKER_1": {"name": "Alice Host (host)", "confidence": 0.9},
                "SPEAKER_2": "Bob Guest (guest)",
            }));
        }

        if prompt.contains("Analyze the structure") {
            self.record("structure");
            let count = prompt
                .lines()
                .filter(|line| line.trim_start().starts_with('['))
                .count();
            let mid = count / 2;
            return Ok(json!({
                "units": [
                    {"start_index": 0, "end_index": mid.saturating_sub(1).max(0), "unit_type": "introduction"},
                    {"start_index": mid, "end_index": count - 1, "unit_type": "discussion"},
                ],
                "themes": [{"theme": "productivity", "description": "getting things done"}],
                "boundaries": [{"index": mid, "reason": "topic shift"}],
            }));
        }

        if prompt.contains("Extract knowledge") {
            self.record("extraction");
            if self.quota_all_extractions {
                return Err(LlmError::QuotaExceeded("all keys exhausted".into()));
            }
            if prompt.contains("UNEXTRACTABLE") {
                return Err(LlmError::InvalidResponse("model produced garbage".into()));
            }
            return Ok(json!({
                "entities": [
                    {"value": "OpenAI", "type": "company", "confidence": 0.9,
                     "properties": {"description": "AI lab"}},
                    {"value": "Deep Work", "type": "book", "confidence": 0.85,
                     "properties": {"description": "Cal Newport's book"}},
                ],
                "quotes": [
                    {"text": "attention is the scarcest resource in modern work",
                     "speaker": "Alice Host (host)", "quote_type": "insightful", "confidence": 0.9},
                ],
                "relationships": [
                    {"source": "OpenAI", "target": "Deep Work", "type": "DISCUSSED_WITH",
                     "confidence": 0.8},
                ],
                "insights": [
                    {"content": "Long unbroken focus blocks produce most of the value",
                     "type": "observation", "confidence": 0.85},
                ],
            }));
        }

        if prompt.contains("Analyze the sentiment") {
            self.record("sentiment");
            return Ok(json!({
                "overall_polarity": "positive",
                "overall_score": 0.5,
                "trajectory": "rising",
                "interaction_harmony": 0.8,
                "discovered_sentiments": [
                    {"type": "intellectual_excitement", "confidence": 0.7},
                ],
                "confidence": 0.8,
            }));
        }

        Err(LlmError::InvalidResponse(format!(
            "unrecognized prompt: {}",
            prompt.chars().take(60).collect::<String>()
        )))
    }

    async fn embed(&self, _text: &str) -> LlmResult<Vec<f32>> {
        self.record("embed");
        Ok(vec![0.1, 0.2, 0.3, 0.4])
    }
}

fn write_vtt(dir: &tempfile::TempDir, cue_count: usize, tail_marker: &str) -> PathBuf {
    let mut body = String::from(
        "WEBVTT\n\nNOTE\nPodcast: Deep Questions\nEpisode: On Focus\nAuthor: Cal Newport\n\
         Description: Alice Host interviews Bob Guest about attention.\n\n",
    );
    for i in 0..cue_count {
        let speaker = if i % 2 == 0 { "SPEAKER_1" } else { "SPEAKER_2" };
        let start = i as f64 * 5.0;
        let text = if i >= cue_count / 2 && !tail_marker.is_empty() {
            format!("segment {i} {tail_marker}")
        } else {
            format!("segment {i} about focus and attention")
        };
        body.push_str(&format!(
            "00:{:02}:{:02}.000 --> 00:{:02}:{:02}.000\n<v {speaker}>{text}\n\n",
            (start as u64) / 60,
            (start as u64) % 60,
            (start as u64 + 5) / 60,
            (start as u64 + 5) % 60,
        ));
    }
    let path = dir.path().join("episode.vtt");
    std::fs::write(&path, body).unwrap();
    path
}

fn settings(dir: &tempfile::TempDir) -> Settings {
    let mut settings = Settings::default();
    settings.checkpoint.dir = dir.path().join("checkpoints").to_string_lossy().into_owned();
    settings.pipeline.embedding_failure_dir = dir
        .path()
        .join("logs/embedding_failures")
        .to_string_lossy()
        .into_owned();
    settings.pipeline.max_concurrent_units = 2;
    settings.pipeline.knowledge_extraction_timeout_secs = 10;
    settings
}

fn episode_meta(id: &str, vtt_filename: &str) -> podgraph_core::EpisodeMetadata {
    podgraph_core::EpisodeMetadata {
        episode_id: id.to_string(),
        vtt_filename: vtt_filename.to_string(),
        ..Default::default()
    }
}

#[tokio::test]
async fn nominal_two_speaker_episode_completes() {
    let dir = tempfile::tempdir().unwrap();
    let vtt = write_vtt(&dir, 12, "");
    let graph = Arc::new(MemoryGraph::new());
    let model = Arc::new(MockModel::default());
    let pipeline = Pipeline::new(model.clone(), graph.clone(), settings(&dir));

    let result = pipeline
        .process_vtt_file(&vtt, episode_meta("ep-1", "episode.vtt"))
        .await
        .unwrap();

    assert_eq!(result.status, PipelineStatus::Completed);
    assert_eq!(result.stats.segments_parsed, 12);
    assert!(result.stats.speakers_identified >= 2);
    assert_eq!(result.stats.meaningful_units_created, 2);
    assert!(result.stats.entities_extracted > 0);
    assert!(result.stats.quotes_extracted > 0);

    // Podcast -> Episode -> PART_OF <- MeaningfulUnit chain intact
    assert!(graph.has_node("ep-1"));
    let part_of = graph.edges_of_type("PART_OF");
    assert_eq!(part_of.len(), result.stats.meaningful_units_created);
    assert!(part_of.iter().all(|e| e.target == "ep-1"));
    assert_eq!(graph.edges_of_type("HAS_EPISODE").len(), 1);

    // Units carry identified speakers and sane timings
    for (_, node) in graph.nodes_with_label("MeaningfulUnit") {
        let speaker = node.props["primary_speaker"].as_str().unwrap();
        assert!(speaker.contains("Alice") || speaker.contains("Bob"));
        let start = node.props["start_time"].as_f64().unwrap();
        let end = node.props["end_time"].as_f64().unwrap();
        assert!(start >= 0.0);
        assert!(end > start);
        assert!(node.props.get("embedding").is_some());
    }

    // Every quote and insight hangs off exactly one unit
    for (id, _) in graph.nodes_with_label("Quote") {
        assert_eq!(graph.edges_from(&id).len(), 1);
        assert_eq!(graph.edges_from(&id)[0].rel_type, "QUOTED_IN");
    }
    for (id, _) in graph.nodes_with_label("Insight") {
        let derived: Vec<_> = graph
            .edges_from(&id)
            .into_iter()
            .filter(|e| e.rel_type == "DERIVED_FROM")
            .collect();
        assert_eq!(derived.len(), 1);
    }

    // Entities deduplicated across the two units
    assert_eq!(graph.nodes_with_label("Entity").len(), 2);
    assert_eq!(graph.edges_of_type("HAS_SENTIMENT").len(), 2);

    // Checkpoint removed on success
    let store = CheckpointStore::new(&CheckpointSettings {
        dir: dir.path().join("checkpoints").to_string_lossy().into_owned(),
        compress: true,
        max_age_days: 30,
    });
    assert!(!store.exists("ep-1"));

    // One sentiment call and one extraction call per unit
    assert_eq!(model.count("extraction"), 2);
    assert_eq!(model.count("sentiment"), 2);
}

#[tokio::test]
async fn single_speaker_episode_completes() {
    let dir = tempfile::tempdir().unwrap();
    let mut body = String::from("WEBVTT\n\nNOTE\nEpisode: Solo Monologue\n\n");
    for i in 0..8 {
        body.push_str(&format!(
            "00:00:{:02}.000 --> 00:00:{:02}.000\n<v SPEAKER_1>thought number {i}\n\n",
            i * 5,
            i * 5 + 5,
        ));
    }
    let path = dir.path().join("solo.vtt");
    std::fs::write(&path, body).unwrap();

    let graph = Arc::new(MemoryGraph::new());
    let pipeline = Pipeline::new(Arc::new(MockModel::default()), graph.clone(), settings(&dir));
    let result = pipeline
        .process_vtt_file(&path, episode_meta("ep-solo", "solo.vtt"))
        .await
        .unwrap();

    assert_eq!(result.status, PipelineStatus::Completed);
    assert_eq!(result.stats.speakers_identified, 1);
    for (_, node) in graph.nodes_with_label("MeaningfulUnit") {
        assert_eq!(
            node.props["primary_speaker"].as_str().unwrap(),
            "Alice Host (host)"
        );
    }
}

#[tokio::test]
async fn empty_vtt_fails_without_rollback() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("empty.vtt");
    std::fs::write(&path, "WEBVTT\n\n").unwrap();
    let graph = Arc::new(MemoryGraph::new());
    let pipeline = Pipeline::new(Arc::new(MockModel::default()), graph.clone(), settings(&dir));

    let err = pipeline
        .process_vtt_file(&path, episode_meta("ep-empty", "empty.vtt"))
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::VttProcessing);
    assert_eq!(graph.node_count(), 0);
}

#[tokio::test]
async fn speaker_failure_rejects_episode_with_no_data() {
    let dir = tempfile::tempdir().unwrap();
    let vtt = write_vtt(&dir, 8, "");
    let graph = Arc::new(MemoryGraph::new());
    let model = Arc::new(MockModel {
        fail_speakers: true,
        ..Default::default()
    });
    let pipeline = Pipeline::new(model.clone(), graph.clone(), settings(&dir));

    let err = pipeline
        .process_vtt_file(&vtt, episode_meta("ep-sf", "episode.vtt"))
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::SpeakerIdentification);
    assert_eq!(err.phase, Some(Phase::SpeakerIdentification));
    // Two attempts were made before giving up
    assert_eq!(model.count("speakers"), 2);
    // Zero nodes for this episode
    assert_eq!(graph.nodes_for_episode("ep-sf"), 0);
}

#[tokio::test]
async fn quota_exhaustion_mid_extraction_rolls_back() {
    let dir = tempfile::tempdir().unwrap();
    let vtt = write_vtt(&dir, 10, "");
    let graph = Arc::new(MemoryGraph::new());
    let model = Arc::new(MockModel {
        quota_all_extractions: true,
        ..Default::default()
    });
    let pipeline = Pipeline::new(model, graph.clone(), settings(&dir));

    let err = pipeline
        .process_vtt_file(&vtt, episode_meta("ep-quota", "episode.vtt"))
        .await
        .unwrap_err();

    // 100% unit failure breaches the threshold and rejects the episode
    assert_eq!(err.kind, ErrorKind::Extraction);
    // The skeleton written in Stage A was rolled back
    assert_eq!(graph.nodes_for_episode("ep-quota"), 0);
    assert!(!graph.has_node("ep-quota"));
}

#[tokio::test]
async fn minority_extraction_failures_complete_with_warning() {
    let dir = tempfile::tempdir().unwrap();
    // The marker lands in the second unit's text only: 1 of 2 units fails,
    // at the 50% threshold but not above it.
    let vtt = write_vtt(&dir, 10, "UNEXTRACTABLE");
    let graph = Arc::new(MemoryGraph::new());
    let pipeline = Pipeline::new(Arc::new(MockModel::default()), graph.clone(), settings(&dir));

    let result = pipeline
        .process_vtt_file(&vtt, episode_meta("ep-partial", "episode.vtt"))
        .await
        .unwrap();

    assert_eq!(result.status, PipelineStatus::Completed);
    assert_eq!(result.stats.meaningful_units_created, 2);
    // Only the surviving unit contributed knowledge
    assert_eq!(result.stats.quotes_extracted, 1);
    assert!(graph.has_node("ep-partial"));
}

#[tokio::test]
async fn duplicate_vtt_filename_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let vtt = write_vtt(&dir, 8, "");
    let graph = Arc::new(MemoryGraph::new());
    let pipeline = Pipeline::new(Arc::new(MockModel::default()), graph.clone(), settings(&dir));

    pipeline
        .process_vtt_file(&vtt, episode_meta("ep-first", "episode.vtt"))
        .await
        .unwrap();
    let nodes_before = graph.node_count();
    let edges_before = graph.edge_count();

    let second = pipeline
        .process_vtt_file(&vtt, episode_meta("ep-second", "episode.vtt"))
        .await
        .unwrap();

    assert_eq!(second.status, PipelineStatus::Skipped);
    assert_eq!(second.reason.as_deref(), Some("VTT filename already processed"));
    assert_eq!(second.existing_episode.as_deref(), Some("On Focus"));
    assert_eq!(second.episode_id, "ep-first");
    // Graph unchanged
    assert_eq!(graph.node_count(), nodes_before);
    assert_eq!(graph.edge_count(), edges_before);
}

#[tokio::test]
async fn resume_skips_completed_phases() {
    let dir = tempfile::tempdir().unwrap();
    let settings = settings(&dir);
    let checkpoints = CheckpointStore::new(&settings.checkpoint);

    // Pre-identified segments and built units, as a crashed run would have
    // checkpointed them after MEANINGFUL_UNIT_CREATION.
    let segments: Vec<Segment> = (0..6)
        .map(|i| Segment {
            id: format!("seg_{i}"),
            text: format!("segment {i} about focus"),
            start_time: i as f64 * 5.0,
            end_time: (i + 1) as f64 * 5.0,
            speaker: if i % 2 == 0 { "Alice Host (host)".into() } else { "Bob Guest (guest)".into() },
            confidence: 1.0,
        })
        .collect();
    let units: Vec<MeaningfulUnit> = (0..2)
        .map(|u| MeaningfulUnit {
            id: podgraph_core::meaningful_unit_id("ep-resume", u),
            text: format!("unit {u} text about focus"),
            start_time: u as f64 * 15.0,
            end_time: (u + 1) as f64 * 15.0,
            primary_speaker: "Alice Host (host)".into(),
            speaker_distribution: HashMap::from([("Alice Host (host)".to_string(), 1.0)]),
            unit_type: "discussion".into(),
            themes: vec!["productivity".into()],
            segment_refs: vec![format!("seg_{}", u * 3)],
            embedding: Some(vec![0.1, 0.2]),
        })
        .collect();

    let mut payloads: BTreeMap<String, Value> = BTreeMap::new();
    payloads.insert(
        Phase::VttParsing.as_str().into(),
        json!({"segments": segments, "metadata": {}}),
    );
    payloads.insert(
        Phase::SpeakerIdentification.as_str().into(),
        json!({"segments": segments}),
    );
    payloads.insert(Phase::ConversationAnalysis.as_str().into(), json!({"completed": true}));
    payloads.insert(
        Phase::MeaningfulUnitCreation.as_str().into(),
        json!({"units": units}),
    );
    checkpoints
        .save("ep-resume", Phase::MeaningfulUnitCreation, payloads, json!({}))
        .unwrap();

    // Speaker identification would fail if it ran; the checkpoint must
    // carry the pipeline past it.
    let graph = Arc::new(MemoryGraph::new());
    let model = Arc::new(MockModel {
        fail_speakers: true,
        ..Default::default()
    });
    let pipeline = Pipeline::new(model.clone(), graph.clone(), settings);

    let missing_vtt = dir.path().join("never-read.vtt");
    let result = pipeline
        .process_vtt_file(&missing_vtt, episode_meta("ep-resume", ""))
        .await
        .unwrap();

    assert_eq!(result.status, PipelineStatus::Completed);
    assert_eq!(model.count("speakers"), 0);
    // Storage onward executed against the checkpointed units
    assert_eq!(result.stats.meaningful_units_created, 2);
    assert!(graph.has_node("ep-resume"));
    assert_eq!(graph.edges_of_type("PART_OF").len(), 2);
    // Theme names recovered from the units, no fresh analysis call
    assert_eq!(model.count("structure"), 0);
    assert_eq!(graph.edges_of_type("COVERS_TOPIC").len(), 1);
    // Checkpoint removed after the resumed run completed
    assert!(!checkpoints.exists("ep-resume"));
}
