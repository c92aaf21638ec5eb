//! The per-episode phase state machine

use crate::error::{
    classify_extraction, classify_graph, classify_vtt, ErrorKind, PipelineError,
};
use crate::result::{ErrorRecord, PipelineResult, PipelineStatus};
use crate::{analysis, postprocess};
use chrono::Utc;
use podgraph_checkpoint::{Checkpoint, CheckpointStore};
use podgraph_config::Settings;
use podgraph_core::{
    ConversationStructure, Entity, EpisodeMetadata, Insight, MeaningfulUnit, ModelClient, Phase,
    Quote, Relationship, Segment, UnitSentiment, VttMetadata,
};
use podgraph_extraction::pool::UnitFailure;
use podgraph_extraction::{
    attach_embeddings, build_units, resolve_entities, ConversationAnalyzer, EmbeddingFailure,
    ExtractionPool, SpeakerIdentifier,
};
use podgraph_graph::{prepare_knowledge, GraphStore, GraphWriter};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Everything the knowledge-storage and analysis phases need, in the shape
/// persisted to the KNOWLEDGE_EXTRACTION checkpoint payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct KnowledgePayload {
    entities: Vec<Entity>,
    id_map: std::collections::HashMap<String, String>,
    quotes: Vec<Quote>,
    insights: Vec<Insight>,
    sentiments: Vec<UnitSentiment>,
    relationships: Vec<Relationship>,
    failures: Vec<UnitFailure>,
}

struct PhaseRun {
    phase: Phase,
    started: Instant,
}

/// The unified per-episode pipeline: the single entry point for turning a
/// VTT transcript into graph-store knowledge.
pub struct Pipeline {
    client: Arc<dyn ModelClient>,
    store: Arc<dyn GraphStore>,
    writer: GraphWriter,
    checkpoints: CheckpointStore,
    settings: Settings,
}

impl Pipeline {
    pub fn new(
        client: Arc<dyn ModelClient>,
        store: Arc<dyn GraphStore>,
        settings: Settings,
    ) -> Self {
        Self {
            client,
            writer: GraphWriter::new(store.clone()),
            store,
            checkpoints: CheckpointStore::new(&settings.checkpoint),
            settings,
        }
    }

    /// Wire the production stack from settings: the quota-managed Gemini
    /// client in front of the Cypher store.
    pub fn from_settings(settings: Settings) -> Result<Self, PipelineError> {
        let client = podgraph_llm::GeminiClient::new(settings.llm.clone())
            .map_err(|e| PipelineError::internal("", e.to_string()))?;
        let store = podgraph_graph::CypherGraphStore::new(settings.graph.clone())
            .map_err(|e| PipelineError::internal("", e.to_string()))?;
        Ok(Self::new(Arc::new(client), Arc::new(store), settings))
    }

    /// Process one episode end to end.
    ///
    /// Returns the result object on completion or skip; fatal errors are
    /// raised after rollback (no partial data survives a failure). The
    /// checkpoint is retained on failure for inspection.
    pub async fn process_vtt_file(
        &self,
        vtt_path: &Path,
        mut meta: EpisodeMetadata,
    ) -> Result<PipelineResult, PipelineError> {
        if meta.episode_id.is_empty() {
            return Err(PipelineError::internal("", "episode_id is required in metadata"));
        }
        let episode_id = meta.episode_id.clone();
        tracing::info!(episode_id, vtt = %vtt_path.display(), "processing episode");

        // Idempotency: an episode stored from the same VTT file short-
        // circuits before any work.
        if !meta.vtt_filename.is_empty() {
            match self.writer.check_already_processed(&meta.vtt_filename).await {
                Ok(Some(existing)) => {
                    tracing::info!(
                        vtt_filename = %meta.vtt_filename,
                        existing = %existing.title,
                        "episode already processed, skipping"
                    );
                    return Ok(PipelineResult::skipped(
                        &existing.id,
                        "VTT filename already processed",
                        Some(existing.title),
                    ));
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "idempotency check failed, continuing");
                }
            }
        }

        let checkpoint = self.load_checkpoint(&episode_id);

        let mut result = PipelineResult::started(&episode_id);
        let started = Instant::now();
        let mut embedding_failures: Vec<EmbeddingFailure> = Vec::new();

        let outcome = self
            .run(vtt_path, &mut meta, checkpoint, &mut result, &mut embedding_failures)
            .await;

        result.end_time = Some(Utc::now());
        result.total_time_secs = started.elapsed().as_secs_f64();
        self.flush_embedding_failures(&episode_id, &meta, &embedding_failures);

        match outcome {
            Ok(()) => {
                result.status = PipelineStatus::Completed;
                if !self.settings.pipeline.disable_checkpoints {
                    if let Err(e) = self.checkpoints.delete(&episode_id) {
                        tracing::warn!(error = %e, "failed to delete checkpoint after completion");
                    }
                }
                tracing::info!(
                    episode_id,
                    phases = result.phases_completed.len(),
                    total_secs = format!("{:.2}", result.total_time_secs),
                    "episode completed"
                );
                Ok(result)
            }
            Err(error) => {
                result.status = PipelineStatus::Failed;
                result.errors.push(ErrorRecord {
                    phase: error.phase.map(|p| p.as_str().to_string()),
                    error_type: error.kind.as_str().to_string(),
                    message: error.message.clone(),
                });
                tracing::error!(
                    episode_id,
                    phase = ?error.phase,
                    kind = error.kind.as_str(),
                    message = %error.message,
                    "episode rejected"
                );
                if error.kind.needs_rollback() {
                    // A rollback failure logs its own CRITICAL marker; the
                    // original error is what the caller needs to see.
                    let _ = self.writer.rollback(&episode_id).await;
                }
                Err(error)
            }
        }
    }

    async fn run(
        &self,
        vtt_path: &Path,
        meta: &mut EpisodeMetadata,
        checkpoint: Option<Checkpoint>,
        result: &mut PipelineResult,
        embedding_failures: &mut Vec<EmbeddingFailure>,
    ) -> Result<(), PipelineError> {
        let episode_id = meta.episode_id.clone();
        let mut payloads: BTreeMap<String, Value> = checkpoint
            .as_ref()
            .map(|c| c.payloads.clone())
            .unwrap_or_default();
        let skips = |phase: Phase| checkpoint.as_ref().map(|c| c.skips(phase)).unwrap_or(false);

        // PHASE 1: VTT parsing
        let mut segments: Vec<Segment>;
        {
            let phase = Phase::VttParsing;
            if skips(phase) {
                tracing::info!(%phase, "skipping, already completed");
                segments = payload_field(&payloads, phase, "segments").ok_or_else(|| {
                    PipelineError::internal(&episode_id, "checkpoint missing parsed segments")
                })?;
                let vtt_meta: VttMetadata =
                    payload_field(&payloads, phase, "metadata").unwrap_or_default();
                meta.merge_vtt_metadata(&vtt_meta);
            } else {
                let run = self.begin(phase);
                let doc = podgraph_vtt::parse_file(vtt_path).map_err(|e| {
                    PipelineError::new(&episode_id, Some(phase), classify_vtt(&e), e.to_string())
                })?;
                let vtt_meta = doc.metadata.clone();
                segments = doc.into_segments();
                meta.merge_vtt_metadata(&vtt_meta);
                payloads.insert(
                    phase.as_str().to_string(),
                    json!({"segments": segments, "metadata": vtt_meta}),
                );
                self.finish(run, result);
                self.save_checkpoint(&episode_id, phase, &payloads, meta);
            }
            result.stats.segments_parsed = segments.len();
            result.phases_completed.push(phase.as_str().to_string());
        }

        // PHASE 2: speaker identification
        {
            let phase = Phase::SpeakerIdentification;
            if skips(phase) {
                tracing::info!(%phase, "skipping, already completed");
                if let Some(saved) = payload_field::<Vec<Segment>>(&payloads, phase, "segments") {
                    segments = saved;
                }
            } else {
                let run = self.begin(phase);
                let identifier = SpeakerIdentifier::new(
                    self.client.clone(),
                    self.settings.pipeline.speaker_confidence_threshold,
                    self.settings.pipeline.max_segments_for_context,
                    Duration::from_secs(self.settings.pipeline.speaker_identification_timeout_secs),
                );
                identifier.identify(&mut segments, meta).await.map_err(|e| {
                    PipelineError::new(&episode_id, Some(phase), classify_extraction(&e), e.to_string())
                })?;
                payloads.insert(phase.as_str().to_string(), json!({"segments": segments}));
                self.finish(run, result);
                self.save_checkpoint(&episode_id, phase, &payloads, meta);
            }
            let mut speakers: Vec<&str> = segments.iter().map(|s| s.speaker.as_str()).collect();
            speakers.sort_unstable();
            speakers.dedup();
            result.stats.speakers_identified = speakers.len();
            result.phases_completed.push(phase.as_str().to_string());
        }

        // PHASE 3: conversation analysis. The structure does not serialize
        // into the checkpoint; a completed marker is stored and the
        // structure regenerated later if a downstream phase still needs it.
        let mut structure: Option<ConversationStructure> = None;
        {
            let phase = Phase::ConversationAnalysis;
            if skips(phase) {
                tracing::info!(%phase, "skipping, already completed (structure regenerated on demand)");
            } else {
                let run = self.begin(phase);
                let analyzed = ConversationAnalyzer::new(self.client.clone())
                    .analyze(&segments)
                    .await
                    .map_err(|e| {
                        PipelineError::new(&episode_id, Some(phase), classify_extraction(&e), e.to_string())
                    })?;
                structure = Some(analyzed);
                payloads.insert(phase.as_str().to_string(), json!({"completed": true}));
                self.finish(run, result);
                self.save_checkpoint(&episode_id, phase, &payloads, meta);
            }
            result.phases_completed.push(phase.as_str().to_string());
        }

        // PHASE 4: meaningful unit creation
        let mut units: Vec<MeaningfulUnit>;
        {
            let phase = Phase::MeaningfulUnitCreation;
            if skips(phase) {
                tracing::info!(%phase, "skipping, already completed");
                units = payload_field(&payloads, phase, "units").ok_or_else(|| {
                    PipelineError::internal(&episode_id, "checkpoint missing meaningful units")
                })?;
            } else {
                let run = self.begin(phase);
                if structure.is_none() {
                    tracing::info!("regenerating conversation structure for unit creation");
                    let analyzed = ConversationAnalyzer::new(self.client.clone())
                        .analyze(&segments)
                        .await
                        .map_err(|e| {
                            PipelineError::new(
                                &episode_id,
                                Some(Phase::ConversationAnalysis),
                                classify_extraction(&e),
                                e.to_string(),
                            )
                        })?;
                    structure = Some(analyzed);
                }
                let structure_ref = structure.as_ref().ok_or_else(|| {
                    PipelineError::internal(&episode_id, "conversation structure unavailable")
                })?;
                units = build_units(&segments, structure_ref, &episode_id);
                if units.is_empty() {
                    return Err(PipelineError::new(
                        &episode_id,
                        Some(phase),
                        ErrorKind::Internal,
                        "no meaningful units created from segments".into(),
                    ));
                }
                let failures = attach_embeddings(self.client.as_ref(), &mut units).await;
                embedding_failures.extend(failures);
                payloads.insert(phase.as_str().to_string(), json!({"units": units}));
                self.finish(run, result);
                self.save_checkpoint(&episode_id, phase, &payloads, meta);
            }
            result.stats.meaningful_units_created = units.len();
            result.phases_completed.push(phase.as_str().to_string());
        }

        // PHASE 5: episode skeleton storage (Stage A)
        {
            let phase = Phase::EpisodeStorage;
            if skips(phase) {
                tracing::info!(%phase, "skipping, already completed");
            } else {
                let run = self.begin(phase);
                // On a resume past conversation analysis the theme names
                // are recovered from the units instead of a fresh LLM call.
                let themes: Vec<String> = match &structure {
                    Some(s) => s.themes.iter().map(|t| t.theme.clone()).collect(),
                    None => units.first().map(|u| u.themes.clone()).unwrap_or_default(),
                };
                let counts = self
                    .writer
                    .write_skeleton(meta, &themes, &units)
                    .await
                    .map_err(|e| {
                        PipelineError::new(&episode_id, Some(phase), classify_graph(&e), e.to_string())
                    })?;
                result.stats.nodes_created += counts.nodes_created;
                result.stats.relationships_created += counts.relationships_created;
                payloads.insert(phase.as_str().to_string(), json!({"stored": true}));
                self.finish(run, result);
                self.save_checkpoint(&episode_id, phase, &payloads, meta);
            }
            result.phases_completed.push(phase.as_str().to_string());
        }

        // PHASE 6: knowledge extraction
        let knowledge: KnowledgePayload;
        {
            let phase = Phase::KnowledgeExtraction;
            if skips(phase) {
                tracing::info!(%phase, "skipping, already completed");
                knowledge = payloads
                    .get(phase.as_str())
                    .cloned()
                    .and_then(|v| serde_json::from_value(v).ok())
                    .ok_or_else(|| {
                        PipelineError::internal(&episode_id, "checkpoint missing extraction results")
                    })?;
            } else {
                let run = self.begin(phase);
                let pool = ExtractionPool::new(self.client.clone(), self.settings.pipeline.clone());
                let batch = pool.run(&units, meta).await.map_err(|e| {
                    PipelineError::new(&episode_id, Some(phase), classify_extraction(&e), e.to_string())
                })?;
                let resolved = resolve_entities(batch.all_entities());
                knowledge = KnowledgePayload {
                    entities: resolved.entities,
                    id_map: resolved.id_map,
                    quotes: batch.all_quotes(),
                    insights: batch.all_insights(),
                    sentiments: batch.all_sentiments(),
                    relationships: batch.all_relationships(),
                    failures: batch.failures.clone(),
                };
                payloads.insert(
                    phase.as_str().to_string(),
                    serde_json::to_value(&knowledge).unwrap_or_else(|_| json!({"completed": true})),
                );
                self.finish(run, result);
                self.save_checkpoint(&episode_id, phase, &payloads, meta);
            }
            result.stats.entities_extracted = knowledge.entities.len();
            result.stats.quotes_extracted = knowledge.quotes.len();
            result.stats.insights_extracted = knowledge.insights.len();
            result.stats.relationships_extracted = knowledge.relationships.len();
            result.phases_completed.push(phase.as_str().to_string());
        }

        // PHASE 7: knowledge storage (Stage B)
        {
            let phase = Phase::KnowledgeStorage;
            if skips(phase) {
                tracing::info!(%phase, "skipping, already completed");
            } else {
                let run = self.begin(phase);
                let (batch, dropped) = prepare_knowledge(
                    &knowledge.entities,
                    &knowledge.id_map,
                    &knowledge.quotes,
                    &knowledge.insights,
                    &knowledge.sentiments,
                    &knowledge.relationships,
                );
                if dropped > 0 {
                    tracing::warn!(dropped, "relationships dropped for unresolvable endpoints");
                }
                let counts = self.writer.write_knowledge(meta, &batch).await.map_err(|e| {
                    PipelineError::new(&episode_id, Some(phase), classify_graph(&e), e.to_string())
                })?;
                result.stats.nodes_created += counts.nodes_created;
                result.stats.relationships_created += counts.relationships_created;
                payloads.insert(phase.as_str().to_string(), json!({"stored": true}));
                self.finish(run, result);
                self.save_checkpoint(&episode_id, phase, &payloads, meta);
            }
            result.phases_completed.push(phase.as_str().to_string());
        }

        // PHASE 8: analysis
        {
            let phase = Phase::Analysis;
            if skips(phase) {
                tracing::info!(%phase, "skipping, already completed");
                if let Some(saved) = payload_field(&payloads, phase, "results") {
                    result.stats.analysis_results = saved;
                }
            } else {
                let run = self.begin(phase);
                let report = analysis::knowledge_report(&knowledge.entities, &knowledge.relationships);
                result.stats.analysis_results = report.clone();
                payloads.insert(phase.as_str().to_string(), json!({"results": report}));
                self.finish(run, result);
                self.save_checkpoint(&episode_id, phase, &payloads, meta);
            }
            result.phases_completed.push(phase.as_str().to_string());
        }

        // PHASE 9: optional post-processing speaker mapping
        if self.settings.pipeline.enable_speaker_mapping {
            let phase = Phase::PostProcessSpeakers;
            if skips(phase) {
                tracing::info!(%phase, "skipping, already completed");
                if let Some(mappings) =
                    payload_field::<std::collections::HashMap<String, String>>(&payloads, phase, "mappings")
                {
                    result.stats.speakers_mapped = mappings.len();
                }
            } else {
                let run = self.begin(phase);
                match postprocess::map_generic_speakers(
                    self.store.as_ref(),
                    self.client.as_ref(),
                    meta,
                )
                .await
                {
                    Ok(mapping) => {
                        result.stats.speakers_mapped = mapping.len();
                        payloads.insert(phase.as_str().to_string(), json!({"mappings": mapping}));
                        self.save_checkpoint(&episode_id, phase, &payloads, meta);
                    }
                    Err(e) => {
                        // Best effort only; an unidentified speaker is not
                        // worth rejecting a stored episode.
                        tracing::warn!(error = %e, "speaker post-processing failed");
                    }
                }
                self.finish(run, result);
            }
            result.phases_completed.push(phase.as_str().to_string());
        }

        Ok(())
    }

    fn load_checkpoint(&self, episode_id: &str) -> Option<Checkpoint> {
        if self.settings.pipeline.disable_checkpoints {
            tracing::info!("checkpoints disabled, starting fresh");
            return None;
        }
        match self.checkpoints.load(episode_id) {
            Ok(Some(checkpoint)) => {
                let age_hours = (Utc::now() - checkpoint.timestamp).num_minutes() as f64 / 60.0;
                tracing::info!(
                    episode_id,
                    last_phase = %checkpoint.last_phase,
                    age_hours = format!("{age_hours:.2}"),
                    "resuming from checkpoint"
                );
                Some(checkpoint)
            }
            Ok(None) => {
                tracing::info!(episode_id, "no checkpoint, starting fresh");
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to load checkpoint, starting fresh");
                None
            }
        }
    }

    fn save_checkpoint(
        &self,
        episode_id: &str,
        phase: Phase,
        payloads: &BTreeMap<String, Value>,
        meta: &EpisodeMetadata,
    ) {
        if self.settings.pipeline.disable_checkpoints {
            return;
        }
        let metadata = serde_json::to_value(meta).unwrap_or(Value::Null);
        // Checkpointing is an optimization: failures are logged, never raised.
        match self
            .checkpoints
            .save(episode_id, phase, payloads.clone(), metadata)
        {
            Ok(()) => tracing::debug!(%phase, "checkpoint saved"),
            Err(e) => tracing::warn!(%phase, error = %e, "checkpoint save failed, continuing"),
        }
    }

    fn begin(&self, phase: Phase) -> PhaseRun {
        tracing::info!(%phase, "=== phase start ===");
        PhaseRun {
            phase,
            started: Instant::now(),
        }
    }

    fn finish(&self, run: PhaseRun, result: &mut PipelineResult) {
        let elapsed = run.started.elapsed().as_secs_f64();
        tracing::info!(phase = %run.phase, elapsed_secs = format!("{elapsed:.2}"), "=== phase end ===");
        result
            .phase_timings
            .insert(run.phase.as_str().to_string(), elapsed);
    }

    /// Write collected embedding failures to a dated recovery file.
    fn flush_embedding_failures(
        &self,
        episode_id: &str,
        meta: &EpisodeMetadata,
        failures: &[EmbeddingFailure],
    ) {
        if failures.is_empty() {
            return;
        }
        let dir = Path::new(&self.settings.pipeline.embedding_failure_dir);
        if let Err(e) = std::fs::create_dir_all(dir) {
            tracing::error!(error = %e, "cannot create embedding failure log directory");
            return;
        }
        let filename = format!(
            "failures_{}_{}.json",
            Utc::now().format("%Y%m%d_%H%M%S"),
            episode_id
        );
        let body = json!({
            "episode_id": episode_id,
            "episode_metadata": meta,
            "failures": failures,
            "total_failures": failures.len(),
            "written_at": Utc::now(),
        });
        let path = dir.join(filename);
        match serde_json::to_vec_pretty(&body)
            .map_err(std::io::Error::other)
            .and_then(|bytes| std::fs::write(&path, bytes))
        {
            Ok(()) => {
                tracing::info!(count = failures.len(), path = %path.display(), "wrote embedding failures")
            }
            Err(e) => tracing::error!(error = %e, "failed to write embedding failure log"),
        }
    }
}

fn payload_field<T: serde::de::DeserializeOwned>(
    payloads: &BTreeMap<String, Value>,
    phase: Phase,
    field: &str,
) -> Option<T> {
    payloads
        .get(phase.as_str())?
        .get(field)
        .cloned()
        .and_then(|value| serde_json::from_value(value).ok())
}
