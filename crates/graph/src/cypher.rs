//! Cypher store over the Neo4j HTTP transactional endpoint
//!
//! Each `GraphStore` write posts a single transaction (`/tx/commit`) whose
//! statements batch rows through `UNWIND` in chunks. Transient failures
//! (deadlock, unavailable, timeout) retry with exponential backoff; rows
//! that exhaust their retries land in a per-episode failure queue for
//! best-effort replay on the same episode.

use crate::rows::KnowledgeBatch;
use crate::store::{podcast_node_id, EpisodeRef, GraphStore, WriteCounts};
use crate::GraphError;
use async_trait::async_trait;
use parking_lot::Mutex;
use podgraph_config::GraphSettings;
use podgraph_core::{EpisodeMetadata, MeaningfulUnit};
use rand::Rng;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone)]
struct Statement {
    text: String,
    parameters: Value,
}

impl Statement {
    fn new(text: impl Into<String>, parameters: Value) -> Self {
        Self {
            text: text.into(),
            parameters,
        }
    }
}

/// A write transaction that failed all retries, kept for replay against the
/// same episode. Episode rollback supersedes replay and clears the queue.
#[derive(Debug)]
struct QueuedFailure {
    episode_id: String,
    statements: Vec<Statement>,
}

pub struct CypherGraphStore {
    client: reqwest::Client,
    settings: GraphSettings,
    failure_queue: Mutex<Vec<QueuedFailure>>,
}

impl CypherGraphStore {
    pub fn new(settings: GraphSettings) -> Result<Self, GraphError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| GraphError::Permanent(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            settings,
            failure_queue: Mutex::new(Vec::new()),
        })
    }

    fn tx_url(&self) -> String {
        format!(
            "{}/db/{}/tx/commit",
            self.settings.endpoint.trim_end_matches('/'),
            self.settings.database
        )
    }

    /// POST one transaction. All statements commit together or not at all.
    async fn commit_once(&self, statements: &[Statement]) -> Result<Value, GraphError> {
        let payload = json!({
            "statements": statements
                .iter()
                .map(|s| json!({
                    "statement": s.text,
                    "parameters": s.parameters,
                    "includeStats": true,
                }))
                .collect::<Vec<_>>(),
        });

        let mut request = self.client.post(self.tx_url()).json(&payload);
        if !self.settings.username.is_empty() {
            request = request.basic_auth(&self.settings.username, Some(&self.settings.password));
        }

        let response = request
            .send()
            .await
            .map_err(|e| GraphError::Transient(e.to_string()))?;
        let status = response.status();
        if status.is_server_error() {
            return Err(GraphError::Transient(format!("server error {status}")));
        }
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(GraphError::Permanent(format!("http {status}: {detail}")));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| GraphError::Permanent(format!("unreadable response: {e}")))?;

        if let Some(errors) = body.get("errors").and_then(Value::as_array) {
            if let Some(first) = errors.first() {
                let code = first.get("code").and_then(Value::as_str).unwrap_or_default();
                let message = first
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                return Err(classify(code, message));
            }
        }
        Ok(body)
    }

    /// Commit with the transient-retry policy.
    async fn commit(&self, statements: &[Statement]) -> Result<Value, GraphError> {
        let mut backoff = Duration::from_millis(200);
        let mut last = None;
        for attempt in 0..=self.settings.max_retries {
            if attempt > 0 {
                let jitter = rand::thread_rng().gen_range(0..=backoff.as_millis() as u64 / 2);
                let delay = backoff + Duration::from_millis(jitter);
                tracing::warn!(attempt, delay_ms = delay.as_millis() as u64, "retrying graph write");
                tokio::time::sleep(delay).await;
                backoff *= 2;
            }
            match self.commit_once(statements).await {
                Ok(body) => return Ok(body),
                Err(e) if e.is_transient() => last = Some(e),
                Err(e) => return Err(e),
            }
        }
        Err(last.unwrap_or_else(|| GraphError::Transient("retries exhausted".into())))
    }

    /// Commit; on exhausted retries queue the statements for same-episode
    /// replay before propagating the error.
    async fn commit_or_queue(
        &self,
        episode_id: &str,
        statements: Vec<Statement>,
    ) -> Result<Value, GraphError> {
        match self.commit(&statements).await {
            Ok(body) => Ok(body),
            Err(e) => {
                if e.is_transient() {
                    tracing::warn!(episode_id, "queueing failed write for replay");
                    self.failure_queue.lock().push(QueuedFailure {
                        episode_id: episode_id.to_string(),
                        statements,
                    });
                }
                Err(e)
            }
        }
    }

    /// Best-effort replay of queued failures for one episode. Returns the
    /// number of transactions that went through.
    pub async fn replay_failures(&self, episode_id: &str) -> usize {
        let queued: Vec<QueuedFailure> = {
            let mut queue = self.failure_queue.lock();
            let (matching, rest): (Vec<_>, Vec<_>) =
                queue.drain(..).partition(|f| f.episode_id == episode_id);
            *queue = rest;
            matching
        };

        let mut replayed = 0;
        for failure in queued {
            match self.commit(&failure.statements).await {
                Ok(_) => replayed += 1,
                Err(e) => tracing::warn!(episode_id, error = %e, "replay failed, dropping rows"),
            }
        }
        replayed
    }

    /// Drop queued failures for an episode; rollback supersedes replay.
    pub fn clear_failures(&self, episode_id: &str) {
        self.failure_queue
            .lock()
            .retain(|f| f.episode_id != episode_id);
    }

    fn sum_counters(body: &Value) -> WriteCounts {
        let mut counts = WriteCounts::default();
        if let Some(results) = body.get("results").and_then(Value::as_array) {
            for result in results {
                if let Some(stats) = result.get("stats") {
                    counts.nodes_created +=
                        stats.get("nodes_created").and_then(Value::as_u64).unwrap_or(0);
                    counts.relationships_created += stats
                        .get("relationships_created")
                        .and_then(Value::as_u64)
                        .unwrap_or(0);
                }
            }
        }
        counts
    }

    fn first_row(body: &Value) -> Option<&Vec<Value>> {
        body.pointer("/results/0/data/0/row")?.as_array()
    }
}

fn classify(code: &str, message: &str) -> GraphError {
    let transient = code.contains("TransientError")
        || code.contains("DeadlockDetected")
        || code.contains("ServiceUnavailable")
        || message.to_lowercase().contains("timeout");
    if transient {
        GraphError::Transient(format!("{code}: {message}"))
    } else {
        GraphError::Permanent(format!("{code}: {message}"))
    }
}

/// Relationship types come from an open vocabulary; make them safe to
/// splice into Cypher as backticked identifiers.
fn sanitize_rel_type(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect();
    let cleaned = cleaned.trim_matches('_').to_string();
    if cleaned.is_empty() || cleaned.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(true) {
        format!("REL_{cleaned}")
    } else {
        cleaned
    }
}

fn unit_row(unit: &MeaningfulUnit, meta: &EpisodeMetadata, podcast_id: &str) -> Value {
    json!({
        "id": unit.id,
        "text": unit.text,
        "start_time": unit.start_time,
        "end_time": unit.end_time,
        "primary_speaker": unit.primary_speaker,
        "speaker_distribution": serde_json::to_string(&unit.speaker_distribution).unwrap_or_default(),
        "unit_type": unit.unit_type,
        "themes": unit.themes,
        "segment_refs": unit.segment_refs,
        "embedding": unit.embedding,
        "episode_id": meta.episode_id,
        "podcast_id": podcast_id,
    })
}

#[async_trait]
impl GraphStore for CypherGraphStore {
    async fn find_episode_by_vtt(
        &self,
        vtt_filename: &str,
    ) -> Result<Option<EpisodeRef>, GraphError> {
        if vtt_filename.is_empty() {
            return Ok(None);
        }
        let body = self
            .commit(&[Statement::new(
                "MATCH (e:Episode {vtt_filename: $vtt_filename}) \
                 RETURN e.id AS id, e.title AS title LIMIT 1",
                json!({"vtt_filename": vtt_filename}),
            )])
            .await?;
        Ok(Self::first_row(&body).map(|row| EpisodeRef {
            id: row.first().and_then(Value::as_str).unwrap_or_default().to_string(),
            title: row.get(1).and_then(Value::as_str).unwrap_or_default().to_string(),
        }))
    }

    async fn write_episode_skeleton(
        &self,
        meta: &EpisodeMetadata,
        themes: &[String],
        units: &[MeaningfulUnit],
    ) -> Result<WriteCounts, GraphError> {
        let podcast_id = podcast_node_id(meta);
        let mut statements = vec![
            Statement::new(
                "MERGE (p:Podcast {id: $id}) \
                 SET p.name = $name, p.host = $host, p.podcast_id = $id",
                json!({"id": podcast_id, "name": meta.podcast.name, "host": meta.podcast.host}),
            ),
            Statement::new(
                "MATCH (p:Podcast {id: $podcast_id}) \
                 CREATE (e:Episode {id: $id, title: $title, description: $description, \
                 published_date: $published_date, youtube_url: $youtube_url, \
                 vtt_filename: $vtt_filename, podcast_id: $podcast_id}) \
                 CREATE (p)-[:HAS_EPISODE]->(e)",
                json!({
                    "id": meta.episode_id,
                    "title": meta.title,
                    "description": meta.description,
                    "published_date": meta.published_date,
                    "youtube_url": meta.youtube_url,
                    "vtt_filename": meta.vtt_filename,
                    "podcast_id": podcast_id,
                }),
            ),
        ];

        if !themes.is_empty() {
            statements.push(Statement::new(
                "UNWIND $themes AS theme \
                 MATCH (e:Episode {id: $episode_id}) \
                 MERGE (t:Topic {name: theme, podcast_id: $podcast_id}) \
                 CREATE (e)-[:COVERS_TOPIC]->(t)",
                json!({"themes": themes, "episode_id": meta.episode_id, "podcast_id": podcast_id}),
            ));
        }

        for chunk in units.chunks(self.settings.batch_size) {
            let rows: Vec<Value> = chunk.iter().map(|u| unit_row(u, meta, &podcast_id)).collect();
            statements.push(Statement::new(
                "UNWIND $rows AS row \
                 MATCH (e:Episode {id: $episode_id}) \
                 CREATE (m:MeaningfulUnit) SET m = row \
                 CREATE (m)-[:PART_OF]->(e)",
                json!({"rows": rows, "episode_id": meta.episode_id}),
            ));
        }

        let body = self.commit_or_queue(&meta.episode_id, statements).await?;
        Ok(Self::sum_counters(&body))
    }

    async fn write_knowledge(
        &self,
        meta: &EpisodeMetadata,
        batch: &KnowledgeBatch,
    ) -> Result<WriteCounts, GraphError> {
        let podcast_id = podcast_node_id(meta);
        let mut statements = Vec::new();

        for chunk in batch.entities.chunks(self.settings.batch_size) {
            let rows: Vec<Value> = chunk
                .iter()
                .map(|row| {
                    json!({
                        "id": row.id,
                        "value": row.value,
                        "type": row.entity_type,
                        "confidence": row.confidence,
                        "description": row.description,
                        "unit_ids": row.unit_ids,
                        "episode_id": meta.episode_id,
                        "podcast_id": podcast_id,
                    })
                })
                .collect();
            statements.push(Statement::new(
                "UNWIND $rows AS row \
                 MERGE (n:Entity {id: row.id}) \
                 SET n.value = row.value, n.type = row.type, n.confidence = row.confidence, \
                 n.description = row.description, n.episode_id = row.episode_id, \
                 n.podcast_id = row.podcast_id \
                 WITH n, row \
                 UNWIND row.unit_ids AS unit_id \
                 MATCH (m:MeaningfulUnit {id: unit_id}) \
                 MERGE (n)-[:MENTIONED_IN]->(m)",
                json!({"rows": rows}),
            ));
        }

        for chunk in batch.quotes.chunks(self.settings.batch_size) {
            let rows: Vec<Value> = chunk.iter().map(|r| json!(r)).collect();
            statements.push(Statement::new(
                "UNWIND $rows AS row \
                 MATCH (m:MeaningfulUnit {id: row.unit_id}) \
                 CREATE (q:Quote {id: row.id, text: row.text, speaker: row.speaker, \
                 quote_type: row.quote_type, importance_score: row.importance_score, \
                 confidence: row.confidence, episode_id: $episode_id, podcast_id: $podcast_id}) \
                 CREATE (q)-[:QUOTED_IN]->(m)",
                json!({"rows": rows, "episode_id": meta.episode_id, "podcast_id": podcast_id}),
            ));
        }

        for chunk in batch.insights.chunks(self.settings.batch_size) {
            let rows: Vec<Value> = chunk.iter().map(|r| json!(r)).collect();
            statements.push(Statement::new(
                "UNWIND $rows AS row \
                 MATCH (m:MeaningfulUnit {id: row.unit_id}) \
                 CREATE (i:Insight {id: row.id, content: row.content, type: row.insight_type, \
                 confidence: row.confidence, complexity: row.complexity, \
                 supporting_entities: row.supporting_entities, \
                 episode_id: $episode_id, podcast_id: $podcast_id}) \
                 CREATE (i)-[:DERIVED_FROM]->(m)",
                json!({"rows": rows, "episode_id": meta.episode_id, "podcast_id": podcast_id}),
            ));
        }

        for chunk in batch.sentiments.chunks(self.settings.batch_size) {
            let rows: Vec<Value> = chunk
                .iter()
                .map(|row| {
                    json!({
                        "id": row.id,
                        "unit_id": row.unit_id,
                        "overall_polarity": row.sentiment.overall_polarity,
                        "overall_score": row.sentiment.overall_score,
                        "trajectory": row.sentiment.trajectory,
                        "interaction_harmony": row.sentiment.interaction_harmony,
                        "confidence": row.sentiment.confidence,
                        "payload": serde_json::to_string(&row.sentiment).unwrap_or_default(),
                    })
                })
                .collect();
            statements.push(Statement::new(
                "UNWIND $rows AS row \
                 MATCH (m:MeaningfulUnit {id: row.unit_id}) \
                 CREATE (s:Sentiment {id: row.id, overall_polarity: row.overall_polarity, \
                 overall_score: row.overall_score, trajectory: row.trajectory, \
                 interaction_harmony: row.interaction_harmony, confidence: row.confidence, \
                 payload: row.payload, episode_id: $episode_id, podcast_id: $podcast_id}) \
                 CREATE (m)-[:HAS_SENTIMENT]->(s)",
                json!({"rows": rows, "episode_id": meta.episode_id, "podcast_id": podcast_id}),
            ));
        }

        // Relationship types cannot be parameterized; group per type and
        // splice the sanitized identifier.
        let mut by_type: HashMap<String, Vec<&crate::rows::RelationshipRow>> = HashMap::new();
        for row in &batch.relationships {
            by_type.entry(sanitize_rel_type(&row.rel_type)).or_default().push(row);
        }
        let mut types: Vec<_> = by_type.into_iter().collect();
        types.sort_by(|a, b| a.0.cmp(&b.0));
        for (rel_type, rows) in types {
            for chunk in rows.chunks(self.settings.batch_size) {
                let row_values: Vec<Value> = chunk
                    .iter()
                    .map(|row| {
                        json!({
                            "source_id": row.source_id,
                            "target_id": row.target_id,
                            "confidence": row.confidence,
                            "bidirectional": row.bidirectional,
                        })
                    })
                    .collect();
                statements.push(Statement::new(
                    format!(
                        "UNWIND $rows AS row \
                         MATCH (a {{id: row.source_id}}) \
                         MATCH (b {{id: row.target_id}}) \
                         CREATE (a)-[r:`{rel_type}`]->(b) \
                         SET r.confidence = row.confidence, r.episode_id = $episode_id \
                         FOREACH (_ IN CASE WHEN row.bidirectional THEN [1] ELSE [] END | \
                         CREATE (b)-[r2:`{rel_type}`]->(a) \
                         SET r2.confidence = row.confidence, r2.episode_id = $episode_id)"
                    ),
                    json!({"rows": row_values, "episode_id": meta.episode_id}),
                ));
            }
        }

        if statements.is_empty() {
            return Ok(WriteCounts::default());
        }
        let body = self.commit_or_queue(&meta.episode_id, statements).await?;
        Ok(Self::sum_counters(&body))
    }

    async fn delete_episode(&self, episode_id: &str) -> Result<u64, GraphError> {
        self.clear_failures(episode_id);
        let body = self
            .commit(&[Statement::new(
                // Unbounded path match on purpose: the knowledge graph can
                // contain cycles and arbitrary-depth chains.
                "MATCH (e:Episode {id: $episode_id}) \
                 OPTIONAL MATCH (e)-[*]-(n) \
                 WHERE NOT n:Podcast \
                 DETACH DELETE n, e \
                 RETURN count(DISTINCT n) + 1 AS deleted",
                json!({"episode_id": episode_id}),
            )])
            .await?;
        Ok(Self::first_row(&body)
            .and_then(|row| row.first())
            .and_then(Value::as_u64)
            .unwrap_or(0))
    }

    async fn units_with_generic_speakers(
        &self,
        episode_id: &str,
    ) -> Result<Vec<(String, String)>, GraphError> {
        let body = self
            .commit(&[Statement::new(
                "MATCH (m:MeaningfulUnit)-[:PART_OF]->(e:Episode {id: $episode_id}) \
                 WHERE m.primary_speaker =~ '(?i)speaker[_ -]?[0-9]+' \
                 RETURN m.id AS id, m.primary_speaker AS speaker",
                json!({"episode_id": episode_id}),
            )])
            .await?;

        let mut out = Vec::new();
        if let Some(data) = body.pointer("/results/0/data").and_then(Value::as_array) {
            for entry in data {
                if let Some(row) = entry.get("row").and_then(Value::as_array) {
                    let id = row.first().and_then(Value::as_str).unwrap_or_default();
                    let speaker = row.get(1).and_then(Value::as_str).unwrap_or_default();
                    if !id.is_empty() {
                        out.push((id.to_string(), speaker.to_string()));
                    }
                }
            }
        }
        Ok(out)
    }

    async fn update_unit_speakers(
        &self,
        episode_id: &str,
        mapping: &HashMap<String, String>,
    ) -> Result<u64, GraphError> {
        let pairs: Vec<Value> = mapping
            .iter()
            .map(|(from, to)| json!({"from": from, "to": to}))
            .collect();
        let body = self
            .commit(&[Statement::new(
                "UNWIND $pairs AS pair \
                 MATCH (m:MeaningfulUnit)-[:PART_OF]->(e:Episode {id: $episode_id}) \
                 WHERE m.primary_speaker = pair.from \
                 SET m.primary_speaker = pair.to \
                 RETURN count(m) AS updated",
                json!({"pairs": pairs, "episode_id": episode_id}),
            )])
            .await?;
        Ok(Self::first_row(&body)
            .and_then(|row| row.first())
            .and_then(Value::as_u64)
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_rel_type() {
        assert_eq!(sanitize_rel_type("works at"), "WORKS_AT");
        assert_eq!(sanitize_rel_type("CREATED"), "CREATED");
        assert_eq!(sanitize_rel_type("co-founded!"), "CO_FOUNDED");
        assert_eq!(sanitize_rel_type("3rd party"), "REL_3RD_PARTY");
        assert_eq!(sanitize_rel_type(""), "REL_");
    }

    #[test]
    fn test_classify_errors() {
        assert!(classify("Neo.TransientError.Transaction.DeadlockDetected", "").is_transient());
        assert!(classify("Neo.ClientError.Statement.SyntaxError", "").is_transient() == false);
        assert!(classify("Neo.ClientError", "lock acquisition timeout").is_transient());
    }

    #[test]
    fn test_counter_summing() {
        let body = json!({
            "results": [
                {"stats": {"nodes_created": 3, "relationships_created": 2}},
                {"stats": {"nodes_created": 1, "relationships_created": 5}},
            ],
            "errors": [],
        });
        let counts = CypherGraphStore::sum_counters(&body);
        assert_eq!(counts.nodes_created, 4);
        assert_eq!(counts.relationships_created, 7);
    }
}
