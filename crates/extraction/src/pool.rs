//! Bounded-concurrency extraction worker pool
//!
//! A fixed number of workers pull MeaningfulUnits in input order; each unit
//! gets one combined extraction call (or the five-call fallback) plus a
//! sentiment call, a wall-clock budget, and isolated error recording. The
//! batch as a whole carries an aggregate deadline and a cancellation token
//! observed at every model-call boundary. Results aggregate in unit-index
//! order regardless of completion order.

use crate::prompts::{
    category_extraction_prompt, category_schema, combined_extraction_prompt,
    combined_extraction_schema, sentiment_prompt, sentiment_schema,
};
use crate::scoring::{complexity_label, score_quote};
use crate::sentiment::parse_sentiment;
use crate::ExtractionError;
use parking_lot::Mutex;
use podgraph_config::PipelineSettings;
use podgraph_core::{
    Entity, EpisodeMetadata, Insight, LlmError, MeaningfulUnit, ModelClient, Quote, Relationship,
    UnitSentiment,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Sentiment keeps a lower confidence floor than entity extraction.
const SENTIMENT_MIN_CONFIDENCE: f64 = 0.3;

/// Everything extracted from one unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitExtraction {
    pub unit_index: usize,
    pub unit_id: String,
    pub entities: Vec<Entity>,
    pub quotes: Vec<Quote>,
    pub relationships: Vec<Relationship>,
    pub insights: Vec<Insight>,
    pub sentiment: UnitSentiment,
}

/// A unit that failed extraction; absorbed unless the failure rate breaches
/// the episode threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitFailure {
    pub unit_index: usize,
    pub unit_id: String,
    pub error_type: String,
    pub error_message: String,
}

/// Aggregated pool output, ordered by unit index.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionBatch {
    pub results: Vec<UnitExtraction>,
    pub failures: Vec<UnitFailure>,
    pub entity_types: BTreeSet<String>,
    pub relationship_types: BTreeSet<String>,
    pub sentiment_types: BTreeSet<String>,
}

impl ExtractionBatch {
    pub fn all_entities(&self) -> Vec<Entity> {
        self.results.iter().flat_map(|r| r.entities.clone()).collect()
    }

    pub fn all_quotes(&self) -> Vec<Quote> {
        self.results.iter().flat_map(|r| r.quotes.clone()).collect()
    }

    pub fn all_relationships(&self) -> Vec<Relationship> {
        self.results
            .iter()
            .flat_map(|r| r.relationships.clone())
            .collect()
    }

    pub fn all_insights(&self) -> Vec<Insight> {
        self.results.iter().flat_map(|r| r.insights.clone()).collect()
    }

    pub fn all_sentiments(&self) -> Vec<UnitSentiment> {
        self.results.iter().map(|r| r.sentiment.clone()).collect()
    }
}

pub struct ExtractionPool {
    client: Arc<dyn ModelClient>,
    settings: Arc<PipelineSettings>,
    cancel: CancellationToken,
}

impl ExtractionPool {
    pub fn new(client: Arc<dyn ModelClient>, settings: PipelineSettings) -> Self {
        Self {
            client,
            settings: Arc::new(settings),
            cancel: CancellationToken::new(),
        }
    }

    /// Token the orchestrator can trigger to stop in-flight workers at
    /// their next model-call boundary.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn run(
        &self,
        units: &[MeaningfulUnit],
        meta: &EpisodeMetadata,
    ) -> Result<ExtractionBatch, ExtractionError> {
        let total = units.len();
        if total == 0 {
            return Ok(ExtractionBatch::default());
        }
        if self.cancel.is_cancelled() {
            return Err(ExtractionError::Cancelled);
        }

        let unit_timeout = Duration::from_secs(self.settings.knowledge_extraction_timeout_secs);
        let aggregate_deadline = unit_timeout * total as u32;
        tracing::info!(
            units = total,
            workers = self.settings.max_concurrent_units,
            unit_timeout_secs = unit_timeout.as_secs(),
            "starting parallel knowledge extraction"
        );

        let semaphore = Arc::new(Semaphore::new(self.settings.max_concurrent_units));
        let results: Arc<Mutex<Vec<Option<UnitExtraction>>>> =
            Arc::new(Mutex::new(vec![None; total]));
        let failures: Arc<Mutex<Vec<UnitFailure>>> = Arc::new(Mutex::new(Vec::new()));
        let completed: Arc<Mutex<usize>> = Arc::new(Mutex::new(0));
        let meta = Arc::new(meta.clone());

        let mut workers = JoinSet::new();
        for (index, unit) in units.iter().enumerate() {
            let client = self.client.clone();
            let settings = self.settings.clone();
            let cancel = self.cancel.clone();
            let semaphore = semaphore.clone();
            let results = results.clone();
            let failures = failures.clone();
            let completed = completed.clone();
            let meta = meta.clone();
            let unit = unit.clone();

            workers.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return;
                };
                if cancel.is_cancelled() {
                    record_failure(&failures, &unit, index, "Cancelled", "cancelled before start");
                    return;
                }

                let outcome = tokio::select! {
                    _ = cancel.cancelled() => Err(("Cancelled".to_string(), "cancelled in flight".to_string())),
                    attempt = tokio::time::timeout(
                        unit_timeout,
                        extract_unit(client.as_ref(), &unit, index, total, &meta, &settings, &cancel),
                    ) => match attempt {
                        Err(_) => Err((
                            "TimeoutError".to_string(),
                            format!("unit processing timed out after {}s", unit_timeout.as_secs()),
                        )),
                        Ok(Err(e)) => Err((error_type(&e), e.to_string())),
                        Ok(Ok(extraction)) => Ok(extraction),
                    },
                };

                match outcome {
                    Ok(extraction) => {
                        results.lock()[index] = Some(extraction);
                    }
                    Err((error_type, message)) => {
                        tracing::warn!(unit_index = index, error_type, %message, "unit extraction failed");
                        record_failure(&failures, &unit, index, &error_type, &message);
                    }
                }

                let mut done = completed.lock();
                *done += 1;
                tracing::info!(completed = *done, total, "unit extraction progress");
            });
        }

        // Aggregate deadline over the whole batch; on expiry remaining
        // workers are cancelled and their units recorded as timeouts.
        let drained = tokio::time::timeout(aggregate_deadline, async {
            while workers.join_next().await.is_some() {}
        })
        .await;
        let mut aggregate_timeout = false;
        if drained.is_err() {
            aggregate_timeout = true;
            tracing::error!(
                total,
                "knowledge extraction hit the aggregate deadline, cancelling remaining units"
            );
            self.cancel.cancel();
            workers.shutdown().await;
            let snapshot = results.lock();
            let mut failed = failures.lock();
            for (index, unit) in units.iter().enumerate() {
                let already_failed = failed.iter().any(|f| f.unit_index == index);
                if snapshot[index].is_none() && !already_failed {
                    failed.push(UnitFailure {
                        unit_index: index,
                        unit_id: unit.id.clone(),
                        error_type: "TimeoutError".to_string(),
                        error_message: format!(
                            "cancelled at aggregate deadline ({}s)",
                            aggregate_deadline.as_secs()
                        ),
                    });
                }
            }
        }

        // External cancellation discards partial results entirely.
        if self.cancel.is_cancelled() && !aggregate_timeout {
            return Err(ExtractionError::Cancelled);
        }

        let failures = Arc::try_unwrap(failures)
            .map(Mutex::into_inner)
            .unwrap_or_else(|arc| arc.lock().clone());
        let results = Arc::try_unwrap(results)
            .map(Mutex::into_inner)
            .unwrap_or_else(|arc| arc.lock().clone());

        let failure_rate = failures.len() as f64 / total as f64;
        if failure_rate > self.settings.extraction_failure_threshold {
            return Err(ExtractionError::TooManyFailures {
                failed: failures.len(),
                total,
                rate_pct: failure_rate * 100.0,
            });
        }
        if !failures.is_empty() {
            tracing::warn!(
                failed = failures.len(),
                total,
                rate = format!("{:.1}%", failure_rate * 100.0),
                "knowledge extraction completed with absorbed failures"
            );
        }

        let mut batch = ExtractionBatch {
            results: results.into_iter().flatten().collect(),
            failures,
            ..Default::default()
        };
        for result in &batch.results {
            for entity in &result.entities {
                batch.entity_types.insert(entity.entity_type.clone());
            }
            for relationship in &result.relationships {
                batch.relationship_types.insert(relationship.rel_type.clone());
            }
            for discovered in &result.sentiment.discovered_sentiments {
                batch.sentiment_types.insert(discovered.sentiment_type.clone());
            }
        }

        tracing::info!(
            units_processed = batch.results.len(),
            entity_types = batch.entity_types.len(),
            relationship_types = batch.relationship_types.len(),
            "knowledge extraction complete"
        );
        Ok(batch)
    }
}

fn record_failure(
    failures: &Mutex<Vec<UnitFailure>>,
    unit: &MeaningfulUnit,
    index: usize,
    error_type: &str,
    message: &str,
) {
    failures.lock().push(UnitFailure {
        unit_index: index,
        unit_id: unit.id.clone(),
        error_type: error_type.to_string(),
        error_message: message.to_string(),
    });
}

fn error_type(error: &LlmError) -> String {
    match error {
        LlmError::QuotaExceeded(_) => "QuotaExceeded",
        LlmError::CircuitOpen { .. } => "CircuitOpen",
        LlmError::InvalidResponse(_) => "InvalidResponse",
        LlmError::Transient(_) => "Transient",
        LlmError::Configuration(_) => "Configuration",
        LlmError::Cancelled => "Cancelled",
    }
    .to_string()
}

/// Extract everything from one unit. Cancellation is observed before each
/// model call; errors bubble to the worker which records them.
async fn extract_unit(
    client: &dyn ModelClient,
    unit: &MeaningfulUnit,
    index: usize,
    total: usize,
    meta: &EpisodeMetadata,
    settings: &PipelineSettings,
    cancel: &CancellationToken,
) -> Result<UnitExtraction, LlmError> {
    if cancel.is_cancelled() {
        return Err(LlmError::Cancelled);
    }

    let (mut entities, mut quotes, relationships, mut insights) = if settings.combined_extraction {
        let prompt = combined_extraction_prompt(unit, meta, index, total);
        let schema = combined_extraction_schema();
        let response = client.chat_json(&prompt, Some(&schema)).await?;
        (
            parse_items::<Entity>(&response, "entities"),
            parse_items::<Quote>(&response, "quotes"),
            parse_items::<Relationship>(&response, "relationships"),
            parse_items::<Insight>(&response, "insights"),
        )
    } else {
        let mut collected: Vec<Value> = Vec::with_capacity(4);
        for category in ["entities", "quotes", "relationships", "insights"] {
            if cancel.is_cancelled() {
                return Err(LlmError::Cancelled);
            }
            let prompt = category_extraction_prompt(unit, category);
            let schema = category_schema(category);
            collected.push(client.chat_json(&prompt, Some(&schema)).await?);
        }
        (
            parse_items::<Entity>(&collected[0], "entities"),
            parse_items::<Quote>(&collected[1], "quotes"),
            parse_items::<Relationship>(&collected[2], "relationships"),
            parse_items::<Insight>(&collected[3], "insights"),
        )
    };

    // Back-references must exist before the graph write; inject them when
    // the model left them out.
    for entity in &mut entities {
        entity
            .properties
            .entry("meaningful_unit_id".to_string())
            .or_insert_with(|| Value::String(unit.id.clone()));
    }
    for quote in &mut quotes {
        if quote.meaningful_unit_id.is_empty() {
            quote.meaningful_unit_id = unit.id.clone();
        }
        quote.importance_score = score_quote(quote);
    }
    for insight in &mut insights {
        if insight.meaningful_unit_id.is_empty() {
            insight.meaningful_unit_id = unit.id.clone();
        }
        if insight.complexity.is_empty() {
            insight.complexity = complexity_label(&insight.content).to_string();
        }
    }

    if cancel.is_cancelled() {
        return Err(LlmError::Cancelled);
    }
    let sentiment_response = client
        .chat_json(&sentiment_prompt(unit), Some(&sentiment_schema()))
        .await?;
    let sentiment = parse_sentiment(&sentiment_response, unit, index, SENTIMENT_MIN_CONFIDENCE);

    Ok(UnitExtraction {
        unit_index: index,
        unit_id: unit.id.clone(),
        entities,
        quotes,
        relationships,
        insights,
        sentiment,
    })
}

/// Parse an array field item by item, skipping entries that do not fit the
/// shape instead of failing the unit.
fn parse_items<T: serde::de::DeserializeOwned>(value: &Value, field: &str) -> Vec<T> {
    let Some(items) = value.get(field).and_then(Value::as_array) else {
        return Vec::new();
    };
    let mut parsed = Vec::with_capacity(items.len());
    for item in items {
        match serde_json::from_value::<T>(item.clone()) {
            Ok(item) => parsed.push(item),
            Err(e) => tracing::debug!(field, error = %e, "skipping malformed item"),
        }
    }
    parsed
}
