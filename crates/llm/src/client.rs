//! The quota-managed client core: key selection, accounting, retries

use crate::breaker::CircuitBreaker;
use crate::transport::{GeminiTransport, HttpTransport};
use crate::usage::UsageTable;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use podgraph_config::{KeySelection, LlmSettings};
use podgraph_core::{GenerationOptions, LlmError, LlmResult, ModelClient};
use rand::Rng;
use serde_json::Value;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use unicode_segmentation::UnicodeSegmentation;

/// Outcome of one key-selection pass.
enum Selection {
    /// Use this key now
    Key(usize),
    /// A free key becomes eligible after this wait (bounded by the RPM gap)
    Wait(Duration),
    /// Every key is over its daily budget or marked unavailable
    Exhausted,
    /// Budgets are fine but the breaker masks every remaining key
    AllBroken(usize),
}

enum CallKind<'a> {
    Generate {
        prompt: &'a str,
        opts: &'a GenerationOptions,
    },
    GenerateWithAudio {
        audio_uri: &'a str,
        prompt: &'a str,
        opts: &'a GenerationOptions,
    },
    Embed {
        text: &'a str,
    },
}

enum CallOutput {
    Text(String),
    Vector(Vec<f32>),
}

/// Multi-key Gemini client. Thread-safe: the usage table sits behind one
/// mutex held only for selection and post-call accounting, never across the
/// network call itself.
pub struct GeminiClient {
    settings: LlmSettings,
    transport: Arc<dyn GeminiTransport>,
    usage: Mutex<UsageTable>,
    breaker: CircuitBreaker,
    rr_cursor: Mutex<usize>,
}

impl GeminiClient {
    pub fn new(settings: LlmSettings) -> LlmResult<Self> {
        let transport = HttpTransport::new(&settings.endpoint, Duration::from_secs(120))?;
        Self::with_transport(settings, Arc::new(transport))
    }

    /// Construct with an injected transport (tests, alternative backends).
    pub fn with_transport(
        mut settings: LlmSettings,
        transport: Arc<dyn GeminiTransport>,
    ) -> LlmResult<Self> {
        if settings.api_keys.is_empty() {
            return Err(LlmError::Configuration(
                "at least one API key must be provided".into(),
            ));
        }
        // USE_PAID_KEY_ONLY pins all traffic to the first key and lifts its
        // free-tier limits.
        let paid_flags: Vec<bool> = if settings.use_paid_key_only {
            settings.api_keys.truncate(1);
            vec![true]
        } else {
            vec![false; settings.api_keys.len()]
        };

        let usage = UsageTable::load_or_new(
            Path::new(&settings.usage_state_path),
            &paid_flags,
            Utc::now().date_naive(),
        );
        let breaker = CircuitBreaker::new(
            settings.breaker_threshold,
            Duration::from_secs(settings.breaker_cooldown_secs),
        );
        tracing::info!(keys = settings.api_keys.len(), model = %settings.model, "initialized Gemini client");
        Ok(Self {
            settings,
            transport,
            usage: Mutex::new(usage),
            breaker,
            rr_cursor: Mutex::new(0),
        })
    }

    pub fn settings(&self) -> &LlmSettings {
        &self.settings
    }

    /// Grapheme-based token estimate (~4 chars per token) plus the output
    /// cap; deliberately generous so daily budgets never overrun.
    pub fn estimate_tokens(text: &str, max_output: usize) -> u64 {
        let graphemes = text.graphemes(true).count().max(1);
        (graphemes / 4) as u64 + max_output as u64
    }

    fn select_key(&self, operation: &str, estimate: u64, masked: &HashSet<usize>) -> Selection {
        let now = Utc::now();
        let mut table = self.usage.lock();
        table.reset_stale(now.date_naive());
        let n = table.len();

        let order: Vec<usize> = match self.settings.key_selection {
            KeySelection::First => (0..n).collect(),
            KeySelection::RoundRobin => {
                let cursor = *self.rr_cursor.lock();
                (0..n).map(|i| (cursor + i) % n).collect()
            }
        };

        let mut best_wait: Option<(usize, f64)> = None;
        let mut free_candidate: Option<usize> = None;
        let mut breaker_blocked = None;
        let mut any_budget = false;

        for &i in &order {
            let key = table.key(i);
            if masked.contains(&i) || !key.is_available {
                continue;
            }
            if !key.within_daily_budget(&self.settings.rate_limits, estimate) {
                continue;
            }
            any_budget = true;
            if self.breaker.is_open(operation, i) {
                breaker_blocked.get_or_insert(i);
                continue;
            }
            if key.is_paid_tier {
                // Paid keys skip free-tier spacing entirely.
                self.advance_cursor(i, n);
                return Selection::Key(i);
            }
            let wait = key.spacing_wait(&self.settings.rate_limits, now);
            if wait <= 0.0 {
                if free_candidate.is_none() {
                    free_candidate = Some(i);
                }
            } else if best_wait.map(|(_, w)| wait < w).unwrap_or(true) {
                best_wait = Some((i, wait));
            }
        }

        if let Some(i) = free_candidate {
            self.advance_cursor(i, n);
            return Selection::Key(i);
        }
        if let Some((_, wait)) = best_wait {
            return Selection::Wait(Duration::from_millis((wait * 1000.0).ceil() as u64));
        }
        if !any_budget {
            return Selection::Exhausted;
        }
        match breaker_blocked {
            Some(i) => Selection::AllBroken(i),
            None => Selection::Exhausted,
        }
    }

    fn advance_cursor(&self, chosen: usize, n: usize) {
        if self.settings.key_selection == KeySelection::RoundRobin {
            *self.rr_cursor.lock() = (chosen + 1) % n;
        }
    }

    fn record_success(&self, operation: &str, key_index: usize, estimate: u64) {
        self.breaker.record_success(operation, key_index);
        let mut table = self.usage.lock();
        table.key_mut(key_index).record_call(estimate, Utc::now());
        if let Err(e) = table.persist() {
            tracing::warn!(error = %e, "failed to persist usage state");
        }
    }

    fn mask_key(&self, key_index: usize) {
        let mut table = self.usage.lock();
        table.key_mut(key_index).is_available = false;
        if let Err(e) = table.persist() {
            tracing::warn!(error = %e, "failed to persist usage state");
        }
    }

    async fn execute(
        &self,
        operation: &str,
        estimate: u64,
        call: CallKind<'_>,
    ) -> LlmResult<CallOutput> {
        let mut masked: HashSet<usize> = HashSet::new();
        let mut attempts_left = self.settings.max_attempts.max(1);
        let mut backoff = Duration::from_millis(self.settings.initial_backoff_ms);

        loop {
            let key_index = loop {
                match self.select_key(operation, estimate, &masked) {
                    Selection::Key(i) => break i,
                    Selection::Wait(wait) => {
                        tracing::debug!(operation, wait_ms = wait.as_millis() as u64, "rate limiting");
                        tokio::time::sleep(wait).await;
                    }
                    Selection::Exhausted => {
                        return Err(LlmError::QuotaExceeded(format!(
                            "no API key can serve `{operation}` today"
                        )));
                    }
                    Selection::AllBroken(i) => {
                        return Err(LlmError::CircuitOpen {
                            operation: operation.to_string(),
                            key_index: i,
                        });
                    }
                }
            };

            let api_key = self.settings.api_keys[key_index].clone();
            let result = match &call {
                CallKind::Generate { prompt, opts } => self
                    .transport
                    .generate(&api_key, &self.settings.model, prompt, opts)
                    .await
                    .map(CallOutput::Text),
                CallKind::GenerateWithAudio {
                    audio_uri,
                    prompt,
                    opts,
                } => self
                    .transport
                    .generate_with_audio(&api_key, &self.settings.model, audio_uri, prompt, opts)
                    .await
                    .map(CallOutput::Text),
                CallKind::Embed { text } => self
                    .transport
                    .embed(&api_key, &self.settings.embedding_model, text)
                    .await
                    .map(CallOutput::Vector),
            };

            match result {
                Ok(output) => {
                    self.record_success(operation, key_index, estimate);
                    return Ok(output);
                }
                Err(LlmError::QuotaExceeded(msg)) => {
                    // Never retried on the same key: mask it and re-enter
                    // selection.
                    tracing::warn!(operation, key_index, %msg, "key exhausted, rotating");
                    self.breaker.record_failure(operation, key_index);
                    self.mask_key(key_index);
                    masked.insert(key_index);
                }
                Err(e) if e.is_retryable() && attempts_left > 1 => {
                    attempts_left -= 1;
                    self.breaker.record_failure(operation, key_index);
                    let jitter = rand::thread_rng().gen_range(0..=backoff.as_millis() as u64 / 2);
                    let delay = backoff + Duration::from_millis(jitter);
                    tracing::warn!(
                        operation,
                        key_index,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "transient failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    backoff *= 2;
                }
                Err(e) => {
                    self.breaker.record_failure(operation, key_index);
                    return Err(e);
                }
            }
        }
    }

    pub(crate) async fn generate_text(
        &self,
        operation: &str,
        prompt: &str,
        opts: &GenerationOptions,
    ) -> LlmResult<String> {
        let estimate = Self::estimate_tokens(prompt, opts.max_output_tokens);
        match self
            .execute(operation, estimate, CallKind::Generate { prompt, opts })
            .await?
        {
            CallOutput::Text(text) => Ok(text),
            CallOutput::Vector(_) => Err(LlmError::InvalidResponse("expected text".into())),
        }
    }

    pub(crate) async fn generate_with_audio(
        &self,
        audio_uri: &str,
        prompt: &str,
        opts: &GenerationOptions,
        estimate: u64,
    ) -> LlmResult<String> {
        match self
            .execute(
                "transcribe",
                estimate,
                CallKind::GenerateWithAudio {
                    audio_uri,
                    prompt,
                    opts,
                },
            )
            .await?
        {
            CallOutput::Text(text) => Ok(text),
            CallOutput::Vector(_) => Err(LlmError::InvalidResponse("expected text".into())),
        }
    }
}

/// Pull a JSON value out of a completion that may be fenced or surrounded
/// by prose.
pub(crate) fn extract_json(raw: &str) -> LlmResult<Value> {
    let trimmed = raw.trim();
    let candidate = if let Some(rest) = trimmed.strip_prefix("```") {
        let rest = rest.trim_start_matches("json").trim_start();
        rest.split("```").next().unwrap_or(rest)
    } else {
        trimmed
    };

    if let Ok(value) = serde_json::from_str(candidate) {
        return Ok(value);
    }

    // Fall back to the outermost brace/bracket span.
    let start = candidate.find(|c| c == '{' || c == '[');
    let end = candidate.rfind(|c| c == '}' || c == ']');
    if let (Some(start), Some(end)) = (start, end) {
        if end > start {
            if let Ok(value) = serde_json::from_str(&candidate[start..=end]) {
                return Ok(value);
            }
        }
    }
    Err(LlmError::InvalidResponse(format!(
        "response is not valid JSON: {}",
        &raw.chars().take(200).collect::<String>()
    )))
}

#[async_trait]
impl ModelClient for GeminiClient {
    async fn chat(&self, prompt: &str, opts: GenerationOptions) -> LlmResult<String> {
        self.generate_text("chat", prompt, &opts).await
    }

    async fn chat_json(&self, prompt: &str, schema: Option<&Value>) -> LlmResult<Value> {
        let opts = GenerationOptions::structured();
        let raw = self.generate_text("chat_json", prompt, &opts).await?;
        let value = extract_json(&raw)?;
        if let Some(schema) = schema {
            let compiled = jsonschema::JSONSchema::compile(schema)
                .map_err(|e| LlmError::Configuration(format!("bad schema: {e}")))?;
            if !compiled.is_valid(&value) {
                return Err(LlmError::InvalidResponse(
                    "response violates the JSON contract".into(),
                ));
            }
        }
        Ok(value)
    }

    async fn embed(&self, text: &str) -> LlmResult<Vec<f32>> {
        let estimate = Self::estimate_tokens(text, 0);
        match self.execute("embed", estimate, CallKind::Embed { text }).await? {
            CallOutput::Vector(v) => Ok(v),
            CallOutput::Text(_) => Err(LlmError::InvalidResponse("expected embedding".into())),
        }
    }
}
