//! Main settings module

use crate::constants::{endpoints, models, paths, rate_limits};
use crate::ConfigError;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// How the client picks among eligible free-tier keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum KeySelection {
    /// Deterministic: always the first eligible key
    #[default]
    First,
    /// Rotate across eligible keys call by call
    RoundRobin,
}

/// Per-key daily and minute budgets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimits {
    #[serde(default = "default_rpm")]
    pub rpm: u32,
    #[serde(default = "default_rpd")]
    pub rpd: u32,
    #[serde(default = "default_tpm")]
    pub tpm: u64,
    #[serde(default = "default_tpd")]
    pub tpd: u64,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            rpm: rate_limits::RPM,
            rpd: rate_limits::RPD,
            tpm: rate_limits::TPM,
            tpd: rate_limits::TPD,
        }
    }
}

fn default_rpm() -> u32 {
    rate_limits::RPM
}
fn default_rpd() -> u32 {
    rate_limits::RPD
}
fn default_tpm() -> u64 {
    rate_limits::TPM
}
fn default_tpd() -> u64 {
    rate_limits::TPD
}

/// Transcription continuation loop knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContinuationSettings {
    /// Give up after this many continuation calls
    #[serde(default = "default_max_continuations")]
    pub max_attempts: u32,
    /// Coverage at or above this fraction counts as complete
    #[serde(default = "default_min_coverage")]
    pub min_coverage: f64,
    /// Cues overlapping by more than this many seconds are dedup candidates
    #[serde(default = "default_overlap_seconds")]
    pub overlap_seconds: f64,
    /// Text similarity at or above this treats overlapping cues as duplicates
    #[serde(default = "default_similarity")]
    pub similarity_threshold: f64,
}

impl Default for ContinuationSettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_continuations(),
            min_coverage: default_min_coverage(),
            overlap_seconds: default_overlap_seconds(),
            similarity_threshold: default_similarity(),
        }
    }
}

fn default_max_continuations() -> u32 {
    10
}
fn default_min_coverage() -> f64 {
    0.85
}
fn default_overlap_seconds() -> f64 {
    2.0
}
fn default_similarity() -> f64 {
    0.8
}

/// Model client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    /// API keys; usually populated from `GEMINI_API_KEY[_n]` env vars
    #[serde(default)]
    pub api_keys: Vec<String>,
    #[serde(default = "default_chat_model")]
    pub model: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_llm_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub rate_limits: RateLimits,
    #[serde(default)]
    pub key_selection: KeySelection,
    /// Treat the first key as paid tier and never fall back to free keys
    #[serde(default)]
    pub use_paid_key_only: bool,
    /// Total attempts per call (first try included)
    #[serde(default = "default_llm_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_ms")]
    pub initial_backoff_ms: u64,
    /// Consecutive failures before a (operation, key) breaker opens
    #[serde(default = "default_breaker_threshold")]
    pub breaker_threshold: u32,
    #[serde(default = "default_breaker_cooldown")]
    pub breaker_cooldown_secs: u64,
    #[serde(default = "default_usage_state_path")]
    pub usage_state_path: String,
    #[serde(default)]
    pub continuation: ContinuationSettings,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            api_keys: Vec::new(),
            model: default_chat_model(),
            embedding_model: default_embedding_model(),
            endpoint: default_llm_endpoint(),
            rate_limits: RateLimits::default(),
            key_selection: KeySelection::default(),
            use_paid_key_only: false,
            max_attempts: default_llm_attempts(),
            initial_backoff_ms: default_backoff_ms(),
            breaker_threshold: default_breaker_threshold(),
            breaker_cooldown_secs: default_breaker_cooldown(),
            usage_state_path: default_usage_state_path(),
            continuation: ContinuationSettings::default(),
        }
    }
}

fn default_chat_model() -> String {
    models::DEFAULT_CHAT.to_string()
}
fn default_embedding_model() -> String {
    models::DEFAULT_EMBEDDING.to_string()
}
fn default_llm_endpoint() -> String {
    endpoints::GEMINI_DEFAULT.to_string()
}
fn default_llm_attempts() -> u32 {
    2
}
fn default_backoff_ms() -> u64 {
    500
}
fn default_breaker_threshold() -> u32 {
    5
}
fn default_breaker_cooldown() -> u64 {
    60
}
fn default_usage_state_path() -> String {
    paths::USAGE_STATE_FILE.to_string()
}

/// Per-episode pipeline behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    #[serde(default = "default_concurrent_units")]
    pub max_concurrent_units: usize,
    /// Per-unit wall-clock budget, seconds
    #[serde(default = "default_extraction_timeout")]
    pub knowledge_extraction_timeout_secs: u64,
    #[serde(default = "default_speaker_timeout")]
    pub speaker_identification_timeout_secs: u64,
    /// Mappings below this confidence keep their generic labels
    #[serde(default = "default_speaker_confidence")]
    pub speaker_confidence_threshold: f64,
    /// Segments fed to speaker identification as context
    #[serde(default = "default_context_segments")]
    pub max_segments_for_context: usize,
    /// Unit failure rate above this rejects the episode
    #[serde(default = "default_failure_threshold")]
    pub extraction_failure_threshold: f64,
    /// One combined extraction call per unit; falls back to five calls
    #[serde(default = "default_true")]
    pub combined_extraction: bool,
    /// Opt-in post-processing speaker mapping pass
    #[serde(default)]
    pub enable_speaker_mapping: bool,
    #[serde(default)]
    pub disable_checkpoints: bool,
    #[serde(default = "default_embedding_failure_dir")]
    pub embedding_failure_dir: String,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_concurrent_units: default_concurrent_units(),
            knowledge_extraction_timeout_secs: default_extraction_timeout(),
            speaker_identification_timeout_secs: default_speaker_timeout(),
            speaker_confidence_threshold: default_speaker_confidence(),
            max_segments_for_context: default_context_segments(),
            extraction_failure_threshold: default_failure_threshold(),
            combined_extraction: true,
            enable_speaker_mapping: false,
            disable_checkpoints: false,
            embedding_failure_dir: default_embedding_failure_dir(),
        }
    }
}

fn default_concurrent_units() -> usize {
    4
}
fn default_extraction_timeout() -> u64 {
    120
}
fn default_speaker_timeout() -> u64 {
    120
}
fn default_speaker_confidence() -> f64 {
    0.5
}
fn default_context_segments() -> usize {
    50
}
fn default_failure_threshold() -> f64 {
    0.5
}
fn default_true() -> bool {
    true
}
fn default_embedding_failure_dir() -> String {
    paths::EMBEDDING_FAILURE_DIR.to_string()
}

/// Checkpoint store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointSettings {
    #[serde(default = "default_checkpoint_dir")]
    pub dir: String,
    #[serde(default = "default_true")]
    pub compress: bool,
    #[serde(default = "default_checkpoint_age")]
    pub max_age_days: u32,
}

impl Default for CheckpointSettings {
    fn default() -> Self {
        Self {
            dir: default_checkpoint_dir(),
            compress: true,
            max_age_days: default_checkpoint_age(),
        }
    }
}

fn default_checkpoint_dir() -> String {
    paths::CHECKPOINT_DIR.to_string()
}
fn default_checkpoint_age() -> u32 {
    30
}

/// Graph store connection and write behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphSettings {
    #[serde(default = "default_graph_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_graph_database")]
    pub database: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// Rows per UNWIND batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Transient-error retries per batch
    #[serde(default = "default_graph_retries")]
    pub max_retries: u32,
}

impl Default for GraphSettings {
    fn default() -> Self {
        Self {
            endpoint: default_graph_endpoint(),
            database: default_graph_database(),
            username: String::new(),
            password: String::new(),
            batch_size: default_batch_size(),
            max_retries: default_graph_retries(),
        }
    }
}

fn default_graph_endpoint() -> String {
    endpoints::NEO4J_HTTP_DEFAULT.to_string()
}
fn default_graph_database() -> String {
    "neo4j".to_string()
}
fn default_batch_size() -> usize {
    1000
}
fn default_graph_retries() -> u32 {
    3
}

/// Top-level application settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub llm: LlmSettings,
    #[serde(default)]
    pub pipeline: PipelineSettings,
    #[serde(default)]
    pub checkpoint: CheckpointSettings,
    #[serde(default)]
    pub graph: GraphSettings,
}

impl Settings {
    /// Load settings from an optional TOML file plus `PODGRAPH_*` env vars,
    /// then apply the plain-environment operational knobs.
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = config_path {
            builder = builder.add_source(File::from(path).required(false));
        }
        let config = builder
            .add_source(Environment::with_prefix("PODGRAPH").separator("__"))
            .build()?;

        let mut settings: Settings = config.try_deserialize()?;
        settings.apply_env_knobs();
        settings.validate()?;
        Ok(settings)
    }

    /// Operational env vars that predate the `PODGRAPH_*` scheme.
    fn apply_env_knobs(&mut self) {
        if env_flag("DISABLE_CHECKPOINTS") {
            self.pipeline.disable_checkpoints = true;
        }
        if env_flag("USE_PAID_KEY_ONLY") {
            self.llm.use_paid_key_only = true;
        }
        if self.llm.api_keys.is_empty() {
            self.llm.api_keys = collect_api_keys();
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pipeline.max_concurrent_units == 0 {
            return Err(ConfigError::Invalid(
                "pipeline.max_concurrent_units must be at least 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.pipeline.extraction_failure_threshold) {
            return Err(ConfigError::Invalid(
                "pipeline.extraction_failure_threshold must be within [0, 1]".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.pipeline.speaker_confidence_threshold) {
            return Err(ConfigError::Invalid(
                "pipeline.speaker_confidence_threshold must be within [0, 1]".into(),
            ));
        }
        if self.graph.batch_size == 0 {
            return Err(ConfigError::Invalid("graph.batch_size must be at least 1".into()));
        }
        Ok(())
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
        .unwrap_or(false)
}

/// `GEMINI_API_KEY` plus numbered `GEMINI_API_KEY_2..=GEMINI_API_KEY_9`.
fn collect_api_keys() -> Vec<String> {
    let mut keys = Vec::new();
    if let Ok(key) = std::env::var("GEMINI_API_KEY") {
        if !key.is_empty() {
            keys.push(key);
        }
    }
    for n in 2..=9 {
        match std::env::var(format!("GEMINI_API_KEY_{n}")) {
            Ok(key) if !key.is_empty() => keys.push(key),
            _ => break,
        }
    }
    keys
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.pipeline.max_concurrent_units, 4);
        assert_eq!(settings.pipeline.knowledge_extraction_timeout_secs, 120);
        assert_eq!(settings.llm.rate_limits.rpd, 25);
        assert_eq!(settings.checkpoint.max_age_days, 30);
        assert!(!settings.pipeline.enable_speaker_mapping);
    }

    #[test]
    fn test_invalid_threshold_rejected() {
        let mut settings = Settings::default();
        settings.pipeline.extraction_failure_threshold = 1.5;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("podgraph.toml");
        std::fs::write(
            &path,
            "[pipeline]\nmax_concurrent_units = 8\n\n[llm]\nmodel = \"gemini-test\"\n",
        )
        .unwrap();
        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.pipeline.max_concurrent_units, 8);
        assert_eq!(settings.llm.model, "gemini-test");
    }
}
