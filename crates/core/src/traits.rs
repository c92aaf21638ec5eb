//! Trait seams for pluggable backends
//!
//! The pipeline never talks to a model vendor directly; everything goes
//! through `ModelClient` so tests can substitute a scripted double and the
//! quota machinery stays in one place.

use crate::error::LlmResult;
use async_trait::async_trait;
use serde_json::Value;

/// Per-call generation knobs.
#[derive(Debug, Clone)]
pub struct GenerationOptions {
    pub max_output_tokens: usize,
    pub temperature: f32,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            max_output_tokens: 8192,
            temperature: 0.2,
        }
    }
}

impl GenerationOptions {
    /// Low-temperature profile for structured extraction calls.
    pub fn structured() -> Self {
        Self {
            max_output_tokens: 8192,
            temperature: 0.1,
        }
    }
}

/// Sole path for LLM and embedding calls.
///
/// Implementations are thread-safe and quota-aware; every method can fail
/// with `QuotaExceeded`, `CircuitOpen`, `InvalidResponse`, or `Transient`.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Free-text completion.
    async fn chat(&self, prompt: &str, opts: GenerationOptions) -> LlmResult<String>;

    /// JSON-contract completion. The response is parsed (with code-fence
    /// stripping) and validated against `schema` when one is supplied;
    /// a contract violation is an `InvalidResponse`.
    async fn chat_json(&self, prompt: &str, schema: Option<&Value>) -> LlmResult<Value>;

    /// Dense embedding for a text span.
    async fn embed(&self, text: &str) -> LlmResult<Vec<f32>>;
}
