//! Error types shared across the pipeline

use thiserror::Error;

/// Errors produced by the model client (LLM and embedding calls).
///
/// Every operation on [`crate::ModelClient`] fails with one of these kinds;
/// callers branch on the kind to decide between retry, key rotation, and
/// episode rejection.
#[derive(Error, Debug, Clone)]
pub enum LlmError {
    /// No API key can serve the request today (daily budgets exhausted).
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    /// The circuit breaker for this (operation, key) pair is open.
    #[error("circuit open for {operation} on key {key_index}")]
    CircuitOpen { operation: String, key_index: usize },

    /// The model returned something the caller's contract cannot accept.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Network-level or 5xx failure; retryable.
    #[error("transient error: {0}")]
    Transient(String),

    /// Client misconfiguration (no keys, bad endpoint).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The call was cancelled by the orchestrator.
    #[error("cancelled")]
    Cancelled,
}

impl LlmError {
    /// Whether a retry on the same key can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LlmError::Transient(_))
    }
}

pub type LlmResult<T> = Result<T, LlmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        assert!(LlmError::Transient("timeout".into()).is_retryable());
        assert!(!LlmError::QuotaExceeded("rpd".into()).is_retryable());
        assert!(!LlmError::InvalidResponse("not json".into()).is_retryable());
    }
}
