//! Pipeline error taxonomy

use podgraph_core::{LlmError, Phase};
use podgraph_extraction::ExtractionError;
use podgraph_graph::GraphError;
use podgraph_vtt::VttError;
use thiserror::Error;

/// Classified failure kinds, mirroring the episode failure policy:
/// everything is fatal for the episode; the kind decides whether a
/// rollback runs and what the caller sees.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Parse failure; nothing was written, no rollback needed
    VttProcessing,
    SpeakerIdentification,
    ConversationAnalysis,
    /// Over-threshold extraction failure rate
    Extraction,
    QuotaExceeded,
    CircuitOpen,
    Transient,
    Graph,
    Internal,
}

impl ErrorKind {
    pub fn needs_rollback(&self) -> bool {
        !matches!(self, ErrorKind::VttProcessing)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::VttProcessing => "VTTProcessingError",
            ErrorKind::SpeakerIdentification => "SpeakerIdentificationError",
            ErrorKind::ConversationAnalysis => "ConversationAnalysisError",
            ErrorKind::Extraction => "ExtractionError",
            ErrorKind::QuotaExceeded => "QuotaExceeded",
            ErrorKind::CircuitOpen => "CircuitOpen",
            ErrorKind::Transient => "Transient",
            ErrorKind::Graph => "GraphError",
            ErrorKind::Internal => "InternalError",
        }
    }
}

/// The error surfaced to callers: the failing phase plus the classified
/// cause.
#[derive(Error, Debug)]
#[error("episode {episode_id} failed during {phase:?} [{kind:?}]: {message}")]
pub struct PipelineError {
    pub episode_id: String,
    pub phase: Option<Phase>,
    pub kind: ErrorKind,
    pub message: String,
}

impl PipelineError {
    pub fn new(episode_id: &str, phase: Option<Phase>, kind: ErrorKind, message: String) -> Self {
        Self {
            episode_id: episode_id.to_string(),
            phase,
            kind,
            message,
        }
    }

    pub fn internal(episode_id: &str, message: impl Into<String>) -> Self {
        Self::new(episode_id, None, ErrorKind::Internal, message.into())
    }
}

pub(crate) fn classify_llm(error: &LlmError) -> ErrorKind {
    match error {
        LlmError::QuotaExceeded(_) => ErrorKind::QuotaExceeded,
        LlmError::CircuitOpen { .. } => ErrorKind::CircuitOpen,
        LlmError::Transient(_) => ErrorKind::Transient,
        _ => ErrorKind::Internal,
    }
}

pub(crate) fn classify_extraction(error: &ExtractionError) -> ErrorKind {
    match error {
        ExtractionError::SpeakerIdentification(_) => ErrorKind::SpeakerIdentification,
        ExtractionError::ConversationAnalysis(_) => ErrorKind::ConversationAnalysis,
        ExtractionError::TooManyFailures { .. } => ErrorKind::Extraction,
        ExtractionError::NoUnits => ErrorKind::Internal,
        ExtractionError::Cancelled => ErrorKind::Internal,
        ExtractionError::Llm(e) => classify_llm(e),
    }
}

pub(crate) fn classify_graph(error: &GraphError) -> ErrorKind {
    match error {
        GraphError::Transient(_) => ErrorKind::Transient,
        _ => ErrorKind::Graph,
    }
}

pub(crate) fn classify_vtt(_error: &VttError) -> ErrorKind {
    ErrorKind::VttProcessing
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rollback_policy() {
        assert!(!ErrorKind::VttProcessing.needs_rollback());
        assert!(ErrorKind::SpeakerIdentification.needs_rollback());
        assert!(ErrorKind::Extraction.needs_rollback());
        assert!(ErrorKind::QuotaExceeded.needs_rollback());
    }

    #[test]
    fn test_extraction_classification() {
        let kind = classify_extraction(&ExtractionError::TooManyFailures {
            failed: 6,
            total: 10,
            rate_pct: 60.0,
        });
        assert_eq!(kind, ErrorKind::Extraction);

        let kind = classify_extraction(&ExtractionError::Llm(LlmError::QuotaExceeded("x".into())));
        assert_eq!(kind, ErrorKind::QuotaExceeded);
    }
}
