//! Pipeline processing phases

use serde::{Deserialize, Serialize};
use std::fmt;

/// Ordered processing phases. Checkpoints record the last completed phase;
/// a phase is skipped on resume iff the checkpointed phase is at or past it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    VttParsing,
    SpeakerIdentification,
    ConversationAnalysis,
    MeaningfulUnitCreation,
    EpisodeStorage,
    KnowledgeExtraction,
    KnowledgeStorage,
    Analysis,
    /// Optional; only runs when speaker mapping is explicitly enabled
    PostProcessSpeakers,
}

impl Phase {
    pub const ALL: [Phase; 9] = [
        Phase::VttParsing,
        Phase::SpeakerIdentification,
        Phase::ConversationAnalysis,
        Phase::MeaningfulUnitCreation,
        Phase::EpisodeStorage,
        Phase::KnowledgeExtraction,
        Phase::KnowledgeStorage,
        Phase::Analysis,
        Phase::PostProcessSpeakers,
    ];

    /// Wire/file name, matching the checkpoint payload keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::VttParsing => "VTT_PARSING",
            Phase::SpeakerIdentification => "SPEAKER_IDENTIFICATION",
            Phase::ConversationAnalysis => "CONVERSATION_ANALYSIS",
            Phase::MeaningfulUnitCreation => "MEANINGFUL_UNIT_CREATION",
            Phase::EpisodeStorage => "EPISODE_STORAGE",
            Phase::KnowledgeExtraction => "KNOWLEDGE_EXTRACTION",
            Phase::KnowledgeStorage => "KNOWLEDGE_STORAGE",
            Phase::Analysis => "ANALYSIS",
            Phase::PostProcessSpeakers => "POST_PROCESS_SPEAKERS",
        }
    }

    pub fn parse(name: &str) -> Option<Phase> {
        Phase::ALL.iter().copied().find(|p| p.as_str() == name)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_order_matches_pipeline() {
        assert!(Phase::VttParsing < Phase::SpeakerIdentification);
        assert!(Phase::EpisodeStorage < Phase::KnowledgeExtraction);
        assert!(Phase::Analysis < Phase::PostProcessSpeakers);
    }

    #[test]
    fn test_phase_round_trip() {
        for phase in Phase::ALL {
            assert_eq!(Phase::parse(phase.as_str()), Some(phase));
        }
        assert_eq!(Phase::parse("NOT_A_PHASE"), None);
    }
}
