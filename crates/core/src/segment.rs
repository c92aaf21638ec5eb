//! Transcript segments

use serde::{Deserialize, Serialize};

/// An atomic transcript cue enriched with a speaker label.
///
/// Created by VTT parsing with a generic label (`SPEAKER_1`, ...), rewritten
/// once by speaker identification, read-only thereafter. Segments are never
/// persisted to the graph individually.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    /// Stable within the episode
    pub id: String,
    pub text: String,
    /// Seconds from episode start
    pub start_time: f64,
    /// Seconds; always greater than `start_time`
    pub end_time: f64,
    pub speaker: String,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

fn default_confidence() -> f64 {
    1.0
}

impl Segment {
    pub fn duration(&self) -> f64 {
        (self.end_time - self.start_time).max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_never_negative() {
        let seg = Segment {
            id: "seg_0".into(),
            text: "hello".into(),
            start_time: 5.0,
            end_time: 4.0,
            speaker: "SPEAKER_1".into(),
            confidence: 1.0,
        };
        assert_eq!(seg.duration(), 0.0);
    }
}
