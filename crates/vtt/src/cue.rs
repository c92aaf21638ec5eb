//! Cue type and voice-tag helpers

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static VOICE_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<v\s+([^>]+)>").unwrap());

/// A single time-coded text span. The text keeps its `<v>` tag so cues can
/// be rendered back verbatim; speaker extraction is lazy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cue {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

impl Cue {
    /// Speaker label from the first `<v Name>` tag, if any.
    pub fn speaker(&self) -> Option<String> {
        VOICE_TAG
            .captures(&self.text)
            .map(|c| c[1].trim().to_string())
    }

    /// Text with voice tags and closing `</v>` stripped.
    pub fn plain_text(&self) -> String {
        VOICE_TAG
            .replace_all(&self.text, "")
            .replace("</v>", "")
            .trim()
            .to_string()
    }
}

/// Strip voice tags from arbitrary text (shared with transcript stitching).
pub fn strip_voice_tags(text: &str) -> String {
    VOICE_TAG
        .replace_all(text, "")
        .replace("</v>", "")
        .trim()
        .to_string()
}
