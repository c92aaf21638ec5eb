//! WebVTT document parsing

use crate::cue::Cue;
use crate::timestamp::parse_timestamp;
use crate::VttError;
use once_cell::sync::Lazy;
use podgraph_core::{Segment, VttMetadata};
use regex::Regex;
use std::path::Path;

static CUE_TIMING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{1,2}:\d{2}(?::\d{2})?\.\d{3})\s*-->\s*(\d{1,2}:\d{2}(?::\d{2})?\.\d{3})")
        .unwrap()
});

/// A parsed VTT file: ordered cues plus NOTE-block metadata.
#[derive(Debug, Clone, Default)]
pub struct VttDocument {
    pub cues: Vec<Cue>,
    pub metadata: VttMetadata,
}

impl VttDocument {
    /// Convert cues into pipeline segments. Speaker labels come from voice
    /// tags; untagged cues inherit the previous cue's label so a single
    /// leading tag covers a run of lines.
    pub fn into_segments(self) -> Vec<Segment> {
        let mut segments = Vec::with_capacity(self.cues.len());
        let mut current_speaker = String::from("SPEAKER_1");
        for (index, cue) in self.cues.into_iter().enumerate() {
            if let Some(speaker) = cue.speaker() {
                current_speaker = speaker;
            }
            segments.push(Segment {
                id: format!("seg_{index}"),
                text: cue.plain_text(),
                start_time: cue.start,
                end_time: cue.end,
                speaker: current_speaker.clone(),
                confidence: 1.0,
            });
        }
        segments
    }
}

/// Parse a VTT file from disk.
pub fn parse_file(path: &Path) -> Result<VttDocument, VttError> {
    let content = std::fs::read_to_string(path).map_err(|source| VttError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_str(&content)
}

/// Parse VTT content. Requires the `WEBVTT` header and at least one cue.
pub fn parse_str(content: &str) -> Result<VttDocument, VttError> {
    let mut lines = content.lines().peekable();

    match lines.peek() {
        Some(first) if first.trim_start_matches('\u{feff}').starts_with("WEBVTT") => {
            lines.next();
        }
        _ => return Err(VttError::MissingHeader),
    }

    let mut doc = VttDocument::default();

    while let Some(line) = lines.next() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        if trimmed.starts_with("NOTE") {
            // A NOTE block runs to the next blank line; inline text after
            // the keyword counts as its first line.
            let inline = trimmed.trim_start_matches("NOTE").trim();
            if !inline.is_empty() {
                apply_metadata_line(&mut doc.metadata, inline);
            }
            for note_line in lines.by_ref() {
                let note_line = note_line.trim();
                if note_line.is_empty() {
                    break;
                }
                apply_metadata_line(&mut doc.metadata, note_line);
            }
            continue;
        }

        if let Some(caps) = CUE_TIMING.captures(trimmed) {
            let start = parse_timestamp(&caps[1])?;
            let end = parse_timestamp(&caps[2])?;
            let mut text_lines = Vec::new();
            while let Some(next) = lines.peek() {
                let next = next.trim();
                if next.is_empty() || CUE_TIMING.is_match(next) {
                    break;
                }
                if let Some(text_line) = lines.next() {
                    text_lines.push(text_line.trim().to_string());
                }
            }
            doc.cues.push(Cue {
                start,
                end,
                text: text_lines.join("\n"),
            });
        }
        // Cue identifiers and unknown lines are skipped; the timing line is
        // the anchor.
    }

    if doc.cues.is_empty() {
        return Err(VttError::Empty);
    }
    Ok(doc)
}

/// Lenient cue scan for model-produced transcript fragments: no header
/// required, malformed cues skipped. Continuation stitching runs on this.
pub fn parse_cues(content: &str) -> Vec<Cue> {
    let mut cues = Vec::new();
    let mut lines = content.lines().peekable();
    while let Some(line) = lines.next() {
        let trimmed = line.trim();
        let Some(caps) = CUE_TIMING.captures(trimmed) else {
            continue;
        };
        let (Ok(start), Ok(end)) = (parse_timestamp(&caps[1]), parse_timestamp(&caps[2])) else {
            continue;
        };
        let mut text_lines = Vec::new();
        while let Some(next) = lines.peek() {
            let next = next.trim();
            if next.is_empty() || CUE_TIMING.is_match(next) {
                break;
            }
            if let Some(text_line) = lines.next() {
                text_lines.push(text_line.trim().to_string());
            }
        }
        if !text_lines.is_empty() {
            cues.push(Cue {
                start,
                end,
                text: text_lines.join("\n"),
            });
        }
    }
    cues
}

fn apply_metadata_line(metadata: &mut VttMetadata, line: &str) {
    let Some((key, value)) = line.split_once(':') else {
        return;
    };
    let key = key.trim().to_lowercase();
    let value = value.trim().to_string();
    if value.is_empty() {
        return;
    }
    match key.as_str() {
        "podcast" => metadata.podcast = Some(value),
        "episode" => metadata.episode = Some(value),
        "author" => metadata.author = Some(value),
        "youtube_url" => metadata.youtube_url = Some(value),
        "published_date" | "published" => metadata.published_date = Some(value),
        "description" => metadata.description = Some(value),
        "duration" => metadata.duration = Some(value),
        _ => {
            metadata.extra.insert(key, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
WEBVTT

NOTE
Podcast: Deep Questions
Episode: On Focus
Author: Cal Newport
Duration: 1:30:00

00:00:00.000 --> 00:00:04.000
<v SPEAKER_1>Welcome back to the show.

00:00:04.000 --> 00:00:08.500
<v SPEAKER_2>Glad to be here.

00:00:08.500 --> 00:00:11.000
It has been a while.
";

    #[test]
    fn test_parses_cues_and_metadata() {
        let doc = parse_str(SAMPLE).unwrap();
        assert_eq!(doc.cues.len(), 3);
        assert_eq!(doc.metadata.podcast.as_deref(), Some("Deep Questions"));
        assert_eq!(doc.metadata.episode.as_deref(), Some("On Focus"));
        assert_eq!(doc.metadata.duration.as_deref(), Some("1:30:00"));
    }

    #[test]
    fn test_untagged_cue_inherits_speaker() {
        let segments = parse_str(SAMPLE).unwrap().into_segments();
        assert_eq!(segments[0].speaker, "SPEAKER_1");
        assert_eq!(segments[1].speaker, "SPEAKER_2");
        assert_eq!(segments[2].speaker, "SPEAKER_2");
        assert_eq!(segments[2].text, "It has been a while.");
    }

    #[test]
    fn test_empty_vtt_is_error() {
        assert!(matches!(parse_str("WEBVTT\n\n"), Err(VttError::Empty)));
    }

    #[test]
    fn test_missing_header_is_error() {
        let err = parse_str("00:00:00.000 --> 00:00:01.000\nhi\n");
        assert!(matches!(err, Err(VttError::MissingHeader)));
    }

    #[test]
    fn test_parse_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ep.vtt");
        std::fs::write(&path, SAMPLE).unwrap();
        let doc = parse_file(&path).unwrap();
        assert_eq!(doc.cues.len(), 3);
    }
}
