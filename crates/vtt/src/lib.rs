//! WebVTT parsing and rendering
//!
//! Handles the transcript dialect this pipeline consumes and produces:
//! - `WEBVTT` header, `HH:MM:SS.mmm --> HH:MM:SS.mmm` cue times
//!   (`MM:SS.mmm` accepted on input)
//! - `<v Speaker>` voice tags carrying diarization labels
//! - `NOTE` blocks holding episode metadata as `Key: value` lines

pub mod cue;
pub mod parser;
pub mod timestamp;

pub use cue::Cue;
pub use parser::{parse_cues, parse_file, parse_str, VttDocument};
pub use timestamp::{format_timestamp, parse_timestamp};

use thiserror::Error;

/// VTT processing errors
#[derive(Error, Debug)]
pub enum VttError {
    #[error("no cues found in VTT input")]
    Empty,

    #[error("missing WEBVTT header")]
    MissingHeader,

    #[error("malformed timestamp: {0}")]
    BadTimestamp(String),

    #[error("io error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Render cues back into a single WEBVTT document.
pub fn render(cues: &[Cue]) -> String {
    let mut out = String::from("WEBVTT\n\n");
    for cue in cues {
        out.push_str(&format_timestamp(cue.start));
        out.push_str(" --> ");
        out.push_str(&format_timestamp(cue.end));
        out.push('\n');
        out.push_str(&cue.text);
        out.push_str("\n\n");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_parse_round_trip() {
        let cues = vec![
            Cue {
                start: 0.0,
                end: 4.5,
                text: "<v SPEAKER_1>Welcome back to the show.".into(),
            },
            Cue {
                start: 4.5,
                end: 9.0,
                text: "<v SPEAKER_2>Thanks for having me.".into(),
            },
        ];
        let doc = parse_str(&render(&cues)).unwrap();
        assert_eq!(doc.cues.len(), 2);
        assert_eq!(doc.cues[1].text, cues[1].text);
        assert!((doc.cues[1].end - 9.0).abs() < 1e-6);
    }
}
