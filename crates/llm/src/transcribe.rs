//! Audio transcription with continuation-based completion
//!
//! A single model response caps out near 8k output tokens, well short of a
//! long episode. The client transcribes once, measures coverage against the
//! expected duration, and keeps requesting continuations from the last cue
//! until coverage clears the threshold or the attempt budget runs out. The
//! partial transcripts are stitched into one WEBVTT document with
//! overlapping duplicate cues dropped.

use crate::client::GeminiClient;
use podgraph_config::ContinuationSettings;
use podgraph_core::{EpisodeMetadata, GenerationOptions, LlmResult};
use podgraph_vtt::cue::strip_voice_tags;
use podgraph_vtt::{format_timestamp, parse_cues, render, Cue};

/// Reference to an audio file the model can read (upload URI or URL).
#[derive(Debug, Clone)]
pub struct AudioSource {
    pub uri: String,
}

/// Final transcription result plus completeness accounting.
#[derive(Debug, Clone)]
pub struct TranscriptionOutcome {
    pub vtt: String,
    /// Last cue end over expected duration
    pub coverage: f64,
    pub continuation_calls: u32,
    pub complete: bool,
}

/// Coverage = end time of the last cue divided by the expected duration.
pub fn transcript_coverage(vtt_text: &str, duration_secs: f64) -> f64 {
    if duration_secs <= 0.0 {
        return 0.0;
    }
    let cues = parse_cues(vtt_text);
    match cues.last() {
        Some(last) => (last.end / duration_secs).max(0.0),
        None => 0.0,
    }
}

/// Whether two cue texts are near-duplicates: equal after voice-tag
/// stripping and lowercasing, or one contained in the other with a length
/// ratio at or above the threshold.
pub fn texts_similar(a: &str, b: &str, threshold: f64) -> bool {
    let a = strip_voice_tags(a).to_lowercase();
    let b = strip_voice_tags(b).to_lowercase();
    if a.is_empty() || b.is_empty() {
        return false;
    }
    if a == b {
        return true;
    }
    let (shorter, longer) = if a.len() < b.len() { (&a, &b) } else { (&b, &a) };
    longer.contains(shorter.as_str()) && shorter.len() as f64 / longer.len() as f64 >= threshold
}

/// Combine transcript fragments into a single WEBVTT document.
///
/// All cues are parsed, sorted by start time, and deduplicated: a cue whose
/// start overlaps the previous cue's end by more than `overlap_seconds` is
/// dropped when its text is similar, otherwise its start is nudged past the
/// previous end.
pub fn stitch_transcripts(fragments: &[String], cfg: &ContinuationSettings) -> String {
    if fragments.is_empty() {
        return String::new();
    }
    if fragments.len() == 1 {
        return fragments[0].clone();
    }

    let mut cues: Vec<Cue> = Vec::new();
    for (i, fragment) in fragments.iter().enumerate() {
        let parsed = parse_cues(fragment);
        tracing::debug!(fragment = i + 1, cues = parsed.len(), "parsed transcript fragment");
        cues.extend(parsed);
    }
    cues.sort_by(|a, b| a.start.partial_cmp(&b.start).unwrap_or(std::cmp::Ordering::Equal));

    let mut deduplicated: Vec<Cue> = Vec::with_capacity(cues.len());
    for mut cue in cues {
        let Some(last) = deduplicated.last() else {
            deduplicated.push(cue);
            continue;
        };
        let overlap = last.end - cue.start;
        if overlap <= cfg.overlap_seconds {
            deduplicated.push(cue);
        } else if texts_similar(&cue.text, &last.text, cfg.similarity_threshold) {
            tracing::debug!(start = cue.start, "dropping duplicate cue");
        } else {
            // Overlapping time but different content: keep it, nudged past
            // the previous cue.
            cue.start = last.end + 0.1;
            deduplicated.push(cue);
        }
    }

    tracing::info!(cues = deduplicated.len(), "stitched transcript");
    render(&deduplicated)
}

fn transcription_prompt(meta: &EpisodeMetadata) -> String {
    format!(
        "Transcribe this podcast episode into WebVTT format.\n\n\
         Episode information:\n\
         - Podcast: {}\n\
         - Title: {}\n\
         - Date: {}\n\n\
         Requirements:\n\
         1. WebVTT format with timestamps (HH:MM:SS.mmm --> HH:MM:SS.mmm)\n\
         2. Speaker diarization with <v SPEAKER_N> voice tags\n\
         3. Segments of 5-7 seconds, at most 2 lines of text each\n\
         4. Start from the very beginning of the audio",
        none_if_empty(&meta.podcast.name),
        none_if_empty(&meta.title),
        none_if_empty(&meta.published_date),
    )
}

fn continuation_prompt(meta: &EpisodeMetadata, from_secs: f64, context: &[Cue]) -> String {
    let start = format_timestamp(from_secs);
    let context_section = if context.is_empty() {
        "No previous context available".to_string()
    } else {
        context
            .iter()
            .map(|c| {
                format!(
                    "{} --> {}: {}",
                    format_timestamp(c.start),
                    format_timestamp(c.end),
                    strip_voice_tags(&c.text)
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    };

    format!(
        "Continue transcribing this podcast episode from timestamp {start} onward.\n\n\
         Episode information:\n\
         - Podcast: {}\n\
         - Title: {}\n\n\
         Previous transcript context (last few segments):\n\
         {context_section}\n\n\
         Continue the transcript from {start} onward using the same format:\n\
         1. WebVTT timestamps (HH:MM:SS.mmm --> HH:MM:SS.mmm)\n\
         2. <v SPEAKER_N> voice tags, numbering consistent with the context\n\
         3. Segments of 5-7 seconds, at most 2 lines of text\n\
         4. Start immediately from {start} - do not repeat previous content",
        none_if_empty(&meta.podcast.name),
        none_if_empty(&meta.title),
    )
}

fn none_if_empty(value: &str) -> &str {
    if value.is_empty() {
        "Unknown"
    } else {
        value
    }
}

impl GeminiClient {
    /// Transcribe an episode to WEBVTT, continuing past output-length limits
    /// until coverage clears the configured threshold.
    ///
    /// `expected_duration_secs` of zero disables the continuation loop (the
    /// first response is returned as-is).
    pub async fn transcribe(
        &self,
        audio: &AudioSource,
        meta: &EpisodeMetadata,
        expected_duration_secs: f64,
    ) -> LlmResult<TranscriptionOutcome> {
        let cfg = self.settings().continuation.clone();
        let opts = GenerationOptions::structured();
        let estimate =
            (expected_duration_secs / 60.0).ceil() as u64 * podgraph_config::constants::TOKENS_PER_AUDIO_MINUTE;

        tracing::info!(title = %meta.title, uri = %audio.uri, "starting transcription");
        let initial = self
            .generate_with_audio(&audio.uri, &transcription_prompt(meta), &opts, estimate.max(1))
            .await?;

        if expected_duration_secs <= 0.0 {
            return Ok(TranscriptionOutcome {
                coverage: 0.0,
                continuation_calls: 0,
                complete: true,
                vtt: initial,
            });
        }

        let mut fragments = vec![initial];
        let mut attempts = 0u32;

        loop {
            let current = stitch_transcripts(&fragments, &cfg);
            let coverage = transcript_coverage(&current, expected_duration_secs);
            tracing::info!(
                attempt = attempts,
                coverage = format!("{:.1}%", coverage * 100.0),
                "transcript coverage check"
            );

            if coverage >= cfg.min_coverage {
                return Ok(TranscriptionOutcome {
                    vtt: current,
                    coverage,
                    continuation_calls: attempts,
                    complete: true,
                });
            }
            if attempts >= cfg.max_attempts {
                tracing::warn!(
                    coverage = format!("{:.1}%", coverage * 100.0),
                    min = format!("{:.1}%", cfg.min_coverage * 100.0),
                    "transcript remains incomplete after continuation budget"
                );
                return Ok(TranscriptionOutcome {
                    vtt: current,
                    coverage,
                    continuation_calls: attempts,
                    complete: false,
                });
            }

            let cues = parse_cues(&current);
            let Some(last) = cues.last() else {
                tracing::warn!("no cues available for continuation");
                return Ok(TranscriptionOutcome {
                    vtt: current,
                    coverage,
                    continuation_calls: attempts,
                    complete: false,
                });
            };
            let context_start = cues.len().saturating_sub(5);
            let prompt = continuation_prompt(meta, last.end, &cues[context_start..]);

            let continuation = self
                .generate_with_audio(&audio.uri, &prompt, &opts, estimate.max(1))
                .await?;
            fragments.push(continuation);
            attempts += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> ContinuationSettings {
        ContinuationSettings::default()
    }

    fn vtt(cues: &[(f64, f64, &str)]) -> String {
        let cues: Vec<Cue> = cues
            .iter()
            .map(|&(start, end, text)| Cue {
                start,
                end,
                text: text.to_string(),
            })
            .collect();
        render(&cues)
    }

    #[test]
    fn test_coverage() {
        let text = vtt(&[(0.0, 30.0, "<v SPEAKER_1>a"), (30.0, 85.0, "<v SPEAKER_1>b")]);
        assert!((transcript_coverage(&text, 100.0) - 0.85).abs() < 1e-9);
        assert_eq!(transcript_coverage("", 100.0), 0.0);
        assert_eq!(transcript_coverage(&text, 0.0), 0.0);
    }

    #[test]
    fn test_similarity() {
        assert!(texts_similar(
            "<v SPEAKER_1>So that was the idea.",
            "so that was the idea.",
            0.8
        ));
        assert!(!texts_similar("completely different", "no overlap here", 0.8));
        // Contained but far shorter: below ratio threshold
        assert!(!texts_similar("so", "so that was the idea and much more", 0.8));
    }

    #[test]
    fn test_stitch_adjacent_fragments_no_duplicates() {
        let a = vtt(&[(0.0, 5.0, "<v SPEAKER_1>one"), (5.0, 10.0, "<v SPEAKER_2>two")]);
        let b = vtt(&[(10.0, 15.0, "<v SPEAKER_1>three")]);
        let stitched = stitch_transcripts(&[a, b], &cfg());
        let cues = parse_cues(&stitched);
        assert_eq!(cues.len(), 3);
        assert!((cues[2].start - 10.0).abs() < 1e-6);
    }

    #[test]
    fn test_stitch_drops_similar_overlap() {
        let a = vtt(&[(0.0, 10.0, "<v SPEAKER_1>the same sentence here")]);
        let b = vtt(&[
            (4.0, 10.0, "the same sentence here"),
            (10.0, 15.0, "<v SPEAKER_1>new content"),
        ]);
        let stitched = stitch_transcripts(&[a, b], &cfg());
        let cues = parse_cues(&stitched);
        assert_eq!(cues.len(), 2);
        assert_eq!(strip_voice_tags(&cues[1].text), "new content");
    }

    #[test]
    fn test_stitch_adjusts_different_overlap() {
        let a = vtt(&[(0.0, 10.0, "<v SPEAKER_1>first topic")]);
        let b = vtt(&[(4.0, 12.0, "<v SPEAKER_2>unrelated interjection")]);
        let stitched = stitch_transcripts(&[a, b], &cfg());
        let cues = parse_cues(&stitched);
        assert_eq!(cues.len(), 2);
        assert!(cues[1].start > 10.0);
    }

    #[test]
    fn test_stitch_single_fragment_untouched() {
        let a = "WEBVTT\n\nnot really cues";
        let out = stitch_transcripts(&[a.to_string()], &cfg());
        assert_eq!(out, a);
    }
}
