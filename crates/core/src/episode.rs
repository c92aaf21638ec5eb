//! Episode and podcast metadata

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The podcast an episode belongs to.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PodcastInfo {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub host: String,
}

/// Caller-supplied episode header, merged with VTT NOTE metadata before
/// storage. Only `episode_id` is required.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EpisodeMetadata {
    pub episode_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub published_date: String,
    #[serde(default)]
    pub youtube_url: String,
    /// Used for the pre-processing idempotency check
    #[serde(default)]
    pub vtt_filename: String,
    #[serde(default)]
    pub podcast: PodcastInfo,
    /// Unrecognized VTT NOTE keys land here under a `vtt_` prefix
    #[serde(default)]
    pub extra: HashMap<String, String>,
}

/// Metadata recovered from VTT NOTE blocks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VttMetadata {
    pub podcast: Option<String>,
    pub episode: Option<String>,
    pub author: Option<String>,
    pub youtube_url: Option<String>,
    pub published_date: Option<String>,
    pub description: Option<String>,
    /// "HH:MM:SS" or "MM:SS"; drives transcription coverage checks
    pub duration: Option<String>,
    pub extra: HashMap<String, String>,
}

impl EpisodeMetadata {
    /// Merge VTT NOTE metadata in; VTT values are authoritative and win
    /// over caller-supplied fields.
    pub fn merge_vtt_metadata(&mut self, vtt: &VttMetadata) {
        if let Some(url) = &vtt.youtube_url {
            self.youtube_url = url.clone();
        }
        if let Some(description) = &vtt.description {
            self.description = description.clone();
        }
        if let Some(date) = &vtt.published_date {
            self.published_date = date.clone();
        }
        if let Some(episode) = &vtt.episode {
            self.title = episode.clone();
        }
        if let Some(podcast) = &vtt.podcast {
            self.podcast.name = podcast.clone();
            if self.podcast.id.is_empty() {
                self.podcast.id = slugify(podcast);
            }
        }
        if let Some(author) = &vtt.author {
            self.podcast.host = author.clone();
        }
        for (key, value) in &vtt.extra {
            self.extra.insert(format!("vtt_{key}"), value.clone());
        }
    }
}

/// Lowercase alphanumeric id from a display name.
fn slugify(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_dash = true;
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }
    out.trim_end_matches('-').to_string()
}
