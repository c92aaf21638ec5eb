//! The pipeline result object

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineStatus {
    Completed,
    Failed,
    Skipped,
}

/// Extraction and storage counters reported per episode.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineStats {
    pub segments_parsed: usize,
    pub speakers_identified: usize,
    pub meaningful_units_created: usize,
    pub entities_extracted: usize,
    pub quotes_extracted: usize,
    pub insights_extracted: usize,
    pub relationships_extracted: usize,
    pub nodes_created: u64,
    pub relationships_created: u64,
    #[serde(default)]
    pub speakers_mapped: usize,
    #[serde(default)]
    pub analysis_results: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub phase: Option<String>,
    pub error_type: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResult {
    pub episode_id: String,
    pub status: PipelineStatus,
    /// Set for skipped episodes ("VTT filename already processed")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub existing_episode: Option<String>,
    pub phases_completed: Vec<String>,
    /// Phase name -> elapsed seconds
    pub phase_timings: HashMap<String, f64>,
    pub stats: PipelineStats,
    pub errors: Vec<ErrorRecord>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub total_time_secs: f64,
}

impl PipelineResult {
    pub fn started(episode_id: &str) -> Self {
        Self {
            episode_id: episode_id.to_string(),
            status: PipelineStatus::Failed,
            reason: None,
            existing_episode: None,
            phases_completed: Vec::new(),
            phase_timings: HashMap::new(),
            stats: PipelineStats::default(),
            errors: Vec::new(),
            start_time: Utc::now(),
            end_time: None,
            total_time_secs: 0.0,
        }
    }

    pub fn skipped(episode_id: &str, reason: &str, existing_episode: Option<String>) -> Self {
        Self {
            status: PipelineStatus::Skipped,
            reason: Some(reason.to_string()),
            existing_episode,
            ..Self::started(episode_id)
        }
    }
}
