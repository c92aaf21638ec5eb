//! Checkpoint file format and store operations

use crate::CheckpointError;
use chrono::{DateTime, Duration, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use podgraph_config::CheckpointSettings;
use podgraph_core::Phase;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// Current envelope version. v1 predates extraction modes; v2 added the
/// `extraction_mode` field; v3 added the `schema_discovery` section.
pub const CURRENT_VERSION: u32 = 3;

/// Versioned checkpoint envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub version: u32,
    pub episode_id: String,
    pub last_phase: Phase,
    pub timestamp: DateTime<Utc>,
    /// Phase name -> serialized snapshot. Payloads that do not serialize
    /// cleanly are stored as a `{"completed": true}` marker and regenerated
    /// on resume.
    pub payloads: BTreeMap<String, Value>,
    #[serde(default)]
    pub metadata: Value,
    #[serde(default = "default_extraction_mode")]
    pub extraction_mode: String,
    #[serde(default)]
    pub schema_discovery: Value,
}

fn default_extraction_mode() -> String {
    "combined".to_string()
}

impl Checkpoint {
    /// Whether a phase should be skipped on resume: true iff the recorded
    /// phase is at or past it in pipeline order.
    pub fn skips(&self, phase: Phase) -> bool {
        self.last_phase >= phase
    }

    pub fn payload(&self, phase: Phase) -> Option<&Value> {
        self.payloads.get(phase.as_str())
    }
}

/// Sidecar metadata written next to each checkpoint file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    pub version: u32,
    pub episode_id: String,
    pub last_phase: String,
    pub updated_at: DateTime<Utc>,
    pub compressed: bool,
    pub size_bytes: u64,
    pub checksum: String,
}

/// Filesystem-backed checkpoint store.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
    compress: bool,
    max_age: Duration,
}

impl CheckpointStore {
    pub fn new(settings: &CheckpointSettings) -> Self {
        Self {
            dir: PathBuf::from(&settings.dir),
            compress: settings.compress,
            max_age: Duration::days(settings.max_age_days as i64),
        }
    }

    fn checkpoint_path(&self, episode_id: &str) -> PathBuf {
        let suffix = if self.compress { ".ckpt.gz" } else { ".ckpt" };
        self.dir.join(format!("{}{suffix}", sanitize(episode_id)))
    }

    fn metadata_path(&self, episode_id: &str) -> PathBuf {
        self.dir.join(format!("{}.meta.json", sanitize(episode_id)))
    }

    /// Persist the checkpoint for an episode, replacing any prior one.
    pub fn save(
        &self,
        episode_id: &str,
        last_phase: Phase,
        payloads: BTreeMap<String, Value>,
        metadata: Value,
    ) -> Result<(), CheckpointError> {
        let checkpoint = Checkpoint {
            version: CURRENT_VERSION,
            episode_id: episode_id.to_string(),
            last_phase,
            timestamp: Utc::now(),
            payloads,
            metadata,
            extraction_mode: default_extraction_mode(),
            schema_discovery: Value::Null,
        };
        self.write(&checkpoint)
    }

    fn write(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        std::fs::create_dir_all(&self.dir).map_err(|source| CheckpointError::Io {
            path: self.dir.display().to_string(),
            source,
        })?;

        let body = serde_json::to_vec(checkpoint)?;
        let checksum = hex_digest(&body);
        let encoded = if self.compress {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&body).map_err(|source| CheckpointError::Io {
                path: self.checkpoint_path(&checkpoint.episode_id).display().to_string(),
                source,
            })?;
            encoder.finish().map_err(|source| CheckpointError::Io {
                path: self.checkpoint_path(&checkpoint.episode_id).display().to_string(),
                source,
            })?
        } else {
            body
        };

        let path = self.checkpoint_path(&checkpoint.episode_id);
        atomic_write(&path, &encoded)?;

        let meta = CheckpointMetadata {
            version: checkpoint.version,
            episode_id: checkpoint.episode_id.clone(),
            last_phase: checkpoint.last_phase.as_str().to_string(),
            updated_at: checkpoint.timestamp,
            compressed: self.compress,
            size_bytes: encoded.len() as u64,
            checksum,
        };
        atomic_write(&self.metadata_path(&checkpoint.episode_id), &serde_json::to_vec_pretty(&meta)?)?;

        tracing::debug!(
            episode_id = %checkpoint.episode_id,
            phase = %checkpoint.last_phase,
            bytes = encoded.len(),
            "checkpoint saved"
        );
        Ok(())
    }

    /// Load the checkpoint for an episode, migrating older envelope
    /// versions in place (with a `.bak` backup of the original file).
    pub fn load(&self, episode_id: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        let path = self.find_existing(episode_id);
        let Some(path) = path else {
            return Ok(None);
        };

        let raw = std::fs::read(&path).map_err(|source| CheckpointError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let body = if path.extension().map(|e| e == "gz").unwrap_or(false) {
            let mut decoder = GzDecoder::new(raw.as_slice());
            let mut out = Vec::new();
            decoder.read_to_end(&mut out).map_err(|source| CheckpointError::Io {
                path: path.display().to_string(),
                source,
            })?;
            out
        } else {
            raw
        };

        let mut envelope: Value =
            serde_json::from_slice(&body).map_err(|e| CheckpointError::Corrupt {
                episode_id: episode_id.to_string(),
                reason: e.to_string(),
            })?;

        let version = envelope.get("version").and_then(Value::as_u64).unwrap_or(1) as u32;
        if version < CURRENT_VERSION {
            let backup = path.with_extension("bak");
            if let Err(e) = std::fs::copy(&path, &backup) {
                tracing::warn!(error = %e, "failed to write pre-migration backup");
            }
            migrate(&mut envelope, version);
            tracing::info!(episode_id, from = version, to = CURRENT_VERSION, "migrated checkpoint");
        }

        let checkpoint: Checkpoint =
            serde_json::from_value(envelope).map_err(|e| CheckpointError::Corrupt {
                episode_id: episode_id.to_string(),
                reason: e.to_string(),
            })?;

        if version < CURRENT_VERSION {
            self.write(&checkpoint)?;
        }
        Ok(Some(checkpoint))
    }

    pub fn delete(&self, episode_id: &str) -> Result<(), CheckpointError> {
        for path in [
            self.dir.join(format!("{}.ckpt", sanitize(episode_id))),
            self.dir.join(format!("{}.ckpt.gz", sanitize(episode_id))),
            self.metadata_path(episode_id),
        ] {
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(source) => {
                    return Err(CheckpointError::Io {
                        path: path.display().to_string(),
                        source,
                    })
                }
            }
        }
        Ok(())
    }

    /// Age of the stored checkpoint, if any.
    pub fn age(&self, episode_id: &str) -> Result<Option<Duration>, CheckpointError> {
        let Some(checkpoint) = self.load(episode_id)? else {
            return Ok(None);
        };
        Ok(Some(Utc::now() - checkpoint.timestamp))
    }

    pub fn exists(&self, episode_id: &str) -> bool {
        self.find_existing(episode_id).is_some()
    }

    /// Remove checkpoints older than the configured maximum age. Returns
    /// the number of files removed.
    pub fn clean_old(&self) -> Result<usize, CheckpointError> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(source) => {
                return Err(CheckpointError::Io {
                    path: self.dir.display().to_string(),
                    source,
                })
            }
        };

        let cutoff = std::time::SystemTime::now()
            - std::time::Duration::from_secs(self.max_age.num_seconds().max(0) as u64);
        let mut removed = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
            if !(name.ends_with(".ckpt") || name.ends_with(".ckpt.gz") || name.ends_with(".meta.json"))
            {
                continue;
            }
            let Ok(modified) = entry.metadata().and_then(|m| m.modified()) else {
                continue;
            };
            if modified < cutoff {
                if std::fs::remove_file(&path).is_ok() {
                    removed += 1;
                    tracing::debug!(path = %path.display(), "removed stale checkpoint");
                }
            }
        }
        if removed > 0 {
            tracing::info!(removed, "cleaned old checkpoints");
        }
        Ok(removed)
    }

    fn find_existing(&self, episode_id: &str) -> Option<PathBuf> {
        for suffix in [".ckpt.gz", ".ckpt"] {
            let path = self.dir.join(format!("{}{suffix}", sanitize(episode_id)));
            if path.exists() {
                return Some(path);
            }
        }
        None
    }
}

/// Envelope migrations. Applied in sequence so a v1 file passes through
/// the v2 step on its way to v3.
fn migrate(envelope: &mut Value, from: u32) {
    let Some(object) = envelope.as_object_mut() else {
        return;
    };
    if from < 2 {
        object
            .entry("extraction_mode")
            .or_insert_with(|| Value::String("combined".into()));
    }
    if from < 3 {
        object.entry("schema_discovery").or_insert(Value::Null);
    }
    object.insert("version".into(), Value::from(CURRENT_VERSION));
}

fn atomic_write(path: &Path, body: &[u8]) -> Result<(), CheckpointError> {
    let tmp = path.with_extension("tmp");
    let io_err = |source| CheckpointError::Io {
        path: path.display().to_string(),
        source,
    };
    let mut file = std::fs::File::create(&tmp).map_err(io_err)?;
    file.write_all(body).map_err(io_err)?;
    file.sync_all().map_err(io_err)?;
    std::fs::rename(&tmp, path).map_err(io_err)?;
    Ok(())
}

fn hex_digest(body: &[u8]) -> String {
    let digest = Sha256::digest(body);
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Episode ids come from callers; keep them filesystem-safe.
fn sanitize(episode_id: &str) -> String {
    episode_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}
