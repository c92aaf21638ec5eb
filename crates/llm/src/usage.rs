//! Per-key usage accounting and its persisted state

use chrono::{DateTime, NaiveDate, Utc};
use podgraph_config::RateLimits;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Usage counters for a single API key. Counters reset when the local date
/// crosses `last_reset_date`; the estimate charged per call deliberately
/// over-counts so daily budgets stay safe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyUsage {
    pub requests_today: u32,
    pub tokens_today: u64,
    pub last_request_time: Option<DateTime<Utc>>,
    pub last_reset_date: NaiveDate,
    pub is_available: bool,
    pub is_paid_tier: bool,
}

impl KeyUsage {
    pub fn new(is_paid_tier: bool, today: NaiveDate) -> Self {
        Self {
            requests_today: 0,
            tokens_today: 0,
            last_request_time: None,
            last_reset_date: today,
            is_available: true,
            is_paid_tier,
        }
    }

    /// Reset daily counters once the stored date falls behind today.
    pub fn reset_if_stale(&mut self, today: NaiveDate) {
        if self.last_reset_date < today {
            self.requests_today = 0;
            self.tokens_today = 0;
            self.last_reset_date = today;
            self.is_available = true;
            tracing::info!(date = %today, "reset daily usage counters");
        }
    }

    /// Whether this key's daily budget can absorb a call of `estimate`
    /// tokens. Paid keys always can.
    pub fn within_daily_budget(&self, limits: &RateLimits, estimate: u64) -> bool {
        if self.is_paid_tier {
            return true;
        }
        self.requests_today < limits.rpd && self.tokens_today + estimate <= limits.tpd
    }

    /// Seconds of free-tier spacing still owed before the next request.
    /// Zero for paid keys.
    pub fn spacing_wait(&self, limits: &RateLimits, now: DateTime<Utc>) -> f64 {
        if self.is_paid_tier {
            return 0.0;
        }
        let Some(last) = self.last_request_time else {
            return 0.0;
        };
        let min_gap = 60.0 / limits.rpm as f64;
        let since = (now - last).num_milliseconds() as f64 / 1000.0;
        (min_gap - since).max(0.0)
    }

    /// Charge one request and its token estimate.
    pub fn record_call(&mut self, estimate: u64, now: DateTime<Utc>) {
        self.requests_today += 1;
        self.tokens_today += estimate;
        self.last_request_time = Some(now);
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedState {
    last_updated: DateTime<Utc>,
    trackers: Vec<KeyUsage>,
}

/// The process-global usage table, persisted to a single JSON file after
/// every successful call. Callers hold the owning lock; this type does the
/// bookkeeping and atomic file I/O.
#[derive(Debug)]
pub struct UsageTable {
    keys: Vec<KeyUsage>,
    path: PathBuf,
}

impl UsageTable {
    /// Load persisted state if present, otherwise start fresh. Count
    /// mismatches (keys added or removed) fall back to fresh trackers for
    /// the unmatched tail.
    pub fn load_or_new(path: &Path, paid_flags: &[bool], today: NaiveDate) -> Self {
        let mut keys: Vec<KeyUsage> = paid_flags
            .iter()
            .map(|&paid| KeyUsage::new(paid, today))
            .collect();

        match std::fs::read_to_string(path) {
            Ok(raw) => match serde_json::from_str::<PersistedState>(&raw) {
                Ok(state) => {
                    for (i, stored) in state.trackers.into_iter().enumerate() {
                        if let Some(slot) = keys.get_mut(i) {
                            let paid = slot.is_paid_tier;
                            *slot = stored;
                            slot.is_paid_tier = paid;
                            slot.reset_if_stale(today);
                        }
                    }
                    tracing::info!(path = %path.display(), "loaded usage state");
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "unreadable usage state, starting fresh");
                }
            },
            Err(_) => {
                tracing::debug!(path = %path.display(), "no usage state on disk");
            }
        }

        Self {
            keys,
            path: path.to_path_buf(),
        }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn key(&self, index: usize) -> &KeyUsage {
        &self.keys[index]
    }

    pub fn key_mut(&mut self, index: usize) -> &mut KeyUsage {
        &mut self.keys[index]
    }

    pub fn reset_stale(&mut self, today: NaiveDate) {
        for key in &mut self.keys {
            key.reset_if_stale(today);
        }
    }

    /// Write the table atomically (temp file + rename). Failures are
    /// reported, not fatal; accounting continues in memory.
    pub fn persist(&self) -> std::io::Result<()> {
        let state = PersistedState {
            last_updated: Utc::now(),
            trackers: self.keys.clone(),
        };
        let body = serde_json::to_vec_pretty(&state)?;
        let tmp = self.path.with_extension("json.tmp");
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(&body)?;
        file.sync_all()?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> RateLimits {
        RateLimits::default()
    }

    fn day(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[test]
    fn test_daily_reset() {
        let mut usage = KeyUsage::new(false, day("2026-07-30"));
        usage.requests_today = 25;
        usage.tokens_today = 900_000;
        usage.is_available = false;
        usage.reset_if_stale(day("2026-07-31"));
        assert_eq!(usage.requests_today, 0);
        assert_eq!(usage.tokens_today, 0);
        assert!(usage.is_available);
    }

    #[test]
    fn test_budget_enforced_for_free_keys() {
        let mut usage = KeyUsage::new(false, day("2026-07-30"));
        usage.requests_today = 24;
        assert!(usage.within_daily_budget(&limits(), 1_000));
        usage.requests_today = 25;
        assert!(!usage.within_daily_budget(&limits(), 1_000));
    }

    #[test]
    fn test_paid_keys_bypass_budget() {
        let mut usage = KeyUsage::new(true, day("2026-07-30"));
        usage.requests_today = 10_000;
        usage.tokens_today = u64::MAX / 2;
        assert!(usage.within_daily_budget(&limits(), 1_000_000));
    }

    #[test]
    fn test_spacing_wait() {
        let now = Utc::now();
        let mut usage = KeyUsage::new(false, now.date_naive());
        assert_eq!(usage.spacing_wait(&limits(), now), 0.0);
        usage.last_request_time = Some(now - chrono::Duration::seconds(5));
        let wait = usage.spacing_wait(&limits(), now);
        // 60/5 rpm = 12 s gap, 5 s elapsed
        assert!((wait - 7.0).abs() < 0.1);
    }

    #[test]
    fn test_persist_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".gemini_usage.json");
        let today = Utc::now().date_naive();

        let mut table = UsageTable::load_or_new(&path, &[false, false], today);
        table.key_mut(0).record_call(1234, Utc::now());
        table.persist().unwrap();

        let reloaded = UsageTable::load_or_new(&path, &[false, false], today);
        assert_eq!(reloaded.key(0).requests_today, 1);
        assert_eq!(reloaded.key(0).tokens_today, 1234);
        assert_eq!(reloaded.key(1).requests_today, 0);
    }

    #[test]
    fn test_reload_tolerates_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".gemini_usage.json");
        std::fs::write(&path, "not json").unwrap();
        let table = UsageTable::load_or_new(&path, &[false], Utc::now().date_naive());
        assert_eq!(table.key(0).requests_today, 0);
    }
}
