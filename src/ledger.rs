//! Failure ledger.
//!
//! Keeps a per-tool record of terminal invocation failures and turns it into
//! a recency-weighted score:
//!
//! ```text
//! score(now) = count * decay_base ^ max(now - last_failed, 0)
//! ```
//!
//! Timestamps are Unix seconds as `f64`. When a path is configured the whole
//! ledger is rewritten as JSON after every recorded failure.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::LedgerError;

/// Current time as Unix seconds.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn now_unix() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// Failure statistics for one tool.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// Total recorded failures.
    pub count: u64,
    /// Timestamp of the latest failure.
    #[serde(rename = "last_failed")]
    pub last_failed_at: f64,
    /// Most recent failure timestamps, oldest first.
    pub recent: Vec<f64>,
}

impl FailureRecord {
    /// Decayed score at `now`. Never negative.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn score(&self, decay_base: f64, now: f64) -> f64 {
        let elapsed = (now - self.last_failed_at).max(0.0);
        self.count as f64 * decay_base.powf(elapsed)
    }
}

/// Per-tool failure ledger.
#[derive(Debug)]
pub struct FailureLedger {
    path: Option<PathBuf>,
    decay_base: f64,
    max_recent: usize,
    records: Mutex<HashMap<String, FailureRecord>>,
}

impl FailureLedger {
    /// Creates a ledger that is never persisted.
    #[must_use]
    pub fn in_memory(decay_base: f64, max_recent: usize) -> Self {
        Self {
            path: None,
            decay_base,
            max_recent,
            records: Mutex::new(HashMap::new()),
        }
    }

    /// Opens a persisted ledger, loading existing records if the file exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn open(
        path: impl Into<PathBuf>,
        decay_base: f64,
        max_recent: usize,
    ) -> Result<Self, LedgerError> {
        let path = path.into();
        let records = load_records(&path)?;
        tracing::debug!(path = %path.display(), tools = records.len(), "Loaded failure ledger");

        Ok(Self {
            path: Some(path),
            decay_base,
            max_recent,
            records: Mutex::new(records),
        })
    }

    /// The configured decay base.
    #[must_use]
    pub const fn decay_base(&self) -> f64 {
        self.decay_base
    }

    /// Records a failure of `tool` at `timestamp`.
    ///
    /// The in-memory record is always updated; the error only reports that
    /// persisting it failed.
    ///
    /// # Errors
    ///
    /// Returns an error if the ledger file cannot be written.
    pub fn record_failure(&self, tool: &str, timestamp: f64) -> Result<(), LedgerError> {
        let mut records = self.records.lock();
        let record = records.entry(tool.to_string()).or_default();
        record.count += 1;
        record.last_failed_at = timestamp;
        record.recent.push(timestamp);
        if record.recent.len() > self.max_recent {
            let excess = record.recent.len() - self.max_recent;
            record.recent.drain(..excess);
        }
        tracing::debug!(tool = %tool, count = record.count, "Recorded tool failure");
        self.save(&records)
    }

    /// Records a failure of `tool` now.
    ///
    /// # Errors
    ///
    /// Returns an error if the ledger file cannot be written.
    pub fn record(&self, tool: &str) -> Result<(), LedgerError> {
        self.record_failure(tool, now_unix())
    }

    /// A copy of the record for `tool`, if any.
    #[must_use]
    pub fn get(&self, tool: &str) -> Option<FailureRecord> {
        self.records.lock().get(tool).cloned()
    }

    /// Decayed failure score of `tool` at `now`; `0.0` without a record.
    #[must_use]
    pub fn failure_score(&self, tool: &str, now: f64) -> f64 {
        self.records
            .lock()
            .get(tool)
            .map_or(0.0, |record| record.score(self.decay_base, now))
    }

    /// Clears every record.
    ///
    /// # Errors
    ///
    /// Returns an error if the ledger file cannot be written.
    pub fn reset(&self) -> Result<(), LedgerError> {
        let mut records = self.records.lock();
        records.clear();
        self.save(&records)
    }

    fn save(&self, records: &HashMap<String, FailureRecord>) -> Result<(), LedgerError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let io_error = |source| LedgerError::Io {
            path: path.clone(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_error)?;
        }
        let content = serde_json::to_string_pretty(records).map_err(|source| {
            LedgerError::Corrupt {
                path: path.clone(),
                source,
            }
        })?;
        fs::write(path, content).map_err(io_error)
    }
}

fn load_records(path: &Path) -> Result<HashMap<String, FailureRecord>, LedgerError> {
    if !path.exists() {
        return Ok(HashMap::new());
    }

    let content = fs::read_to_string(path).map_err(|source| LedgerError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    if content.trim().is_empty() {
        return Ok(HashMap::new());
    }

    serde_json::from_str(&content).map_err(|source| LedgerError::Corrupt {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn unknown_tool_scores_zero() {
        let ledger = FailureLedger::in_memory(0.9, 20);
        assert!(ledger.failure_score("missing", 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn score_decays_over_time() {
        let ledger = FailureLedger::in_memory(0.9, 20);
        ledger.record_failure("flaky", 100.0).unwrap();
        ledger.record_failure("flaky", 100.0).unwrap();

        let at_failure = ledger.failure_score("flaky", 100.0);
        let later = ledger.failure_score("flaky", 110.0);
        let much_later = ledger.failure_score("flaky", 1000.0);

        assert!((at_failure - 2.0).abs() < 1e-9);
        assert!(later < at_failure);
        assert!(much_later < later);
        assert!(much_later >= 0.0);
    }

    #[test]
    fn score_does_not_grow_for_past_now() {
        let ledger = FailureLedger::in_memory(0.5, 20);
        ledger.record_failure("t", 100.0).unwrap();
        assert!((ledger.failure_score("t", 50.0) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn recent_is_bounded() {
        let ledger = FailureLedger::in_memory(0.9, 3);
        for i in 0..5 {
            ledger.record_failure("t", f64::from(i)).unwrap();
        }
        let record = ledger.get("t").unwrap();
        assert_eq!(record.count, 5);
        assert_eq!(record.recent, vec![2.0, 3.0, 4.0]);
        assert!((record.last_failed_at - 4.0).abs() < f64::EPSILON);
    }

    #[test]
    fn persists_and_reloads() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("failures.json");

        let ledger = FailureLedger::open(&path, 0.9, 20).unwrap();
        ledger.record_failure("t", 42.0).unwrap();
        assert!(path.exists());

        let reopened = FailureLedger::open(&path, 0.9, 20).unwrap();
        let record = reopened.get("t").unwrap();
        assert_eq!(record.count, 1);
        assert!((record.last_failed_at - 42.0).abs() < f64::EPSILON);

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["t"]["last_failed"], 42.0);
    }

    #[test]
    fn reset_clears_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("failures.json");

        let ledger = FailureLedger::open(&path, 0.9, 20).unwrap();
        ledger.record_failure("t", 1.0).unwrap();
        ledger.reset().unwrap();

        assert!(ledger.get("t").is_none());
        let reopened = FailureLedger::open(&path, 0.9, 20).unwrap();
        assert!(reopened.get("t").is_none());
    }

    #[test]
    fn corrupt_file_is_reported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("failures.json");
        fs::write(&path, "{not json").unwrap();

        let err = FailureLedger::open(&path, 0.9, 20).unwrap_err();
        assert!(matches!(err, LedgerError::Corrupt { .. }));
    }
}
