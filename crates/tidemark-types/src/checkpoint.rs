//! In-flight run checkpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::event::RunId;

/// Progress record for one in-flight run.
///
/// Written after every committed batch, deleted on successful finalize.
/// Survives a crash so a restarted process can decide resume-or-restart:
/// `last_batch_watermark` equals the largest watermark definitely persisted
/// by the analytics store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressCheckpoint {
    pub run_id: RunId,
    pub target_table: String,
    pub rows_done: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows_total: Option<u64>,
    /// Encoded temporal tuple of the last acknowledged batch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_batch_watermark: Option<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProgressCheckpoint {
    /// Fresh checkpoint at the start of a run's copy phase.
    #[must_use]
    pub fn begin(run_id: RunId, target_table: impl Into<String>, rows_total: Option<u64>) -> Self {
        let now = Utc::now();
        Self {
            run_id,
            target_table: target_table.into(),
            rows_done: 0,
            rows_total,
            last_batch_watermark: None,
            started_at: now,
            updated_at: now,
        }
    }

    /// Record another committed batch.
    pub fn advance(&mut self, batch_rows: u64, batch_watermark: Option<String>) {
        self.rows_done += batch_rows;
        if batch_watermark.is_some() {
            self.last_batch_watermark = batch_watermark;
        }
        self.updated_at = Utc::now();
    }

    /// Whether a restarted process should resume from this checkpoint.
    #[must_use]
    pub fn is_resumable(&self) -> bool {
        self.rows_done > 0 && self.last_batch_watermark.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_starts_at_zero() {
        let cp = ProgressCheckpoint::begin(RunId::new(), "events", Some(25_000));
        assert_eq!(cp.rows_done, 0);
        assert!(!cp.is_resumable());
    }

    #[test]
    fn advance_accumulates_and_keeps_last_watermark() {
        let mut cp = ProgressCheckpoint::begin(RunId::new(), "events", None);
        cp.advance(500, Some("2026-01-15T10:00:00Z".into()));
        cp.advance(500, None); // batch with no temporal key keeps the prior mark
        assert_eq!(cp.rows_done, 1000);
        assert_eq!(
            cp.last_batch_watermark.as_deref(),
            Some("2026-01-15T10:00:00Z")
        );
        assert!(cp.is_resumable());
    }

    #[test]
    fn serde_roundtrip() {
        let mut cp = ProgressCheckpoint::begin(RunId::new(), "events", Some(100));
        cp.advance(10, Some("5".into()));
        let json = serde_json::to_string(&cp).unwrap();
        let back: ProgressCheckpoint = serde_json::from_str(&json).unwrap();
        assert_eq!(cp, back);
    }
}
