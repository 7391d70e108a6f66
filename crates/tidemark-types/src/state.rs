//! Persisted per-table sync state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of the most recent run for a table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    #[default]
    Idle,
    Running,
    Paused,
    Failed,
    Stopped,
}

impl SyncStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable sync state for one target table.
///
/// `last_watermark` is monotonically non-decreasing across successful
/// incremental runs and is advanced only after the analytics store has
/// acknowledged the rows behind it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    /// Wall-clock of the last successful finalize.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_at: Option<DateTime<Utc>>,
    /// Encoded max temporal-key tuple successfully loaded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_watermark: Option<String>,
    /// Rows in the last committed batch.
    #[serde(default)]
    pub last_batch_count: u64,
    /// Cumulative rows loaded since the last full sync.
    #[serde(default)]
    pub total_rows: u64,
    /// `SchemaMapping.version` in force.
    #[serde(default)]
    pub mapping_version: u32,
    #[serde(default)]
    pub status: SyncStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_state_is_idle_and_empty() {
        let state = SyncState::default();
        assert_eq!(state.status, SyncStatus::Idle);
        assert!(state.last_watermark.is_none());
        assert_eq!(state.total_rows, 0);
    }

    #[test]
    fn serde_roundtrip() {
        let state = SyncState {
            last_sync_at: Some(Utc::now()),
            last_watermark: Some("2026-01-15T10:00:00Z".into()),
            last_batch_count: 5000,
            total_rows: 25_000,
            mapping_version: 2,
            status: SyncStatus::Failed,
        };
        let json = serde_json::to_string(&state).unwrap();
        let back: SyncState = serde_json::from_str(&json).unwrap();
        assert_eq!(state, back);
    }

    #[test]
    fn status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&SyncStatus::Running).unwrap(),
            "\"running\""
        );
    }

    #[test]
    fn missing_fields_deserialize_to_defaults() {
        let state: SyncState = serde_json::from_str("{}").unwrap();
        assert_eq!(state, SyncState::default());
    }
}
