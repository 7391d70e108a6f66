//! Progress event stream wire format.
//!
//! One run emits `Started`, then any number of `Progress`/`Log` (and
//! `Paused`/`Resumed` pairs), then exactly one terminal event:
//! `Completed`, `Failed`, or `Stopped`.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ErrorKind;

/// Opaque run identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(Uuid);

impl RunId {
    #[must_use]
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Which flavor of sync a run performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncKind {
    Test,
    Full,
    Incremental,
}

impl std::fmt::Display for SyncKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Test => "test",
            Self::Full => "full",
            Self::Incremental => "incremental",
        };
        f.write_str(s)
    }
}

/// Pipeline phase a progress event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    Schema,
    Ddl,
    Copy,
    Finalize,
}

/// Severity for `Log` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

/// Worker status snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    #[default]
    Idle,
    Running,
    Paused,
    Completed,
    Failed,
    Stopped,
}

/// One message on the run event channel, serialized with a `type` tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncEvent {
    Started {
        run_id: RunId,
        kind: SyncKind,
        table: String,
    },
    Progress {
        run_id: RunId,
        rows_done: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rows_total: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        eta_seconds: Option<u64>,
        phase: SyncPhase,
        /// Progress events dropped on channel overflow since the last
        /// delivered one.
        #[serde(default)]
        events_dropped: u64,
    },
    Log {
        run_id: RunId,
        level: LogLevel,
        message: String,
    },
    Paused {
        run_id: RunId,
    },
    Resumed {
        run_id: RunId,
    },
    Stopped {
        run_id: RunId,
        reason: String,
    },
    Failed {
        run_id: RunId,
        error_kind: ErrorKind,
        message: String,
        retryable: bool,
    },
    Completed {
        run_id: RunId,
        rows_loaded: u64,
        duration_seconds: f64,
    },
}

impl SyncEvent {
    /// Terminal events end a run; exactly one is emitted per run.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed { .. } | Self::Failed { .. } | Self::Stopped { .. }
        )
    }

    /// Droppable events may be discarded on channel overflow.
    #[must_use]
    pub fn is_droppable(&self) -> bool {
        matches!(self, Self::Progress { .. } | Self::Log { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serde_uses_type_discriminator() {
        let ev = SyncEvent::Started {
            run_id: RunId::new(),
            kind: SyncKind::Full,
            table: "events".into(),
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "started");
        assert_eq!(json["kind"], "full");
    }

    #[test]
    fn progress_skips_absent_optionals() {
        let ev = SyncEvent::Progress {
            run_id: RunId::new(),
            rows_done: 10,
            rows_total: None,
            eta_seconds: None,
            phase: SyncPhase::Copy,
            events_dropped: 0,
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert!(json.get("rows_total").is_none());
        assert!(json.get("eta_seconds").is_none());
        assert_eq!(json["phase"], "copy");
    }

    #[test]
    fn terminal_classification() {
        let run_id = RunId::new();
        assert!(SyncEvent::Completed {
            run_id,
            rows_loaded: 0,
            duration_seconds: 0.1
        }
        .is_terminal());
        assert!(SyncEvent::Stopped {
            run_id,
            reason: "user".into()
        }
        .is_terminal());
        assert!(!SyncEvent::Paused { run_id }.is_terminal());
    }

    #[test]
    fn droppable_classification() {
        let run_id = RunId::new();
        assert!(SyncEvent::Log {
            run_id,
            level: LogLevel::Info,
            message: "m".into()
        }
        .is_droppable());
        assert!(!SyncEvent::Started {
            run_id,
            kind: SyncKind::Test,
            table: "t".into()
        }
        .is_droppable());
        assert!(!SyncEvent::Failed {
            run_id,
            error_kind: ErrorKind::Timeout,
            message: "m".into(),
            retryable: false
        }
        .is_droppable());
    }

    #[test]
    fn event_roundtrip() {
        let ev = SyncEvent::Failed {
            run_id: RunId::new(),
            error_kind: ErrorKind::SchemaDrift,
            message: "column set changed".into(),
            retryable: false,
        };
        let json = serde_json::to_string(&ev).unwrap();
        let back: SyncEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(ev, back);
    }
}
