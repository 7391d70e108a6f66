//! Structured error model for sync operations.
//!
//! [`SyncError`] carries a classification and a retry hint. Construct via
//! category-specific factory methods so the retryable flag always matches
//! the propagation policy for that kind.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Classification of a sync error.
///
/// Determines default retry behavior and operator-facing categorization.
/// Cancellation is deliberately absent: a cancelled run terminates with a
/// `Stopped` event, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Missing or invalid configuration; the run loop is never entered.
    ConfigInvalid,
    /// Source connection or handshake failure (retryable).
    SourceUnavailable,
    /// Transient source read failure (retryable).
    SourceReadError,
    /// Source table missing or target table required but absent.
    SchemaUnknown,
    /// A source column type has no mapping.
    TypeUnmappable,
    /// Transient analytics-store write failure (retryable).
    AnalyticsWriteError,
    /// Analytics-store DDL failure.
    AnalyticsDdlError,
    /// Stored mapping and live schema disagree on the column set.
    SchemaDrift,
    /// A persisted state record cannot be decoded; refuse to run.
    StateCorrupt,
    /// The sync lock (or the single-run worker slot) is held elsewhere.
    LockBusy,
    /// The run exceeded its duration cap.
    Timeout,
    /// The batch loop exceeded its iteration cap.
    IterationCap,
    /// Unexpected internal failure (task panic, channel closed, ...).
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ConfigInvalid => "config_invalid",
            Self::SourceUnavailable => "source_unavailable",
            Self::SourceReadError => "source_read_error",
            Self::SchemaUnknown => "schema_unknown",
            Self::TypeUnmappable => "type_unmappable",
            Self::AnalyticsWriteError => "analytics_write_error",
            Self::AnalyticsDdlError => "analytics_ddl_error",
            Self::SchemaDrift => "schema_drift",
            Self::StateCorrupt => "state_corrupt",
            Self::LockBusy => "lock_busy",
            Self::Timeout => "timeout",
            Self::IterationCap => "iteration_cap",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Structured error from a sync operation.
///
/// The message must never contain secrets (connection passwords, tokens);
/// constructors take whatever the caller passes, so callers redact first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("[{kind}] {message}")]
pub struct SyncError {
    pub kind: ErrorKind,
    pub message: String,
    pub retryable: bool,
}

impl SyncError {
    fn new(kind: ErrorKind, retryable: bool, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable,
        }
    }

    /// Configuration error (not retryable).
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ConfigInvalid, false, message)
    }

    /// Source connection failure (retryable).
    #[must_use]
    pub fn source_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::SourceUnavailable, true, message)
    }

    /// Transient source read failure (retryable).
    #[must_use]
    pub fn source_read(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::SourceReadError, true, message)
    }

    /// Table missing from a catalog (fatal for this run).
    #[must_use]
    pub fn schema_unknown(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::SchemaUnknown, false, message)
    }

    /// Unmappable source column type; names the column and its type.
    #[must_use]
    pub fn type_unmappable(column: &str, source_type: &str) -> Self {
        Self::new(
            ErrorKind::TypeUnmappable,
            false,
            format!("column '{column}' has unmappable source type '{source_type}'"),
        )
    }

    /// Transient analytics write failure (retryable).
    #[must_use]
    pub fn analytics_write(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AnalyticsWriteError, true, message)
    }

    /// Analytics DDL failure (not retryable).
    #[must_use]
    pub fn analytics_ddl(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AnalyticsDdlError, false, message)
    }

    /// Column set changed under an incremental sync; full sync required.
    #[must_use]
    pub fn schema_drift(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::SchemaDrift, false, message)
    }

    /// Persisted state is undecodable; operator must inspect.
    #[must_use]
    pub fn state_corrupt(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::StateCorrupt, false, message)
    }

    /// Lock or worker slot busy. Retryable in the sense that a later
    /// re-trigger is expected to succeed.
    #[must_use]
    pub fn busy(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::LockBusy, true, message)
    }

    /// Run exceeded its duration cap; checkpoint is preserved.
    #[must_use]
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, false, message)
    }

    /// Batch loop exceeded its iteration cap; checkpoint is preserved.
    #[must_use]
    pub fn iteration_cap(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::IterationCap, false, message)
    }

    /// Unexpected internal failure.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, false, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_kinds_are_retryable() {
        assert!(SyncError::source_unavailable("handshake refused").retryable);
        assert!(SyncError::source_read("connection reset").retryable);
        assert!(SyncError::analytics_write("disk busy").retryable);
        assert!(SyncError::busy("lock held").retryable);
    }

    #[test]
    fn fatal_kinds_are_not_retryable() {
        assert!(!SyncError::config("missing host").retryable);
        assert!(!SyncError::schema_drift("column set changed").retryable);
        assert!(!SyncError::state_corrupt("bad json").retryable);
        assert!(!SyncError::timeout("exceeded 3600s").retryable);
        assert!(!SyncError::iteration_cap("exceeded 100000").retryable);
    }

    #[test]
    fn type_unmappable_names_the_column() {
        let err = SyncError::type_unmappable("payload", "SDO_GEOMETRY");
        assert_eq!(err.kind, ErrorKind::TypeUnmappable);
        assert!(err.message.contains("payload"));
        assert!(err.message.contains("SDO_GEOMETRY"));
    }

    #[test]
    fn display_format() {
        let err = SyncError::schema_unknown("table EVENTS not found");
        assert_eq!(err.to_string(), "[schema_unknown] table EVENTS not found");
    }

    #[test]
    fn serde_roundtrip() {
        let err = SyncError::source_read("fetch failed");
        let json = serde_json::to_string(&err).unwrap();
        let back: SyncError = serde_json::from_str(&json).unwrap();
        assert_eq!(err, back);
    }
}
