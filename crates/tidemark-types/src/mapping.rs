//! Persisted schema mappings with drift comparison.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::binding::ColumnSpec;

/// Snapshot of the source-to-target column mapping for one target table.
///
/// `version` is bumped only when the column set or any mapped type changes;
/// it is the value recorded in `SyncState.mapping_version` and consulted to
/// detect mid-run schema drift.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaMapping {
    pub version: u32,
    pub columns: Vec<ColumnSpec>,
    pub created_at: DateTime<Utc>,
}

/// Outcome of comparing a candidate mapping against a stored one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingDiff {
    /// Same columns, same types.
    Identical,
    /// Same column names, at least one mapped type changed.
    TypesChanged,
    /// Column set itself changed (added, removed, or renamed).
    ColumnsChanged,
}

impl SchemaMapping {
    /// Start a new mapping at version 1.
    #[must_use]
    pub fn initial(columns: Vec<ColumnSpec>) -> Self {
        Self {
            version: 1,
            columns,
            created_at: Utc::now(),
        }
    }

    /// Compare this stored mapping against candidate columns.
    ///
    /// Column order is not significant; names are.
    #[must_use]
    pub fn diff(&self, candidate: &[ColumnSpec]) -> MappingDiff {
        let mut stored: Vec<&ColumnSpec> = self.columns.iter().collect();
        let mut fresh: Vec<&ColumnSpec> = candidate.iter().collect();
        stored.sort_by(|a, b| a.name.cmp(&b.name));
        fresh.sort_by(|a, b| a.name.cmp(&b.name));

        if stored.len() != fresh.len()
            || stored
                .iter()
                .zip(&fresh)
                .any(|(a, b)| a.name != b.name)
        {
            return MappingDiff::ColumnsChanged;
        }
        if stored
            .iter()
            .zip(&fresh)
            .any(|(a, b)| a.target_type != b.target_type)
        {
            return MappingDiff::TypesChanged;
        }
        MappingDiff::Identical
    }

    /// Successor mapping with a bumped version and fresh timestamp.
    #[must_use]
    pub fn bumped(&self, columns: Vec<ColumnSpec>) -> Self {
        Self {
            version: self.version + 1,
            columns,
            created_at: Utc::now(),
        }
    }
}
