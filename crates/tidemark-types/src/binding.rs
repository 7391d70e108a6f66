//! Table bindings and column specifications.

use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// Analytics-side column type.
///
/// The only types the analytics writer is required to support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum TargetType {
    Integer,
    Decimal { precision: u8, scale: u8 },
    Double,
    VarChar,
    Timestamp,
}

impl TargetType {
    /// SQL type text for DDL and cast expressions.
    #[must_use]
    pub fn sql(&self) -> String {
        match self {
            Self::Integer => "BIGINT".to_string(),
            Self::Decimal { precision, scale } => format!("DECIMAL({precision},{scale})"),
            Self::Double => "DOUBLE".to_string(),
            Self::VarChar => "VARCHAR".to_string(),
            Self::Timestamp => "TIMESTAMP".to_string(),
        }
    }
}

/// One column of a mapped table schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    /// Source catalog type text (e.g. `"NUMBER(18,4)"`).
    pub source_type: String,
    pub target_type: TargetType,
    pub nullable: bool,
    pub is_primary_key: bool,
    pub is_temporal: bool,
}

/// Binding of one source table to one target table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableBinding {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_schema: Option<String>,
    pub source_table: String,
    pub target_table: String,
    #[serde(default)]
    pub primary_key: Vec<String>,
    /// Ordered temporal-key columns; the first element is the
    /// analytics-side ordering key. Empty means incremental sync is
    /// unavailable for this binding.
    #[serde(default)]
    pub temporal_key: Vec<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_batch_size() -> usize {
    10_000
}

impl TableBinding {
    /// Source table reference with the optional schema qualifier.
    #[must_use]
    pub fn source_ref(&self) -> String {
        match &self.source_schema {
            Some(schema) => format!("{schema}.{}", self.source_table),
            None => self.source_table.clone(),
        }
    }

    /// Whether this binding supports incremental sync.
    #[must_use]
    pub fn supports_incremental(&self) -> bool {
        !self.temporal_key.is_empty()
    }

    /// Structural validation independent of any catalog.
    ///
    /// # Errors
    ///
    /// Returns `ConfigInvalid` when the batch size is zero or a required
    /// name is empty.
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.source_table.is_empty() {
            return Err(SyncError::config("binding has empty source_table"));
        }
        if self.target_table.is_empty() {
            return Err(SyncError::config("binding has empty target_table"));
        }
        if self.batch_size == 0 {
            return Err(SyncError::config(format!(
                "binding '{}' has batch_size 0; must be at least 1",
                self.target_table
            )));
        }
        Ok(())
    }
}
