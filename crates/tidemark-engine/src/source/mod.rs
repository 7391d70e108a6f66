//! Source-side reading: catalog introspection and batched cursors.
//!
//! [`SourceReader`] is the seam between the engine and any concrete
//! source database. Implementations must keep a server-side cursor alive
//! across `next_batch` calls — re-issuing the predicate mid-run would
//! break snapshot stability for non-unique temporal keys.

use async_trait::async_trait;

use tidemark_types::{
    CellValue, ColumnData, ComponentOrder, RowBatch, SyncError, TableBinding, Watermark,
};

pub mod memory;
pub mod postgres;

pub use memory::MemorySource;
pub use postgres::PgSourceReader;

/// Raw column metadata from the source catalog, before type mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceColumn {
    pub name: String,
    pub source_type: String,
    pub nullable: bool,
}

impl SourceColumn {
    #[must_use]
    pub fn new(name: impl Into<String>, source_type: impl Into<String>, nullable: bool) -> Self {
        Self {
            name: name.into(),
            source_type: source_type.into(),
            nullable,
        }
    }
}

/// Opens cursors over one source table.
#[async_trait]
pub trait SourceReader: Send + Sync {
    /// Column metadata from the source catalog; reads no data.
    async fn describe(&self, binding: &TableBinding) -> Result<Vec<SourceColumn>, SyncError>;

    /// Cursor positioned at the beginning of the table.
    async fn open_full(&self, binding: &TableBinding)
        -> Result<Box<dyn SourceCursor>, SyncError>;

    /// Cursor over rows whose temporal-key tuple strictly exceeds
    /// `watermark`, ordered ascending over the tuple.
    async fn open_incremental(
        &self,
        binding: &TableBinding,
        watermark: &Watermark,
    ) -> Result<Box<dyn SourceCursor>, SyncError>;

    /// Cursor capped at the first `max_rows` rows, for test syncs.
    async fn open_limited(
        &self,
        binding: &TableBinding,
        max_rows: u64,
    ) -> Result<Box<dyn SourceCursor>, SyncError>;
}

/// A positioned, batched read over one table.
#[async_trait]
pub trait SourceCursor: Send {
    /// Up to `n` more rows, or `None` at end of data. Each non-empty batch
    /// carries the maximum temporal tuple it contains.
    async fn next_batch(&mut self, n: usize) -> Result<Option<RowBatch>, SyncError>;

    /// Release the underlying handle. Idempotent.
    async fn close(&mut self);
}

impl std::fmt::Debug for dyn SourceCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("<dyn SourceCursor>")
    }
}

/// Render one cell as a watermark component.
///
/// Nulls become the empty string, which sorts before every real value.
#[must_use]
pub fn cell_to_component(cell: &CellValue) -> String {
    match cell {
        CellValue::Null => String::new(),
        CellValue::Int(v) => v.to_string(),
        CellValue::Double(v) => v.to_string(),
        CellValue::Text(v) => v.clone(),
    }
}

/// Compute the maximum temporal tuple across the rows of column data.
///
/// `temporal_indices` selects the key columns in key order; `orders`
/// supplies the per-component comparison rule. Returns `None` when the
/// key is empty or there are no rows.
#[must_use]
pub fn max_temporal_tuple(
    columns: &[ColumnData],
    temporal_indices: &[usize],
    orders: &[ComponentOrder],
) -> Option<Watermark> {
    if temporal_indices.is_empty() {
        return None;
    }
    let rows = columns.first().map_or(0, |c| c.values.len());
    let mut max: Option<Watermark> = None;
    for row in 0..rows {
        let tuple = Watermark::new(
            temporal_indices
                .iter()
                .map(|&idx| cell_to_component(&columns[idx].values[row]))
                .collect(),
        );
        max = Some(match max {
            Some(current) => current.max(tuple, orders),
            None => tuple,
        });
    }
    max
}

/// Assemble a batch from column data, attaching its max temporal tuple.
#[must_use]
pub fn assemble_batch(
    columns: Vec<ColumnData>,
    temporal_indices: &[usize],
    orders: &[ComponentOrder],
) -> RowBatch {
    let max = max_temporal_tuple(&columns, temporal_indices, orders);
    RowBatch::new(columns, max)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cols() -> Vec<ColumnData> {
        vec![
            ColumnData {
                name: "ts".into(),
                values: vec![
                    CellValue::Text("2026-01-15T10:00:00Z".into()),
                    CellValue::Text("2026-01-15T12:00:00Z".into()),
                    CellValue::Text("2026-01-15T11:00:00Z".into()),
                ],
            },
            ColumnData {
                name: "seq".into(),
                values: vec![CellValue::Int(2), CellValue::Int(9), CellValue::Int(30)],
            },
        ]
    }

    #[test]
    fn max_tuple_tracks_lexicographic_maximum() {
        let orders = [ComponentOrder::Text, ComponentOrder::Numeric];
        let max = max_temporal_tuple(&cols(), &[0, 1], &orders).unwrap();
        assert_eq!(max.components(), ["2026-01-15T12:00:00Z", "9"]);
    }

    #[test]
    fn numeric_component_is_not_compared_as_text() {
        let orders = [ComponentOrder::Numeric];
        let max = max_temporal_tuple(&cols(), &[1], &orders).unwrap();
        assert_eq!(max.components(), ["30"]);
    }

    #[test]
    fn empty_key_or_rows_yield_none() {
        assert!(max_temporal_tuple(&cols(), &[], &[]).is_none());
        let empty: Vec<ColumnData> = vec![];
        assert!(max_temporal_tuple(&empty, &[0], &[]).is_none());
    }

    #[test]
    fn null_cells_sort_first() {
        let columns = vec![ColumnData {
            name: "ts".into(),
            values: vec![CellValue::Null, CellValue::Text("2026-01-01T00:00:00Z".into())],
        }];
        let max = max_temporal_tuple(&columns, &[0], &[ComponentOrder::Text]).unwrap();
        assert_eq!(max.components(), ["2026-01-01T00:00:00Z"]);
    }
}
