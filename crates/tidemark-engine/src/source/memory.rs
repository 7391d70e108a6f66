//! Deterministic in-memory source.
//!
//! Backs the pipeline tests and local experiments: rows live in memory,
//! cursors iterate over a sorted snapshot, and transient read failures can
//! be injected to exercise the retry path.

use std::cmp::Ordering;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use tidemark_types::{
    CellValue, ColumnData, ComponentOrder, RowBatch, SyncError, TableBinding, Watermark,
};

use super::{assemble_batch, cell_to_component, SourceColumn, SourceCursor, SourceReader};
use crate::type_map::map_source_type;

/// In-memory table shared by a [`MemorySource`] and its cursors.
struct TableData {
    columns: Vec<SourceColumn>,
    rows: Vec<Vec<CellValue>>,
}

/// In-memory implementation of [`SourceReader`].
pub struct MemorySource {
    table: Arc<Mutex<TableData>>,
    /// Pending `next_batch` failures to inject, consumed one per call.
    fail_reads: Arc<Mutex<u32>>,
    /// Artificial latency per `next_batch`, for control-flow tests.
    batch_delay: Arc<Mutex<std::time::Duration>>,
}

impl MemorySource {
    /// Build a source over `columns` with no rows yet.
    #[must_use]
    pub fn new(columns: Vec<SourceColumn>) -> Self {
        Self {
            table: Arc::new(Mutex::new(TableData {
                columns,
                rows: Vec::new(),
            })),
            fail_reads: Arc::new(Mutex::new(0)),
            batch_delay: Arc::new(Mutex::new(std::time::Duration::ZERO)),
        }
    }

    /// Slow every `next_batch` down by `delay`.
    pub fn set_batch_delay(&self, delay: std::time::Duration) {
        *self.batch_delay.lock().expect("delay lock") = delay;
    }

    /// Append rows (row-major).
    ///
    /// # Panics
    ///
    /// Panics when a row's arity differs from the column count.
    pub fn push_rows(&self, rows: Vec<Vec<CellValue>>) {
        let mut table = self.table.lock().expect("source table lock");
        for row in &rows {
            assert_eq!(row.len(), table.columns.len(), "row arity mismatch");
        }
        table.rows.extend(rows);
    }

    /// Make the next `count` `next_batch` calls fail transiently.
    pub fn inject_read_failures(&self, count: u32) {
        *self.fail_reads.lock().expect("failure counter lock") = count;
    }

    fn snapshot(&self) -> (Vec<SourceColumn>, Vec<Vec<CellValue>>) {
        let table = self.table.lock().expect("source table lock");
        (table.columns.clone(), table.rows.clone())
    }

    fn key_layout(
        columns: &[SourceColumn],
        binding: &TableBinding,
    ) -> Result<(Vec<usize>, Vec<ComponentOrder>), SyncError> {
        let mut indices = Vec::with_capacity(binding.temporal_key.len());
        let mut orders = Vec::with_capacity(binding.temporal_key.len());
        for key in &binding.temporal_key {
            let idx = columns
                .iter()
                .position(|c| c.name.eq_ignore_ascii_case(key))
                .ok_or_else(|| {
                    SyncError::schema_unknown(format!(
                        "temporal key column '{key}' not found in '{}'",
                        binding.source_ref()
                    ))
                })?;
            let order = match map_source_type(&columns[idx].name, &columns[idx].source_type) {
                Ok(tidemark_types::TargetType::Integer) => ComponentOrder::Numeric,
                _ => ComponentOrder::Text,
            };
            indices.push(idx);
            orders.push(order);
        }
        Ok((indices, orders))
    }

    fn row_tuple(row: &[CellValue], indices: &[usize]) -> Watermark {
        Watermark::new(indices.iter().map(|&i| cell_to_component(&row[i])).collect())
    }

    fn open_with(
        &self,
        binding: &TableBinding,
        after: Option<&Watermark>,
        limit: Option<u64>,
    ) -> Result<Box<dyn SourceCursor>, SyncError> {
        let (columns, mut rows) = self.snapshot();
        let (indices, orders) = Self::key_layout(&columns, binding)?;

        if !indices.is_empty() {
            rows.sort_by(|a, b| {
                Self::row_tuple(a, &indices).compare(&Self::row_tuple(b, &indices), &orders)
            });
        }
        if let Some(mark) = after {
            rows.retain(|row| {
                Self::row_tuple(row, &indices).compare(mark, &orders) == Ordering::Greater
            });
        }
        if let Some(limit) = limit {
            rows.truncate(limit as usize);
        }

        Ok(Box::new(MemoryCursor {
            columns,
            rows,
            position: 0,
            indices,
            orders,
            closed: false,
            fail_reads: Arc::clone(&self.fail_reads),
            batch_delay: Arc::clone(&self.batch_delay),
        }))
    }
}

#[async_trait]
impl SourceReader for MemorySource {
    async fn describe(&self, binding: &TableBinding) -> Result<Vec<SourceColumn>, SyncError> {
        let (columns, _) = self.snapshot();
        if columns.is_empty() {
            return Err(SyncError::schema_unknown(format!(
                "table '{}' not found or has no columns",
                binding.source_ref()
            )));
        }
        Ok(columns)
    }

    async fn open_full(
        &self,
        binding: &TableBinding,
    ) -> Result<Box<dyn SourceCursor>, SyncError> {
        self.open_with(binding, None, None)
    }

    async fn open_incremental(
        &self,
        binding: &TableBinding,
        watermark: &Watermark,
    ) -> Result<Box<dyn SourceCursor>, SyncError> {
        self.open_with(binding, Some(watermark), None)
    }

    async fn open_limited(
        &self,
        binding: &TableBinding,
        max_rows: u64,
    ) -> Result<Box<dyn SourceCursor>, SyncError> {
        self.open_with(binding, None, Some(max_rows))
    }
}

struct MemoryCursor {
    columns: Vec<SourceColumn>,
    rows: Vec<Vec<CellValue>>,
    position: usize,
    indices: Vec<usize>,
    orders: Vec<ComponentOrder>,
    closed: bool,
    fail_reads: Arc<Mutex<u32>>,
    batch_delay: Arc<Mutex<std::time::Duration>>,
}

#[async_trait]
impl SourceCursor for MemoryCursor {
    async fn next_batch(&mut self, n: usize) -> Result<Option<RowBatch>, SyncError> {
        if self.closed {
            return Err(SyncError::source_read("cursor is closed"));
        }
        let delay = *self.batch_delay.lock().expect("delay lock");
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        {
            let mut remaining = self.fail_reads.lock().expect("failure counter lock");
            if *remaining > 0 {
                *remaining -= 1;
                return Err(SyncError::source_read("injected transient read failure"));
            }
        }
        if self.position >= self.rows.len() {
            return Ok(None);
        }

        let end = (self.position + n).min(self.rows.len());
        let slice = &self.rows[self.position..end];
        let columns: Vec<ColumnData> = self
            .columns
            .iter()
            .enumerate()
            .map(|(idx, col)| ColumnData {
                name: col.name.clone(),
                values: slice.iter().map(|row| row[idx].clone()).collect(),
            })
            .collect();
        self.position = end;
        Ok(Some(assemble_batch(columns, &self.indices, &self.orders)))
    }

    async fn close(&mut self) {
        self.closed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binding() -> TableBinding {
        TableBinding {
            source_schema: None,
            source_table: "EVENTS".into(),
            target_table: "events".into(),
            primary_key: vec!["id".into()],
            temporal_key: vec!["ts".into()],
            batch_size: 2,
        }
    }

    fn source() -> MemorySource {
        let src = MemorySource::new(vec![
            SourceColumn::new("id", "NUMBER(10,0)", false),
            SourceColumn::new("ts", "TIMESTAMP", false),
        ]);
        src.push_rows(vec![
            vec![CellValue::Int(1), CellValue::Text("2026-01-01T00:00:00Z".into())],
            vec![CellValue::Int(2), CellValue::Text("2026-01-02T00:00:00Z".into())],
            vec![CellValue::Int(3), CellValue::Text("2026-01-03T00:00:00Z".into())],
        ]);
        src
    }

    #[tokio::test]
    async fn full_cursor_yields_everything_in_key_order() {
        let src = source();
        let mut cursor = src.open_full(&binding()).await.unwrap();
        let first = cursor.next_batch(2).await.unwrap().unwrap();
        assert_eq!(first.row_count, 2);
        assert_eq!(
            first.max_temporal.as_ref().unwrap().components(),
            ["2026-01-02T00:00:00Z"]
        );
        let second = cursor.next_batch(2).await.unwrap().unwrap();
        assert_eq!(second.row_count, 1);
        assert!(cursor.next_batch(2).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn incremental_cursor_is_strictly_greater() {
        let src = source();
        let mark = Watermark::single("2026-01-02T00:00:00Z");
        let mut cursor = src.open_incremental(&binding(), &mark).await.unwrap();
        let batch = cursor.next_batch(10).await.unwrap().unwrap();
        // The tied row is excluded; only the later row qualifies.
        assert_eq!(batch.row_count, 1);
        assert_eq!(
            batch.max_temporal.as_ref().unwrap().components(),
            ["2026-01-03T00:00:00Z"]
        );
    }

    #[tokio::test]
    async fn limited_cursor_caps_rows() {
        let src = source();
        let mut cursor = src.open_limited(&binding(), 2).await.unwrap();
        let batch = cursor.next_batch(10).await.unwrap().unwrap();
        assert_eq!(batch.row_count, 2);
        assert!(cursor.next_batch(10).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn injected_failures_are_transient() {
        let src = source();
        src.inject_read_failures(1);
        let mut cursor = src.open_full(&binding()).await.unwrap();
        let err = cursor.next_batch(2).await.unwrap_err();
        assert!(err.retryable);
        // Retry succeeds from the same position.
        assert!(cursor.next_batch(2).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn missing_temporal_column_is_schema_unknown() {
        let src = source();
        let mut b = binding();
        b.temporal_key = vec!["missing".into()];
        let err = src.open_full(&b).await.unwrap_err();
        assert_eq!(err.kind, tidemark_types::ErrorKind::SchemaUnknown);
    }
}
