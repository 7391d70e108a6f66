//! Column-oriented row batches.
//!
//! One `RowBatch` is the unit moved from the source cursor to the
//! analytics writer. Temporal values are normalized to ISO-8601 UTC text
//! before they enter a batch; decimals travel as exact text.

use serde::{Deserialize, Serialize};

use crate::watermark::Watermark;

/// A single cell value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Null,
    Int(i64),
    Double(f64),
    Text(String),
}

impl CellValue {
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

/// One column of a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnData {
    pub name: String,
    pub values: Vec<CellValue>,
}

/// Bounded unit of extraction and load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowBatch {
    pub columns: Vec<ColumnData>,
    pub row_count: usize,
    /// Maximum temporal-key tuple contained in this batch, used for
    /// watermark advancement. `None` when the binding has no temporal key
    /// or the batch is empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_temporal: Option<Watermark>,
}

impl RowBatch {
    /// Build a batch, asserting rectangular shape.
    ///
    /// # Panics
    ///
    /// Panics if any column's length differs from `row_count`; batches are
    /// constructed by readers that control both.
    #[must_use]
    pub fn new(columns: Vec<ColumnData>, max_temporal: Option<Watermark>) -> Self {
        let row_count = columns.first().map_or(0, |c| c.values.len());
        assert!(
            columns.iter().all(|c| c.values.len() == row_count),
            "ragged batch: all columns must have {row_count} values"
        );
        Self {
            columns,
            row_count,
            max_temporal,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.row_count == 0
    }

    /// Column names in declaration order.
    #[must_use]
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Cell at (row, column index), if in range.
    #[must_use]
    pub fn cell(&self, row: usize, col: usize) -> Option<&CellValue> {
        self.columns.get(col).and_then(|c| c.values.get(row))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_by_two() -> RowBatch {
        RowBatch::new(
            vec![
                ColumnData {
                    name: "id".into(),
                    values: vec![CellValue::Int(1), CellValue::Int(2)],
                },
                ColumnData {
                    name: "note".into(),
                    values: vec![CellValue::Text("a".into()), CellValue::Null],
                },
            ],
            Some(Watermark::single("2")),
        )
    }

    #[test]
    fn row_count_from_columns() {
        let batch = two_by_two();
        assert_eq!(batch.row_count, 2);
        assert!(!batch.is_empty());
        assert_eq!(batch.column_names(), vec!["id", "note"]);
    }

    #[test]
    fn cell_access() {
        let batch = two_by_two();
        assert_eq!(batch.cell(0, 0), Some(&CellValue::Int(1)));
        assert_eq!(batch.cell(1, 1), Some(&CellValue::Null));
        assert_eq!(batch.cell(2, 0), None);
    }

    #[test]
    #[should_panic(expected = "ragged batch")]
    fn ragged_columns_panic() {
        let _ = RowBatch::new(
            vec![
                ColumnData {
                    name: "a".into(),
                    values: vec![CellValue::Int(1)],
                },
                ColumnData {
                    name: "b".into(),
                    values: vec![],
                },
            ],
            None,
        );
    }

    #[test]
    fn empty_batch() {
        let batch = RowBatch::new(vec![], None);
        assert!(batch.is_empty());
        assert!(batch.max_temporal.is_none());
    }
}
