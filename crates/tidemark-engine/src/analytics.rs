//! Analytics store writer.
//!
//! Wraps one DuckDB connection behind a mutex. The writer owns all DDL and
//! bulk appends; readers of the store live outside the core and attach to
//! the same file. Identifiers are validated and double-quoted, values are
//! always bound, and each batch is committed in a single transaction.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use duckdb::types::Value;
use duckdb::Connection;

use tidemark_types::{CellValue, ColumnSpec, RowBatch, SyncError, TargetType};

use crate::identifier::{quote_identifier, validate_identifier};

/// Writer over the embedded analytics store.
pub struct AnalyticsWriter {
    conn: Mutex<Connection>,
    /// Logical database (schema) inside the store.
    database: String,
}

impl AnalyticsWriter {
    /// Open or create the store at `path` and ensure `database` exists.
    ///
    /// # Errors
    ///
    /// Returns `AnalyticsDdlError` when the store cannot be opened or the
    /// schema cannot be created.
    pub fn open(path: &Path, database: &str) -> Result<Self, SyncError> {
        validate_identifier(database)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                SyncError::analytics_ddl(format!("failed to create analytics directory: {e}"))
            })?;
        }
        let conn = Connection::open(path)
            .map_err(|e| SyncError::analytics_ddl(format!("failed to open analytics store: {e}")))?;
        Self::with_connection(conn, database)
    }

    /// In-memory store, for tests.
    ///
    /// # Errors
    ///
    /// Returns `AnalyticsDdlError` when initialization fails.
    pub fn open_in_memory(database: &str) -> Result<Self, SyncError> {
        validate_identifier(database)?;
        let conn = Connection::open_in_memory().map_err(|e| {
            SyncError::analytics_ddl(format!("failed to open in-memory store: {e}"))
        })?;
        Self::with_connection(conn, database)
    }

    fn with_connection(conn: Connection, database: &str) -> Result<Self, SyncError> {
        conn.execute_batch(&format!(
            "CREATE SCHEMA IF NOT EXISTS {}",
            quote_identifier(database)
        ))
        .map_err(|e| SyncError::analytics_ddl(format!("failed to create schema: {e}")))?;
        Ok(Self {
            conn: Mutex::new(conn),
            database: database.to_string(),
        })
    }

    /// Borrow the underlying connection, for the external query layer.
    ///
    /// # Panics
    ///
    /// Panics if a prior holder poisoned the lock.
    pub fn connection(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("analytics connection lock")
    }

    fn qualified(&self, table: &str) -> String {
        format!(
            "{}.{}",
            quote_identifier(&self.database),
            quote_identifier(table)
        )
    }

    /// Whether `table` exists in the logical database.
    ///
    /// # Errors
    ///
    /// Returns `AnalyticsWriteError` on query failure.
    pub fn table_exists(&self, table: &str) -> Result<bool, SyncError> {
        validate_identifier(table)?;
        let conn = self.connection();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM information_schema.tables \
                 WHERE table_schema = ? AND table_name = ?",
                duckdb::params![self.database, table],
                |row| row.get(0),
            )
            .map_err(|e| SyncError::analytics_write(format!("table_exists failed: {e}")))?;
        Ok(count > 0)
    }

    /// Create `table` with the mapped columns, and a PRIMARY KEY clause
    /// when `primary_key` is non-empty.
    ///
    /// # Errors
    ///
    /// Returns `AnalyticsDdlError` on DDL failure or invalid identifiers.
    pub fn create_table(
        &self,
        table: &str,
        columns: &[ColumnSpec],
        primary_key: &[String],
    ) -> Result<(), SyncError> {
        validate_identifier(table)?;
        for col in columns {
            validate_identifier(&col.name)?;
        }
        for key in primary_key {
            validate_identifier(key)?;
        }

        let mut defs: Vec<String> = columns
            .iter()
            .map(|col| {
                let null_clause = if col.nullable { "" } else { " NOT NULL" };
                format!(
                    "{} {}{null_clause}",
                    quote_identifier(&col.name),
                    col.target_type.sql()
                )
            })
            .collect();
        if !primary_key.is_empty() {
            let keys = primary_key
                .iter()
                .map(|k| quote_identifier(k))
                .collect::<Vec<_>>()
                .join(", ");
            defs.push(format!("PRIMARY KEY ({keys})"));
        }

        let ddl = format!("CREATE TABLE {} ({})", self.qualified(table), defs.join(", "));
        self.connection()
            .execute_batch(&ddl)
            .map_err(|e| SyncError::analytics_ddl(format!("CREATE TABLE failed: {e}")))
    }

    /// Append one batch. Returns the number of rows inserted.
    ///
    /// Append-only by contract: incremental dedup comes from the strict
    /// watermark predicate on the source side, not from upserts here.
    ///
    /// # Errors
    ///
    /// Returns `AnalyticsWriteError` (retryable) on insert failure.
    pub fn insert_batch(
        &self,
        table: &str,
        columns: &[ColumnSpec],
        batch: &RowBatch,
    ) -> Result<u64, SyncError> {
        if batch.is_empty() {
            return Ok(0);
        }
        validate_identifier(table)?;

        let mut names = Vec::with_capacity(batch.columns.len());
        let mut exprs = Vec::with_capacity(batch.columns.len());
        for col in &batch.columns {
            validate_identifier(&col.name)?;
            let spec = columns
                .iter()
                .find(|spec| spec.name == col.name)
                .ok_or_else(|| {
                    SyncError::analytics_write(format!(
                        "batch column '{}' missing from mapping",
                        col.name
                    ))
                })?;
            names.push(quote_identifier(&col.name));
            exprs.push(placeholder_expr(spec.target_type));
        }
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.qualified(table),
            names.join(", "),
            exprs.join(", ")
        );

        let conn = self.connection();
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| SyncError::analytics_write(format!("insert_batch: begin tx: {e}")))?;
        let mut inserted = 0u64;
        {
            let mut stmt = tx
                .prepare(&sql)
                .map_err(|e| SyncError::analytics_write(format!("insert_batch: prepare: {e}")))?;
            for row in 0..batch.row_count {
                let values: Vec<Value> = batch
                    .columns
                    .iter()
                    .map(|col| cell_to_value(&col.values[row]))
                    .collect();
                stmt.execute(duckdb::params_from_iter(values))
                    .map_err(|e| SyncError::analytics_write(format!("insert_batch: row: {e}")))?;
                inserted += 1;
            }
        }
        tx.commit()
            .map_err(|e| SyncError::analytics_write(format!("insert_batch: commit: {e}")))?;
        Ok(inserted)
    }

    /// Row count of `table`.
    ///
    /// # Errors
    ///
    /// Returns `AnalyticsWriteError` on query failure.
    pub fn row_count(&self, table: &str) -> Result<u64, SyncError> {
        validate_identifier(table)?;
        let count: i64 = self
            .connection()
            .query_row(
                &format!("SELECT COUNT(*) FROM {}", self.qualified(table)),
                [],
                |row| row.get(0),
            )
            .map_err(|e| SyncError::analytics_write(format!("row_count failed: {e}")))?;
        Ok(count.max(0) as u64)
    }

    /// Drop `table` if present. Used by test syncs and full-sync recreate.
    ///
    /// # Errors
    ///
    /// Returns `AnalyticsDdlError` on DDL failure.
    pub fn drop_table(&self, table: &str) -> Result<(), SyncError> {
        validate_identifier(table)?;
        self.connection()
            .execute_batch(&format!("DROP TABLE IF EXISTS {}", self.qualified(table)))
            .map_err(|e| SyncError::analytics_ddl(format!("DROP TABLE failed: {e}")))
    }
}

/// Placeholder expression for one bound cell; text-borne timestamps and
/// decimals are cast explicitly so nothing relies on implicit coercion.
fn placeholder_expr(target: TargetType) -> String {
    match target {
        TargetType::Timestamp => "CAST(? AS TIMESTAMP)".to_string(),
        TargetType::Decimal { precision, scale } => {
            format!("CAST(? AS DECIMAL({precision},{scale}))")
        }
        TargetType::Integer | TargetType::Double | TargetType::VarChar => "?".to_string(),
    }
}

fn cell_to_value(cell: &CellValue) -> Value {
    match cell {
        CellValue::Null => Value::Null,
        CellValue::Int(v) => Value::BigInt(*v),
        CellValue::Double(v) => Value::Double(*v),
        CellValue::Text(v) => Value::Text(v.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidemark_types::ColumnData;

    fn specs() -> Vec<ColumnSpec> {
        vec![
            ColumnSpec {
                name: "id".into(),
                source_type: "NUMBER(10,0)".into(),
                target_type: TargetType::Integer,
                nullable: false,
                is_primary_key: true,
                is_temporal: false,
            },
            ColumnSpec {
                name: "ts".into(),
                source_type: "TIMESTAMP".into(),
                target_type: TargetType::Timestamp,
                nullable: true,
                is_primary_key: false,
                is_temporal: true,
            },
            ColumnSpec {
                name: "v".into(),
                source_type: "NUMBER(18,4)".into(),
                target_type: TargetType::Decimal {
                    precision: 18,
                    scale: 4,
                },
                nullable: true,
                is_primary_key: false,
                is_temporal: false,
            },
        ]
    }

    fn batch(rows: &[(i64, &str, &str)]) -> RowBatch {
        RowBatch::new(
            vec![
                ColumnData {
                    name: "id".into(),
                    values: rows.iter().map(|(id, _, _)| CellValue::Int(*id)).collect(),
                },
                ColumnData {
                    name: "ts".into(),
                    values: rows
                        .iter()
                        .map(|(_, ts, _)| CellValue::Text((*ts).into()))
                        .collect(),
                },
                ColumnData {
                    name: "v".into(),
                    values: rows
                        .iter()
                        .map(|(_, _, v)| CellValue::Text((*v).into()))
                        .collect(),
                },
            ],
            None,
        )
    }

    fn writer() -> AnalyticsWriter {
        AnalyticsWriter::open_in_memory("main").unwrap()
    }

    #[test]
    fn create_exists_drop_cycle() {
        let w = writer();
        assert!(!w.table_exists("events").unwrap());
        w.create_table("events", &specs(), &["id".to_string()]).unwrap();
        assert!(w.table_exists("events").unwrap());
        w.drop_table("events").unwrap();
        assert!(!w.table_exists("events").unwrap());
    }

    #[test]
    fn insert_and_count() {
        let w = writer();
        w.create_table("events", &specs(), &["id".to_string()]).unwrap();
        let inserted = w
            .insert_batch(
                "events",
                &specs(),
                &batch(&[
                    (1, "2026-01-01T00:00:00Z", "10.5000"),
                    (2, "2026-01-02T00:00:00Z", "11.2500"),
                ]),
            )
            .unwrap();
        assert_eq!(inserted, 2);
        assert_eq!(w.row_count("events").unwrap(), 2);
    }

    #[test]
    fn nulls_survive_insert() {
        let w = writer();
        w.create_table("events", &specs(), &[]).unwrap();
        let b = RowBatch::new(
            vec![
                ColumnData {
                    name: "id".into(),
                    values: vec![CellValue::Int(1)],
                },
                ColumnData {
                    name: "ts".into(),
                    values: vec![CellValue::Null],
                },
                ColumnData {
                    name: "v".into(),
                    values: vec![CellValue::Null],
                },
            ],
            None,
        );
        assert_eq!(w.insert_batch("events", &specs(), &b).unwrap(), 1);
        let conn = w.connection();
        let nulls: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM \"main\".\"events\" WHERE \"ts\" IS NULL AND \"v\" IS NULL",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(nulls, 1);
    }

    #[test]
    fn empty_batch_is_a_noop() {
        let w = writer();
        w.create_table("events", &specs(), &[]).unwrap();
        assert_eq!(w.insert_batch("events", &specs(), &batch(&[])).unwrap(), 0);
    }

    #[test]
    fn invalid_identifiers_are_rejected_before_sql() {
        let w = writer();
        assert!(w.table_exists("ev;drop").is_err());
        assert!(w.drop_table("a b").is_err());
    }

    #[test]
    fn duplicate_primary_key_fails_insert() {
        let w = writer();
        w.create_table("events", &specs(), &["id".to_string()]).unwrap();
        let b = batch(&[(1, "2026-01-01T00:00:00Z", "1.0000")]);
        w.insert_batch("events", &specs(), &b).unwrap();
        let err = w.insert_batch("events", &specs(), &b).unwrap_err();
        assert_eq!(err.kind, tidemark_types::ErrorKind::AnalyticsWriteError);
    }
}
