//! PostgreSQL source reader.
//!
//! Catalog introspection through `information_schema`; data reads through
//! a transaction-scoped `DECLARE … NO SCROLL CURSOR` plus `FETCH FORWARD`,
//! so every batch comes from the same snapshot and the predicate is issued
//! exactly once per run. Temporal values are normalized to ISO-8601 UTC
//! text as they leave the reader; decimals are selected as text to keep
//! their exact rendering.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use tokio::task::JoinHandle;
use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, NoTls, Row};

use tidemark_types::{
    CellValue, ColumnData, ComponentOrder, RowBatch, SyncError, TableBinding, TargetType,
    Watermark,
};

use super::{assemble_batch, SourceColumn, SourceCursor, SourceReader};
use crate::config::SourceConfig;
use crate::identifier::{quote_identifier, validate_identifier};
use crate::type_map::map_source_type;

const CURSOR_NAME: &str = "tidemark_read";
const DEFAULT_SCHEMA: &str = "public";

/// How a column is extracted from a fetched row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExtractKind {
    Int,
    Float,
    Text,
    Timestamp,
}

impl ExtractKind {
    fn for_target(target: TargetType) -> Self {
        match target {
            TargetType::Integer => Self::Int,
            TargetType::Double => Self::Float,
            TargetType::Timestamp => Self::Timestamp,
            TargetType::Decimal { .. } | TargetType::VarChar => Self::Text,
        }
    }

    /// Cast appended to the column in the SELECT list.
    fn select_cast(self) -> &'static str {
        match self {
            Self::Int => "::bigint",
            Self::Float => "::float8",
            Self::Text => "::text",
            Self::Timestamp => "::timestamptz",
        }
    }
}

/// Typed bind parameter for the incremental predicate.
#[derive(Debug)]
enum BindParam {
    Int64(i64),
    Text(String),
}

impl BindParam {
    fn as_tosql(&self) -> &(dyn ToSql + Sync) {
        match self {
            Self::Int64(v) => v,
            Self::Text(v) => v,
        }
    }
}

/// [`SourceReader`] over a PostgreSQL-compatible source.
pub struct PgSourceReader {
    config: SourceConfig,
}

impl PgSourceReader {
    #[must_use]
    pub fn new(config: SourceConfig) -> Self {
        Self { config }
    }

    async fn connect(&self) -> Result<(Client, JoinHandle<()>), SyncError> {
        let mut pg = tokio_postgres::Config::new();
        pg.host(&self.config.host)
            .port(self.config.port)
            .user(&self.config.user)
            .password(&self.config.password)
            .dbname(&self.config.service);

        let (client, connection) = pg.connect(NoTls).await.map_err(|e| {
            SyncError::source_unavailable(format!(
                "connection to {}:{} failed: {e}",
                self.config.host, self.config.port
            ))
        })?;
        let handle = tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::warn!(error = %e, "source connection terminated");
            }
        });

        // All temporal normalization assumes a UTC session.
        client
            .batch_execute("SET TIME ZONE 'UTC'")
            .await
            .map_err(|e| SyncError::source_unavailable(format!("session setup failed: {e}")))?;
        Ok((client, handle))
    }

    fn schema_of<'a>(binding: &'a TableBinding) -> &'a str {
        binding.source_schema.as_deref().unwrap_or(DEFAULT_SCHEMA)
    }

    /// Column plan for a binding: validated names, extraction kinds, and
    /// the temporal-key layout.
    async fn plan(
        &self,
        client: &Client,
        binding: &TableBinding,
    ) -> Result<ReadPlan, SyncError> {
        let raw = describe_columns(client, binding).await?;
        let mut names = Vec::with_capacity(raw.len());
        let mut kinds = Vec::with_capacity(raw.len());
        for col in &raw {
            validate_identifier(&col.name)?;
            let target = map_source_type(&col.name, &col.source_type)?;
            names.push(col.name.clone());
            kinds.push(ExtractKind::for_target(target));
        }

        let mut temporal_indices = Vec::with_capacity(binding.temporal_key.len());
        let mut orders = Vec::with_capacity(binding.temporal_key.len());
        for key in &binding.temporal_key {
            let idx = names
                .iter()
                .position(|n| n.eq_ignore_ascii_case(key))
                .ok_or_else(|| {
                    SyncError::schema_unknown(format!(
                        "temporal key column '{key}' not found in '{}'",
                        binding.source_ref()
                    ))
                })?;
            orders.push(match kinds[idx] {
                ExtractKind::Int => ComponentOrder::Numeric,
                _ => ComponentOrder::Text,
            });
            temporal_indices.push(idx);
        }

        Ok(ReadPlan {
            names,
            kinds,
            temporal_indices,
            orders,
        })
    }

    async fn open(
        &self,
        binding: &TableBinding,
        watermark: Option<&Watermark>,
        limit: Option<u64>,
    ) -> Result<Box<dyn SourceCursor>, SyncError> {
        validate_identifier(&binding.source_table)?;
        if let Some(schema) = &binding.source_schema {
            validate_identifier(schema)?;
        }

        let (client, conn) = self.connect().await?;
        let plan = self.plan(&client, binding).await?;
        let (sql, binds) = build_read_query(binding, &plan, watermark, limit)?;

        client
            .batch_execute("BEGIN TRANSACTION ISOLATION LEVEL REPEATABLE READ READ ONLY")
            .await
            .map_err(|e| SyncError::source_read(format!("BEGIN failed: {e}")))?;

        let declare = format!("DECLARE {CURSOR_NAME} NO SCROLL CURSOR FOR {sql}");
        let params: Vec<&(dyn ToSql + Sync)> = binds.iter().map(BindParam::as_tosql).collect();
        client
            .execute(&declare, &params)
            .await
            .map_err(|e| SyncError::source_read(format!("DECLARE CURSOR failed: {e}")))?;

        Ok(Box::new(PgCursor {
            client,
            conn,
            plan,
            open: true,
        }))
    }
}

#[async_trait]
impl SourceReader for PgSourceReader {
    async fn describe(&self, binding: &TableBinding) -> Result<Vec<SourceColumn>, SyncError> {
        let (client, conn) = self.connect().await?;
        let result = describe_columns(&client, binding).await;
        conn.abort();
        result
    }

    async fn open_full(
        &self,
        binding: &TableBinding,
    ) -> Result<Box<dyn SourceCursor>, SyncError> {
        self.open(binding, None, None).await
    }

    async fn open_incremental(
        &self,
        binding: &TableBinding,
        watermark: &Watermark,
    ) -> Result<Box<dyn SourceCursor>, SyncError> {
        self.open(binding, Some(watermark), None).await
    }

    async fn open_limited(
        &self,
        binding: &TableBinding,
        max_rows: u64,
    ) -> Result<Box<dyn SourceCursor>, SyncError> {
        self.open(binding, None, Some(max_rows)).await
    }
}

struct ReadPlan {
    names: Vec<String>,
    kinds: Vec<ExtractKind>,
    temporal_indices: Vec<usize>,
    orders: Vec<ComponentOrder>,
}

struct PgCursor {
    client: Client,
    conn: JoinHandle<()>,
    plan: ReadPlan,
    open: bool,
}

#[async_trait]
impl SourceCursor for PgCursor {
    async fn next_batch(&mut self, n: usize) -> Result<Option<RowBatch>, SyncError> {
        if !self.open {
            return Err(SyncError::source_read("cursor is closed"));
        }
        let fetch = format!("FETCH FORWARD {n} FROM {CURSOR_NAME}");
        let rows = self
            .client
            .query(&fetch, &[])
            .await
            .map_err(|e| SyncError::source_read(format!("FETCH failed: {e}")))?;
        if rows.is_empty() {
            return Ok(None);
        }

        let mut columns: Vec<ColumnData> = self
            .plan
            .names
            .iter()
            .map(|name| ColumnData {
                name: name.clone(),
                values: Vec::with_capacity(rows.len()),
            })
            .collect();
        for row in &rows {
            for (idx, kind) in self.plan.kinds.iter().enumerate() {
                columns[idx].values.push(extract_cell(row, idx, *kind)?);
            }
        }
        Ok(Some(assemble_batch(
            columns,
            &self.plan.temporal_indices,
            &self.plan.orders,
        )))
    }

    async fn close(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;
        if let Err(e) = self
            .client
            .batch_execute(&format!("CLOSE {CURSOR_NAME}; COMMIT"))
            .await
        {
            tracing::warn!(error = %e, "cursor close failed; connection teardown will clean up");
        }
        self.conn.abort();
    }
}

impl Drop for PgCursor {
    fn drop(&mut self) {
        // The read-only transaction dies with the connection.
        self.conn.abort();
    }
}

async fn describe_columns(
    client: &Client,
    binding: &TableBinding,
) -> Result<Vec<SourceColumn>, SyncError> {
    let rows = client
        .query(
            "SELECT column_name, data_type, is_nullable \
             FROM information_schema.columns \
             WHERE table_schema = $1 AND table_name = $2 \
             ORDER BY ordinal_position",
            &[&PgSourceReader::schema_of(binding), &binding.source_table],
        )
        .await
        .map_err(|e| SyncError::source_read(format!("catalog query failed: {e}")))?;

    if rows.is_empty() {
        return Err(SyncError::schema_unknown(format!(
            "table '{}' not found or has no columns",
            binding.source_ref()
        )));
    }
    Ok(rows
        .iter()
        .map(|row| {
            let name: String = row.get(0);
            let source_type: String = row.get(1);
            let nullable: String = row.get(2);
            SourceColumn::new(name, source_type, nullable == "YES")
        })
        .collect())
}

/// Build the cursor SELECT with casts, the strict tuple predicate, tuple
/// ordering, and an optional LIMIT.
fn build_read_query(
    binding: &TableBinding,
    plan: &ReadPlan,
    watermark: Option<&Watermark>,
    limit: Option<u64>,
) -> Result<(String, Vec<BindParam>), SyncError> {
    let select_list = plan
        .names
        .iter()
        .zip(&plan.kinds)
        .map(|(name, kind)| {
            let quoted = quote_identifier(name);
            format!("{quoted}{} AS {quoted}", kind.select_cast())
        })
        .collect::<Vec<_>>()
        .join(", ");

    let table_ref = match &binding.source_schema {
        Some(schema) => format!("{}.{}", quote_identifier(schema), quote_identifier(&binding.source_table)),
        None => quote_identifier(&binding.source_table),
    };

    let mut sql = format!("SELECT {select_list} FROM {table_ref}");
    let mut binds = Vec::new();

    if let Some(mark) = watermark {
        if mark.components().len() != plan.temporal_indices.len() {
            return Err(SyncError::internal(format!(
                "watermark arity {} does not match temporal key arity {}",
                mark.components().len(),
                plan.temporal_indices.len()
            )));
        }
        let mut lhs = Vec::new();
        let mut rhs = Vec::new();
        for (pos, (&idx, component)) in plan
            .temporal_indices
            .iter()
            .zip(mark.components())
            .enumerate()
        {
            lhs.push(quote_identifier(&plan.names[idx]));
            let (bind, cast) = match plan.kinds[idx] {
                ExtractKind::Int => (
                    BindParam::Int64(component.parse::<i64>().map_err(|_| {
                        SyncError::internal(format!(
                            "numeric watermark component '{component}' is not an integer"
                        ))
                    })?),
                    "bigint",
                ),
                ExtractKind::Timestamp => (BindParam::Text(component.clone()), "timestamptz"),
                ExtractKind::Float | ExtractKind::Text => {
                    (BindParam::Text(component.clone()), "text")
                }
            };
            rhs.push(format!("${}::{cast}", pos + 1));
            binds.push(bind);
        }
        // Strict > over the tuple: tied boundary rows stay excluded.
        sql.push_str(&format!(
            " WHERE ({}) > ({})",
            lhs.join(", "),
            rhs.join(", ")
        ));
    }

    if !plan.temporal_indices.is_empty() {
        let order = plan
            .temporal_indices
            .iter()
            .map(|&idx| quote_identifier(&plan.names[idx]))
            .collect::<Vec<_>>()
            .join(", ");
        sql.push_str(&format!(" ORDER BY {order}"));
    }

    if let Some(limit) = limit {
        sql.push_str(&format!(" LIMIT {limit}"));
    }

    Ok((sql, binds))
}

fn extract_cell(row: &Row, idx: usize, kind: ExtractKind) -> Result<CellValue, SyncError> {
    let cell = match kind {
        ExtractKind::Int => row
            .try_get::<_, Option<i64>>(idx)
            .map(|v| v.map_or(CellValue::Null, CellValue::Int)),
        ExtractKind::Float => row
            .try_get::<_, Option<f64>>(idx)
            .map(|v| v.map_or(CellValue::Null, CellValue::Double)),
        ExtractKind::Text => row
            .try_get::<_, Option<String>>(idx)
            .map(|v| v.map_or(CellValue::Null, CellValue::Text)),
        ExtractKind::Timestamp => row.try_get::<_, Option<DateTime<Utc>>>(idx).map(|v| {
            v.map_or(CellValue::Null, |dt| {
                CellValue::Text(dt.to_rfc3339_opts(SecondsFormat::Micros, true))
            })
        }),
    };
    cell.map_err(|e| SyncError::source_read(format!("row decode failed at column {idx}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan_for(names: &[&str], kinds: &[ExtractKind], temporal: &[usize]) -> ReadPlan {
        ReadPlan {
            names: names.iter().map(|s| s.to_string()).collect(),
            kinds: kinds.to_vec(),
            temporal_indices: temporal.to_vec(),
            orders: temporal
                .iter()
                .map(|&i| match kinds[i] {
                    ExtractKind::Int => ComponentOrder::Numeric,
                    _ => ComponentOrder::Text,
                })
                .collect(),
        }
    }

    fn binding() -> TableBinding {
        TableBinding {
            source_schema: Some("hist".into()),
            source_table: "events".into(),
            target_table: "events".into(),
            primary_key: vec!["id".into()],
            temporal_key: vec!["ts".into()],
            batch_size: 1000,
        }
    }

    #[test]
    fn full_query_casts_and_orders() {
        let plan = plan_for(
            &["id", "ts"],
            &[ExtractKind::Int, ExtractKind::Timestamp],
            &[1],
        );
        let (sql, binds) = build_read_query(&binding(), &plan, None, None).unwrap();
        assert_eq!(
            sql,
            "SELECT \"id\"::bigint AS \"id\", \"ts\"::timestamptz AS \"ts\" \
             FROM \"hist\".\"events\" ORDER BY \"ts\""
        );
        assert!(binds.is_empty());
    }

    #[test]
    fn incremental_query_uses_strict_tuple_predicate() {
        let plan = plan_for(
            &["id", "ts"],
            &[ExtractKind::Int, ExtractKind::Timestamp],
            &[1, 0],
        );
        let mark = Watermark::new(vec!["2026-01-15T10:00:00Z".into(), "42".into()]);
        let (sql, binds) = build_read_query(&binding(), &plan, Some(&mark), None).unwrap();
        assert!(sql.contains("WHERE (\"ts\", \"id\") > ($1::timestamptz, $2::bigint)"));
        assert!(sql.ends_with("ORDER BY \"ts\", \"id\""));
        assert_eq!(binds.len(), 2);
        assert!(matches!(binds[1], BindParam::Int64(42)));
    }

    #[test]
    fn limited_query_appends_limit() {
        let plan = plan_for(&["id"], &[ExtractKind::Int], &[]);
        let (sql, _) = build_read_query(&binding(), &plan, None, Some(500)).unwrap();
        assert!(sql.ends_with("LIMIT 500"));
        assert!(!sql.contains("ORDER BY"));
    }

    #[test]
    fn watermark_arity_mismatch_is_rejected() {
        let plan = plan_for(
            &["id", "ts"],
            &[ExtractKind::Int, ExtractKind::Timestamp],
            &[1, 0],
        );
        let mark = Watermark::single("2026-01-15T10:00:00Z");
        let err = build_read_query(&binding(), &plan, Some(&mark), None).unwrap_err();
        assert!(err.message.contains("arity"));
    }

    #[test]
    fn non_integer_numeric_watermark_component_fails() {
        let plan = plan_for(&["id"], &[ExtractKind::Int], &[0]);
        let mark = Watermark::single("not-a-number");
        assert!(build_read_query(&binding(), &plan, Some(&mark), None).is_err());
    }
}
