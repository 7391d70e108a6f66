//! Sync engine: the shared pipeline behind test, full, and incremental
//! runs.
//!
//! Phases: schema (describe + map), ddl, copy (batched extract/load with
//! per-batch checkpoints and retry), finalize (promote state, clear
//! checkpoint). Cancellation and the pause gate are observed between
//! batches; the cursor is closed on every exit path.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;

use tidemark_state::StateStore;
use tidemark_types::{
    ColumnSpec, ComponentOrder, MappingDiff, ProgressCheckpoint, SchemaMapping, SyncError,
    SyncEvent, SyncKind, SyncPhase, SyncState, SyncStatus, TableBinding, TargetType, Watermark,
};

use crate::analytics::AnalyticsWriter;
use crate::config::SyncOptions;
use crate::identifier::validate_identifier;
use crate::progress::RunContext;
use crate::retry::compute_backoff;
use crate::source::{SourceCursor, SourceReader};
use crate::type_map::map_source_type;

/// Suffix for the disposable test-sync target.
const TEST_TABLE_SUFFIX: &str = "_test";

/// Result of a run that reached a terminal point without failing.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed(RunSummary),
    Stopped { reason: String },
}

/// Counters reported by a completed run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub rows_loaded: u64,
    pub duration_seconds: f64,
}

/// Orchestrates one sync run at a time over a reader/writer/store triple.
pub struct SyncEngine {
    reader: Arc<dyn SourceReader>,
    writer: Arc<AnalyticsWriter>,
    store: Arc<StateStore>,
    options: SyncOptions,
}

impl SyncEngine {
    #[must_use]
    pub fn new(
        reader: Arc<dyn SourceReader>,
        writer: Arc<AnalyticsWriter>,
        store: Arc<StateStore>,
        options: SyncOptions,
    ) -> Self {
        Self {
            reader,
            writer,
            store,
            options,
        }
    }

    /// Execute one run. `max_rows` applies to test syncs only.
    ///
    /// Cancellation surfaces as `Ok(RunOutcome::Stopped)`; everything else
    /// that ends the run early is an error.
    ///
    /// # Errors
    ///
    /// Any [`SyncError`] from the phase pipeline; on failure the state
    /// status becomes `failed` and a surviving checkpoint is the
    /// resumption signal for the next run.
    pub async fn run(
        &self,
        kind: SyncKind,
        binding: &TableBinding,
        max_rows: Option<u64>,
        ctx: &RunContext,
    ) -> Result<RunOutcome, SyncError> {
        self.validate_binding(kind, binding)?;
        let target = match kind {
            SyncKind::Test => format!("{}{TEST_TABLE_SUFFIX}", binding.target_table),
            SyncKind::Full | SyncKind::Incremental => binding.target_table.clone(),
        };

        let result = self.run_phases(kind, binding, &target, max_rows, ctx).await;

        if kind != SyncKind::Test {
            match &result {
                Ok(RunOutcome::Stopped { .. }) => self.mark_status(&target, SyncStatus::Stopped),
                Err(_) => self.mark_status(&target, SyncStatus::Failed),
                Ok(RunOutcome::Completed(_)) => {}
            }
        }
        result
    }

    fn validate_binding(&self, kind: SyncKind, binding: &TableBinding) -> Result<(), SyncError> {
        binding.validate()?;
        validate_identifier(&binding.target_table)?;
        validate_identifier(&binding.source_table)?;
        if let Some(schema) = &binding.source_schema {
            validate_identifier(schema)?;
        }
        for name in binding.primary_key.iter().chain(&binding.temporal_key) {
            validate_identifier(name)?;
        }
        if kind == SyncKind::Incremental && !binding.supports_incremental() {
            return Err(SyncError::config(format!(
                "binding '{}' has no temporal key; incremental sync is unavailable",
                binding.target_table
            )));
        }
        Ok(())
    }

    async fn run_phases(
        &self,
        kind: SyncKind,
        binding: &TableBinding,
        target: &str,
        max_rows: Option<u64>,
        ctx: &RunContext,
    ) -> Result<RunOutcome, SyncError> {
        let started = Instant::now();

        // Schema: describe, map every column, settle the mapping version.
        self.emit_phase(ctx, SyncPhase::Schema, 0, None).await;
        let specs = self.derive_columns(binding).await?;
        let mapping = self.settle_mapping(kind, target, &specs)?;

        // DDL.
        self.emit_phase(ctx, SyncPhase::Ddl, 0, None).await;
        self.prepare_target(kind, target, &specs, binding)?;

        // Copy.
        self.emit_phase(ctx, SyncPhase::Copy, 0, max_rows).await;
        let prior_state = if kind == SyncKind::Test {
            SyncState::default()
        } else {
            self.store.load_state(target).map_err(SyncError::from)?.unwrap_or_default()
        };
        let orders = temporal_orders(binding, &specs);
        let start_watermark = self.resume_watermark(kind, target, &prior_state)?;

        if kind != SyncKind::Test {
            let mut running = prior_state.clone();
            running.status = SyncStatus::Running;
            self.store
                .save_state(target, &running)
                .map_err(SyncError::from)?;
        }

        let mut cursor = match (kind, &start_watermark) {
            (SyncKind::Test, _) => {
                let limit = max_rows.unwrap_or(self.options.batch_size as u64);
                self.reader.open_limited(binding, limit).await?
            }
            (_, Some(mark)) => self.reader.open_incremental(binding, mark).await?,
            (_, None) => self.reader.open_full(binding).await?,
        };

        let copy = self
            .copy_loop(
                kind,
                binding,
                target,
                max_rows,
                &orders,
                Arc::new(specs.clone()),
                &mut *cursor,
                ctx,
                started,
            )
            .await;
        cursor.close().await;
        let copy = copy?;

        if let CopyResult::Stopped { reason } = copy {
            return Ok(RunOutcome::Stopped { reason });
        }
        let CopyResult::Done(progress) = copy else {
            unreachable!("stopped handled above")
        };

        // Finalize.
        self.emit_phase(ctx, SyncPhase::Finalize, progress.rows_done, max_rows)
            .await;
        match kind {
            SyncKind::Test => {
                // The test target is disposable; dropping it is the whole
                // cleanup.
                self.writer.drop_table(target)?;
            }
            SyncKind::Full | SyncKind::Incremental => {
                // A full load replaced the table, so its watermark is
                // whatever was actually loaded; an empty incremental run
                // keeps the prior one unchanged.
                let loaded_watermark = progress.max_watermark.as_ref().map(Watermark::encode);
                let new_watermark = match kind {
                    SyncKind::Full => loaded_watermark,
                    _ => loaded_watermark.or(prior_state.last_watermark.clone()),
                };
                let total_rows = match kind {
                    SyncKind::Full => progress.rows_done,
                    _ => prior_state.total_rows + progress.rows_done,
                };
                let state = SyncState {
                    last_sync_at: Some(Utc::now()),
                    last_watermark: new_watermark,
                    last_batch_count: progress.last_batch_rows,
                    total_rows,
                    mapping_version: mapping.version,
                    status: SyncStatus::Idle,
                };
                self.store.save_state(target, &state).map_err(SyncError::from)?;
                self.store.clear_checkpoint(target).map_err(SyncError::from)?;
            }
        }

        let duration_seconds = started.elapsed().as_secs_f64();
        let rate = if duration_seconds > 0.0 {
            progress.rows_done as f64 / duration_seconds
        } else {
            0.0
        };
        tracing::info!(
            table = target,
            kind = %kind,
            rows = progress.rows_done,
            duration_seconds,
            rows_per_second = rate,
            "sync completed"
        );
        Ok(RunOutcome::Completed(RunSummary {
            rows_loaded: progress.rows_done,
            duration_seconds,
        }))
    }

    async fn derive_columns(&self, binding: &TableBinding) -> Result<Vec<ColumnSpec>, SyncError> {
        let raw = self.reader.describe(binding).await?;
        raw.into_iter()
            .map(|col| {
                let target_type = map_source_type(&col.name, &col.source_type)?;
                Ok(ColumnSpec {
                    is_primary_key: binding
                        .primary_key
                        .iter()
                        .any(|k| k.eq_ignore_ascii_case(&col.name)),
                    is_temporal: binding
                        .temporal_key
                        .iter()
                        .any(|k| k.eq_ignore_ascii_case(&col.name)),
                    name: col.name,
                    source_type: col.source_type,
                    target_type,
                    nullable: col.nullable,
                })
            })
            .collect()
    }

    fn settle_mapping(
        &self,
        kind: SyncKind,
        target: &str,
        specs: &[ColumnSpec],
    ) -> Result<SchemaMapping, SyncError> {
        match kind {
            // Test runs never touch durable mapping state.
            SyncKind::Test => Ok(SchemaMapping::initial(specs.to_vec())),
            SyncKind::Full => self
                .store
                .reset_mapping(target, specs.to_vec())
                .map_err(SyncError::from),
            SyncKind::Incremental => {
                if let Some(stored) = self.store.load_mapping(target).map_err(SyncError::from)? {
                    match stored.diff(specs) {
                        MappingDiff::ColumnsChanged => {
                            return Err(SyncError::schema_drift(format!(
                                "column set for '{target}' changed since mapping version {}; \
                                 run a full sync",
                                stored.version
                            )));
                        }
                        MappingDiff::TypesChanged => {
                            // A change across type families cannot load into
                            // the existing target column; within a family
                            // (e.g. widened precision) the mapping version
                            // bumps and the run continues.
                            if let Some((name, old, new)) = family_change(&stored, specs) {
                                return Err(SyncError::schema_drift(format!(
                                    "column '{name}' of '{target}' changed from {} to {}; \
                                     run a full sync",
                                    old.sql(),
                                    new.sql()
                                )));
                            }
                        }
                        MappingDiff::Identical => {}
                    }
                }
                let (mapping, diff) = self
                    .store
                    .upsert_mapping(target, specs.to_vec())
                    .map_err(SyncError::from)?;
                if diff == MappingDiff::TypesChanged {
                    tracing::warn!(
                        table = target,
                        version = mapping.version,
                        "column types changed within an identical column set"
                    );
                }
                Ok(mapping)
            }
        }
    }

    fn prepare_target(
        &self,
        kind: SyncKind,
        target: &str,
        specs: &[ColumnSpec],
        binding: &TableBinding,
    ) -> Result<(), SyncError> {
        match kind {
            SyncKind::Test => {
                // Disposable table, no primary key: insert speed wins.
                self.writer.drop_table(target)?;
                self.writer.create_table(target, specs, &[])
            }
            SyncKind::Full => {
                if self.writer.table_exists(target)? {
                    self.writer.drop_table(target)?;
                }
                // A crashed full sync restarts from zero; a leftover
                // checkpoint from it must not steer a later resume.
                self.store.clear_checkpoint(target).map_err(SyncError::from)?;
                self.writer.create_table(target, specs, &binding.primary_key)
            }
            SyncKind::Incremental => {
                if !self.writer.table_exists(target)? {
                    return Err(SyncError::schema_unknown(format!(
                        "target table '{target}' does not exist; run a full sync first"
                    )));
                }
                Ok(())
            }
        }
    }

    /// Where an incremental run starts: a surviving checkpoint beats the
    /// finalized watermark, because it reflects batches the store already
    /// acknowledged.
    fn resume_watermark(
        &self,
        kind: SyncKind,
        target: &str,
        state: &SyncState,
    ) -> Result<Option<Watermark>, SyncError> {
        if kind != SyncKind::Incremental {
            return Ok(None);
        }
        if let Some(checkpoint) = self.store.load_checkpoint(target).map_err(SyncError::from)? {
            if checkpoint.is_resumable() {
                let mark = checkpoint
                    .last_batch_watermark
                    .as_deref()
                    .map(Watermark::decode)
                    .expect("resumable checkpoint has a watermark");
                tracing::info!(
                    table = target,
                    rows_done = checkpoint.rows_done,
                    watermark = %mark,
                    "resuming from surviving checkpoint"
                );
                return Ok(Some(mark));
            }
        }
        Ok(state.last_watermark.as_deref().map(Watermark::decode))
    }

    #[allow(clippy::too_many_arguments)]
    async fn copy_loop(
        &self,
        kind: SyncKind,
        binding: &TableBinding,
        target: &str,
        max_rows: Option<u64>,
        orders: &[ComponentOrder],
        specs: Arc<Vec<ColumnSpec>>,
        cursor: &mut dyn SourceCursor,
        ctx: &RunContext,
        started: Instant,
    ) -> Result<CopyResult, SyncError> {
        let mut progress = CopyProgress {
            rows_done: 0,
            last_batch_rows: 0,
            max_watermark: None,
        };
        let mut checkpoint = ProgressCheckpoint::begin(ctx.run_id, target, max_rows);
        let mut iterations: u64 = 0;

        loop {
            if let Some(reason) = self.observe_control(ctx).await {
                tracing::info!(table = target, reason = %reason, "sync stopped at batch boundary");
                return Ok(CopyResult::Stopped { reason });
            }
            if started.elapsed() > self.options.max_duration() {
                return Err(SyncError::timeout(format!(
                    "sync exceeded maximum duration ({}s)",
                    self.options.max_duration_seconds
                )));
            }
            if iterations >= self.options.max_iterations {
                return Err(SyncError::iteration_cap(format!(
                    "sync exceeded maximum iterations ({})",
                    self.options.max_iterations
                )));
            }

            let request = match max_rows {
                Some(total) => {
                    let remaining = total.saturating_sub(progress.rows_done);
                    if remaining == 0 {
                        break;
                    }
                    (binding.batch_size as u64).min(remaining) as usize
                }
                None => binding.batch_size,
            };

            // Fetch, retrying transient read errors in place: the
            // server-side cursor keeps its position across attempts.
            let batch = {
                let mut attempt = 1u32;
                loop {
                    match cursor.next_batch(request).await {
                        Ok(batch) => break batch,
                        Err(err)
                            if err.retryable && attempt < self.options.retry.max_attempts =>
                        {
                            let delay = compute_backoff(&self.options.retry, attempt);
                            tracing::warn!(
                                table = target,
                                attempt,
                                delay_ms = delay.as_millis() as u64,
                                error = %err,
                                "transient read error; retrying batch fetch"
                            );
                            tokio::time::sleep(delay).await;
                            attempt += 1;
                        }
                        Err(err) => return Err(err),
                    }
                }
            };
            let Some(batch) = batch else { break };
            if batch.is_empty() {
                continue;
            }
            iterations += 1;

            // Insert, retrying transient write errors with the same batch.
            let batch = Arc::new(batch);
            {
                let mut attempt = 1u32;
                loop {
                    let writer = Arc::clone(&self.writer);
                    let specs = Arc::clone(&specs);
                    let batch = Arc::clone(&batch);
                    let table = target.to_string();
                    let result = tokio::task::spawn_blocking(move || {
                        writer.insert_batch(&table, &specs, &batch)
                    })
                    .await
                    .map_err(|e| SyncError::internal(format!("insert task panicked: {e}")))?;
                    match result {
                        Ok(_) => break,
                        Err(err)
                            if err.retryable && attempt < self.options.retry.max_attempts =>
                        {
                            let delay = compute_backoff(&self.options.retry, attempt);
                            tracing::warn!(
                                table = target,
                                attempt,
                                delay_ms = delay.as_millis() as u64,
                                error = %err,
                                "transient write error; retrying batch insert"
                            );
                            tokio::time::sleep(delay).await;
                            attempt += 1;
                        }
                        Err(err) => return Err(err),
                    }
                }
            }

            progress.rows_done += batch.row_count as u64;
            progress.last_batch_rows = batch.row_count as u64;
            if let Some(mark) = &batch.max_temporal {
                progress.max_watermark = Some(match progress.max_watermark.take() {
                    Some(current) => current.max(mark.clone(), orders),
                    None => mark.clone(),
                });
            }

            if kind != SyncKind::Test {
                checkpoint.advance(
                    batch.row_count as u64,
                    batch.max_temporal.as_ref().map(Watermark::encode),
                );
                self.store
                    .write_checkpoint(&checkpoint)
                    .map_err(SyncError::from)?;
            }

            let eta_seconds = max_rows.and_then(|total| {
                let elapsed = started.elapsed().as_secs_f64();
                let rate = progress.rows_done as f64 / elapsed.max(1e-6);
                (rate > 0.0).then(|| {
                    (total.saturating_sub(progress.rows_done) as f64 / rate).round() as u64
                })
            });
            ctx.events
                .emit(SyncEvent::Progress {
                    run_id: ctx.run_id,
                    rows_done: progress.rows_done,
                    rows_total: max_rows,
                    eta_seconds,
                    phase: SyncPhase::Copy,
                    events_dropped: 0,
                })
                .await;
        }

        Ok(CopyResult::Done(progress))
    }

    /// One cancellation/pause observation at a batch boundary. Returns the
    /// stop reason when the run must end.
    async fn observe_control(&self, ctx: &RunContext) -> Option<String> {
        if ctx.cancel.is_cancelled() {
            return Some("stop requested".to_string());
        }
        if ctx.gate.is_paused() {
            ctx.events.emit(SyncEvent::Paused { run_id: ctx.run_id }).await;
            while ctx.gate.is_paused() {
                tokio::time::sleep(ctx.pause_poll).await;
                if ctx.cancel.is_cancelled() {
                    return Some("stop requested while paused".to_string());
                }
            }
            ctx.events
                .emit(SyncEvent::Resumed { run_id: ctx.run_id })
                .await;
        }
        None
    }

    async fn emit_phase(
        &self,
        ctx: &RunContext,
        phase: SyncPhase,
        rows_done: u64,
        rows_total: Option<u64>,
    ) {
        ctx.events
            .emit(SyncEvent::Progress {
                run_id: ctx.run_id,
                rows_done,
                rows_total,
                eta_seconds: None,
                phase,
                events_dropped: 0,
            })
            .await;
    }

    fn mark_status(&self, target: &str, status: SyncStatus) {
        match self.store.load_state(target) {
            Ok(state) => {
                let mut state = state.unwrap_or_default();
                state.status = status;
                if let Err(e) = self.store.save_state(target, &state) {
                    tracing::error!(table = target, error = %e, "failed to persist run status");
                }
            }
            Err(e) => {
                tracing::error!(table = target, error = %e, "failed to load state for status update");
            }
        }
    }
}

/// First column whose mapped type moved to a different family, if any.
fn family_change(
    stored: &SchemaMapping,
    specs: &[ColumnSpec],
) -> Option<(String, TargetType, TargetType)> {
    for spec in specs {
        let Some(old) = stored.columns.iter().find(|c| c.name == spec.name) else {
            continue;
        };
        if !same_family(old.target_type, spec.target_type) {
            return Some((spec.name.clone(), old.target_type, spec.target_type));
        }
    }
    None
}

fn same_family(a: TargetType, b: TargetType) -> bool {
    matches!(
        (a, b),
        (TargetType::Integer, TargetType::Integer)
            | (TargetType::Double, TargetType::Double)
            | (TargetType::VarChar, TargetType::VarChar)
            | (TargetType::Timestamp, TargetType::Timestamp)
            | (TargetType::Decimal { .. }, TargetType::Decimal { .. })
    )
}

/// Per-component comparison rules for a binding's temporal key.
fn temporal_orders(binding: &TableBinding, specs: &[ColumnSpec]) -> Vec<ComponentOrder> {
    binding
        .temporal_key
        .iter()
        .map(|key| {
            specs
                .iter()
                .find(|spec| spec.name.eq_ignore_ascii_case(key))
                .map_or(ComponentOrder::Text, |spec| {
                    if spec.target_type == TargetType::Integer {
                        ComponentOrder::Numeric
                    } else {
                        ComponentOrder::Text
                    }
                })
        })
        .collect()
}

enum CopyResult {
    Done(CopyProgress),
    Stopped { reason: String },
}

struct CopyProgress {
    rows_done: u64,
    last_batch_rows: u64,
    max_watermark: Option<Watermark>,
}
