//! One-shot sync command: start a run, stream its events, exit with the
//! run's outcome.

use anyhow::{anyhow, bail, Result};

use tidemark_engine::SyncService;
use tidemark_types::SyncEvent;

use crate::config_file::FileConfig;
use crate::Mode;

pub async fn execute(config: FileConfig, table: &str, mode: Mode, max_rows: u64) -> Result<()> {
    let binding = config.binding(table)?;
    let service = SyncService::connect(config.core).await?;
    let mut events = service
        .subscribe_events()
        .ok_or_else(|| anyhow!("event stream already claimed"))?;

    let run_id = match mode {
        Mode::Test => service.test_sync(binding, max_rows).await?,
        Mode::Full => service.full_sync(binding).await?,
        Mode::Incremental => service.incremental_sync(binding).await?,
    };
    tracing::info!(run = %run_id, table, "sync started");

    while let Some(event) = events.recv().await {
        render(&event);
        match event {
            SyncEvent::Completed { .. } | SyncEvent::Stopped { .. } => return Ok(()),
            SyncEvent::Failed { message, .. } => bail!("sync failed: {message}"),
            _ => {}
        }
    }
    bail!("event stream ended without a terminal event")
}

fn render(event: &SyncEvent) {
    match event {
        SyncEvent::Started { run_id, kind, table } => {
            println!("started {kind} sync of '{table}' (run {run_id})");
        }
        SyncEvent::Progress {
            rows_done,
            rows_total,
            eta_seconds,
            phase,
            events_dropped,
            ..
        } => {
            let total = rows_total.map_or(String::new(), |t| format!("/{t}"));
            let eta = eta_seconds.map_or(String::new(), |s| format!(", eta {s}s"));
            let dropped = if *events_dropped > 0 {
                format!(" ({events_dropped} progress events dropped)")
            } else {
                String::new()
            };
            println!("[{phase:?}] {rows_done}{total} rows{eta}{dropped}");
        }
        SyncEvent::Log { level, message, .. } => println!("[{level:?}] {message}"),
        SyncEvent::Paused { .. } => println!("paused"),
        SyncEvent::Resumed { .. } => println!("resumed"),
        SyncEvent::Stopped { reason, .. } => println!("stopped: {reason}"),
        SyncEvent::Failed {
            error_kind,
            message,
            retryable,
            ..
        } => {
            println!("failed [{error_kind}] {message} (retryable: {retryable})");
        }
        SyncEvent::Completed {
            rows_loaded,
            duration_seconds,
            ..
        } => {
            println!("completed: {rows_loaded} rows in {duration_seconds:.2}s");
        }
    }
}
