//! Scheduler command: register recurring syncs and dispatch until
//! interrupted.

use std::time::Duration;

use anyhow::{anyhow, bail, Result};

use tidemark_engine::SyncService;

use crate::config_file::FileConfig;

pub async fn execute(config: FileConfig, name: &str, cron: &str, tables: &[String]) -> Result<()> {
    let bindings = if tables.is_empty() {
        config.tables.clone()
    } else {
        tables
            .iter()
            .map(|t| config.binding(t))
            .collect::<Result<Vec<_>>>()?
    };
    if bindings.is_empty() {
        bail!("no table bindings configured");
    }

    let service = SyncService::connect(config.core).await?;
    let mut events = service
        .subscribe_events()
        .ok_or_else(|| anyhow!("event stream already claimed"))?;

    service.register_schedule(name, cron, bindings).await?;
    service.start_scheduler().await?;
    tracing::info!(schedule = name, cron, "scheduler running; ctrl-c to stop");

    // Drain events in the background so the bounded channel never forces
    // drops while we wait for the interrupt.
    let drain = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            tracing::info!(event = %serde_json::to_string(&event).unwrap_or_default(), "sync event");
        }
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down scheduler");
    service.stop_scheduler(Duration::from_secs(30)).await?;
    drain.abort();
    Ok(())
}
