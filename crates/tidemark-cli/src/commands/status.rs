//! Status command: print the persisted sync state for a table.

use anyhow::{Context, Result};

use tidemark_state::StateStore;

use crate::config_file::FileConfig;

pub fn execute(config: &FileConfig, table: &str) -> Result<()> {
    let store = StateStore::open(&config.core.state.dir).context("failed to open state store")?;

    match store.load_state(table)? {
        Some(state) => println!("{}", serde_json::to_string_pretty(&state)?),
        None => println!("table '{table}' has never been synced"),
    }
    if let Some(checkpoint) = store.load_checkpoint(table)? {
        println!(
            "in-flight checkpoint: {} rows done (run {})",
            checkpoint.rows_done, checkpoint.run_id
        );
    }
    Ok(())
}
