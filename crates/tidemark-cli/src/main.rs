mod commands;
mod config_file;
mod logging;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "tidemark", version, about = "Mirror history tables into an embedded analytics store")]
struct Cli {
    /// Path to the config YAML file
    #[arg(long, short, default_value = "tidemark.yaml", global = true)]
    config: PathBuf,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Mode {
    Test,
    Full,
    Incremental,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one sync for a configured table
    Sync {
        /// Target table name from the config's `tables` section
        #[arg(long)]
        table: String,
        #[arg(long, value_enum, default_value_t = Mode::Incremental)]
        mode: Mode,
        /// Row cap for test syncs
        #[arg(long, default_value_t = 10_000)]
        max_rows: u64,
    },
    /// Register recurring syncs and dispatch them until interrupted
    Schedule {
        /// Schedule name
        #[arg(long)]
        name: String,
        /// Cron expression (seconds-resolution, e.g. "0 0 2 * * *")
        #[arg(long)]
        cron: String,
        /// Target tables from the config's `tables` section; all when omitted
        #[arg(long)]
        table: Vec<String>,
    },
    /// Print the persisted sync state for a table
    Status {
        #[arg(long)]
        table: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    logging::init(&cli.log_level);

    let config = config_file::load(&cli.config)?;
    match cli.command {
        Commands::Sync {
            table,
            mode,
            max_rows,
        } => commands::sync::execute(config, &table, mode, max_rows).await,
        Commands::Schedule { name, cron, table } => {
            commands::schedule::execute(config, &name, &cron, &table).await
        }
        Commands::Status { table } => commands::status::execute(&config, &table),
    }
}
