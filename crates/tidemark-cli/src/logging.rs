//! Logging setup for the tidemark binary.

use tracing_subscriber::EnvFilter;

/// Crates whose chatter drowns sync progress at `debug`/`trace`: the cron
/// runtime ticks constantly and the source driver logs every protocol
/// round-trip. They stay at `warn` unless `RUST_LOG` says otherwise.
const QUIET_DEPENDENCIES: &[&str] = &["tokio_cron_scheduler", "tokio_postgres"];

/// Initialize structured logging.
///
/// `RUST_LOG` takes precedence when set; otherwise `log_level` applies to
/// the tidemark crates while noisy dependencies are capped at `warn`.
pub fn init(log_level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(log_level)));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();
}

/// Build the default filter directives for a base level.
fn default_directives(log_level: &str) -> String {
    let mut directives = log_level.to_string();
    for dep in QUIET_DEPENDENCIES {
        directives.push_str(&format!(",{dep}=warn"));
    }
    directives
}
