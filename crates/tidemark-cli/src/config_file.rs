//! Config file loading: YAML with `${ENV_VAR}` substitution.

use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;
use serde::Deserialize;

use tidemark_engine::Config;
use tidemark_types::TableBinding;

static ENV_VAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid env var regex"));

/// Full config file: the core configuration plus the table bindings the
/// CLI selects from by target name.
#[derive(Debug, Clone, Deserialize)]
pub struct FileConfig {
    #[serde(flatten)]
    pub core: Config,
    #[serde(default)]
    pub tables: Vec<TableBinding>,
}

impl FileConfig {
    /// Binding whose target table matches `name`.
    ///
    /// # Errors
    ///
    /// Fails when no binding matches.
    pub fn binding(&self, name: &str) -> Result<TableBinding> {
        self.tables
            .iter()
            .find(|b| b.target_table == name)
            .cloned()
            .with_context(|| {
                format!(
                    "no table binding named '{name}' (known: {})",
                    self.tables
                        .iter()
                        .map(|b| b.target_table.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                )
            })
    }
}

/// Substitute `${VAR_NAME}` patterns with environment variable values.
///
/// # Errors
///
/// Returns an error if any referenced environment variable is not set.
pub fn substitute_env_vars(input: &str) -> Result<String> {
    let mut result = input.to_string();
    let mut missing = Vec::new();

    for cap in ENV_VAR_RE.captures_iter(input) {
        let var_name = &cap[1];
        match std::env::var(var_name) {
            Ok(val) => {
                result = result.replace(&cap[0], &val);
            }
            Err(_) => {
                missing.push(var_name.to_string());
            }
        }
    }

    if !missing.is_empty() {
        anyhow::bail!("Missing environment variable(s): {}", missing.join(", "));
    }
    Ok(result)
}

/// Parse a config YAML string (after env var substitution).
///
/// # Errors
///
/// Returns an error if substitution fails or the YAML is invalid.
pub fn parse_config_str(yaml_str: &str) -> Result<FileConfig> {
    let substituted = substitute_env_vars(yaml_str)?;
    let config: FileConfig =
        serde_yaml::from_str(&substituted).context("Failed to parse config YAML")?;
    Ok(config)
}

/// Load and parse a config file.
///
/// # Errors
///
/// Returns an error on read, substitution, or parse failure.
pub fn load(path: &Path) -> Result<FileConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    parse_config_str(&raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
source:
  host: db.example.internal
  port: 5432
  service: hist
  user: reader
  password: secret
analytics:
  path: /var/lib/tidemark/analytics.db
state:
  dir: /var/lib/tidemark/state
tables:
  - source_table: EVENTS
    target_table: events
    primary_key: [id]
    temporal_key: [ts]
    batch_size: 500
"#;

    #[test]
    fn minimal_config_parses_with_defaults() {
        let config = parse_config_str(MINIMAL).unwrap();
        assert_eq!(config.core.source.host, "db.example.internal");
        assert_eq!(config.core.sync.batch_size, 10_000);
        assert_eq!(config.tables.len(), 1);
        config.core.validate().unwrap();
    }

    #[test]
    fn binding_lookup_by_target() {
        let config = parse_config_str(MINIMAL).unwrap();
        let binding = config.binding("events").unwrap();
        assert_eq!(binding.source_table, "EVENTS");
        assert_eq!(binding.batch_size, 500);
        assert!(config.binding("missing").is_err());
    }

    #[test]
    fn env_substitution_replaces_known_vars() {
        std::env::set_var("TIDEMARK_TEST_PW", "s3cret");
        let out = substitute_env_vars("password: ${TIDEMARK_TEST_PW}").unwrap();
        assert_eq!(out, "password: s3cret");
    }

    #[test]
    fn env_substitution_reports_missing_vars() {
        let err = substitute_env_vars("password: ${TIDEMARK_DEFINITELY_UNSET}").unwrap_err();
        assert!(err.to_string().contains("TIDEMARK_DEFINITELY_UNSET"));
    }
}
