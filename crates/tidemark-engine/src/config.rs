//! Core configuration.
//!
//! The surrounding CLI (or any other embedder) builds a [`Config`] value —
//! typically from YAML with environment substitution — and hands it to the
//! core. Nothing in here reads the environment or global state.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use tidemark_types::SyncError;

/// Source connection parameters.
#[derive(Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub host: String,
    #[serde(default = "default_source_port")]
    pub port: u16,
    /// Logical service / database name on the source.
    pub service: String,
    pub user: String,
    pub password: String,
}

// The password must never reach logs or error messages.
impl fmt::Debug for SourceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("service", &self.service)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Analytics store location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsConfig {
    /// File path of the embedded store.
    pub path: PathBuf,
    /// Logical database name inside the store.
    #[serde(default = "default_database")]
    pub database: String,
}

/// State directory settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    /// Directory for state, mapping, checkpoint, and lock files.
    pub dir: PathBuf,
}

/// Lock behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    /// Staleness threshold for forced takeover.
    #[serde(default = "default_lock_stale_seconds")]
    pub stale_seconds: u64,
    /// How long manual runs wait for the lock before reporting busy.
    #[serde(default)]
    pub acquire_timeout_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            stale_seconds: default_lock_stale_seconds(),
            acquire_timeout_ms: 0,
        }
    }
}

/// Retry policy for transient per-batch failures.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_retry_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_base_ms")]
    pub base_ms: u64,
    #[serde(default = "default_retry_cap_ms")]
    pub cap_ms: u64,
    /// Fractional jitter applied to each delay (0.2 = ±20%).
    #[serde(default = "default_retry_jitter")]
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_retry_attempts(),
            base_ms: default_retry_base_ms(),
            cap_ms: default_retry_cap_ms(),
            jitter: default_retry_jitter(),
        }
    }
}

/// Sync run tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncOptions {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_duration_seconds")]
    pub max_duration_seconds: u64,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u64,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_duration_seconds: default_max_duration_seconds(),
            max_iterations: default_max_iterations(),
            retry: RetryConfig::default(),
        }
    }
}

impl SyncOptions {
    #[must_use]
    pub fn max_duration(&self) -> Duration {
        Duration::from_secs(self.max_duration_seconds)
    }
}

/// Progress channel settings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ProgressConfig {
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    #[serde(default = "default_pause_poll_ms")]
    pub pause_poll_ms: u64,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            pause_poll_ms: default_pause_poll_ms(),
        }
    }
}

impl ProgressConfig {
    #[must_use]
    pub fn pause_poll(&self) -> Duration {
        Duration::from_millis(self.pause_poll_ms)
    }
}

/// Complete core configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub source: SourceConfig,
    pub analytics: AnalyticsConfig,
    pub state: StateConfig,
    #[serde(default)]
    pub lock: LockConfig,
    #[serde(default)]
    pub sync: SyncOptions,
    #[serde(default)]
    pub progress: ProgressConfig,
}

impl Config {
    /// Fail-fast validation; a config that does not pass never enters the
    /// run loop.
    ///
    /// # Errors
    ///
    /// Returns `ConfigInvalid` naming the first offending key.
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.source.host.is_empty() {
            return Err(SyncError::config("source.host must not be empty"));
        }
        if self.source.service.is_empty() {
            return Err(SyncError::config("source.service must not be empty"));
        }
        if self.source.user.is_empty() {
            return Err(SyncError::config("source.user must not be empty"));
        }
        if self.analytics.path.as_os_str().is_empty() {
            return Err(SyncError::config("analytics.path must not be empty"));
        }
        if self.state.dir.as_os_str().is_empty() {
            return Err(SyncError::config("state.dir must not be empty"));
        }
        if self.sync.batch_size == 0 {
            return Err(SyncError::config("sync.batch_size must be at least 1"));
        }
        if self.sync.max_iterations == 0 {
            return Err(SyncError::config("sync.max_iterations must be at least 1"));
        }
        if self.sync.retry.max_attempts == 0 {
            return Err(SyncError::config("sync.retry.max_attempts must be at least 1"));
        }
        if !(0.0..1.0).contains(&self.sync.retry.jitter) {
            return Err(SyncError::config("sync.retry.jitter must be in [0, 1)"));
        }
        if self.progress.channel_capacity == 0 {
            return Err(SyncError::config("progress.channel_capacity must be at least 1"));
        }
        Ok(())
    }

    #[must_use]
    pub fn lock_stale_threshold(&self) -> Duration {
        Duration::from_secs(self.lock.stale_seconds)
    }

    #[must_use]
    pub fn lock_acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.lock.acquire_timeout_ms)
    }
}

fn default_source_port() -> u16 {
    1521
}

fn default_database() -> String {
    "main".to_string()
}

fn default_lock_stale_seconds() -> u64 {
    1800
}

fn default_batch_size() -> usize {
    10_000
}

fn default_max_duration_seconds() -> u64 {
    3600
}

fn default_max_iterations() -> u64 {
    100_000
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_base_ms() -> u64 {
    1000
}

fn default_retry_cap_ms() -> u64 {
    30_000
}

fn default_retry_jitter() -> f64 {
    0.2
}

fn default_channel_capacity() -> usize {
    1000
}

fn default_pause_poll_ms() -> u64 {
    250
}
