//! Single-holder sync lock.
//!
//! A path-based advisory lock protecting the whole sync operation for one
//! analytics store. The lock file holds a JSON [`LockRecord`]; acquisition
//! is `O_CREAT|O_EXCL`, so exactly one process can win a race. A lock
//! whose PID is dead on this host and whose age exceeds the stale
//! threshold may be forcibly replaced. PID checks are host-local; this
//! lock assumes a single host.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, StateError};

const LOCK_FILE: &str = "sync.lock";
const RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// Contents of the lock file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    pub holder_id: String,
    pub acquired_at: DateTime<Utc>,
    pub pid: u32,
}

/// Observed lock state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockStatus {
    Free,
    HeldBy { holder_id: String, age_seconds: i64 },
}

/// Held lock; releasing removes the file. Dropped guards release too.
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
    released: bool,
}

impl LockGuard {
    /// Release the lock explicitly. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Io`] if the lock file exists but cannot be
    /// removed.
    pub fn release(mut self) -> Result<()> {
        self.release_inner()
    }

    fn release_inner(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.released = true;
        Ok(())
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if !self.released {
            let _ = fs::remove_file(&self.path);
            self.released = true;
        }
    }
}

/// Acquire the sync lock under `dir`.
///
/// Retries until `timeout` elapses (zero means a single attempt), then
/// fails with [`StateError::LockBusy`]. A stale lock — holder PID dead on
/// this host and age beyond `stale_threshold` — is forcibly replaced; the
/// replaced [`LockRecord`] comes back alongside the guard so callers can
/// surface the takeover to whoever watches their event stream, not just
/// the local log.
///
/// # Errors
///
/// [`StateError::LockBusy`] when another holder keeps the lock through the
/// timeout; [`StateError::Io`] on filesystem failures.
pub fn acquire(
    dir: &Path,
    holder_id: &str,
    timeout: Duration,
    stale_threshold: Duration,
) -> Result<(LockGuard, Option<LockRecord>)> {
    let deadline = Instant::now() + timeout;
    loop {
        match try_acquire(dir, holder_id, stale_threshold) {
            Err(StateError::LockBusy { .. }) if Instant::now() < deadline => {
                std::thread::sleep(RETRY_INTERVAL);
            }
            other => return other,
        }
    }
}

fn try_acquire(
    dir: &Path,
    holder_id: &str,
    stale_threshold: Duration,
) -> Result<(LockGuard, Option<LockRecord>)> {
    fs::create_dir_all(dir)?;
    let path = dir.join(LOCK_FILE);

    let mut replaced = None;
    if let Some(existing) = read_record(&path)? {
        let age_seconds = Utc::now()
            .signed_duration_since(existing.acquired_at)
            .num_seconds();
        let stale = !pid_is_alive(existing.pid)
            && age_seconds >= 0
            && age_seconds as u64 > stale_threshold.as_secs();
        if stale {
            tracing::warn!(
                prior_holder = %existing.holder_id,
                prior_pid = existing.pid,
                age_seconds,
                "replacing stale sync lock"
            );
            fs::remove_file(&path)?;
            replaced = Some(existing);
        } else {
            return Err(StateError::LockBusy {
                holder_id: existing.holder_id,
                pid: existing.pid,
                age_seconds,
            });
        }
    }

    let record = LockRecord {
        holder_id: holder_id.to_string(),
        acquired_at: Utc::now(),
        pid: std::process::id(),
    };
    let mut payload = serde_json::to_vec_pretty(&record).map_err(StateError::Encode)?;
    payload.push(b'\n');

    let mut file = match OpenOptions::new().create_new(true).write(true).open(&path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            // Lost the creation race; report the winner.
            let winner = read_record(&path)?;
            return Err(match winner {
                Some(rec) => StateError::LockBusy {
                    age_seconds: Utc::now()
                        .signed_duration_since(rec.acquired_at)
                        .num_seconds(),
                    holder_id: rec.holder_id,
                    pid: rec.pid,
                },
                None => StateError::LockBusy {
                    holder_id: "unknown".into(),
                    pid: 0,
                    age_seconds: 0,
                },
            });
        }
        Err(e) => return Err(e.into()),
    };
    file.write_all(&payload)?;
    file.sync_all()?;

    Ok((
        LockGuard {
            path,
            released: false,
        },
        replaced,
    ))
}

/// Observe the lock without contending for it.
///
/// # Errors
///
/// Returns [`StateError::Io`] if the lock file cannot be read.
pub fn is_held(dir: &Path) -> Result<LockStatus> {
    let path = dir.join(LOCK_FILE);
    match read_record(&path)? {
        Some(record) => Ok(LockStatus::HeldBy {
            age_seconds: Utc::now()
                .signed_duration_since(record.acquired_at)
                .num_seconds(),
            holder_id: record.holder_id,
        }),
        None => Ok(LockStatus::Free),
    }
}

fn read_record(path: &Path) -> Result<Option<LockRecord>> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    match serde_json::from_str(&raw) {
        Ok(record) => Ok(Some(record)),
        Err(_) => {
            // Unreadable lock file: treat as stale and let the acquirer
            // recreate it.
            tracing::warn!(path = %path.display(), "removing undecodable sync lock file");
            let _ = fs::remove_file(path);
            Ok(None)
        }
    }
}

#[cfg(target_os = "linux")]
fn pid_is_alive(pid: u32) -> bool {
    Path::new(&format!("/proc/{pid}")).exists()
}

#[cfg(not(target_os = "linux"))]
fn pid_is_alive(_pid: u32) -> bool {
    true
}
