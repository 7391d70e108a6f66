//! Recurring sync scheduling.
//!
//! Named cron jobs that construct a run spec per fire (incremental by
//! default, full when the target table is missing) and hand it to the
//! worker under the sync lock. A fire that cannot take the lock is
//! skipped and logged; missed fires are never made up.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio_cron_scheduler::{Job, JobScheduler};
use uuid::Uuid;

use tidemark_state::lock;
use tidemark_types::{LogLevel, RunId, SyncError, SyncEvent, SyncKind, TableBinding};

use crate::analytics::AnalyticsWriter;
use crate::progress::EventSink;
use crate::worker::{RunSpec, SyncWorker};

/// Registered job summary, for `list()`.
#[derive(Debug, Clone, Serialize)]
pub struct JobInfo {
    pub name: String,
    pub cron: String,
    pub tables: Vec<String>,
}

/// Shared dependencies each trigger fire needs.
pub(crate) struct TriggerDeps {
    pub worker: Arc<SyncWorker>,
    pub writer: Arc<AnalyticsWriter>,
    pub state_dir: PathBuf,
    pub stale_threshold: Duration,
    pub events: EventSink,
}

/// Cron-driven recurring sync triggers.
pub struct SyncScheduler {
    sched: tokio::sync::Mutex<JobScheduler>,
    started: Mutex<bool>,
    registry: Mutex<HashMap<String, (Uuid, JobInfo)>>,
    deps: Arc<TriggerDeps>,
}

impl SyncScheduler {
    /// Build the scheduler runtime; jobs are registered separately.
    ///
    /// # Errors
    ///
    /// Returns `Internal` if the scheduler runtime cannot be created.
    pub async fn new(
        worker: Arc<SyncWorker>,
        writer: Arc<AnalyticsWriter>,
        state_dir: PathBuf,
        stale_threshold: Duration,
        events: EventSink,
    ) -> Result<Self, SyncError> {
        let sched = JobScheduler::new()
            .await
            .map_err(|e| SyncError::internal(format!("scheduler init failed: {e}")))?;
        Ok(Self {
            sched: tokio::sync::Mutex::new(sched),
            started: Mutex::new(false),
            registry: Mutex::new(HashMap::new()),
            deps: Arc::new(TriggerDeps {
                worker,
                writer,
                state_dir,
                stale_threshold,
                events,
            }),
        })
    }

    /// Register a recurring job. Duplicate names are rejected.
    ///
    /// # Errors
    ///
    /// `ConfigInvalid` on a duplicate name or unparsable cron expression;
    /// `Internal` if the scheduler refuses the job.
    pub async fn register(
        &self,
        name: &str,
        cron: &str,
        bindings: Vec<TableBinding>,
    ) -> Result<(), SyncError> {
        if self.registry.lock().expect("registry lock").contains_key(name) {
            return Err(SyncError::config(format!(
                "schedule '{name}' is already registered"
            )));
        }
        for binding in &bindings {
            binding.validate()?;
        }

        let deps = Arc::clone(&self.deps);
        let job_name = name.to_string();
        let job_bindings = bindings.clone();
        let job = Job::new_async(cron, move |_uuid, _l| {
            let deps = Arc::clone(&deps);
            let name = job_name.clone();
            let bindings = job_bindings.clone();
            Box::pin(async move {
                fire_once(&deps, &name, &bindings).await;
            })
        })
        .map_err(|e| SyncError::config(format!("invalid cron expression '{cron}': {e}")))?;

        let uuid = self
            .sched
            .lock()
            .await
            .add(job)
            .await
            .map_err(|e| SyncError::internal(format!("failed to add schedule '{name}': {e}")))?;

        let info = JobInfo {
            name: name.to_string(),
            cron: cron.to_string(),
            tables: bindings.iter().map(|b| b.target_table.clone()).collect(),
        };
        self.registry
            .lock()
            .expect("registry lock")
            .insert(name.to_string(), (uuid, info));
        tracing::info!(schedule = name, cron, "recurring sync registered");
        Ok(())
    }

    /// Remove a registered job.
    ///
    /// # Errors
    ///
    /// `ConfigInvalid` when the name is unknown.
    pub async fn cancel(&self, name: &str) -> Result<(), SyncError> {
        let removed = self.registry.lock().expect("registry lock").remove(name);
        let Some((uuid, _)) = removed else {
            return Err(SyncError::config(format!("schedule '{name}' is not registered")));
        };
        self.sched
            .lock()
            .await
            .remove(&uuid)
            .await
            .map_err(|e| SyncError::internal(format!("failed to remove schedule '{name}': {e}")))?;
        tracing::info!(schedule = name, "recurring sync cancelled");
        Ok(())
    }

    /// Registered jobs, in no particular order.
    #[must_use]
    pub fn list(&self) -> Vec<JobInfo> {
        self.registry
            .lock()
            .expect("registry lock")
            .values()
            .map(|(_, info)| info.clone())
            .collect()
    }

    /// Start dispatching. Idempotent.
    ///
    /// # Errors
    ///
    /// `Internal` if the scheduler runtime fails to start.
    pub async fn start(&self) -> Result<(), SyncError> {
        {
            let mut started = self.started.lock().expect("started lock");
            if *started {
                return Ok(());
            }
            *started = true;
        }
        self.sched
            .lock()
            .await
            .start()
            .await
            .map_err(|e| SyncError::internal(format!("scheduler start failed: {e}")))
    }

    /// Stop dispatching, waiting up to `timeout` for shutdown. Idempotent.
    ///
    /// # Errors
    ///
    /// `Internal` on shutdown failure; `Timeout` when it does not finish
    /// in time.
    pub async fn stop(&self, timeout: Duration) -> Result<(), SyncError> {
        {
            let mut started = self.started.lock().expect("started lock");
            if !*started {
                return Ok(());
            }
            *started = false;
        }
        let mut sched = self.sched.lock().await;
        tokio::time::timeout(timeout, sched.shutdown())
            .await
            .map_err(|_| SyncError::timeout("scheduler shutdown timed out"))?
            .map_err(|e| SyncError::internal(format!("scheduler shutdown failed: {e}")))
    }
}

/// One trigger fire: per binding, take the lock with zero timeout, pick
/// the run kind, and hand the run to the worker. Busy means skip.
pub(crate) async fn fire_once(deps: &TriggerDeps, name: &str, bindings: &[TableBinding]) {
    for binding in bindings {
        let run_id = RunId::new();
        let guard = match lock::acquire(
            &deps.state_dir,
            &format!("schedule:{name}"),
            Duration::ZERO,
            deps.stale_threshold,
        ) {
            Ok((guard, replaced)) => {
                if let Some(prior) = replaced {
                    deps.events
                        .emit(SyncEvent::Log {
                            run_id,
                            level: LogLevel::Warn,
                            message: format!(
                                "replaced stale sync lock held by '{}' (pid {}) since {}",
                                prior.holder_id,
                                prior.pid,
                                prior.acquired_at.to_rfc3339()
                            ),
                        })
                        .await;
                }
                guard
            }
            Err(err) => {
                tracing::info!(
                    schedule = name,
                    table = %binding.target_table,
                    "skipping fire, sync already in progress"
                );
                deps.events
                    .emit(SyncEvent::Log {
                        run_id,
                        level: LogLevel::Info,
                        message: format!(
                            "schedule '{name}' skipped for '{}': reason=overlap ({err})",
                            binding.target_table
                        ),
                    })
                    .await;
                continue;
            }
        };

        // Full when the target is missing, incremental otherwise.
        let kind = match deps.writer.table_exists(&binding.target_table) {
            Ok(true) => SyncKind::Incremental,
            Ok(false) => SyncKind::Full,
            Err(err) => {
                tracing::warn!(
                    schedule = name,
                    table = %binding.target_table,
                    error = %err,
                    "skipping fire, target inspection failed"
                );
                continue;
            }
        };

        match deps.worker.start(RunSpec {
            kind,
            binding: binding.clone(),
            max_rows: None,
            lock: Some(guard),
        }) {
            Ok(run_id) => {
                tracing::info!(
                    schedule = name,
                    table = %binding.target_table,
                    run = %run_id,
                    kind = %kind,
                    "scheduled sync started"
                );
            }
            Err(err) => {
                deps.events
                    .emit(SyncEvent::Log {
                        run_id,
                        level: LogLevel::Info,
                        message: format!(
                            "schedule '{name}' skipped for '{}': reason=overlap ({err})",
                            binding.target_table
                        ),
                    })
                    .await;
            }
        }
    }
}
