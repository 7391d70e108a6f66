//! Public facade over the sync core.
//!
//! [`SyncService`] wires the reader, writer, state store, lock, worker,
//! and scheduler together and exports the core's verb surface: run
//! entry points, event subscription, run control, and schedule
//! management. Everything else in this crate is plumbing behind it.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;

use tidemark_state::{lock, StateStore};
use tidemark_types::{LogLevel, RunId, SyncError, SyncEvent, SyncKind, TableBinding, WorkerStatus};

use crate::analytics::AnalyticsWriter;
use crate::config::Config;
use crate::engine::SyncEngine;
use crate::progress::EventSink;
use crate::scheduler::{JobInfo, SyncScheduler};
use crate::source::{PgSourceReader, SourceReader};
use crate::worker::{RunSpec, SyncWorker};

/// The sync core, assembled.
pub struct SyncService {
    config: Config,
    writer: Arc<AnalyticsWriter>,
    worker: Arc<SyncWorker>,
    scheduler: SyncScheduler,
    events: EventSink,
    receiver: Mutex<Option<mpsc::Receiver<SyncEvent>>>,
}

impl std::fmt::Debug for SyncService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncService").finish_non_exhaustive()
    }
}

impl SyncService {
    /// Assemble the core over an arbitrary reader (tests inject an
    /// in-memory one).
    ///
    /// # Errors
    ///
    /// `ConfigInvalid` when validation fails; store/writer open errors
    /// otherwise.
    pub async fn with_reader(
        config: Config,
        reader: Arc<dyn SourceReader>,
    ) -> Result<Self, SyncError> {
        config.validate()?;
        let writer = Arc::new(AnalyticsWriter::open(
            &config.analytics.path,
            &config.analytics.database,
        )?);
        let store = Arc::new(StateStore::open(&config.state.dir).map_err(SyncError::from)?);
        let engine = Arc::new(SyncEngine::new(
            reader,
            Arc::clone(&writer),
            store,
            config.sync.clone(),
        ));
        let (sink, receiver) = EventSink::channel(config.progress.channel_capacity);
        let worker = Arc::new(SyncWorker::new(
            engine,
            sink.clone(),
            config.progress.pause_poll(),
        ));
        let scheduler = SyncScheduler::new(
            Arc::clone(&worker),
            Arc::clone(&writer),
            config.state.dir.clone(),
            config.lock_stale_threshold(),
            sink.clone(),
        )
        .await?;

        Ok(Self {
            config,
            writer,
            worker,
            scheduler,
            events: sink,
            receiver: Mutex::new(Some(receiver)),
        })
    }

    /// Assemble the core against the configured source database.
    ///
    /// # Errors
    ///
    /// Same as [`SyncService::with_reader`].
    pub async fn connect(config: Config) -> Result<Self, SyncError> {
        let reader = Arc::new(PgSourceReader::new(config.source.clone()));
        Self::with_reader(config, reader).await
    }

    /// Validate end-to-end plumbing against a disposable `_test` table.
    ///
    /// # Errors
    ///
    /// `LockBusy` when another sync holds the lock or the worker is busy.
    pub async fn test_sync(
        &self,
        binding: TableBinding,
        max_rows: u64,
    ) -> Result<RunId, SyncError> {
        self.start_run(SyncKind::Test, binding, Some(max_rows)).await
    }

    /// Fresh full load; recreates the target table.
    ///
    /// # Errors
    ///
    /// `LockBusy` when another sync holds the lock or the worker is busy.
    pub async fn full_sync(&self, binding: TableBinding) -> Result<RunId, SyncError> {
        self.start_run(SyncKind::Full, binding, None).await
    }

    /// Load rows strictly beyond the finalized watermark.
    ///
    /// # Errors
    ///
    /// `LockBusy` when another sync holds the lock or the worker is busy.
    pub async fn incremental_sync(&self, binding: TableBinding) -> Result<RunId, SyncError> {
        self.start_run(SyncKind::Incremental, binding, None).await
    }

    async fn start_run(
        &self,
        kind: SyncKind,
        binding: TableBinding,
        max_rows: Option<u64>,
    ) -> Result<RunId, SyncError> {
        let dir = self.config.state.dir.clone();
        let holder = format!("{kind}:{}", binding.target_table);
        let timeout = self.config.lock_acquire_timeout();
        let stale = self.config.lock_stale_threshold();
        let (guard, replaced) =
            tokio::task::spawn_blocking(move || lock::acquire(&dir, &holder, timeout, stale))
                .await
                .map_err(|e| SyncError::internal(format!("lock task panicked: {e}")))?
                .map_err(SyncError::from)?;

        // A forced takeover of a stale lock goes on the event stream, so
        // dashboards see it and not just the local log.
        if let Some(prior) = replaced {
            self.events
                .emit(SyncEvent::Log {
                    run_id: RunId::new(),
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

        self.worker.start(RunSpec {
            kind,
            binding,
            max_rows,
            lock: Some(guard),
        })
    }

    /// Take the event stream. Yields `Some` exactly once; the single
    /// subscriber drains every run's events.
    #[must_use]
    pub fn subscribe_events(&self) -> Option<mpsc::Receiver<SyncEvent>> {
        self.receiver.lock().expect("receiver lock").take()
    }

    pub fn pause(&self) {
        self.worker.pause();
    }

    pub fn resume(&self) {
        self.worker.resume();
    }

    pub fn stop(&self, reason: impl Into<String>) {
        self.worker.stop(reason);
    }

    #[must_use]
    pub fn status(&self) -> WorkerStatus {
        self.worker.status()
    }

    /// Register a recurring sync.
    ///
    /// # Errors
    ///
    /// `ConfigInvalid` on duplicate name or bad cron expression.
    pub async fn register_schedule(
        &self,
        name: &str,
        cron: &str,
        bindings: Vec<TableBinding>,
    ) -> Result<(), SyncError> {
        self.scheduler.register(name, cron, bindings).await
    }

    /// Cancel a recurring sync.
    ///
    /// # Errors
    ///
    /// `ConfigInvalid` when the name is unknown.
    pub async fn cancel_schedule(&self, name: &str) -> Result<(), SyncError> {
        self.scheduler.cancel(name).await
    }

    #[must_use]
    pub fn list_schedules(&self) -> Vec<JobInfo> {
        self.scheduler.list()
    }

    /// Start dispatching registered schedules.
    ///
    /// # Errors
    ///
    /// `Internal` if the scheduler runtime fails to start.
    pub async fn start_scheduler(&self) -> Result<(), SyncError> {
        self.scheduler.start().await
    }

    /// Stop dispatching registered schedules.
    ///
    /// # Errors
    ///
    /// `Internal` or `Timeout` from scheduler shutdown.
    pub async fn stop_scheduler(&self, timeout: Duration) -> Result<(), SyncError> {
        self.scheduler.stop(timeout).await
    }

    /// The analytics writer, exposed for the external query layer.
    #[must_use]
    pub fn analytics(&self) -> &Arc<AnalyticsWriter> {
        &self.writer
    }
}
