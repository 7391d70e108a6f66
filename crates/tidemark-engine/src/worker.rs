//! Sync worker: one engine invocation per background task.
//!
//! The worker owns the control surface of a run — pause gate, cancel
//! token, status — and brackets the engine with the `Started` event and
//! exactly one terminal event. At most one run is active per worker.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tidemark_state::LockGuard;
use tidemark_types::{
    RunId, SyncError, SyncEvent, SyncKind, TableBinding, WorkerStatus,
};

use crate::engine::{RunOutcome, SyncEngine};
use crate::progress::{EventSink, PauseGate, RunContext};

/// Everything one run needs from the caller.
pub struct RunSpec {
    pub kind: SyncKind,
    pub binding: TableBinding,
    /// Row cap for test syncs.
    pub max_rows: Option<u64>,
    /// Sync lock held for the duration of the run; released when the run
    /// task finishes.
    pub lock: Option<LockGuard>,
}

struct ActiveRun {
    run_id: RunId,
    cancel: tokio_util::sync::CancellationToken,
    gate: PauseGate,
    /// Caller-supplied stop reason, preferred over the engine's generic
    /// one in the terminal event.
    stop_reason: Arc<Mutex<Option<String>>>,
}

struct WorkerInner {
    status: WorkerStatus,
    active: Option<ActiveRun>,
}

/// Runs sync jobs off the caller's task and streams progress events.
pub struct SyncWorker {
    engine: Arc<SyncEngine>,
    events: EventSink,
    pause_poll: Duration,
    inner: Arc<Mutex<WorkerInner>>,
}

impl SyncWorker {
    #[must_use]
    pub fn new(engine: Arc<SyncEngine>, events: EventSink, pause_poll: Duration) -> Self {
        Self {
            engine,
            events,
            pause_poll,
            inner: Arc::new(Mutex::new(WorkerInner {
                status: WorkerStatus::Idle,
                active: None,
            })),
        }
    }

    /// Spawn a run. Non-blocking; progress arrives on the event channel.
    ///
    /// # Errors
    ///
    /// `LockBusy` when a run is already active on this worker.
    pub fn start(&self, spec: RunSpec) -> Result<RunId, SyncError> {
        let run_id = RunId::new();
        let ctx = RunContext::new(run_id, self.events.clone(), self.pause_poll);
        let stop_reason = Arc::new(Mutex::new(None));

        {
            let mut inner = self.inner.lock().expect("worker lock");
            if matches!(inner.status, WorkerStatus::Running | WorkerStatus::Paused) {
                return Err(SyncError::busy("worker already has an active run"));
            }
            inner.status = WorkerStatus::Running;
            inner.active = Some(ActiveRun {
                run_id,
                cancel: ctx.cancel.clone(),
                gate: ctx.gate.clone(),
                stop_reason: Arc::clone(&stop_reason),
            });
        }

        let engine = Arc::clone(&self.engine);
        let events = self.events.clone();
        let inner = Arc::clone(&self.inner);
        let RunSpec {
            kind,
            binding,
            max_rows,
            lock,
        } = spec;

        tokio::spawn(async move {
            events
                .emit(SyncEvent::Started {
                    run_id,
                    kind,
                    table: binding.target_table.clone(),
                })
                .await;

            let result = engine.run(kind, &binding, max_rows, &ctx).await;

            let (status, terminal) = match result {
                Ok(RunOutcome::Completed(summary)) => (
                    WorkerStatus::Completed,
                    SyncEvent::Completed {
                        run_id,
                        rows_loaded: summary.rows_loaded,
                        duration_seconds: summary.duration_seconds,
                    },
                ),
                Ok(RunOutcome::Stopped { reason }) => {
                    let reason = stop_reason
                        .lock()
                        .expect("stop reason lock")
                        .take()
                        .unwrap_or(reason);
                    (WorkerStatus::Stopped, SyncEvent::Stopped { run_id, reason })
                }
                Err(err) => {
                    tracing::error!(
                        table = %binding.target_table,
                        kind = %kind,
                        error = %err,
                        "sync run failed"
                    );
                    (
                        WorkerStatus::Failed,
                        SyncEvent::Failed {
                            run_id,
                            error_kind: err.kind,
                            message: err.message,
                            retryable: err.retryable,
                        },
                    )
                }
            };

            events.emit(terminal).await;
            drop(lock);

            let mut inner = inner.lock().expect("worker lock");
            inner.status = status;
        });

        Ok(run_id)
    }

    /// Flip the pause gate; the engine observes it at the next batch
    /// boundary.
    pub fn pause(&self) {
        let mut inner = self.inner.lock().expect("worker lock");
        if inner.status == WorkerStatus::Running {
            if let Some(active) = &inner.active {
                active.gate.pause();
                inner.status = WorkerStatus::Paused;
            }
        }
    }

    /// Release the pause gate.
    pub fn resume(&self) {
        let mut inner = self.inner.lock().expect("worker lock");
        if inner.status == WorkerStatus::Paused {
            if let Some(active) = &inner.active {
                active.gate.resume();
                inner.status = WorkerStatus::Running;
            }
        }
    }

    /// Raise the cancel signal; observed within one batch boundary or one
    /// pause-poll interval.
    pub fn stop(&self, reason: impl Into<String>) {
        let inner = self.inner.lock().expect("worker lock");
        if let Some(active) = &inner.active {
            *active.stop_reason.lock().expect("stop reason lock") = Some(reason.into());
            active.gate.resume();
            active.cancel.cancel();
        }
    }

    #[must_use]
    pub fn status(&self) -> WorkerStatus {
        self.inner.lock().expect("worker lock").status
    }

    /// Run id of the active (or most recent) run.
    #[must_use]
    pub fn current_run(&self) -> Option<RunId> {
        self.inner
            .lock()
            .expect("worker lock")
            .active
            .as_ref()
            .map(|a| a.run_id)
    }
}
