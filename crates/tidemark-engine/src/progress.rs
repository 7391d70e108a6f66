//! Run-scoped progress plumbing: the bounded event channel and the pause
//! gate the engine polls between batches.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use tidemark_types::{RunId, SyncEvent};

/// Sending half of the run event channel.
///
/// Lifecycle events (`Started`, `Paused`, `Resumed`, terminal events) are
/// never dropped: the sender awaits capacity. `Progress` and `Log` events
/// are fire-and-forget; on overflow, dropped `Progress` events are counted
/// and the count rides along on the next delivered `Progress`.
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::Sender<SyncEvent>,
    dropped: Arc<AtomicU64>,
}

impl EventSink {
    /// Build a sink and its receiving half with the given capacity.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<SyncEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                tx,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            rx,
        )
    }

    /// Emit one event per the overflow policy.
    pub async fn emit(&self, event: SyncEvent) {
        match event {
            SyncEvent::Progress {
                run_id,
                rows_done,
                rows_total,
                eta_seconds,
                phase,
                ..
            } => {
                let pending = self.dropped.load(Ordering::Relaxed);
                let stamped = SyncEvent::Progress {
                    run_id,
                    rows_done,
                    rows_total,
                    eta_seconds,
                    phase,
                    events_dropped: pending,
                };
                match self.tx.try_send(stamped) {
                    Ok(()) => {
                        self.dropped.fetch_sub(pending, Ordering::Relaxed);
                    }
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {}
                }
            }
            SyncEvent::Log { .. } => {
                // Best-effort; an overflowing channel sheds log events.
                let _ = self.tx.try_send(event);
            }
            lifecycle => {
                // Await capacity; the subscriber may have gone away, which
                // is fine.
                let _ = self.tx.send(lifecycle).await;
            }
        }
    }
}

/// Cooperatively observed pause gate.
///
/// Pausing is not a suspension: the engine keeps polling the gate at a
/// bounded interval between batches.
#[derive(Clone, Default)]
pub struct PauseGate {
    paused: Arc<AtomicBool>,
}

impl PauseGate {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::Release);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::Release);
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }
}

/// Everything a single run needs to report progress and observe control.
#[derive(Clone)]
pub struct RunContext {
    pub run_id: RunId,
    pub cancel: CancellationToken,
    pub gate: PauseGate,
    pub events: EventSink,
    pub pause_poll: std::time::Duration,
}

impl RunContext {
    #[must_use]
    pub fn new(run_id: RunId, events: EventSink, pause_poll: std::time::Duration) -> Self {
        Self {
            run_id,
            cancel: CancellationToken::new(),
            gate: PauseGate::new(),
            events,
            pause_poll,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidemark_types::SyncPhase;

    fn progress(run_id: RunId, rows_done: u64) -> SyncEvent {
        SyncEvent::Progress {
            run_id,
            rows_done,
            rows_total: None,
            eta_seconds: None,
            phase: SyncPhase::Copy,
            events_dropped: 0,
        }
    }

    #[tokio::test]
    async fn progress_overflow_is_counted_on_next_delivery() {
        let run_id = RunId::new();
        let (sink, mut rx) = EventSink::channel(1);

        sink.emit(progress(run_id, 1)).await; // fills the channel
        sink.emit(progress(run_id, 2)).await; // dropped
        sink.emit(progress(run_id, 3)).await; // dropped

        // Drain the first event, then the next delivered progress carries
        // the drop count.
        match rx.recv().await.unwrap() {
            SyncEvent::Progress { events_dropped, .. } => assert_eq!(events_dropped, 0),
            other => panic!("unexpected event {other:?}"),
        }
        sink.emit(progress(run_id, 4)).await;
        match rx.recv().await.unwrap() {
            SyncEvent::Progress {
                rows_done,
                events_dropped,
                ..
            } => {
                assert_eq!(rows_done, 4);
                assert_eq!(events_dropped, 2);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn lifecycle_events_wait_for_capacity() {
        let run_id = RunId::new();
        let (sink, mut rx) = EventSink::channel(1);
        sink.emit(progress(run_id, 1)).await;

        let sink2 = sink.clone();
        let sender = tokio::spawn(async move {
            sink2
                .emit(SyncEvent::Completed {
                    run_id,
                    rows_loaded: 10,
                    duration_seconds: 0.5,
                })
                .await;
        });

        // The terminal event is parked until the subscriber drains.
        let first = rx.recv().await.unwrap();
        assert!(matches!(first, SyncEvent::Progress { .. }));
        sender.await.unwrap();
        let second = rx.recv().await.unwrap();
        assert!(second.is_terminal());
    }

    #[test]
    fn pause_gate_flips() {
        let gate = PauseGate::new();
        assert!(!gate.is_paused());
        gate.pause();
        assert!(gate.is_paused());
        gate.resume();
        assert!(!gate.is_paused());
    }
}
