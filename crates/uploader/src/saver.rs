//! Debounced state persistence.
//!
//! Upload completions arrive in bursts; writing the snapshot on every one
//! would hammer the disk for no benefit. A single worker task owns the
//! writes: callers [`nudge`](StateSaver::nudge) it (cheap, non-blocking,
//! coalescing) and it persists at most once per debounce interval, skipping
//! writes when nothing changed. [`close`](StateSaver::close) performs the
//! final flush, so a clean shutdown never loses acknowledged work.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::UploadError;
use crate::state::{PersistedState, StateStore};

/// Produces the current snapshot to persist.
pub type SnapshotFn = Arc<dyn Fn() -> PersistedState + Send + Sync>;

pub struct StateSaver {
    dirty_tx: mpsc::Sender<()>,
    cancel: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
    store: StateStore,
    snapshot: SnapshotFn,
    last_saved: Arc<Mutex<Option<PersistedState>>>,
}

impl StateSaver {
    /// Starts the saver worker. Must be called within a tokio runtime.
    pub fn spawn(store: StateStore, snapshot: SnapshotFn, debounce: Duration) -> Self {
        // Capacity 1: a pending signal already guarantees a future write, so
        // further nudges are dropped by design of `try_send`.
        let (dirty_tx, mut dirty_rx) = mpsc::channel::<()>(1);
        let cancel = CancellationToken::new();
        let last_saved = Arc::new(Mutex::new(None));

        let worker = tokio::spawn({
            let store = store.clone();
            let snapshot = Arc::clone(&snapshot);
            let last_saved = Arc::clone(&last_saved);
            let cancel = cancel.clone();
            async move {
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        signal = dirty_rx.recv() => {
                            if signal.is_none() {
                                return;
                            }
                        }
                    }

                    // Let the burst settle, then absorb whatever piled up.
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = tokio::time::sleep(debounce) => {}
                    }
                    while dirty_rx.try_recv().is_ok() {}

                    if let Err(e) = write_if_changed(&store, &snapshot, &last_saved) {
                        warn!(error = %e, "periodic state save failed");
                    }
                }
            }
        });

        Self {
            dirty_tx,
            cancel,
            worker: Mutex::new(Some(worker)),
            store,
            snapshot,
            last_saved,
        }
    }

    /// Requests a save sometime soon. Never blocks.
    pub fn nudge(&self) {
        let _ = self.dirty_tx.try_send(());
    }

    /// Stops the worker and flushes the final snapshot. Subsequent calls are
    /// no-ops.
    pub async fn close(&self) -> Result<(), UploadError> {
        self.cancel.cancel();
        let worker = self.worker.lock().unwrap().take();
        let Some(worker) = worker else {
            return Ok(());
        };
        if let Err(e) = worker.await {
            warn!(error = %e, "state saver worker panicked");
        }
        write_if_changed(&self.store, &self.snapshot, &self.last_saved)
    }
}

fn write_if_changed(
    store: &StateStore,
    snapshot: &SnapshotFn,
    last_saved: &Mutex<Option<PersistedState>>,
) -> Result<(), UploadError> {
    let current = snapshot();
    {
        let last = last_saved.lock().unwrap();
        if last.as_ref() == Some(&current) {
            return Ok(());
        }
    }
    store.save(&current)?;
    *last_saved.lock().unwrap() = Some(current);
    Ok(())
}
