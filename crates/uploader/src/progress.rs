//! Progress reporting.
//!
//! The uploader publishes progress through named streams. A front-end
//! (terminal, GUI) implements [`ProgressSink`]; the core only ever calls the
//! three methods of [`ProgressStatus`] and closes each stream exactly once.
//! Errors pushed into a stream never propagate back into upload logic.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Name of the per-file upload stream.
pub const UPLOADING_MEDIA_FILES: &str = "Uploading media files";

/// An error event attached to the thing it concerns: a file path or an
/// album URL, plus a human-readable message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyedError {
    pub key: String,
    pub message: String,
}

impl KeyedError {
    pub fn new(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            message: message.into(),
        }
    }
}

/// Factory for progress streams.
pub trait ProgressSink: Send + Sync {
    /// Opens a named stream. `total` is the expected number of successes
    /// when known up front.
    fn create_status(&self, name: &str, total: Option<usize>) -> Arc<dyn ProgressStatus>;
}

/// One live progress stream.
pub trait ProgressStatus: Send + Sync {
    fn increment_success(&self);
    fn keyed_error(&self, error: KeyedError);
    /// Closes the stream. Implementations must tolerate (and ignore) a
    /// second close.
    fn close(&self, successful: bool);
}

/// Sink that renders progress as `tracing` events. Good enough for a
/// headless CLI run.
#[derive(Debug, Default)]
pub struct LogProgressSink;

impl ProgressSink for LogProgressSink {
    fn create_status(&self, name: &str, total: Option<usize>) -> Arc<dyn ProgressStatus> {
        tracing::info!(stream = %name, total = ?total, "starting");
        Arc::new(LogProgressStatus {
            name: name.to_string(),
            successes: AtomicUsize::new(0),
            errors: AtomicUsize::new(0),
            closed: AtomicUsize::new(0),
        })
    }
}

struct LogProgressStatus {
    name: String,
    successes: AtomicUsize,
    errors: AtomicUsize,
    closed: AtomicUsize,
}

impl ProgressStatus for LogProgressStatus {
    fn increment_success(&self) {
        let done = self.successes.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::debug!(stream = %self.name, done, "progress");
    }

    fn keyed_error(&self, error: KeyedError) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(stream = %self.name, key = %error.key, "{}", error.message);
    }

    fn close(&self, successful: bool) {
        if self.closed.fetch_add(1, Ordering::Relaxed) > 0 {
            return;
        }
        tracing::info!(
            stream = %self.name,
            successes = self.successes.load(Ordering::Relaxed),
            errors = self.errors.load(Ordering::Relaxed),
            successful,
            "finished"
        );
    }
}
