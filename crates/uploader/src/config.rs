//! Uploader configuration.

use std::time::Duration;

/// Tunables for a single upload run.
#[derive(Debug, Clone)]
pub struct UploaderConfig {
    /// Worker pool size for concurrent file uploads. Minimum 1.
    pub parallelism: usize,
    /// Delay before the first retry of a transient failure.
    pub initial_backoff: Duration,
    /// Backoff cap.
    pub max_backoff: Duration,
    /// Multiplier applied per consecutive transient failure.
    pub backoff_factor: f64,
    /// Consecutive transient failures tolerated for one operation before the
    /// error is promoted to a run-level failure.
    pub retry_budget: u32,
    /// Server-side validity of an upload token. Tokens older than this are
    /// discarded and the binary re-uploaded.
    pub upload_token_ttl: chrono::Duration,
    /// Minimum interval between two state snapshots.
    pub save_debounce: Duration,
    /// Overall wall-clock limit for the run. `None` means unlimited.
    pub run_deadline: Option<Duration>,
}

impl Default for UploaderConfig {
    fn default() -> Self {
        Self {
            parallelism: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(60),
            backoff_factor: 2.0,
            retry_budget: 10,
            upload_token_ttl: chrono::Duration::days(1),
            save_debounce: Duration::from_secs(1),
            run_deadline: None,
        }
    }
}

impl UploaderConfig {
    /// Returns a copy with delays shrunk for fast tests.
    pub fn with_fast_backoff(mut self) -> Self {
        self.initial_backoff = Duration::from_millis(1);
        self.max_backoff = Duration::from_millis(10);
        self.save_debounce = Duration::from_millis(10);
        self
    }

    pub(crate) fn effective_parallelism(&self) -> usize {
        self.parallelism.max(1)
    }
}
