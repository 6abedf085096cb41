//! Uploader error types.

use std::path::PathBuf;

use albumsync_api::ApiError;

/// Errors that end an upload run.
///
/// Per-file failures are absorbed by the orchestrator and reported through
/// the progress sink; only run-level conditions appear here.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("state file {} is corrupt: {source}", path.display())]
    CorruptState {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize upload state: {0}")]
    SerializeState(#[from] serde_json::Error),

    #[error("album operation failed: {0}")]
    Album(#[source] ApiError),

    #[error("retry budget exhausted: {0}")]
    RetriesExhausted(#[source] ApiError),

    #[error("uploading {}: {source}", path.display())]
    File {
        path: PathBuf,
        #[source]
        source: ApiError,
    },

    #[error("cancelled")]
    Cancelled,

    #[error("run deadline exceeded")]
    DeadlineExceeded,
}
