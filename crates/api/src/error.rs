//! Classified API errors.
//!
//! Every error leaving a [`crate::PhotosClient`] implementation is tagged
//! with a kind exactly once, at the transport boundary. The uploader core
//! dispatches on the kind and the failing operation — never on message text.

use thiserror::Error;

/// Coarse classification of a remote API failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorKind {
    /// Network failure, timeout, or `RESOURCE_EXHAUSTED` — worth retrying
    /// after a backoff delay.
    Transient,
    /// `INVALID_ARGUMENT` — the request is permanently unacceptable.
    InvalidArgument,
    /// `INVALID_ARGUMENT` raised specifically because the caller may not add
    /// media items to the targeted album (e.g. an album not created by this
    /// app). The item can still be uploaded without an album.
    AlbumPermission,
    /// Anything else. Not retried; surfaces as a run-level failure.
    Other,
}

/// An error from the photos service, carrying its classification.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ApiError {
    pub kind: ApiErrorKind,
    pub message: String,
}

impl ApiError {
    pub fn new(kind: ApiErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// A retriable failure (network, timeout, rate limit).
    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Transient, message)
    }

    /// `RESOURCE_EXHAUSTED` from the service; transient by definition.
    pub fn resource_exhausted(detail: impl AsRef<str>) -> Self {
        Self::new(
            ApiErrorKind::Transient,
            format!("RESOURCE_EXHAUSTED: {}", detail.as_ref()),
        )
    }

    /// `INVALID_ARGUMENT` raised by the named operation.
    pub fn invalid_argument(operation: impl AsRef<str>) -> Self {
        Self::new(
            ApiErrorKind::InvalidArgument,
            format!("INVALID_ARGUMENT: {}", operation.as_ref()),
        )
    }

    /// Permission denial for adding items to a specific album.
    pub fn album_permission() -> Self {
        Self::new(
            ApiErrorKind::AlbumPermission,
            "INVALID_ARGUMENT: No permission to add media items to this album",
        )
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Other, message)
    }

    pub fn is_transient(&self) -> bool {
        self.kind == ApiErrorKind::Transient
    }
}
