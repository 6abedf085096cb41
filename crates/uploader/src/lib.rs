//! Resumable, concurrent upload of a local photo/video tree into cloud
//! albums.
//!
//! This crate implements the **business logic** of albumsync. It is a
//! library with no transport or UI dependencies: the caller provides a
//! [`PhotosClient`](albumsync_api::PhotosClient) implementation and a
//! [`ProgressSink`], then drives a [`Runner`].
//!
//! # Pipeline
//!
//! 1. **Scan** — walk the source tree into album directories
//! 2. **Reconcile** — bind each local album title to exactly one cloud
//!    album, merging duplicates
//! 3. **Upload** — push each file through a resumable per-file state
//!    machine, at most once across runs
//! 4. **Persist** — debounced atomic snapshots of the upload state

pub mod albums;
pub mod clock;
pub mod config;
pub mod error;
pub mod progress;
pub mod retry;
pub mod run;
pub mod saver;
pub mod scanner;
pub mod state;
pub mod upload;

pub use albums::{AlbumManager, CloudAlbumsByTitle, list_albums_by_title};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::UploaderConfig;
pub use error::UploadError;
pub use progress::{KeyedError, LogProgressSink, ProgressSink, ProgressStatus, UPLOADING_MEDIA_FILES};
pub use run::{RunReport, Runner};
pub use scanner::{AlbumDirectory, scan};
pub use state::{ItemState, PersistedState, StateStore, UploadState, UploadTokenState};
pub use upload::{FileOutcome, Uploader};
