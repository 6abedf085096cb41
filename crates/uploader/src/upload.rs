//! The per-file upload orchestrator.
//!
//! Every file moves through a small state machine persisted in the upload
//! state document:
//!
//! - **Unknown** — never seen. Upload the binary, then create the media
//!   item.
//! - **Tokenised** — the binary was uploaded and a token persisted, but the
//!   media item was never created. Reuse the token if it is younger than the
//!   server-side validity window, otherwise re-upload.
//! - **Created** — the media item exists; nothing to do.
//! - **Rejected** — the service permanently refused the item; skip it.
//!
//! Work is admitted through a FIFO semaphore of configurable width, so
//! submission order is preserved at parallelism 1 and bounded otherwise.
//! A per-path map coalesces duplicate submissions: the second caller for an
//! in-flight path awaits the same outcome instead of re-uploading. Per-file
//! failures are absorbed here and reported through the progress sink; only
//! run-level failures (unclassified errors, exhausted retry budgets) are
//! recorded for the run controller.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use albumsync_api::{ApiError, ApiErrorKind, CloudAlbum, PhotosClient, UploadToken};
use tokio::sync::{Semaphore, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::UploaderConfig;
use crate::error::UploadError;
use crate::progress::{KeyedError, ProgressStatus};
use crate::retry::{BackoffPolicy, InvalidMediaItemPolicy, UploadStage};
use crate::saver::StateSaver;
use crate::state::{ItemState, PersistedState, StateStore, UploadTokenState};

/// How a single file submission ended. Duplicate submissions of an
/// in-flight path receive a clone of the first submission's outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    /// The media item now exists remotely.
    Uploaded,
    /// Skipped: a previous run already created the item.
    SkippedExisting,
    /// Skipped: the item was permanently rejected earlier.
    SkippedRejected,
    /// The service permanently rejected the item during this submission.
    /// A keyed error has been reported.
    Rejected,
    /// A run-level failure was recorded for this file.
    Failed,
}

enum PathEntry {
    Completed {
        state: ItemState,
        /// Loaded from a previous run (as opposed to produced by this one).
        /// `--no-resume` only ignores prior-run entries.
        prior_run: bool,
    },
    InFlight(watch::Receiver<Option<FileOutcome>>),
}

pub struct Uploader {
    client: Arc<dyn PhotosClient>,
    clock: Arc<dyn Clock>,
    config: UploaderConfig,
    backoff: BackoffPolicy,
    invalid_media: InvalidMediaItemPolicy,
    resume: bool,
    entries: Arc<Mutex<HashMap<PathBuf, PathEntry>>>,
    saver: StateSaver,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
    last_failure: Mutex<Option<UploadError>>,
}

impl Uploader {
    /// Loads the persisted state from `store` and prepares the orchestrator.
    /// Must be called within a tokio runtime (it spawns the state saver).
    pub fn new(
        client: Arc<dyn PhotosClient>,
        clock: Arc<dyn Clock>,
        config: UploaderConfig,
        store: StateStore,
        resume: bool,
        cancel: CancellationToken,
    ) -> Result<Self, UploadError> {
        let loaded = store.load()?;
        info!(
            known_items = loaded.photos_uploader.items.len(),
            resume, "upload state loaded"
        );

        let entries: HashMap<PathBuf, PathEntry> = loaded
            .photos_uploader
            .items
            .iter()
            .map(|(path, state)| {
                (
                    PathBuf::from(path),
                    PathEntry::Completed {
                        state: state.clone(),
                        prior_run: true,
                    },
                )
            })
            .collect();
        let entries = Arc::new(Mutex::new(entries));

        // The snapshot re-emits whatever unknown fields the loaded document
        // carried, alongside the current entries.
        let snapshot = {
            let entries = Arc::clone(&entries);
            let extra_root = loaded.extra.clone();
            let extra_uploader = loaded.photos_uploader.extra.clone();
            Arc::new(move || {
                let mut document = PersistedState {
                    extra: extra_root.clone(),
                    ..PersistedState::default()
                };
                document.photos_uploader.extra = extra_uploader.clone();
                let entries = entries.lock().unwrap();
                for (path, entry) in entries.iter() {
                    if let PathEntry::Completed { state, .. } = entry
                        && state.is_meaningful()
                    {
                        document
                            .photos_uploader
                            .items
                            .insert(path.to_string_lossy().into_owned(), state.clone());
                    }
                }
                document
            }) as Arc<dyn Fn() -> PersistedState + Send + Sync>
        };
        let saver = StateSaver::spawn(store, snapshot, config.save_debounce);

        let semaphore = Arc::new(Semaphore::new(config.effective_parallelism()));
        Ok(Self {
            client,
            clock,
            backoff: BackoffPolicy::from_config(&config),
            invalid_media: InvalidMediaItemPolicy,
            config,
            resume,
            entries,
            saver,
            semaphore,
            cancel,
            last_failure: Mutex::new(None),
        })
    }

    /// Uploads one file into (optionally) a bound album, at most once across
    /// runs. Safe to call concurrently; duplicate calls for the same path
    /// share one attempt.
    pub async fn upload_file(
        &self,
        path: &Path,
        album: Option<&CloudAlbum>,
        status: &dyn ProgressStatus,
    ) -> FileOutcome {
        if self.cancel.is_cancelled() {
            self.record_failure(UploadError::Cancelled);
            return FileOutcome::Failed;
        }

        enum Admission {
            AwaitPeer(watch::Receiver<Option<FileOutcome>>),
            Skip(FileOutcome),
            Work {
                /// State fed into the state machine (token reuse).
                prior: Option<ItemState>,
                /// Loaded entry to restore if this attempt persists nothing.
                restore: Option<ItemState>,
            },
        }

        let (prior, restore, outcome_tx) = {
            let mut entries = self.entries.lock().unwrap();
            let admission = match entries.get(path) {
                Some(PathEntry::InFlight(rx)) => Admission::AwaitPeer(rx.clone()),
                Some(PathEntry::Completed { state, prior_run }) => {
                    let prior_run = *prior_run;
                    let honor = self.resume || !prior_run;
                    if honor && state.media_id.is_some() {
                        debug!(path = %path.display(), "already uploaded, skipping");
                        Admission::Skip(FileOutcome::SkippedExisting)
                    } else if !prior_run {
                        // Terminal for this run: a rejection we already
                        // reported.
                        debug!(path = %path.display(), "permanently failed before, skipping");
                        Admission::Skip(FileOutcome::SkippedRejected)
                    } else {
                        // A prior-run entry we are going to work on: keep
                        // its token unless resume is off.
                        Admission::Work {
                            prior: self.resume.then(|| state.clone()),
                            restore: Some(state.clone()),
                        }
                    }
                }
                None => Admission::Work {
                    prior: None,
                    restore: None,
                },
            };

            match admission {
                Admission::AwaitPeer(rx) => {
                    drop(entries);
                    return await_peer(rx).await;
                }
                Admission::Skip(outcome) => return outcome,
                Admission::Work { prior, restore } => {
                    let (tx, rx) = watch::channel(None);
                    entries.insert(path.to_path_buf(), PathEntry::InFlight(rx));
                    (prior, restore, tx)
                }
            }
        };
        let permit = self
            .semaphore
            .acquire()
            .await
            .expect("upload semaphore closed");
        let (new_state, outcome) = self.run_state_machine(path, album, prior, status).await;
        drop(permit);

        {
            let mut entries = self.entries.lock().unwrap();
            match new_state {
                Some(state) => {
                    entries.insert(
                        path.to_path_buf(),
                        PathEntry::Completed {
                            state,
                            prior_run: false,
                        },
                    );
                }
                // Nothing new to persist: put the loaded entry back, if any.
                None => match restore {
                    Some(state) => {
                        entries.insert(
                            path.to_path_buf(),
                            PathEntry::Completed {
                                state,
                                prior_run: true,
                            },
                        );
                    }
                    None => {
                        entries.remove(path);
                    }
                },
            }
        }
        self.saver.nudge();

        let _ = outcome_tx.send(Some(outcome.clone()));
        outcome
    }

    /// Runs the upload/create pipeline for one file. Returns the state to
    /// store (None leaves the persisted state untouched) and the outcome.
    async fn run_state_machine(
        &self,
        path: &Path,
        album: Option<&CloudAlbum>,
        prior: Option<ItemState>,
        status: &dyn ProgressStatus,
    ) -> (Option<ItemState>, FileOutcome) {
        let key = path.to_string_lossy().into_owned();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        // Stage 1: obtain an upload token, reusing a persisted one while it
        // is still within the server-side validity window.
        let token_state = match prior.and_then(|state| state.upload_state) {
            Some(ts) if self.clock.now() - ts.upload_instant <= self.config.upload_token_ttl => {
                debug!(path = %key, "reusing persisted upload token");
                ts
            }
            stale => {
                if stale.is_some() {
                    debug!(path = %key, "persisted upload token expired, re-uploading");
                }
                match self.upload_binary(path).await {
                    Ok(token) => UploadTokenState {
                        token: token.0,
                        upload_instant: self.clock.now(),
                    },
                    Err(StageFailure::PermanentItem(e)) => {
                        status.keyed_error(KeyedError::new(&key, e.to_string()));
                        return (None, FileOutcome::Rejected);
                    }
                    Err(StageFailure::Fatal(e)) => {
                        self.record_failure(UploadError::File {
                            path: path.to_path_buf(),
                            source: e,
                        });
                        return (None, FileOutcome::Failed);
                    }
                    Err(StageFailure::Cancelled) => {
                        self.record_failure(UploadError::Cancelled);
                        return (None, FileOutcome::Failed);
                    }
                }
            }
        };

        // Stage 2: exchange the token for a media item.
        let token = UploadToken(token_state.token.clone());
        let mut target_album = album;
        loop {
            match self
                .create_item(target_album.map(|a| a.id.as_str()), &token, &file_name)
                .await
            {
                Ok(item) => {
                    info!(path = %key, media_id = %item.id, album = ?target_album.map(|a| &a.id), "uploaded");
                    let state = ItemState::created(
                        item.id,
                        target_album.map(|a| a.id.clone()),
                        Some(token_state),
                    );
                    return (Some(state), FileOutcome::Uploaded);
                }
                Err(StageFailure::AlbumPermission(e)) if target_album.is_some() => {
                    warn!(path = %key, "album refused the item, uploading without album");
                    status.keyed_error(KeyedError::new(&key, e.to_string()));
                    target_album = None;
                }
                Err(StageFailure::PermanentItem(e)) | Err(StageFailure::AlbumPermission(e)) => {
                    status.keyed_error(KeyedError::new(&key, e.to_string()));
                    // Keep the token so the next run can retry the creation
                    // without re-sending the binary.
                    return (Some(ItemState::tokenised(token_state)), FileOutcome::Rejected);
                }
                Err(StageFailure::Fatal(e)) => {
                    self.record_failure(UploadError::File {
                        path: path.to_path_buf(),
                        source: e,
                    });
                    return (None, FileOutcome::Failed);
                }
                Err(StageFailure::Cancelled) => {
                    self.record_failure(UploadError::Cancelled);
                    return (None, FileOutcome::Failed);
                }
            }
        }
    }

    async fn upload_binary(&self, path: &Path) -> Result<UploadToken, StageFailure> {
        loop {
            match self.client.upload_media_data(path).await {
                Ok(token) => {
                    self.backoff.reset();
                    return Ok(token);
                }
                Err(e) => self.handle_stage_error(e, UploadStage::BinaryUpload).await?,
            }
        }
    }

    async fn create_item(
        &self,
        album_id: Option<&str>,
        token: &UploadToken,
        description: &str,
    ) -> Result<albumsync_api::MediaItem, StageFailure> {
        loop {
            match self
                .client
                .create_media_item(album_id, token, description)
                .await
            {
                Ok(item) => {
                    self.backoff.reset();
                    return Ok(item);
                }
                Err(e) => self.handle_stage_error(e, UploadStage::MediaCreation).await?,
            }
        }
    }

    /// Classifies one stage error. `Ok(())` means the caller should retry
    /// the same stage (the backoff delay has already been waited out).
    async fn handle_stage_error(
        &self,
        error: ApiError,
        stage: UploadStage,
    ) -> Result<(), StageFailure> {
        if error.is_transient() {
            let Some(delay) = self.backoff.on_transient_error() else {
                return Err(StageFailure::Fatal(error));
            };
            debug!(delay_ms = delay.as_millis() as u64, "transient failure, backing off");
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(StageFailure::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
            return Ok(());
        }
        if error.kind == ApiErrorKind::AlbumPermission {
            return Err(StageFailure::AlbumPermission(error));
        }
        if self.invalid_media.is_permanent_item_failure(&error, stage) {
            return Err(StageFailure::PermanentItem(error));
        }
        Err(StageFailure::Fatal(error))
    }

    fn record_failure(&self, error: UploadError) {
        warn!(error = %error, "recording run-level failure");
        *self.last_failure.lock().unwrap() = Some(error);
    }

    /// The most recent run-level failure, if any.
    pub fn take_last_failure(&self) -> Option<UploadError> {
        self.last_failure.lock().unwrap().take()
    }

    /// Flushes the state one last time and stops the saver.
    pub async fn close(&self) -> Result<(), UploadError> {
        self.saver.close().await
    }
}

/// A non-retriable end of one pipeline stage.
enum StageFailure {
    /// The item is permanently unacceptable; per-item handling applies.
    PermanentItem(ApiError),
    /// The target album refused the item.
    AlbumPermission(ApiError),
    /// Run-level failure (unclassified error or exhausted retries).
    Fatal(ApiError),
    Cancelled,
}

/// Waits for the owner of an in-flight upload to publish its outcome.
async fn await_peer(mut rx: watch::Receiver<Option<FileOutcome>>) -> FileOutcome {
    loop {
        if let Some(outcome) = rx.borrow().clone() {
            return outcome;
        }
        if rx.changed().await.is_err() {
            // Sender gone; the last visible value is all there is.
            let last = rx.borrow().clone();
            return last.unwrap_or(FileOutcome::Failed);
        }
    }
}
