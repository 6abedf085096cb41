//! Run lifecycle.
//!
//! One run: scan the tree and list the cloud's albums concurrently, bind
//! every local album title to a single cloud album, then push every file
//! through the orchestrator and flush the state. Both progress streams are
//! closed exactly once, with flags reflecting how the run ended.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use albumsync_api::PhotosClient;
use futures_util::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::albums::{AlbumManager, list_albums_by_title};
use crate::clock::Clock;
use crate::config::UploaderConfig;
use crate::error::UploadError;
use crate::progress::{ProgressSink, ProgressStatus, UPLOADING_MEDIA_FILES};
use crate::scanner;
use crate::state::StateStore;
use crate::upload::{FileOutcome, Uploader};

/// Counters of a completed run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub albums_bound: usize,
    pub files_uploaded: usize,
    pub files_skipped: usize,
    pub files_rejected: usize,
}

/// Composes scanner, album manager, orchestrator and progress sinks into a
/// single resumable run.
pub struct Runner {
    client: Arc<dyn PhotosClient>,
    clock: Arc<dyn Clock>,
    config: UploaderConfig,
    store: StateStore,
    sink: Arc<dyn ProgressSink>,
    cancel: CancellationToken,
}

impl Runner {
    pub fn new(
        client: Arc<dyn PhotosClient>,
        clock: Arc<dyn Clock>,
        config: UploaderConfig,
        store: StateStore,
        sink: Arc<dyn ProgressSink>,
    ) -> Self {
        Self {
            client,
            clock,
            config,
            store,
            sink,
            cancel: CancellationToken::new(),
        }
    }

    /// Token for cancelling the run from outside. Cancellation stops
    /// admitting new files, drains in-flight uploads and still flushes the
    /// state.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Uploads the tree under `root`. With `resume` false, previously
    /// uploaded files are uploaded again (persisted state is still written).
    pub async fn run(&self, root: &Path, resume: bool) -> Result<RunReport, UploadError> {
        let deadline_hit = Arc::new(AtomicBool::new(false));
        let watchdog_stop = CancellationToken::new();
        if let Some(deadline) = self.config.run_deadline {
            let cancel = self.cancel.clone();
            let stop = watchdog_stop.clone();
            let deadline_hit = Arc::clone(&deadline_hit);
            tokio::spawn(async move {
                tokio::select! {
                    _ = stop.cancelled() => {}
                    _ = tokio::time::sleep(deadline) => {
                        warn!("run deadline reached, cancelling");
                        deadline_hit.store(true, Ordering::SeqCst);
                        cancel.cancel();
                    }
                }
            });
        }

        let result = self.run_inner(root, resume).await;
        watchdog_stop.cancel();

        match result {
            Err(UploadError::Cancelled) if deadline_hit.load(Ordering::SeqCst) => {
                Err(UploadError::DeadlineExceeded)
            }
            other => other,
        }
    }

    async fn run_inner(&self, root: &Path, resume: bool) -> Result<RunReport, UploadError> {
        info!(root = %root.display(), resume, "starting upload run");

        let (album_dirs, cloud_by_title) = tokio::join!(
            async { scanner::scan(root) },
            list_albums_by_title(self.client.as_ref(), &self.config),
        );
        let mut album_dirs = album_dirs?;
        let cloud_by_title = cloud_by_title?;

        let total_files: usize = album_dirs.iter().map(|d| d.files.len()).sum();
        info!(
            directories = album_dirs.len(),
            files = total_files,
            "source tree scanned"
        );

        let uploader = Uploader::new(
            Arc::clone(&self.client),
            Arc::clone(&self.clock),
            self.config.clone(),
            self.store.clone(),
            resume,
            self.cancel.clone(),
        )?;

        let file_status = self.sink.create_status(UPLOADING_MEDIA_FILES, Some(total_files));

        let manager = AlbumManager::new(Arc::clone(&self.client), &self.config);
        let bound = match manager
            .bind(&album_dirs, cloud_by_title, self.sink.as_ref())
            .await
        {
            Ok(bound) => bound,
            Err(e) => {
                file_status.close(false);
                let _ = uploader.close().await;
                return Err(e);
            }
        };

        // Every file of every album directory, in creation-time order within
        // each album. The orchestrator's FIFO admission keeps this order on
        // the remote side.
        for dir in &mut album_dirs {
            scanner::sort_for_upload(&mut dir.files);
        }
        let uploader_ref = &uploader;
        let file_status_ref: &dyn ProgressStatus = file_status.as_ref();
        let submissions = album_dirs.iter().flat_map(|dir| {
            let album = dir.title.as_deref().and_then(|title| bound.get(title));
            dir.files
                .iter()
                .map(move |file| uploader_ref.upload_file(file, album, file_status_ref))
        });
        let outcomes = join_all(submissions).await;

        let mut report = RunReport {
            albums_bound: bound.len(),
            ..RunReport::default()
        };
        for outcome in &outcomes {
            match outcome {
                FileOutcome::Uploaded => {
                    report.files_uploaded += 1;
                    file_status.increment_success();
                }
                FileOutcome::SkippedExisting | FileOutcome::SkippedRejected => {
                    report.files_skipped += 1;
                    file_status.increment_success();
                }
                FileOutcome::Rejected => report.files_rejected += 1,
                FileOutcome::Failed => {}
            }
        }

        let flush_result = uploader.close().await;
        let failure = uploader
            .take_last_failure()
            .or_else(|| flush_result.err())
            .or_else(|| {
                self.cancel
                    .is_cancelled()
                    .then_some(UploadError::Cancelled)
            });

        match failure {
            Some(e) => {
                file_status.close(false);
                Err(e)
            }
            None => {
                file_status.close(true);
                info!(
                    uploaded = report.files_uploaded,
                    skipped = report.files_skipped,
                    rejected = report.files_rejected,
                    "run finished"
                );
                Ok(report)
            }
        }
    }
}
