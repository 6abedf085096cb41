//! Cloud album resolution and reconciliation.
//!
//! At run start the cloud's albums are listed once and grouped by title.
//! Every local album title is then bound to exactly one cloud album:
//! created when none exists, reused when unique, or — when the cloud holds
//! several albums with that title — merged, by moving every item of each
//! duplicate into a chosen primary. The service refuses to delete albums,
//! so drained duplicates are reported to the user instead.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use albumsync_api::{ApiResult, CloudAlbum, MAX_ITEMS_PER_BATCH, PhotosClient};
use futures_util::future::try_join_all;
use tracing::{debug, info};

use crate::config::UploaderConfig;
use crate::error::UploadError;
use crate::progress::{KeyedError, ProgressSink, ProgressStatus};
use crate::retry::BackoffPolicy;
use crate::scanner::AlbumDirectory;

/// All pre-existing cloud albums, grouped by (non-unique) title.
pub type CloudAlbumsByTitle = HashMap<String, Vec<CloudAlbum>>;

/// Pages through the full album listing once. The result is treated as an
/// immutable snapshot for the rest of the run.
pub async fn list_albums_by_title(
    client: &dyn PhotosClient,
    config: &UploaderConfig,
) -> Result<CloudAlbumsByTitle, UploadError> {
    let backoff = BackoffPolicy::from_config(config);
    let mut by_title: CloudAlbumsByTitle = HashMap::new();
    let mut page_token: Option<String> = None;
    let mut total = 0usize;

    loop {
        let token = page_token.clone();
        let page = with_backoff(&backoff, || client.list_albums(token.as_deref())).await?;
        total += page.albums.len();
        for album in page.albums {
            by_title.entry(album.title.clone()).or_default().push(album);
        }
        match page.next_page_token {
            Some(next) => page_token = Some(next),
            None => break,
        }
    }

    debug!(albums = total, titles = by_title.len(), "cloud albums listed");
    Ok(by_title)
}

/// Binds local album titles to cloud albums, merging duplicates.
pub struct AlbumManager {
    client: Arc<dyn PhotosClient>,
    backoff: BackoffPolicy,
}

impl AlbumManager {
    pub fn new(client: Arc<dyn PhotosClient>, config: &UploaderConfig) -> Self {
        Self {
            client,
            backoff: BackoffPolicy::from_config(config),
        }
    }

    /// Resolves every distinct local album title to a single target album.
    ///
    /// Bindings for distinct titles run concurrently; the work within one
    /// title (choosing a primary, draining its duplicates batch by batch)
    /// is sequential. Any permanent failure aborts the whole run.
    pub async fn bind(
        &self,
        album_dirs: &[AlbumDirectory],
        mut cloud_by_title: CloudAlbumsByTitle,
        sink: &dyn ProgressSink,
    ) -> Result<HashMap<String, CloudAlbum>, UploadError> {
        let mut seen = HashSet::new();
        let titles: Vec<&str> = album_dirs
            .iter()
            .filter_map(|dir| dir.title.as_deref())
            .filter(|t| seen.insert(*t))
            .collect();

        let status = sink.create_status(
            &format!("Reconciling {} album(s) with Google Photos", titles.len()),
            Some(titles.len()),
        );

        let bindings = try_join_all(titles.iter().map(|&title| {
            let candidates = cloud_by_title.remove(title).unwrap_or_default();
            self.bind_title(title, candidates, status.as_ref())
        }))
        .await;

        match bindings {
            Ok(pairs) => {
                status.close(true);
                Ok(pairs
                    .into_iter()
                    .map(|(title, album)| (title.to_string(), album))
                    .collect())
            }
            Err(e) => {
                status.close(false);
                Err(e)
            }
        }
    }

    async fn bind_title<'t>(
        &self,
        title: &'t str,
        mut candidates: Vec<CloudAlbum>,
        status: &dyn ProgressStatus,
    ) -> Result<(&'t str, CloudAlbum), UploadError> {
        let album = match candidates.len() {
            0 => {
                info!(title, "creating album");
                with_backoff(&self.backoff, || self.client.create_album(title)).await?
            }
            1 => candidates.pop().unwrap(),
            _ => self.merge_duplicates(title, candidates, status).await?,
        };
        status.increment_success();
        Ok((title, album))
    }

    /// Drains every duplicate of `title` into the chosen primary.
    async fn merge_duplicates(
        &self,
        title: &str,
        mut candidates: Vec<CloudAlbum>,
        status: &dyn ProgressStatus,
    ) -> Result<CloudAlbum, UploadError> {
        // Primary: most items, ties broken by smallest id.
        candidates.sort_by(|a, b| {
            b.item_count
                .cmp(&a.item_count)
                .then_with(|| a.id.cmp(&b.id))
        });
        let primary = candidates.remove(0);
        candidates.sort_by(|a, b| a.id.cmp(&b.id));

        info!(
            title,
            primary = %primary.id,
            duplicates = candidates.len(),
            "merging duplicate albums"
        );

        for secondary in &candidates {
            self.drain_into(&primary, secondary).await?;
            status.keyed_error(KeyedError::new(
                &secondary.url,
                format!(
                    "Album '{title}' may now be empty and will require manual deletion \
                     (Google Photos API does not allow me to delete it for you)"
                ),
            ));
        }
        Ok(primary)
    }

    /// Moves all of `secondary`'s items into `primary`, one bounded batch at
    /// a time. A transient batch failure retries the same batch, so the
    /// merge resumes from the last acknowledged one.
    async fn drain_into(
        &self,
        primary: &CloudAlbum,
        secondary: &CloudAlbum,
    ) -> Result<(), UploadError> {
        let items =
            with_backoff(&self.backoff, || self.client.album_items(&secondary.id)).await?;
        let ids: Vec<String> = items.into_iter().map(|item| item.id).collect();

        for batch in ids.chunks(MAX_ITEMS_PER_BATCH) {
            with_backoff(&self.backoff, || {
                self.client.add_to_album(&primary.id, batch)
            })
            .await?;
        }

        debug!(
            from = %secondary.id,
            to = %primary.id,
            moved = ids.len(),
            "album drained"
        );
        Ok(())
    }
}

/// Runs `op` until success, a permanent failure, or backoff exhaustion.
async fn with_backoff<T, F, Fut>(backoff: &BackoffPolicy, mut op: F) -> Result<T, UploadError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ApiResult<T>>,
{
    loop {
        match op().await {
            Ok(value) => {
                backoff.reset();
                return Ok(value);
            }
            Err(e) if e.is_transient() => match backoff.on_transient_error() {
                Some(delay) => tokio::time::sleep(delay).await,
                None => return Err(UploadError::RetriesExhausted(e)),
            },
            Err(e) => return Err(UploadError::Album(e)),
        }
    }
}
