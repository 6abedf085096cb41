//! The `PhotosClient` trait.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;

use crate::error::ApiError;
use crate::types::{AlbumPage, CloudAlbum, MediaItem, UploadToken};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
pub type ApiResult<T> = Result<T, ApiError>;

/// Abstract connection to the photos service.
///
/// The uploader core is written against this trait so it can be driven by
/// the REST transport in production and by an in-process recording fake in
/// tests. All operations are asynchronous and return errors already
/// classified into [`ApiError`] kinds; implementations must not leak raw
/// transport errors.
pub trait PhotosClient: Send + Sync {
    /// Creates a new (initially empty) album with the given title.
    fn create_album(&self, title: &str) -> BoxFuture<'_, ApiResult<CloudAlbum>>;

    /// Lists one page of the user's albums. Pass the previous page's
    /// `next_page_token` to continue; `None` starts from the beginning.
    fn list_albums(&self, page_token: Option<&str>) -> BoxFuture<'_, ApiResult<AlbumPage>>;

    /// Uploads the raw bytes of a media file, returning an upload token.
    ///
    /// The token does not yet correspond to a media item; it must be
    /// exchanged via [`create_media_item`](Self::create_media_item) within
    /// its validity window.
    fn upload_media_data(&self, file: &Path) -> BoxFuture<'_, ApiResult<UploadToken>>;

    /// Exchanges an upload token for a media item, optionally placing it
    /// into an album.
    fn create_media_item(
        &self,
        album_id: Option<&str>,
        token: &UploadToken,
        description: &str,
    ) -> BoxFuture<'_, ApiResult<MediaItem>>;

    /// Adds existing media items to an album. At most
    /// [`MAX_ITEMS_PER_BATCH`](crate::MAX_ITEMS_PER_BATCH) ids per call.
    fn add_to_album(&self, album_id: &str, media_item_ids: &[String])
        -> BoxFuture<'_, ApiResult<()>>;

    /// Lists all media items currently in an album.
    fn album_items(&self, album_id: &str) -> BoxFuture<'_, ApiResult<Vec<MediaItem>>>;
}
