//! Data types exchanged with the photos service.

use serde::{Deserialize, Serialize};

/// Hard limit of the `batchAddMediaItems` / `batchCreate` endpoints.
///
/// Requests carrying more ids are rejected by the service, so every caller
/// chunks by this value.
pub const MAX_ITEMS_PER_BATCH: usize = 50;

/// A remote album as reported by the service.
///
/// Album titles are not unique: the service happily holds several albums
/// with the same title, which is exactly what the reconciliation step in the
/// uploader deals with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudAlbum {
    pub id: String,
    pub title: String,
    /// Number of media items currently in the album.
    pub item_count: u64,
    /// Product URL of the album, shown to the user in reconciliation
    /// messages.
    pub url: String,
}

/// A remote media item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaItem {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// An opaque upload receipt returned by the binary-upload step.
///
/// The token is exchanged for a [`MediaItem`] by a subsequent create call.
/// The service keeps tokens valid for one day; callers track the issue time
/// themselves to avoid exchanging a stale token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadToken(pub String);

impl UploadToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// One page of an album listing.
#[derive(Debug, Clone, Default)]
pub struct AlbumPage {
    pub albums: Vec<CloudAlbum>,
    /// Token of the next page; `None` on the last page.
    pub next_page_token: Option<String>,
}
