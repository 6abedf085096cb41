//! Wire model of the Google Photos Library API.

use serde::{Deserialize, Serialize};

/// `mediaItemsCount` arrives as a decimal string (int64 JSON encoding).
pub fn parse_item_count(raw: &Option<String>) -> u64 {
    raw.as_deref().and_then(|s| s.parse().ok()).unwrap_or(0)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireAlbum {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub product_url: String,
    #[serde(default)]
    pub media_items_count: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMediaItem {
    pub id: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAlbumRequest {
    pub album: NewAlbum,
}

#[derive(Debug, Serialize)]
pub struct NewAlbum {
    pub title: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListAlbumsResponse {
    #[serde(default)]
    pub albums: Vec<WireAlbum>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchCreateRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub album_id: Option<String>,
    pub new_media_items: Vec<NewMediaItem>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMediaItem {
    pub description: String,
    pub simple_media_item: SimpleMediaItem,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimpleMediaItem {
    pub file_name: String,
    pub upload_token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchCreateResponse {
    #[serde(default)]
    pub new_media_item_results: Vec<NewMediaItemResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMediaItemResult {
    #[serde(default)]
    pub status: Option<RpcStatus>,
    #[serde(default)]
    pub media_item: Option<WireMediaItem>,
}

/// `google.rpc.Status` as embedded in batch responses.
#[derive(Debug, Deserialize)]
pub struct RpcStatus {
    #[serde(default)]
    pub code: i32,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchAddRequest {
    pub media_item_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    pub album_id: String,
    pub page_size: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    #[serde(default)]
    pub media_items: Vec<WireMediaItem>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

/// Error envelope returned by the service on non-2xx responses.
#[derive(Debug, Default, Deserialize)]
pub struct ErrorEnvelope {
    #[serde(default)]
    pub error: ErrorBody,
}

#[derive(Debug, Default, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub code: i32,
    #[serde(default)]
    pub message: String,
    /// Canonical status name, e.g. `INVALID_ARGUMENT`.
    #[serde(default)]
    pub status: String,
}
