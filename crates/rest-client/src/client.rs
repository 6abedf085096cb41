//! The authenticated HTTP client.

use std::path::Path;

use albumsync_api::{
    AlbumPage, ApiError, ApiErrorKind, ApiResult, BoxFuture, CloudAlbum, MediaItem, PhotosClient,
    UploadToken,
};
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use tracing::debug;

use crate::model::{
    BatchAddRequest, BatchCreateRequest, BatchCreateResponse, CreateAlbumRequest, ErrorEnvelope,
    ListAlbumsResponse, NewAlbum, NewMediaItem, SearchRequest, SearchResponse, SimpleMediaItem,
    WireAlbum, parse_item_count,
};

const DEFAULT_BASE_URL: &str = "https://photoslibrary.googleapis.com";
const ALBUMS_PAGE_SIZE: u32 = 50;
const SEARCH_PAGE_SIZE: u32 = 100;
/// Generous per-request ceiling; binary uploads of large videos need it.
const REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(300);

/// Google Photos Library API client with Bearer authentication.
pub struct RestPhotosClient {
    http: reqwest::Client,
    base_url: String,
}

impl RestPhotosClient {
    /// Creates a client using the given OAuth access token.
    pub fn new(access_token: &str) -> ApiResult<Self> {
        let mut headers = HeaderMap::new();
        let value = HeaderValue::from_str(&format!("Bearer {access_token}"))
            .map_err(|_| ApiError::other("access token is not a valid header value"))?;
        headers.insert(AUTHORIZATION, value);

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(classify_reqwest)?;

        Ok(Self {
            http,
            base_url: DEFAULT_BASE_URL.to_string(),
        })
    }

    /// Points the client at a different server (for testing).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    async fn post_json<Req: serde::Serialize, Resp: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
        body: &Req,
    ) -> ApiResult<Resp> {
        let url = format!("{}{endpoint}", self.base_url);
        let resp = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(classify_reqwest)?;
        deserialize_response(resp).await
    }

    async fn get_json<Resp: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
        query: &[(&str, String)],
    ) -> ApiResult<Resp> {
        let url = format!("{}{endpoint}", self.base_url);
        let resp = self
            .http
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(classify_reqwest)?;
        deserialize_response(resp).await
    }
}

impl PhotosClient for RestPhotosClient {
    fn create_album(&self, title: &str) -> BoxFuture<'_, ApiResult<CloudAlbum>> {
        let req = CreateAlbumRequest {
            album: NewAlbum {
                title: title.to_string(),
            },
        };
        Box::pin(async move {
            let album: WireAlbum = self.post_json("/v1/albums", &req).await?;
            debug!(id = %album.id, "album created");
            Ok(to_cloud_album(album))
        })
    }

    fn list_albums(&self, page_token: Option<&str>) -> BoxFuture<'_, ApiResult<AlbumPage>> {
        let mut query = vec![("pageSize", ALBUMS_PAGE_SIZE.to_string())];
        if let Some(token) = page_token {
            query.push(("pageToken", token.to_string()));
        }
        Box::pin(async move {
            let resp: ListAlbumsResponse = self.get_json("/v1/albums", &query).await?;
            Ok(AlbumPage {
                albums: resp.albums.into_iter().map(to_cloud_album).collect(),
                next_page_token: resp.next_page_token,
            })
        })
    }

    fn upload_media_data(&self, file: &Path) -> BoxFuture<'_, ApiResult<UploadToken>> {
        let file = file.to_path_buf();
        Box::pin(async move {
            let bytes = tokio::fs::read(&file)
                .await
                .map_err(|e| ApiError::other(format!("reading {}: {e}", file.display())))?;

            let url = format!("{}/v1/uploads", self.base_url);
            let resp = self
                .http
                .post(&url)
                .header("Content-Type", "application/octet-stream")
                .header("X-Goog-Upload-Content-Type", mime_for(&file))
                .header("X-Goog-Upload-Protocol", "raw")
                .body(bytes)
                .send()
                .await
                .map_err(classify_reqwest)?;

            let status = resp.status();
            let body = resp.text().await.map_err(classify_reqwest)?;
            if !status.is_success() {
                return Err(classify_status(status, &body));
            }
            // The upload endpoint answers with the bare token.
            Ok(UploadToken(body))
        })
    }

    fn create_media_item(
        &self,
        album_id: Option<&str>,
        token: &UploadToken,
        description: &str,
    ) -> BoxFuture<'_, ApiResult<MediaItem>> {
        let file_name = description.to_string();
        let req = BatchCreateRequest {
            album_id: album_id.map(String::from),
            new_media_items: vec![NewMediaItem {
                description: file_name.clone(),
                simple_media_item: SimpleMediaItem {
                    file_name,
                    upload_token: token.0.clone(),
                },
            }],
        };
        Box::pin(async move {
            let resp: BatchCreateResponse = self.post_json("/v1/mediaItems:batchCreate", &req).await?;
            let result = resp
                .new_media_item_results
                .into_iter()
                .next()
                .ok_or_else(|| ApiError::other("empty batchCreate response"))?;

            if let Some(item) = result.media_item {
                return Ok(MediaItem {
                    id: item.id,
                    description: item.description,
                });
            }
            let status = result.status.unwrap_or_else(|| crate::model::RpcStatus {
                code: 2,
                message: "unknown batchCreate failure".into(),
            });
            Err(classify_rpc(status.code, &status.message))
        })
    }

    fn add_to_album(
        &self,
        album_id: &str,
        media_item_ids: &[String],
    ) -> BoxFuture<'_, ApiResult<()>> {
        let endpoint = format!("/v1/albums/{album_id}:batchAddMediaItems");
        let req = BatchAddRequest {
            media_item_ids: media_item_ids.to_vec(),
        };
        Box::pin(async move {
            let _: serde_json::Value = self.post_json(&endpoint, &req).await?;
            Ok(())
        })
    }

    fn album_items(&self, album_id: &str) -> BoxFuture<'_, ApiResult<Vec<MediaItem>>> {
        let album_id = album_id.to_string();
        Box::pin(async move {
            let mut items = Vec::new();
            let mut page_token: Option<String> = None;
            loop {
                let req = SearchRequest {
                    album_id: album_id.clone(),
                    page_size: SEARCH_PAGE_SIZE,
                    page_token: page_token.take(),
                };
                let resp: SearchResponse = self.post_json("/v1/mediaItems:search", &req).await?;
                items.extend(resp.media_items.into_iter().map(|i| MediaItem {
                    id: i.id,
                    description: i.description,
                }));
                match resp.next_page_token {
                    Some(next) => page_token = Some(next),
                    None => return Ok(items),
                }
            }
        })
    }
}

fn to_cloud_album(album: WireAlbum) -> CloudAlbum {
    CloudAlbum {
        item_count: parse_item_count(&album.media_items_count),
        id: album.id,
        title: album.title,
        url: album.product_url,
    }
}

async fn deserialize_response<Resp: serde::de::DeserializeOwned>(
    resp: reqwest::Response,
) -> ApiResult<Resp> {
    let status = resp.status();
    let body = resp.text().await.map_err(classify_reqwest)?;
    if !status.is_success() {
        return Err(classify_status(status, &body));
    }
    serde_json::from_str(&body)
        .map_err(|e| ApiError::other(format!("malformed response body: {e}")))
}

/// Transport-level failures: anything about connectivity or timing is worth
/// retrying, the rest is not.
fn classify_reqwest(e: reqwest::Error) -> ApiError {
    if e.is_timeout() || e.is_connect() || e.is_request() {
        ApiError::transient(format!("transport error: {e}"))
    } else {
        ApiError::other(format!("transport error: {e}"))
    }
}

/// Service-level failures, from the HTTP status plus the error envelope.
fn classify_status(status: StatusCode, body: &str) -> ApiError {
    let envelope: ErrorEnvelope = serde_json::from_str(body).unwrap_or_default();
    let canonical = if envelope.error.status.is_empty() {
        status.canonical_reason().unwrap_or("UNKNOWN").to_string()
    } else {
        envelope.error.status.clone()
    };
    let message = if envelope.error.message.is_empty() {
        format!("{canonical}: HTTP {}", status.as_u16())
    } else {
        format!("{canonical}: {}", envelope.error.message)
    };

    let kind = match (status, canonical.as_str()) {
        (StatusCode::TOO_MANY_REQUESTS, _)
        | (StatusCode::SERVICE_UNAVAILABLE, _)
        | (StatusCode::GATEWAY_TIMEOUT, _) => ApiErrorKind::Transient,
        (_, "RESOURCE_EXHAUSTED" | "UNAVAILABLE" | "DEADLINE_EXCEEDED") => ApiErrorKind::Transient,
        (_, "INVALID_ARGUMENT") if is_album_permission(&envelope.error.message) => {
            ApiErrorKind::AlbumPermission
        }
        (_, "INVALID_ARGUMENT") => ApiErrorKind::InvalidArgument,
        _ => ApiErrorKind::Other,
    };
    ApiError::new(kind, message)
}

/// Per-item failures inside a batch response (`google.rpc.Code` numbers).
fn classify_rpc(code: i32, message: &str) -> ApiError {
    match code {
        3 if is_album_permission(message) => ApiError::album_permission(),
        3 => ApiError::new(
            ApiErrorKind::InvalidArgument,
            format!("INVALID_ARGUMENT: {message}"),
        ),
        4 | 8 | 14 => ApiError::transient(format!("code {code}: {message}")),
        _ => ApiError::other(format!("code {code}: {message}")),
    }
}

fn is_album_permission(message: &str) -> bool {
    message.contains("No permission to add media items")
}

fn mime_for(file: &Path) -> &'static str {
    match file
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("bmp") => "image/bmp",
        Some("webp") => "image/webp",
        Some("heic") => "image/heic",
        Some("tif" | "tiff") => "image/tiff",
        Some("mp4" | "m4v") => "video/mp4",
        Some("mov") => "video/quicktime",
        Some("avi") => "video/x-msvideo",
        Some("mkv") => "video/x-matroska",
        Some("mpg") => "video/mpeg",
        Some("webm") => "video/webm",
        _ => "application/octet-stream",
    }
}
