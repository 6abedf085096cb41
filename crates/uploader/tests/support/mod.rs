//! Test doubles: an in-memory photos service that records everything it is
//! asked to do, and a progress sink that remembers every event.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use albumsync_api::{
    AlbumPage, ApiError, ApiResult, BoxFuture, CloudAlbum, MediaItem, PhotosClient, UploadToken,
};
use albumsync_uploader::progress::{KeyedError, ProgressSink, ProgressStatus};

const LIST_PAGE_SIZE: usize = 2;

/// Marker names that make the fake fail in specific ways, mirroring how the
/// service misbehaves in the wild.
pub const FAIL_CREATE_NAME: &str = "failOnMeWithInvalidArgumentDuringCreationOfMediaItem.jpg";
pub const FAIL_UPLOAD_NAME: &str = "failOnMeWithInvalidArgumentDuringUploadIngMediaData.jpg";
pub const FAIL_HARD_NAME: &str = "failOnMe.jpg";
pub const DENIED_ALBUM: &str = "fail-on-me-pre-existing-album";

#[derive(Debug, Clone)]
pub struct FakeItem {
    pub id: String,
    pub description: Option<String>,
    pub album_ids: Vec<String>,
}

#[derive(Debug, Clone)]
struct FakeAlbum {
    id: String,
    title: String,
}

#[derive(Default)]
struct Inner {
    albums: Vec<FakeAlbum>,
    items: Vec<FakeItem>,
    /// token -> source path
    tokens: HashMap<String, String>,
    uploads_by_path: HashMap<String, usize>,
    batch_sizes: Vec<usize>,
    id_seq: HashMap<String, usize>,
}

/// In-memory stand-in for the photos service.
///
/// Media ids equal the source file's absolute path and upload tokens are
/// prefixed by it, which makes assertions direct. Batch adds move items
/// between albums, so draining an album really empties it.
pub struct FakePhotosClient {
    inner: Mutex<Inner>,
    name_failures: AtomicBool,
    resource_exhausted: Mutex<HashMap<&'static str, u32>>,
}

impl FakePhotosClient {
    pub fn new() -> Self {
        let client = Self {
            inner: Mutex::new(Inner::default()),
            name_failures: AtomicBool::new(true),
            resource_exhausted: Mutex::new(HashMap::new()),
        };
        // An album the user does not own: adding items to it is denied.
        client.inner.lock().unwrap().albums.push(FakeAlbum {
            id: DENIED_ALBUM.into(),
            title: DENIED_ALBUM.into(),
        });
        client
    }

    /// Stops the name-triggered failures, as if the service recovered.
    pub fn disable_name_based_failures(&self) {
        self.name_failures.store(false, Ordering::SeqCst);
    }

    /// Makes the next `count` calls of every operation fail with
    /// `RESOURCE_EXHAUSTED`.
    pub fn enable_resource_exhausted(&self, count: u32) {
        let mut map = self.resource_exhausted.lock().unwrap();
        for op in [
            "createAlbum",
            "listAlbums",
            "uploadMediaData",
            "createMediaItems",
            "batchAddMediaItems",
            "albumItems",
        ] {
            map.insert(op, count);
        }
    }

    /// Creates a pre-existing album directly, bypassing failure knobs.
    pub fn seed_album(&self, title: &str) -> CloudAlbum {
        let mut inner = self.inner.lock().unwrap();
        let id = next_album_id(&mut inner, title);
        inner.albums.push(FakeAlbum {
            id: id.clone(),
            title: title.into(),
        });
        CloudAlbum {
            id: id.clone(),
            title: title.into(),
            item_count: 0,
            url: album_url(&id),
        }
    }

    /// Places a pre-existing item into an album, bypassing the uploader.
    pub fn seed_item(&self, id: &str, album_id: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.items.push(FakeItem {
            id: id.into(),
            description: None,
            album_ids: vec![album_id.into()],
        });
    }

    pub fn all_items(&self) -> Vec<FakeItem> {
        self.inner.lock().unwrap().items.clone()
    }

    pub fn item(&self, id: &str) -> Option<FakeItem> {
        self.inner
            .lock()
            .unwrap()
            .items
            .iter()
            .find(|i| i.id == id)
            .cloned()
    }

    pub fn album_item_ids(&self, album_id: &str) -> Vec<String> {
        self.inner
            .lock()
            .unwrap()
            .items
            .iter()
            .filter(|i| i.album_ids.iter().any(|a| a == album_id))
            .map(|i| i.id.clone())
            .collect()
    }

    pub fn album_titles_and_ids(&self) -> Vec<(String, String)> {
        self.inner
            .lock()
            .unwrap()
            .albums
            .iter()
            .map(|a| (a.title.clone(), a.id.clone()))
            .collect()
    }

    pub fn upload_count(&self, path: &Path) -> usize {
        self.inner
            .lock()
            .unwrap()
            .uploads_by_path
            .get(&path.to_string_lossy().into_owned())
            .copied()
            .unwrap_or(0)
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.inner.lock().unwrap().batch_sizes.clone()
    }

    fn maybe_exhausted(&self, op: &'static str) -> ApiResult<()> {
        let mut map = self.resource_exhausted.lock().unwrap();
        if let Some(left) = map.get_mut(op)
            && *left > 0
        {
            *left -= 1;
            return Err(ApiError::resource_exhausted(op));
        }
        Ok(())
    }

    fn name_failures_enabled(&self) -> bool {
        self.name_failures.load(Ordering::SeqCst)
    }
}

fn next_album_id(inner: &mut Inner, title: &str) -> String {
    let seq = inner.id_seq.entry(title.to_string()).or_insert(0);
    let id = if *seq == 0 {
        title.to_string()
    } else {
        format!("{title}{seq}")
    };
    *seq += 1;
    id
}

fn album_url(id: &str) -> String {
    format!("http://photos.com/{id}")
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

impl PhotosClient for FakePhotosClient {
    fn create_album(&self, title: &str) -> BoxFuture<'_, ApiResult<CloudAlbum>> {
        let title = title.to_string();
        Box::pin(async move {
            self.maybe_exhausted("createAlbum")?;
            if self.name_failures_enabled() && title.contains("failOnMe") {
                return Err(ApiError::other("createAlbum failed"));
            }
            let mut inner = self.inner.lock().unwrap();
            let id = next_album_id(&mut inner, &title);
            inner.albums.push(FakeAlbum {
                id: id.clone(),
                title: title.clone(),
            });
            Ok(CloudAlbum {
                id: id.clone(),
                title,
                item_count: 0,
                url: album_url(&id),
            })
        })
    }

    fn list_albums(&self, page_token: Option<&str>) -> BoxFuture<'_, ApiResult<AlbumPage>> {
        let offset: usize = page_token.and_then(|t| t.parse().ok()).unwrap_or(0);
        Box::pin(async move {
            self.maybe_exhausted("listAlbums")?;
            let inner = self.inner.lock().unwrap();
            let albums: Vec<CloudAlbum> = inner
                .albums
                .iter()
                .skip(offset)
                .take(LIST_PAGE_SIZE)
                .map(|a| CloudAlbum {
                    id: a.id.clone(),
                    title: a.title.clone(),
                    item_count: inner
                        .items
                        .iter()
                        .filter(|i| i.album_ids.iter().any(|x| *x == a.id))
                        .count() as u64,
                    url: album_url(&a.id),
                })
                .collect();
            let next = offset + albums.len();
            Ok(AlbumPage {
                albums,
                next_page_token: (next < inner.albums.len()).then(|| next.to_string()),
            })
        })
    }

    fn upload_media_data(&self, file: &Path) -> BoxFuture<'_, ApiResult<UploadToken>> {
        let path = file.to_path_buf();
        Box::pin(async move {
            self.maybe_exhausted("uploadMediaData")?;
            let name = file_name_of(&path);
            if self.name_failures_enabled() {
                if name == FAIL_UPLOAD_NAME {
                    return Err(ApiError::invalid_argument("uploadMediaData"));
                }
                if name == FAIL_HARD_NAME {
                    return Err(ApiError::other("uploadMediaData: internal error"));
                }
            }
            let path_str = path.to_string_lossy().into_owned();
            let mut inner = self.inner.lock().unwrap();
            let count = {
                let count = inner.uploads_by_path.entry(path_str.clone()).or_insert(0);
                *count += 1;
                *count
            };
            let token = format!("{path_str}-upload-token-{count}");
            inner.tokens.insert(token.clone(), path_str);
            Ok(UploadToken(token))
        })
    }

    fn create_media_item(
        &self,
        album_id: Option<&str>,
        token: &UploadToken,
        description: &str,
    ) -> BoxFuture<'_, ApiResult<MediaItem>> {
        let album_id = album_id.map(String::from);
        let token = token.0.clone();
        let description = description.to_string();
        Box::pin(async move {
            self.maybe_exhausted("createMediaItems")?;
            if album_id.as_deref() == Some(DENIED_ALBUM) {
                return Err(ApiError::album_permission());
            }
            if self.name_failures_enabled() && description == FAIL_CREATE_NAME {
                return Err(ApiError::invalid_argument("createMediaItems"));
            }
            let mut inner = self.inner.lock().unwrap();
            let Some(path) = inner.tokens.get(&token).cloned() else {
                return Err(ApiError::other("unknown upload token"));
            };
            let album_ids: Vec<String> = album_id.into_iter().collect();
            if let Some(existing) = inner.items.iter_mut().find(|i| i.id == path) {
                existing.album_ids = album_ids;
                existing.description = Some(description.clone());
            } else {
                inner.items.push(FakeItem {
                    id: path.clone(),
                    description: Some(description.clone()),
                    album_ids,
                });
            }
            Ok(MediaItem {
                id: path,
                description: Some(description),
            })
        })
    }

    fn add_to_album(
        &self,
        album_id: &str,
        media_item_ids: &[String],
    ) -> BoxFuture<'_, ApiResult<()>> {
        let album_id = album_id.to_string();
        let ids = media_item_ids.to_vec();
        Box::pin(async move {
            self.maybe_exhausted("batchAddMediaItems")?;
            if ids.len() > albumsync_api::MAX_ITEMS_PER_BATCH {
                return Err(ApiError::invalid_argument("batchAddMediaItems"));
            }
            let mut inner = self.inner.lock().unwrap();
            inner.batch_sizes.push(ids.len());
            for id in &ids {
                let Some(item) = inner.items.iter_mut().find(|i| i.id == *id) else {
                    return Err(ApiError::other(format!("no such media item: {id}")));
                };
                // The service "moves" on add here so drained albums read as
                // empty in assertions.
                item.album_ids = vec![album_id.clone()];
            }
            Ok(())
        })
    }

    fn album_items(&self, album_id: &str) -> BoxFuture<'_, ApiResult<Vec<MediaItem>>> {
        let album_id = album_id.to_string();
        Box::pin(async move {
            self.maybe_exhausted("albumItems")?;
            let inner = self.inner.lock().unwrap();
            Ok(inner
                .items
                .iter()
                .filter(|i| i.album_ids.iter().any(|a| *a == album_id))
                .map(|i| MediaItem {
                    id: i.id.clone(),
                    description: i.description.clone(),
                })
                .collect())
        })
    }
}

/// Progress sink retaining every stream and event for assertions.
#[derive(Default)]
pub struct RecordingSink {
    streams: Mutex<Vec<(String, Arc<RecordedStatus>)>>,
}

#[derive(Default)]
pub struct RecordedStatus {
    pub successes: AtomicUsize,
    pub errors: Mutex<Vec<KeyedError>>,
    pub closes: Mutex<Vec<bool>>,
}

impl RecordingSink {
    pub fn stream_names(&self) -> Vec<String> {
        self.streams
            .lock()
            .unwrap()
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn successes_for(&self, name: &str) -> usize {
        self.streams
            .lock()
            .unwrap()
            .iter()
            .filter(|(n, _)| n == name)
            .map(|(_, s)| s.successes.load(Ordering::SeqCst))
            .sum()
    }

    pub fn errors_for(&self, name: &str) -> Vec<KeyedError> {
        self.streams
            .lock()
            .unwrap()
            .iter()
            .filter(|(n, _)| n == name)
            .flat_map(|(_, s)| s.errors.lock().unwrap().clone())
            .collect()
    }

    pub fn all_errors(&self) -> Vec<(String, KeyedError)> {
        self.streams
            .lock()
            .unwrap()
            .iter()
            .flat_map(|(name, s)| {
                s.errors
                    .lock()
                    .unwrap()
                    .iter()
                    .map(|e| (name.clone(), e.clone()))
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    pub fn closes_for(&self, name: &str) -> Vec<bool> {
        self.streams
            .lock()
            .unwrap()
            .iter()
            .filter(|(n, _)| n == name)
            .flat_map(|(_, s)| s.closes.lock().unwrap().clone())
            .collect()
    }

    pub fn assert_no_errors(&self) {
        let errors = self.all_errors();
        assert!(errors.is_empty(), "unexpected progress errors: {errors:?}");
    }
}

impl ProgressSink for RecordingSink {
    fn create_status(&self, name: &str, _total: Option<usize>) -> Arc<dyn ProgressStatus> {
        let status = Arc::new(RecordedStatus::default());
        self.streams
            .lock()
            .unwrap()
            .push((name.to_string(), Arc::clone(&status)));
        status
    }
}

impl ProgressStatus for RecordedStatus {
    fn increment_success(&self) {
        self.successes.fetch_add(1, Ordering::SeqCst);
    }

    fn keyed_error(&self, error: KeyedError) {
        self.errors.lock().unwrap().push(error);
    }

    fn close(&self, successful: bool) {
        self.closes.lock().unwrap().push(successful);
    }
}

/// Builds the baseline tree used by most scenarios:
/// `root-photo.jpg`, `outer-album/outer-album-photo.jpg` (plus a
/// `picasa.ini`), `outer-album/inner-album/inner-album-photo.jpg` and an
/// empty `DS_Store/` directory.
pub struct TestTree {
    pub root: PathBuf,
    pub root_photo: PathBuf,
    pub outer_photo: PathBuf,
    pub inner_photo: PathBuf,
}

impl TestTree {
    pub fn create(root: &Path) -> std::io::Result<Self> {
        let root_photo = root.join("root-photo.jpg");
        std::fs::write(&root_photo, [0])?;

        let outer = root.join("outer-album");
        std::fs::create_dir_all(&outer)?;
        let outer_photo = outer.join("outer-album-photo.jpg");
        std::fs::write(&outer_photo, [1])?;
        std::fs::write(outer.join("picasa.ini"), [1])?;

        let inner = outer.join("inner-album");
        std::fs::create_dir_all(&inner)?;
        let inner_photo = inner.join("inner-album-photo.jpg");
        std::fs::write(&inner_photo, [2])?;

        std::fs::create_dir_all(root.join("DS_Store"))?;

        Ok(Self {
            root: root.to_path_buf(),
            root_photo,
            outer_photo,
            inner_photo,
        })
    }
}
