//! Persistent upload state.
//!
//! One JSON document maps every absolute path ever processed to its
//! [`ItemState`]. The document survives crashes: saves go to a sibling temp
//! file first and are renamed into place, so a reader sees either the old or
//! the new snapshot, never a torn one. Fields we do not understand are kept
//! and written back verbatim.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::UploadError;

/// A raw upload token plus the instant it was issued.
///
/// The token outlives a failed media-item creation, which is what makes
/// "binary uploaded, item not yet created" resumable without re-sending
/// bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadTokenState {
    pub token: String,
    pub upload_instant: DateTime<Utc>,
}

/// Per-file record.
///
/// The combinations of the optional fields encode the upload lifecycle:
/// `media_id` present means the item exists remotely; `upload_state` alone
/// means a token is held but creation has not succeeded; a record with
/// neither is meaningless and is never written.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub album_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_state: Option<UploadTokenState>,
}

impl ItemState {
    pub fn created(
        media_id: String,
        album_id: Option<String>,
        upload_state: Option<UploadTokenState>,
    ) -> Self {
        Self {
            media_id: Some(media_id),
            album_id,
            upload_state,
        }
    }

    pub fn tokenised(upload_state: UploadTokenState) -> Self {
        Self {
            media_id: None,
            album_id: None,
            upload_state: Some(upload_state),
        }
    }

    /// Whether this record carries any information worth persisting.
    pub fn is_meaningful(&self) -> bool {
        self.media_id.is_some() || self.upload_state.is_some()
    }
}

/// The `photosUploader` section of the document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UploadState {
    #[serde(default, rename = "uploadedMediaItemIdByAbsolutePath")]
    pub items: BTreeMap<String, ItemState>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// The document root.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    #[serde(default, rename = "photosUploader")]
    pub photos_uploader: UploadState,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Durable storage for [`PersistedState`].
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at the per-user data location for this platform.
    pub fn at_default_location() -> Self {
        Self::new(default_state_path())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the document. A missing file is an empty state; an unreadable
    /// or unparsable file is an error, since silently starting over would
    /// re-upload everything.
    pub fn load(&self) -> Result<PersistedState, UploadError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(PersistedState::default());
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_str(&content).map_err(|source| UploadError::CorruptState {
            path: self.path.clone(),
            source,
        })
    }

    /// Writes the document atomically: sibling temp file, then rename.
    pub fn save(&self, state: &PersistedState) -> Result<(), UploadError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(state)?;

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;

        tracing::debug!(path = %self.path.display(), "upload state saved");
        Ok(())
    }
}

/// Platform-specific default location of the state file.
fn default_state_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        PathBuf::from(appdata).join("albumsync").join("state.json")
    }

    #[cfg(not(target_os = "windows"))]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        PathBuf::from(home)
            .join(".local")
            .join("share")
            .join("albumsync")
            .join("state.json")
    }
}
