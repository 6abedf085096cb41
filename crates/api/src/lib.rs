//! Client contract for the Google Photos Library API.
//!
//! This crate defines the types and the [`PhotosClient`] trait the uploader
//! core is written against. Transport implementations (REST, in-process
//! fakes for tests) live elsewhere; keeping the contract separate means the
//! upload logic never sees HTTP, authentication, or raw status codes — only
//! pre-classified [`ApiError`]s.

pub mod client;
pub mod error;
pub mod types;

pub use client::{ApiResult, BoxFuture, PhotosClient};
pub use error::{ApiError, ApiErrorKind};
pub use types::{AlbumPage, CloudAlbum, MediaItem, UploadToken, MAX_ITEMS_PER_BATCH};
