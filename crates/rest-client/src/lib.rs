//! REST transport for the Google Photos Library API.
//!
//! Implements [`albumsync_api::PhotosClient`] over HTTPS with bearer-token
//! authentication. Every transport- or service-level failure is classified
//! into an [`albumsync_api::ApiError`] kind here, at the boundary, so the
//! uploader never inspects status codes or error bodies.

pub mod client;
pub mod model;

pub use client::RestPhotosClient;
