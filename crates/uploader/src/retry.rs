//! Retry policies.
//!
//! Two independent policy objects, consulted wherever a remote call fails:
//! [`BackoffPolicy`] turns transient failures into bounded, exponentially
//! growing delays, and [`InvalidMediaItemPolicy`] recognizes the
//! `INVALID_ARGUMENT` failures that mark one media item as permanently
//! unacceptable. Neither policy performs any I/O.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use albumsync_api::{ApiError, ApiErrorKind};

use crate::config::UploaderConfig;

/// Exponential backoff schedule for transient failures.
///
/// The consecutive-failure counter is shared across call sites of one run
/// and resets on any success, so a burst of rate limiting slows the whole
/// pipeline down rather than each file independently hammering the service.
#[derive(Debug)]
pub struct BackoffPolicy {
    initial: Duration,
    max: Duration,
    factor: f64,
    budget: u32,
    consecutive: AtomicU32,
}

impl BackoffPolicy {
    pub fn from_config(config: &UploaderConfig) -> Self {
        Self {
            initial: config.initial_backoff,
            max: config.max_backoff,
            factor: config.backoff_factor,
            budget: config.retry_budget,
            consecutive: AtomicU32::new(0),
        }
    }

    /// Registers a transient failure. Returns the delay to wait before the
    /// next attempt, or `None` once the consecutive-failure budget is spent
    /// — at which point the caller must treat the error as fatal.
    ///
    /// Only call this for errors whose kind is
    /// [`ApiErrorKind::Transient`].
    pub fn on_transient_error(&self) -> Option<Duration> {
        let failures = self.consecutive.fetch_add(1, Ordering::SeqCst) + 1;
        if failures > self.budget {
            return None;
        }
        Some(self.delay_for_attempt(failures))
    }

    /// Clears the consecutive-failure counter. Called on every success.
    pub fn reset(&self) {
        self.consecutive.store(0, Ordering::SeqCst);
    }

    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(63) as i32;
        let secs = self.initial.as_secs_f64() * self.factor.powi(exp);
        Duration::from_secs_f64(secs.min(self.max.as_secs_f64()))
    }
}

/// Which remote call of the per-file pipeline failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStage {
    BinaryUpload,
    MediaCreation,
}

/// Recognizes permanent per-item rejections.
#[derive(Debug, Default, Clone, Copy)]
pub struct InvalidMediaItemPolicy;

impl InvalidMediaItemPolicy {
    /// `INVALID_ARGUMENT` from the binary upload or the media-item creation
    /// condemns the item; the same code elsewhere (album operations) does
    /// not go through this policy.
    pub fn is_permanent_item_failure(&self, error: &ApiError, _stage: UploadStage) -> bool {
        error.kind == ApiErrorKind::InvalidArgument
    }
}
