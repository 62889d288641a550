//! Per-frame loading state machine.

use super::{FrameKey, FrameKind};
use crate::error::FetchError;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Loading state of a single frame record.
///
/// ```text
/// Pending --(fetch started)--> Loading
/// Loading --(success)--> Success
/// Loading --(failure)--> Failed
/// Loading --(cancelled)--> Pending
/// Failed  --(retry scheduled)--> Retrying
/// Retrying --(success)--> Success
/// Retrying --(failure)--> Failed
/// Retrying --(cancelled)--> Pending
/// Failed  --(no retries remain)--> Failed (terminal)
/// ```
///
/// `Skipped` is a terminal non-error state for frames deliberately excluded
/// from a round; nothing in the normal flow produces it.
#[derive(Debug, Clone)]
pub enum LoadState {
    Pending,
    Loading,
    Retrying { attempt: u32 },
    Success,
    Failed { error: FetchError, attempt: u32 },
    Skipped,
}

/// Equality ignores error identity: two `Failed` states are equal when
/// their attempt counts match, regardless of which error produced them.
impl PartialEq for LoadState {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (LoadState::Pending, LoadState::Pending) => true,
            (LoadState::Loading, LoadState::Loading) => true,
            (LoadState::Success, LoadState::Success) => true,
            (LoadState::Skipped, LoadState::Skipped) => true,
            (LoadState::Retrying { attempt: a }, LoadState::Retrying { attempt: b }) => a == b,
            (LoadState::Failed { attempt: a, .. }, LoadState::Failed { attempt: b, .. }) => a == b,
            _ => false,
        }
    }
}

impl Eq for LoadState {}

/// Where a frame's image bytes came from. Informational only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageSource {
    Cache,
    Network,
}

/// One record per frame key, owned exclusively by the frame sequence.
#[derive(Debug, Clone)]
pub struct FrameRecord {
    key: FrameKey,
    state: LoadState,
    attempt_count: u32,
    image: Option<Arc<Vec<u8>>>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    last_error: Option<FetchError>,
    image_source: Option<ImageSource>,
}

impl FrameRecord {
    pub fn new(key: FrameKey) -> Self {
        Self {
            key,
            state: LoadState::Pending,
            attempt_count: 0,
            image: None,
            started_at: None,
            finished_at: None,
            last_error: None,
            image_source: None,
        }
    }

    pub fn key(&self) -> FrameKey {
        self.key
    }

    pub fn kind(&self) -> FrameKind {
        self.key.kind()
    }

    pub fn state(&self) -> &LoadState {
        &self.state
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Image bytes; present iff the record is `Success`.
    pub fn image(&self) -> Option<&Arc<Vec<u8>>> {
        self.image.as_ref()
    }

    pub fn last_error(&self) -> Option<&FetchError> {
        self.last_error.as_ref()
    }

    pub fn image_source(&self) -> Option<ImageSource> {
        self.image_source
    }

    pub fn is_success(&self) -> bool {
        matches!(self.state, LoadState::Success)
    }

    /// Whether a fetch for this record is currently outstanding.
    pub fn is_in_flight(&self) -> bool {
        matches!(self.state, LoadState::Loading | LoadState::Retrying { .. })
    }

    /// Load duration of the most recent completed attempt.
    pub fn load_duration(&self) -> Option<chrono::Duration> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }

    /// Fetch started: `Pending -> Loading`.
    pub fn mark_loading(&mut self, now: DateTime<Utc>) {
        self.state = LoadState::Loading;
        self.started_at = Some(now);
        self.finished_at = None;
    }

    /// Retry scheduled: `Failed -> Retrying`, carrying the attempt count.
    pub fn mark_retrying(&mut self, now: DateTime<Utc>) {
        self.state = LoadState::Retrying {
            attempt: self.attempt_count,
        };
        self.started_at = Some(now);
        self.finished_at = None;
    }

    /// A matching result arrived with image bytes.
    pub fn complete_success(
        &mut self,
        image: Arc<Vec<u8>>,
        source: ImageSource,
        now: DateTime<Utc>,
    ) {
        self.state = LoadState::Success;
        self.image = Some(image);
        self.image_source = Some(source);
        self.last_error = None;
        self.finished_at = Some(now);
    }

    /// A matching result arrived with an error. Increments the monotonic
    /// attempt count.
    pub fn complete_failure(&mut self, error: FetchError, now: DateTime<Utc>) {
        self.attempt_count += 1;
        self.last_error = Some(error.clone());
        self.state = LoadState::Failed {
            error,
            attempt: self.attempt_count,
        };
        self.finished_at = Some(now);
    }

    /// Cancellation: back to `Pending`. Clears timing bookkeeping and the
    /// last error but keeps the attempt count (it only resets when the
    /// placeholder is force-replaced).
    pub fn reset_pending(&mut self) {
        self.state = LoadState::Pending;
        self.image = None;
        self.image_source = None;
        self.started_at = None;
        self.finished_at = None;
        self.last_error = None;
    }

    /// Deliberate exclusion from a round. Terminal, not an error.
    pub fn skip(&mut self) {
        self.state = LoadState::Skipped;
    }

    /// Whether the retry scheduler may re-issue this record's fetch.
    pub fn should_retry(&self, max_attempts: u32) -> bool {
        match &self.state {
            LoadState::Failed { error, .. } => {
                error.is_retryable() && self.attempt_count < max_attempts
            }
            _ => false,
        }
    }
}
