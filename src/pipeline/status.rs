//! Renderer-facing surfaces.
//!
//! The map/overlay renderer only consumes plain values: the current image
//! bytes, its timestamp, whether it is a forecast, and a little fetch
//! status. Snapshots are cheap (the image is shared, not copied).

use crate::frame::{FrameKey, LoadState};
use crate::timegrid::GridTimestamp;
use std::sync::Arc;

/// What the renderer needs to draw the current frame.
#[derive(Debug, Clone, Default)]
pub struct DisplaySnapshot {
    /// Image bytes of the frame at the current scrub position.
    pub image: Option<Arc<Vec<u8>>>,
    /// Display timestamp of the current frame (its target time).
    pub timestamp: Option<GridTimestamp>,
    /// Whether the current frame is a forecast.
    pub is_forecast: bool,
    /// Whether any fetch is outstanding.
    pub is_fetching: bool,
    /// Aggregate error message from the last round, if it failed outright.
    pub last_error: Option<String>,
    /// Number of loaded/playable frames.
    pub loaded_count: usize,
}

/// Per-frame status for UI that lists or inspects individual frames
/// (e.g. surfacing a frame's error when it is tapped).
#[derive(Debug, Clone)]
pub struct FrameStatus {
    pub key: FrameKey,
    pub state: LoadState,
    pub attempts: u32,
    pub error: Option<String>,
}
