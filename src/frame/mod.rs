//! Radar Frames
//!
//! Identity and state for every fetchable radar artifact: the frame key
//! (kind + source + target timestamp), the per-frame loading state machine,
//! and the ordered frame sequence with its derived loaded view.

pub mod animation;
pub mod record;
pub mod sequence;

pub use record::{FrameRecord, ImageSource, LoadState};
pub use sequence::FrameSequence;

use crate::timegrid::GridTimestamp;
use std::fmt;

/// What kind of artifact a frame is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FrameKind {
    /// A radar image of an actual past measurement.
    Observed,
    /// A model-predicted future image, `offset_minutes` ahead of its
    /// observed source frame.
    Forecast { offset_minutes: u32 },
}

impl FrameKind {
    pub fn is_forecast(&self) -> bool {
        matches!(self, FrameKind::Forecast { .. })
    }

    /// Forecast offset in minutes; zero for observed frames.
    pub fn offset_minutes(&self) -> u32 {
        match self {
            FrameKind::Observed => 0,
            FrameKind::Forecast { offset_minutes } => *offset_minutes,
        }
    }
}

/// Identity of a unique fetchable artifact.
///
/// Observed frames have `source == target`; forecast frames pair the source
/// observation with a future target (`source + offset`). Constructors
/// enforce the relationship, so two keys are interchangeable exactly when
/// they name the same artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameKey {
    kind: FrameKind,
    source: GridTimestamp,
    target: GridTimestamp,
}

impl FrameKey {
    pub fn observed(timestamp: GridTimestamp) -> Self {
        Self {
            kind: FrameKind::Observed,
            source: timestamp,
            target: timestamp,
        }
    }

    pub fn forecast(source: GridTimestamp, offset_minutes: u32) -> Self {
        Self {
            kind: FrameKind::Forecast { offset_minutes },
            source,
            target: source.plus_minutes(offset_minutes),
        }
    }

    pub fn kind(&self) -> FrameKind {
        self.kind
    }

    /// The observed measurement this frame derives from.
    pub fn source(&self) -> GridTimestamp {
        self.source
    }

    /// The time this frame depicts.
    pub fn target(&self) -> GridTimestamp {
        self.target
    }

    /// The externally visible cache/string key: `target` for observed
    /// frames, `source-target` for forecast frames.
    pub fn cache_key(&self) -> String {
        match self.kind {
            FrameKind::Observed => self.target.format(),
            FrameKind::Forecast { .. } => {
                format!("{}-{}", self.source.format(), self.target.format())
            }
        }
    }
}

impl fmt::Display for FrameKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.cache_key())
    }
}
