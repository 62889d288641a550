//! Radar-grid timestamps.
//!
//! The upstream radar source publishes observed frames on fixed
//! minute-aligned boundaries ("radar grid time") and names every artifact
//! with a fixed-width UTC timestamp segment (`yyyyMMdd_HHmm`). This module
//! owns that representation: minute-precision UTC timestamps, the canonical
//! string format, filename extraction, grid flooring and stepping.

use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Timestamp string format used in radar image filenames and cache keys.
const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M";

/// Length of a formatted timestamp: 8 date digits, underscore, 4 time digits.
const TIMESTAMP_LEN: usize = 13;

/// A UTC timestamp truncated to minute precision.
///
/// All frame identity and ordering in the pipeline happens at minute
/// granularity; constructing a `GridTimestamp` drops seconds and
/// sub-seconds so equality and hashing are well-defined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GridTimestamp(DateTime<Utc>);

impl GridTimestamp {
    /// Create from an arbitrary UTC datetime, truncating to the minute.
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        let excess_secs = dt.timestamp().rem_euclid(60);
        let truncated = dt
            - Duration::seconds(excess_secs)
            - Duration::nanoseconds(i64::from(dt.timestamp_subsec_nanos()));
        Self(truncated)
    }

    /// The current wall-clock minute.
    pub fn now() -> Self {
        Self::from_datetime(Utc::now())
    }

    /// Parse a strict `yyyyMMdd_HHmm` string.
    pub fn parse(s: &str) -> Option<Self> {
        if s.len() != TIMESTAMP_LEN {
            return None;
        }
        NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT)
            .ok()
            .map(|naive| Self(Utc.from_utc_datetime(&naive)))
    }

    /// Extract the canonical timestamp from an arbitrary string.
    ///
    /// Any segment matching eight digits, an underscore, and four digits is
    /// the canonical timestamp of a radar filename; the first segment that
    /// also parses as a valid datetime wins.
    pub fn extract(s: &str) -> Option<Self> {
        let bytes = s.as_bytes();
        if bytes.len() < TIMESTAMP_LEN {
            return None;
        }
        for start in 0..=(bytes.len() - TIMESTAMP_LEN) {
            let window = &bytes[start..start + TIMESTAMP_LEN];
            let shape_ok = window[..8].iter().all(u8::is_ascii_digit)
                && window[8] == b'_'
                && window[9..].iter().all(u8::is_ascii_digit);
            if !shape_ok {
                continue;
            }
            // Window is ASCII digits and an underscore, always valid UTF-8.
            if let Some(ts) = Self::parse(std::str::from_utf8(window).ok()?) {
                return Some(ts);
            }
        }
        None
    }

    /// Format as the canonical `yyyyMMdd_HHmm` string.
    pub fn format(&self) -> String {
        self.0.format(TIMESTAMP_FORMAT).to_string()
    }

    /// Round down to the nearest grid boundary (`step_minutes` aligned).
    pub fn floor_to_grid(&self, step_minutes: u32) -> Self {
        let step = i64::from(step_minutes.max(1)) * 60;
        let excess = self.0.timestamp().rem_euclid(step);
        Self(self.0 - Duration::seconds(excess))
    }

    pub fn plus_minutes(&self, minutes: u32) -> Self {
        Self(self.0 + Duration::minutes(i64::from(minutes)))
    }

    pub fn minus_minutes(&self, minutes: u32) -> Self {
        Self(self.0 - Duration::minutes(i64::from(minutes)))
    }

    /// Minutes elapsed from `self` to `now`. Negative for future timestamps.
    pub fn age_minutes(&self, now: DateTime<Utc>) -> i64 {
        (now - self.0).num_minutes()
    }

    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }

    /// The `count` most recent grid times at or before `now`, newest first,
    /// stepping backward by `step_minutes`.
    pub fn recent_series(now: DateTime<Utc>, step_minutes: u32, count: usize) -> Vec<Self> {
        let newest = Self::from_datetime(now).floor_to_grid(step_minutes);
        (0..count)
            .map(|i| newest.minus_minutes(step_minutes * i as u32))
            .collect()
    }
}

impl fmt::Display for GridTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format())
    }
}
