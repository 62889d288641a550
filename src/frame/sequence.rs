//! Frame Sequence
//!
//! The ordered, mutable set of frame records (observed + forecast) plus the
//! derived loaded view used for scrubbing and animation. The sequence has a
//! single logical owner (the pipeline orchestrator); it never performs I/O.

use super::record::{FrameRecord, ImageSource, LoadState};
use super::FrameKey;
use crate::config::FetchConfig;
use crate::error::FetchError;
use crate::timegrid::GridTimestamp;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Ordered collection of frame records with a derived loaded view.
///
/// The loaded view is the subsequence of `Success` records: observed frames
/// sorted newest-first, followed by the forecast frames anchored to the
/// newest loaded observed timestamp, sorted by ascending offset. Index 0
/// always denotes the most recent observed frame.
#[derive(Debug, Default)]
pub struct FrameSequence {
    records: HashMap<FrameKey, FrameRecord>,
    loaded: Vec<FrameKey>,
    current_index: usize,
}

impl FrameSequence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the record set for a new round's target timestamps.
    ///
    /// Existing `Success` records for still-wanted keys are reused verbatim
    /// (never refetched); everything else becomes a fresh `Pending`
    /// placeholder, which is the only point where attempt counts reset.
    /// Records for keys no longer wanted are dropped. Forecast placeholders
    /// are created only for the newest observed timestamp.
    pub fn create_placeholders(
        &mut self,
        observed: &[GridTimestamp],
        forecast_offsets: &[u32],
    ) {
        let mut next = HashMap::with_capacity(observed.len() + forecast_offsets.len());

        for &timestamp in observed {
            let key = FrameKey::observed(timestamp);
            let record = match self.records.remove(&key) {
                Some(existing) if existing.is_success() => existing,
                _ => FrameRecord::new(key),
            };
            next.insert(key, record);
        }

        if let Some(newest) = observed.iter().copied().max() {
            for &offset in forecast_offsets {
                let key = FrameKey::forecast(newest, offset);
                let record = match self.records.remove(&key) {
                    Some(existing) if existing.is_success() => existing,
                    _ => FrameRecord::new(key),
                };
                next.insert(key, record);
            }
        }

        let dropped = self.records.len();
        self.records = next;
        self.rebuild_view();

        debug!(
            records = self.records.len(),
            dropped,
            loaded = self.loaded.len(),
            "Rebuilt frame placeholders"
        );
    }

    pub fn record(&self, key: &FrameKey) -> Option<&FrameRecord> {
        self.records.get(key)
    }

    pub fn records(&self) -> impl Iterator<Item = &FrameRecord> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Observed keys still lacking a `Success` record, newest first. These
    /// are the keys a fetch round must resolve.
    pub fn pending_observed_keys(&self) -> Vec<FrameKey> {
        let mut keys: Vec<FrameKey> = self
            .records
            .values()
            .filter(|r| !r.kind().is_forecast() && !r.is_success())
            .map(|r| r.key())
            .collect();
        keys.sort_by(|a, b| b.target().cmp(&a.target()));
        keys
    }

    /// Forecast keys for `source` still lacking a `Success` record, by
    /// ascending offset.
    pub fn pending_forecast_keys(&self, source: GridTimestamp) -> Vec<FrameKey> {
        let mut keys: Vec<FrameKey> = self
            .records
            .values()
            .filter(|r| r.kind().is_forecast() && r.key().source() == source && !r.is_success())
            .map(|r| r.key())
            .collect();
        keys.sort_by_key(|k| k.kind().offset_minutes());
        keys
    }

    /// Fetch started for `key`: `Pending -> Loading` or, for a retry round,
    /// `Failed -> Retrying`.
    pub fn mark_fetching(&mut self, key: &FrameKey, is_retry: bool, now: DateTime<Utc>) {
        if let Some(record) = self.records.get_mut(key) {
            if is_retry {
                record.mark_retrying(now);
            } else {
                record.mark_loading(now);
            }
        }
    }

    /// Apply a successful result to the exactly-matching record.
    ///
    /// Returns `false` when no record exists for the key or when the record
    /// is already `Success` and the update is not forced; a stale or
    /// duplicate result never silently overwrites a loaded frame.
    pub fn apply_success(
        &mut self,
        key: &FrameKey,
        image: Arc<Vec<u8>>,
        source: ImageSource,
        forced: bool,
        now: DateTime<Utc>,
    ) -> bool {
        let Some(record) = self.records.get_mut(key) else {
            debug!(frame = %key, "Discarding result for unknown frame key");
            return false;
        };
        if record.is_success() && !forced {
            debug!(frame = %key, "Ignoring duplicate result for loaded frame");
            return false;
        }
        record.complete_success(image, source, now);
        self.rebuild_view();
        true
    }

    /// Apply a failed result: `Loading`/`Retrying -> Failed` with an
    /// incremented attempt count and the error stored.
    pub fn apply_failure(&mut self, key: &FrameKey, error: FetchError, now: DateTime<Utc>) {
        if let Some(record) = self.records.get_mut(key) {
            record.complete_failure(error, now);
        }
    }

    /// Apply a cancelled result: back to `Pending`, not an error.
    pub fn apply_cancelled(&mut self, key: &FrameKey) {
        if let Some(record) = self.records.get_mut(key) {
            record.reset_pending();
        }
    }

    /// Force records the transport silently produced no result for into
    /// `Failed`. Called once a round's result stream completes; returns the
    /// number of records forced.
    pub fn force_missing_results(&mut self, now: DateTime<Utc>) -> usize {
        let mut forced = 0;
        for record in self.records.values_mut() {
            if record.is_in_flight() {
                record.complete_failure(FetchError::MissingResult, now);
                forced += 1;
            }
        }
        forced
    }

    /// Failed records that still have retry budget, newest first.
    pub fn retry_candidates(&self, fetch: &FetchConfig) -> Vec<FrameKey> {
        let mut keys: Vec<FrameKey> = self
            .records
            .values()
            .filter(|r| r.should_retry(fetch.max_attempts(r.kind())))
            .map(|r| r.key())
            .collect();
        keys.sort_by(|a, b| b.target().cmp(&a.target()));
        keys
    }

    /// Reset all in-flight records to `Pending` (pipeline cancellation).
    /// Returns the number of records reset; calling with nothing in flight
    /// is a no-op.
    pub fn reset_in_flight(&mut self) -> usize {
        let mut reset = 0;
        for record in self.records.values_mut() {
            if record.is_in_flight() {
                record.reset_pending();
                reset += 1;
            }
        }
        reset
    }

    /// Whether any record has an outstanding fetch.
    pub fn is_fetching(&self) -> bool {
        self.records.values().any(|r| r.is_in_flight())
    }

    /// Whether any observed record has an outstanding fetch.
    pub fn any_observed_in_flight(&self) -> bool {
        self.records
            .values()
            .any(|r| !r.kind().is_forecast() && r.is_in_flight())
    }

    /// The newest observed timestamp with a loaded image, if any.
    pub fn newest_loaded_observed(&self) -> Option<GridTimestamp> {
        self.loaded.first().map(|k| k.target())
    }

    /// Count of loaded observed frames; equals the index where the forecast
    /// segment of the loaded view begins.
    pub fn observed_loaded_count(&self) -> usize {
        self.loaded
            .iter()
            .take_while(|k| !k.kind().is_forecast())
            .count()
    }

    /// The loaded view: playable frame keys in display order.
    pub fn loaded_view(&self) -> &[FrameKey] {
        &self.loaded
    }

    pub fn loaded_count(&self) -> usize {
        self.loaded.len()
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    /// Move the scrub position, clamped to the loaded view.
    pub fn set_current_index(&mut self, index: usize) {
        self.current_index = if self.loaded.is_empty() {
            0
        } else {
            index.min(self.loaded.len() - 1)
        };
    }

    /// The record at the current scrub position.
    pub fn current_record(&self) -> Option<&FrameRecord> {
        self.loaded
            .get(self.current_index)
            .and_then(|key| self.records.get(key))
    }

    /// Count of records currently `Success`.
    pub fn success_count(&self) -> usize {
        self.records.values().filter(|r| r.is_success()).count()
    }

    /// Count of records terminally `Failed` for this round (no retry
    /// budget left).
    pub fn exhausted_failure_count(&self, fetch: &FetchConfig) -> usize {
        self.records
            .values()
            .filter(|r| {
                matches!(r.state(), LoadState::Failed { .. })
                    && !r.should_retry(fetch.max_attempts(r.kind()))
            })
            .count()
    }

    /// Recompute the loaded view after the success set changed.
    ///
    /// The previously displayed frame is restored by key when it survived
    /// the change; otherwise the position resets to 0 (the newest observed
    /// frame). The index is always left inside `[0, len-1]` for a non-empty
    /// view.
    fn rebuild_view(&mut self) {
        let previous = self.loaded.get(self.current_index).copied();

        let mut view: Vec<FrameKey> = self
            .records
            .values()
            .filter(|r| r.is_success() && !r.kind().is_forecast())
            .map(|r| r.key())
            .collect();
        view.sort_by(|a, b| b.target().cmp(&a.target()));

        if let Some(newest) = view.first().map(|k| k.target()) {
            let mut forecast: Vec<FrameKey> = self
                .records
                .values()
                .filter(|r| r.is_success() && r.kind().is_forecast() && r.key().source() == newest)
                .map(|r| r.key())
                .collect();
            forecast.sort_by_key(|k| k.kind().offset_minutes());
            view.extend(forecast);
        }

        self.loaded = view;
        self.current_index = previous
            .and_then(|prev| self.loaded.iter().position(|k| *k == prev))
            .unwrap_or(0);
        if !self.loaded.is_empty() && self.current_index >= self.loaded.len() {
            self.current_index = self.loaded.len() - 1;
        }
    }
}
