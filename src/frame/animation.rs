//! Animation control over the loaded view.
//!
//! A second, layered state machine operating purely on the loaded view.
//! Playback always represents time moving forward: observed history toward
//! the present, then the forecast tail away from it, even though the
//! underlying view array is ordered newest-observed-first followed by
//! ascending forecast offsets.

use super::sequence::FrameSequence;

impl FrameSequence {
    /// Position the sequence for forward playback.
    ///
    /// Fails (returns `false`, no position change) when fewer than two
    /// frames are loaded. When positioned on the last forecast frame,
    /// playback restarts at the first forecast frame; when positioned on
    /// the newest observed frame (index 0), it restarts at the oldest
    /// observed frame. Any other position is kept.
    pub fn prepare_animation(&mut self) -> bool {
        let len = self.loaded_count();
        if len < 2 {
            return false;
        }

        let observed = self.observed_loaded_count();
        let current = self.current_index();

        if current >= observed && current == len - 1 {
            // On the last forecast frame: forward play starts at the
            // earliest forecast.
            self.set_current_index(observed);
        } else if current == 0 && observed > 0 {
            // On the newest observed frame: forward play sweeps
            // newest-ward from the oldest observation.
            self.set_current_index(observed - 1);
        }

        true
    }

    /// Advance one playback step. Returns `true` when the driver should
    /// stop.
    ///
    /// Observed frames advance toward index 0 (newer), then playback
    /// continues into the forecast tail in ascending offset order and stops
    /// on the last forecast frame. Without loaded forecasts, playback stops
    /// on the newest observed frame.
    pub fn advance_frame(&mut self) -> bool {
        let len = self.loaded_count();
        if len == 0 {
            return true;
        }

        let observed = self.observed_loaded_count();
        let current = self.current_index();

        if current < observed {
            if current > 0 {
                self.set_current_index(current - 1);
                // Reaching the newest observed frame ends playback only
                // when there is no forecast tail to continue into.
                return self.current_index() == 0 && observed == len;
            }
            if observed < len {
                self.set_current_index(observed);
                return self.current_index() == len - 1;
            }
            return true;
        }

        if current < len - 1 {
            self.set_current_index(current + 1);
        }
        self.current_index() == len - 1
    }
}
