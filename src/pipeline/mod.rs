//! Pipeline Orchestrator
//!
//! Drives fetch rounds (initial load, periodic refresh, retry rounds,
//! forecast follow-up), owns the retry/restart timers and the periodic
//! grid-boundary poll, and reconciles fetch results into frame sequence
//! state. Frame records are mutated only here, behind one state mutex, so
//! the sequence has a single logical owner.

pub mod events;
pub mod status;

pub use events::{EventBus, PipelineEvent};
pub use status::{DisplaySnapshot, FrameStatus};

use crate::cache::CacheStore;
use crate::config::{RadarConfig, ALLOWED_STEP_MINUTES};
use crate::error::{ConfigError, PipelineError};
use crate::fetch::{
    FetchClient, FetchOutcome, FetchResult, FetchStats, FetchStrategy, HttpTransport, UrlBuilder,
};
use crate::frame::{FrameKey, FrameSequence, ImageSource, LoadState};
use crate::timegrid::GridTimestamp;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// What a fetch round is resolving.
#[derive(Debug, Clone)]
enum RoundSpec {
    /// Full observed round: recompute the target timestamp set, rebuild
    /// placeholders, fetch everything not yet loaded.
    Observed { forced: bool },
    /// Re-issue fetches only for previously failed keys.
    Retry { keys: Vec<FrameKey> },
    /// Forecast pass for one observed source timestamp.
    Forecast { source: GridTimestamp, forced: bool },
}

/// Prepared round: keys already marked in-flight under the state lock.
struct RoundPlan {
    generation: u64,
    keys: Vec<FrameKey>,
    strategy: FetchStrategy,
    forced: bool,
}

enum Applied {
    Success,
    Failure,
    Ignored,
}

struct PipelineState {
    sequence: FrameSequence,
    /// Runtime-adjustable radar step (starts at the configured value).
    step_minutes: u32,
    /// Bumped on every cancellation; results stamped with an older
    /// generation are discarded instead of applied.
    cancel_generation: u64,
    last_error: Option<String>,
    /// Re-entrancy guard for the forecast follow-up pass.
    active_forecast_source: Option<GridTimestamp>,
    retry_timer: Option<JoinHandle<()>>,
    restart_timer: Option<JoinHandle<()>>,
    poll_task: Option<JoinHandle<()>>,
    /// Last grid boundary the periodic check acted on.
    last_grid_seen: Option<GridTimestamp>,
}

struct PipelineShared {
    config: RadarConfig,
    fetcher: FetchClient,
    events: EventBus,
    state: Mutex<PipelineState>,
}

/// The radar pipeline. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct RadarPipeline {
    inner: Arc<PipelineShared>,
}

impl RadarPipeline {
    /// Build a pipeline with the production transport and cache store.
    pub fn new(config: RadarConfig) -> Result<Self, PipelineError> {
        config.validate()?;

        let cache_dir = config.cache.resolved_directory()?;
        let cache = CacheStore::open(cache_dir, config.cache.max_size_bytes, config.cache.max_age())?;
        let transport =
            HttpTransport::new(config.fetch.connect_timeout(), config.fetch.request_timeout())
                .map_err(|e| PipelineError::Transport(e.to_string()))?;
        let urls = UrlBuilder::new(&config.base_url, &config.forecast_base_url, config.quality);
        let fetcher = FetchClient::new(Arc::new(transport), cache, urls);

        Ok(Self::with_fetcher(config, fetcher))
    }

    /// Build a pipeline around an existing fetch client. This is the seam
    /// deterministic tests use to script the network.
    pub fn with_fetcher(config: RadarConfig, fetcher: FetchClient) -> Self {
        let step_minutes = config.step_minutes;
        Self {
            inner: Arc::new(PipelineShared {
                config,
                fetcher,
                events: EventBus::default(),
                state: Mutex::new(PipelineState {
                    sequence: FrameSequence::new(),
                    step_minutes,
                    cancel_generation: 0,
                    last_error: None,
                    active_forecast_source: None,
                    retry_timer: None,
                    restart_timer: None,
                    poll_task: None,
                    last_grid_seen: None,
                }),
            }),
        }
    }

    /// Start the periodic grid-boundary poll and kick off the initial
    /// round. Idempotent.
    pub fn start(&self) {
        {
            let mut state = self.inner.state.lock();
            if state.poll_task.is_some() {
                return;
            }
            state.last_grid_seen = Some(self.current_grid(Utc::now(), state.step_minutes));

            let pipeline = self.clone();
            let interval = self.inner.config.poll.check_interval();
            state.poll_task = Some(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                ticker.tick().await; // consume the immediate first tick
                loop {
                    ticker.tick().await;
                    pipeline.check_grid_boundary();
                }
            }));
        }

        info!("Radar pipeline started");
        self.spawn_round(RoundSpec::Observed { forced: false });
    }

    /// Stop the poll, cancel in-flight work, disarm timers. Idempotent.
    pub fn stop(&self) {
        let mut state = self.inner.state.lock();
        if let Some(task) = state.poll_task.take() {
            task.abort();
        }
        self.cancel_locked(&mut state);
        info!("Radar pipeline stopped");
    }

    /// Cancel everything in flight and start a fresh round. A forced
    /// refresh restarts the forecast pass unconditionally, but frames
    /// already loaded are never re-fetched.
    pub fn refresh(&self, forced: bool) {
        {
            let mut state = self.inner.state.lock();
            self.cancel_locked(&mut state);
        }
        self.spawn_round(RoundSpec::Observed { forced });
    }

    /// Change the radar step interval. Cancels in-flight work and starts a
    /// fresh round on the new grid.
    pub fn set_step_minutes(&self, minutes: u32) -> Result<(), ConfigError> {
        if !ALLOWED_STEP_MINUTES.contains(&minutes) {
            return Err(ConfigError::Invalid(format!(
                "step_minutes must be one of {:?}, got {}",
                ALLOWED_STEP_MINUTES, minutes
            )));
        }
        {
            let mut state = self.inner.state.lock();
            if state.step_minutes == minutes {
                return Ok(());
            }
            info!(step_minutes = minutes, "Changing radar step interval");
            state.step_minutes = minutes;
            state.last_grid_seen = Some(self.current_grid(Utc::now(), minutes));
            self.cancel_locked(&mut state);
        }
        self.spawn_round(RoundSpec::Observed { forced: false });
        Ok(())
    }

    /// Cancel all in-flight fetches and armed timers, and reset in-flight
    /// records to `Pending`. Idempotent; with nothing in flight it is a
    /// no-op.
    pub fn cancel_all(&self) {
        let mut state = self.inner.state.lock();
        self.cancel_locked(&mut state);
    }

    /// Snapshot of the current frame for the renderer.
    pub fn snapshot(&self) -> DisplaySnapshot {
        let state = self.inner.state.lock();
        let current = state.sequence.current_record();
        DisplaySnapshot {
            image: current.and_then(|r| r.image().cloned()),
            timestamp: current.map(|r| r.key().target()),
            is_forecast: current.map(|r| r.kind().is_forecast()).unwrap_or(false),
            is_fetching: state.sequence.is_fetching(),
            last_error: state.last_error.clone(),
            loaded_count: state.sequence.loaded_count(),
        }
    }

    /// The loaded view: playable frame keys in display order (observed
    /// newest-first, then the forecast tail by ascending offset).
    pub fn loaded_frames(&self) -> Vec<FrameKey> {
        self.inner.state.lock().sequence.loaded_view().to_vec()
    }

    /// Per-frame statuses, observed newest-first then forecasts by offset.
    pub fn frame_statuses(&self) -> Vec<FrameStatus> {
        let state = self.inner.state.lock();
        let mut statuses: Vec<FrameStatus> = state
            .sequence
            .records()
            .map(|r| FrameStatus {
                key: r.key(),
                state: r.state().clone(),
                attempts: r.attempt_count(),
                error: r.last_error().map(|e| e.to_string()),
            })
            .collect();
        statuses.sort_by(|a, b| {
            let a_fct = a.key.kind().is_forecast();
            let b_fct = b.key.kind().is_forecast();
            a_fct
                .cmp(&b_fct)
                .then_with(|| {
                    if a_fct {
                        a.key.kind().offset_minutes().cmp(&b.key.kind().offset_minutes())
                    } else {
                        b.key.target().cmp(&a.key.target())
                    }
                })
        });
        statuses
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<PipelineEvent> {
        self.inner.events.subscribe()
    }

    pub fn fetch_stats(&self) -> FetchStats {
        self.inner.fetcher.stats()
    }

    /// Move the scrub position; clamped to the loaded view.
    pub fn set_current_index(&self, index: usize) {
        {
            let mut state = self.inner.state.lock();
            state.sequence.set_current_index(index);
        }
        self.inner.events.emit(PipelineEvent::SequenceChanged);
    }

    /// Position for forward playback; `false` when fewer than two frames
    /// are loaded.
    pub fn prepare_animation(&self) -> bool {
        let prepared = {
            let mut state = self.inner.state.lock();
            state.sequence.prepare_animation()
        };
        if prepared {
            self.inner.events.emit(PipelineEvent::SequenceChanged);
        }
        prepared
    }

    /// Advance one playback step; `true` when the driver should stop.
    pub fn advance_frame(&self) -> bool {
        let stop = {
            let mut state = self.inner.state.lock();
            state.sequence.advance_frame()
        };
        self.inner.events.emit(PipelineEvent::SequenceChanged);
        stop
    }

    fn spawn_round(&self, spec: RoundSpec) {
        let pipeline = self.clone();
        tokio::spawn(async move {
            pipeline.run_round(spec).await;
        });
    }

    async fn run_round(&self, spec: RoundSpec) {
        let now = Utc::now();
        let Some(plan) = self.begin_round(&spec, now) else {
            return;
        };
        self.inner.events.emit(PipelineEvent::SequenceChanged);

        let mut succeeded = 0usize;
        let mut failed = 0usize;
        if !plan.keys.is_empty() {
            let mut results = self
                .inner
                .fetcher
                .fetch_many(plan.keys.clone(), plan.strategy);
            while let Some(result) = results.recv().await {
                match self.apply_result(plan.generation, result, plan.forced) {
                    Applied::Success => succeeded += 1,
                    Applied::Failure => failed += 1,
                    Applied::Ignored => {}
                }
            }
        }

        self.finish_round(&plan, succeeded, failed);
    }

    /// Phase 1, under the state lock: compute the key set, mark records
    /// in-flight, stamp the cancellation generation. Returns `None` when
    /// the round has nothing to do (e.g. the forecast re-entrancy guard
    /// trips or every retry key recovered meanwhile).
    fn begin_round(&self, spec: &RoundSpec, now: DateTime<Utc>) -> Option<RoundPlan> {
        let config = &self.inner.config;
        let mut state = self.inner.state.lock();
        let generation = state.cancel_generation;

        match spec {
            RoundSpec::Observed { forced } => {
                let timestamps = GridTimestamp::recent_series(
                    now,
                    state.step_minutes,
                    config.observed_frame_count,
                );
                state
                    .sequence
                    .create_placeholders(&timestamps, &config.forecast_offsets());
                let keys = state.sequence.pending_observed_keys();
                for key in &keys {
                    state.sequence.mark_fetching(key, false, now);
                }
                if let Some(newest) = timestamps.first() {
                    info!(frames = keys.len(), newest = %newest, forced, "Starting observed fetch round");
                }
                Some(RoundPlan {
                    generation,
                    keys,
                    strategy: FetchStrategy::Sequential,
                    forced: *forced,
                })
            }
            RoundSpec::Retry { keys } => {
                let keys: Vec<FrameKey> = keys
                    .iter()
                    .filter(|key| {
                        state
                            .sequence
                            .record(key)
                            .map_or(false, |r| matches!(r.state(), LoadState::Failed { .. }))
                    })
                    .copied()
                    .collect();
                if keys.is_empty() {
                    return None;
                }
                for key in &keys {
                    state.sequence.mark_fetching(key, true, now);
                }
                info!(frames = keys.len(), "Starting retry round");
                Some(RoundPlan {
                    generation,
                    keys,
                    strategy: FetchStrategy::Sequential,
                    forced: false,
                })
            }
            RoundSpec::Forecast { source, forced } => {
                if !*forced && state.active_forecast_source == Some(*source) {
                    debug!(source = %source, "Forecast pass already active for source, skipping");
                    return None;
                }
                state.active_forecast_source = Some(*source);
                let keys = state.sequence.pending_forecast_keys(*source);
                for key in &keys {
                    state.sequence.mark_fetching(key, false, now);
                }
                info!(frames = keys.len(), source = %source, "Starting forecast fetch pass");
                Some(RoundPlan {
                    generation,
                    keys,
                    strategy: FetchStrategy::Parallel {
                        max_concurrent: config.fetch.max_parallel,
                    },
                    forced: *forced,
                })
            }
        }
    }

    /// Apply one streamed result to the matching record. Results from
    /// cancelled rounds and forecast results for a superseded source are
    /// discarded, never applied.
    fn apply_result(&self, generation: u64, result: FetchResult, forced: bool) -> Applied {
        let now = Utc::now();
        let mut state = self.inner.state.lock();

        if state.cancel_generation != generation {
            debug!(frame = %result.key, "Discarding result from cancelled round");
            return Applied::Ignored;
        }
        if result.key.kind().is_forecast()
            && state.active_forecast_source != Some(result.key.source())
        {
            debug!(frame = %result.key, "Discarding forecast result for superseded source");
            return Applied::Ignored;
        }

        match result.outcome {
            FetchOutcome::Success(image) => {
                let provenance = if result.was_from_cache {
                    ImageSource::Cache
                } else {
                    ImageSource::Network
                };
                if state.sequence.apply_success(&result.key, image, provenance, forced, now) {
                    drop(state);
                    self.inner.events.emit(PipelineEvent::SequenceChanged);
                    Applied::Success
                } else {
                    Applied::Ignored
                }
            }
            FetchOutcome::Failure(error) => {
                warn!(frame = %result.key, error = %error, "Frame fetch failed");
                state.sequence.apply_failure(&result.key, error, now);
                drop(state);
                self.inner.events.emit(PipelineEvent::SequenceChanged);
                Applied::Failure
            }
            FetchOutcome::Cancelled => {
                debug!(frame = %result.key, "Frame fetch cancelled, resetting to pending");
                state.sequence.apply_cancelled(&result.key);
                Applied::Ignored
            }
        }
    }

    /// Completion reconciliation: force silent leftovers to `Failed`,
    /// schedule retries or a full restart, and trigger the forecast
    /// follow-up pass.
    fn finish_round(&self, plan: &RoundPlan, succeeded: usize, mut failed: usize) {
        let now = Utc::now();
        let config = &self.inner.config;
        let mut follow_up = None;
        let mut banner = None;

        {
            let mut state = self.inner.state.lock();
            if state.cancel_generation != plan.generation {
                debug!("Round was cancelled before completion, skipping reconciliation");
                return;
            }

            let missing = state.sequence.force_missing_results(now);
            if missing > 0 {
                warn!(missing, "Transport produced no result for some frames");
                failed += missing;
            }

            if succeeded > 0 {
                state.last_error = None;
            }

            let retry_candidates = state.sequence.retry_candidates(&config.fetch);
            let observed_loaded = state.sequence.observed_loaded_count();

            if !retry_candidates.is_empty() {
                self.arm_retry_timer(&mut state, retry_candidates);
            } else if observed_loaded == 0 {
                // Nothing loaded and nothing left to retry: surface the
                // aggregate failure and restart the whole round later.
                let message = "radar fetch failed: no frames could be loaded".to_string();
                state.last_error = Some(message.clone());
                banner = Some(message);
                self.arm_restart_timer(&mut state);
            }

            if !config.forecast_offsets().is_empty() && !state.sequence.any_observed_in_flight() {
                if let Some(source) = state.sequence.newest_loaded_observed() {
                    if state.active_forecast_source != Some(source) {
                        follow_up = Some(RoundSpec::Forecast { source, forced: false });
                    }
                }
            }
        }

        info!(succeeded, failed, "Fetch round completed");
        self.inner
            .events
            .emit(PipelineEvent::RoundCompleted { succeeded, failed });
        if let Some(message) = banner {
            self.inner.events.emit(PipelineEvent::FetchFailed { message });
        }
        if let Some(spec) = follow_up {
            self.spawn_round(spec);
        }
    }

    fn arm_retry_timer(&self, state: &mut PipelineState, keys: Vec<FrameKey>) {
        if let Some(timer) = state.retry_timer.take() {
            timer.abort();
        }
        let delay = self.inner.config.fetch.retry_delay();
        debug!(
            frames = keys.len(),
            delay_secs = delay.as_secs(),
            "Scheduling retry round"
        );
        let pipeline = self.clone();
        state.retry_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            pipeline.run_round(RoundSpec::Retry { keys }).await;
        }));
    }

    fn arm_restart_timer(&self, state: &mut PipelineState) {
        if let Some(timer) = state.restart_timer.take() {
            timer.abort();
        }
        let delay = self.inner.config.fetch.restart_delay();
        warn!(delay_secs = delay.as_secs(), "Scheduling full round restart");
        let pipeline = self.clone();
        state.restart_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            pipeline.run_round(RoundSpec::Observed { forced: false }).await;
        }));
    }

    /// Cancellation, with the state lock held: cancel fetches, disarm
    /// timers, bump the generation so stragglers are discarded, and leave
    /// no record stuck in `Loading`/`Retrying`.
    fn cancel_locked(&self, state: &mut PipelineState) {
        self.inner.fetcher.cancel_all();
        if let Some(timer) = state.retry_timer.take() {
            timer.abort();
        }
        if let Some(timer) = state.restart_timer.take() {
            timer.abort();
        }
        state.cancel_generation += 1;
        state.active_forecast_source = None;
        let reset = state.sequence.reset_in_flight();
        if reset > 0 {
            debug!(reset, "Reset in-flight frames to pending");
            self.inner.events.emit(PipelineEvent::SequenceChanged);
        }
    }

    /// The grid boundary the pipeline should currently be showing: wall
    /// clock minus the server-latency grace window, floored to the grid.
    fn current_grid(&self, now: DateTime<Utc>, step_minutes: u32) -> GridTimestamp {
        let grace = chrono::Duration::seconds(self.inner.config.poll.grace_secs as i64);
        GridTimestamp::from_datetime(now - grace).floor_to_grid(step_minutes)
    }

    /// Periodic check: refresh once wall-clock time crosses a grid
    /// boundary (plus the grace window) without being told to by the UI.
    fn check_grid_boundary(&self) {
        self.check_grid_boundary_at(Utc::now());
    }

    fn check_grid_boundary_at(&self, now: DateTime<Utc>) {
        let crossed = {
            let mut state = self.inner.state.lock();
            let current = self.current_grid(now, state.step_minutes);
            match state.last_grid_seen {
                None => {
                    state.last_grid_seen = Some(current);
                    false
                }
                Some(last) if current > last => {
                    state.last_grid_seen = Some(current);
                    true
                }
                _ => false,
            }
        };

        if crossed {
            info!("Radar grid boundary crossed, starting fresh round");
            self.refresh(false);
        }
    }
}
