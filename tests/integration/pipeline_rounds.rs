//! Integration tests for the pipeline orchestrator
//!
//! End-to-end round scenarios over a scripted transport: happy-path
//! loading with the forecast follow-up, retry scheduling and its attempt
//! bound, reuse of loaded frames across rounds, the zero-success restart,
//! full cancellation, and animation traversal. Tests run on tokio's
//! paused clock, so retry and restart delays elapse virtually.

use super::test_utils::{
    harness, next_fetch_failed, next_round_completion, png, test_config, wait_until, Reply,
};
use radarloop::frame::{FrameKey, LoadState};
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn test_round_loads_all_frames_then_forecast_tail() {
    let h = harness(test_config(), Reply::Success(png(b"frame")));
    let mut events = h.pipeline.subscribe();
    let series = h.observed_series();

    h.pipeline.refresh(false);
    assert_eq!(next_round_completion(&mut events).await, (3, 0));
    // Forecast follow-up for the newest observation.
    assert_eq!(next_round_completion(&mut events).await, (2, 0));

    let expected: Vec<FrameKey> = series
        .iter()
        .map(|t| FrameKey::observed(*t))
        .chain([10u32, 20].iter().map(|o| FrameKey::forecast(series[0], *o)))
        .collect();
    assert_eq!(h.pipeline.loaded_frames(), expected);

    // Every record ended in Success.
    assert!(h
        .pipeline
        .frame_statuses()
        .iter()
        .all(|status| matches!(status.state, LoadState::Success)));

    let snapshot = h.pipeline.snapshot();
    assert!(snapshot.image.is_some());
    assert_eq!(snapshot.timestamp, Some(series[0]));
    assert!(!snapshot.is_forecast);
    assert!(!snapshot.is_fetching);
    assert_eq!(snapshot.loaded_count, 5);
    assert!(snapshot.last_error.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_failed_frame_is_retried_and_excluded_from_loaded_view() {
    let mut config = test_config();
    config.forecast_horizon_minutes = 0;
    let h = harness(config, Reply::Success(png(b"ok")));
    let series = h.observed_series();
    let oldest = FrameKey::observed(series[2]);

    // Oldest frame fails once, then its retry attempt stays in flight.
    let failing_url = h.observed_url(series[2]);
    h.transport.script(&failing_url, Reply::Fail);
    h.transport.script(&failing_url, Reply::Hang);

    let mut events = h.pipeline.subscribe();
    h.pipeline.refresh(false);
    assert_eq!(next_round_completion(&mut events).await, (2, 1));

    // The retry timer fires and moves the frame Failed -> Retrying.
    wait_until("failed frame enters retrying", || {
        h.pipeline.frame_statuses().iter().any(|status| {
            status.key == oldest && matches!(status.state, LoadState::Retrying { attempt: 1 })
        })
    })
    .await;

    // The loaded view holds exactly the two successes, newest first, and
    // the scrub position sits on the newest frame.
    assert_eq!(
        h.pipeline.loaded_frames(),
        vec![FrameKey::observed(series[0]), FrameKey::observed(series[1])]
    );
    let snapshot = h.pipeline.snapshot();
    assert_eq!(snapshot.timestamp, Some(series[0]));
    assert_eq!(snapshot.loaded_count, 2);
    assert!(snapshot.is_fetching);
}

#[tokio::test(start_paused = true)]
async fn test_retry_stops_once_attempt_budget_is_exhausted() {
    let mut config = test_config();
    config.forecast_horizon_minutes = 0;
    config.fetch.observed_max_attempts = 2;
    let h = harness(config, Reply::Success(png(b"ok")));
    let series = h.observed_series();
    let oldest = FrameKey::observed(series[2]);

    let failing_url = h.observed_url(series[2]);
    h.transport.script(&failing_url, Reply::Fail); // repeats forever

    let mut events = h.pipeline.subscribe();
    h.pipeline.refresh(false);
    assert_eq!(next_round_completion(&mut events).await, (2, 1));
    // The scheduled retry round fails again, exhausting the budget.
    assert_eq!(next_round_completion(&mut events).await, (0, 1));

    wait_until("frame reaches terminal failure", || {
        h.pipeline.frame_statuses().iter().any(|status| {
            status.key == oldest
                && matches!(status.state, LoadState::Failed { attempt: 2, .. })
        })
    })
    .await;

    // No further attempts happen, even as time keeps passing.
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(h.transport.call_count(&failing_url), 2);

    // Two observed frames loaded, so no full restart is scheduled.
    assert!(h.pipeline.snapshot().last_error.is_none());
    let status = h
        .pipeline
        .frame_statuses()
        .into_iter()
        .find(|s| s.key == oldest)
        .unwrap();
    assert_eq!(status.attempts, 2);
    assert!(status.error.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_identical_round_rerun_reuses_loaded_frames() {
    let h = harness(test_config(), Reply::Success(png(b"frame")));
    let mut events = h.pipeline.subscribe();
    let series = h.observed_series();

    h.pipeline.refresh(false);
    assert_eq!(next_round_completion(&mut events).await, (3, 0));
    assert_eq!(next_round_completion(&mut events).await, (2, 0));
    let calls_after_first = h.transport.total_calls();
    assert_eq!(calls_after_first, 5);

    // Identical round re-run: every record is reused verbatim, nothing is
    // fetched again.
    h.pipeline.refresh(false);
    assert_eq!(next_round_completion(&mut events).await, (0, 0));

    assert_eq!(h.transport.total_calls(), calls_after_first);
    assert_eq!(h.transport.call_count(&h.observed_url(series[2])), 1);
    assert_eq!(h.pipeline.loaded_frames().len(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_zero_success_round_surfaces_error_and_restarts() {
    let mut config = test_config();
    config.forecast_horizon_minutes = 0;
    config.fetch.observed_max_attempts = 1;
    let h = harness(config, Reply::Fail);

    let mut events = h.pipeline.subscribe();
    h.pipeline.refresh(false);

    assert_eq!(next_round_completion(&mut events).await, (0, 3));
    let message = next_fetch_failed(&mut events).await;
    assert!(message.contains("radar fetch failed"));
    assert!(h.pipeline.snapshot().last_error.is_some());
    assert_eq!(h.pipeline.loaded_frames().len(), 0);

    // The restart timer re-runs the entire round from scratch.
    assert_eq!(next_round_completion(&mut events).await, (0, 3));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_all_leaves_no_frame_in_flight() {
    let h = harness(test_config(), Reply::Hang);
    h.pipeline.refresh(false);
    wait_until("round in flight", || h.pipeline.snapshot().is_fetching).await;

    h.pipeline.cancel_all();
    h.pipeline.cancel_all(); // idempotent

    assert!(!h.pipeline.snapshot().is_fetching);
    assert!(h
        .pipeline
        .frame_statuses()
        .iter()
        .all(|status| matches!(status.state, LoadState::Pending)));

    wait_until("in-flight operation resolves as cancelled", || {
        h.pipeline.fetch_stats().cancelled >= 1
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_animation_traverses_history_then_forecast() {
    let h = harness(test_config(), Reply::Success(png(b"frame")));
    let mut events = h.pipeline.subscribe();
    let series = h.observed_series();

    h.pipeline.refresh(false);
    assert_eq!(next_round_completion(&mut events).await, (3, 0));
    assert_eq!(next_round_completion(&mut events).await, (2, 0));

    // Positioned on the newest observed frame; playback starts from the
    // oldest observation.
    assert!(h.pipeline.prepare_animation());
    let mut visited = vec![h.pipeline.snapshot().timestamp.unwrap()];
    loop {
        let stop = h.pipeline.advance_frame();
        visited.push(h.pipeline.snapshot().timestamp.unwrap());
        if stop {
            break;
        }
    }

    let expected = vec![
        series[2],
        series[1],
        series[0],
        series[0].plus_minutes(10),
        series[0].plus_minutes(20),
    ];
    assert_eq!(visited, expected);
    assert!(h.pipeline.snapshot().is_forecast);
}
