//! Integration tests for the fetch client
//!
//! Covers the dedup guarantee (two concurrent callers, one network
//! operation), cache-first behavior across client instances, and
//! cancellation idempotence.

use super::test_utils::{harness, png, test_config, Reply};
use radarloop::fetch::{FetchOutcome, FetchStrategy};
use radarloop::frame::FrameKey;
use std::sync::Arc;
use tokio::sync::Notify;

#[tokio::test]
async fn test_concurrent_fetches_share_one_network_operation() {
    let h = harness(test_config(), Reply::Fail);
    let key = FrameKey::observed(h.observed_series()[0]);
    let url = h.observed_url(key.target());

    let gate = Arc::new(Notify::new());
    h.transport
        .script(&url, Reply::Gated(gate.clone(), png(b"shared")));

    // Two concurrent callers on the same client; the second attaches to
    // the in-flight operation.
    let client = h_fetch_client(&h);
    let task_a = tokio::spawn({
        let client = client.clone();
        async move { client.fetch(key).await }
    });
    let task_b = tokio::spawn({
        let client = client.clone();
        async move { client.fetch(key).await }
    });

    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
    gate.notify_one();

    let a = task_a.await.unwrap();
    let b = task_b.await.unwrap();
    assert!(matches!(a.outcome, FetchOutcome::Success(_)));
    assert!(matches!(b.outcome, FetchOutcome::Success(_)));
    assert_eq!(h.transport.call_count(&url), 1);
}

fn h_fetch_client(h: &super::test_utils::Harness) -> radarloop::fetch::FetchClient {
    radarloop::fetch::FetchClient::new(h.transport.clone(), h.cache.clone(), h.urls.clone())
}

#[tokio::test]
async fn test_cache_hit_survives_client_restart() {
    let h = harness(test_config(), Reply::Fail);
    let key = FrameKey::observed(h.observed_series()[0]);
    let url = h.observed_url(key.target());
    h.transport.script(&url, Reply::Success(png(b"first")));

    // First client fetches over the network and populates the cache.
    let client = h_fetch_client(&h);
    let result = client.fetch(key).await;
    assert!(matches!(result.outcome, FetchOutcome::Success(_)));
    assert!(!result.was_from_cache);

    // A fresh client over the same store answers from cache, no network.
    let restarted = h_fetch_client(&h);
    let result = restarted.fetch(key).await;
    assert!(matches!(result.outcome, FetchOutcome::Success(_)));
    assert!(result.was_from_cache);
    assert_eq!(result.load_time.as_nanos(), 0);
    assert_eq!(h.transport.call_count(&url), 1);
}

#[tokio::test]
async fn test_cancel_all_twice_with_nothing_in_flight_is_a_noop() {
    let h = harness(test_config(), Reply::Fail);
    let client = h_fetch_client(&h);

    client.cancel_all();
    client.cancel_all();
    assert_eq!(client.stats().cancelled, 0);

    // The client still serves requests afterwards.
    let key = FrameKey::observed(h.observed_series()[0]);
    let url = h.observed_url(key.target());
    h.transport.script(&url, Reply::Success(png(b"post-cancel")));
    let result = client.fetch(key).await;
    assert!(matches!(result.outcome, FetchOutcome::Success(_)));
}

#[tokio::test]
async fn test_fetch_many_parallel_matches_results_by_key() {
    let h = harness(test_config(), Reply::Fail);
    let client = h_fetch_client(&h);

    let keys: Vec<FrameKey> = h
        .observed_series()
        .into_iter()
        .map(FrameKey::observed)
        .collect();
    for (i, key) in keys.iter().enumerate() {
        let url = h.observed_url(key.target());
        if i == 1 {
            h.transport.script(&url, Reply::Fail);
        } else {
            h.transport
                .script(&url, Reply::Success(png(key.cache_key().as_bytes())));
        }
    }

    let mut rx = client.fetch_many(keys.clone(), FetchStrategy::Parallel { max_concurrent: 3 });
    let mut results = Vec::new();
    while let Some(result) = rx.recv().await {
        results.push(result);
    }

    assert_eq!(results.len(), keys.len());
    for result in &results {
        match &result.outcome {
            FetchOutcome::Success(image) => {
                // Payload carries the key it was scripted for: results are
                // matched by key, not position.
                assert_eq!(&image[8..], result.key.cache_key().as_bytes());
            }
            FetchOutcome::Failure(_) => assert_eq!(result.key, keys[1]),
            FetchOutcome::Cancelled => panic!("unexpected cancellation"),
        }
    }
}
