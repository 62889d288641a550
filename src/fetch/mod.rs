//! Fetch Client
//!
//! Deduplicating, prioritized, cancellable fetch layer for radar frames.
//! Consults the cache store before touching the network, writes fetched
//! bytes back on success, and emits one terminal result per requested key.
//!
//! Concurrent requests for the same frame key attach to the single
//! in-flight operation instead of issuing a second network call; the
//! in-flight map is the only structure with concurrent writers and each
//! entry is removed exactly once, on completion (success, failure, or
//! cancellation).

pub mod transport;
pub mod url;

pub use transport::{FrameTransport, HttpTransport, RequestPriority};
pub use url::UrlBuilder;

use crate::cache::{is_valid_radar_image, CacheStore};
use crate::error::FetchError;
use crate::frame::FrameKey;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot, watch, Semaphore};
use tracing::{debug, warn};

/// Strategy for resolving a batch of frame keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStrategy {
    /// At most one request in flight; results arrive in request order.
    /// Used for observed frames so the newest frame always lands first.
    Sequential,
    /// Bounded concurrent fan-out; results arrive in completion order.
    Parallel { max_concurrent: usize },
}

/// Terminal outcome of one frame fetch.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    Success(Arc<Vec<u8>>),
    Failure(FetchError),
    /// The request was cancelled. Distinct from failure so the frame state
    /// machine can reset to `Pending` without spending retry budget.
    Cancelled,
}

/// One result per requested frame key.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub key: FrameKey,
    pub outcome: FetchOutcome,
    pub load_time: Duration,
    pub was_from_cache: bool,
}

impl FetchResult {
    fn cache_hit(key: FrameKey, bytes: Vec<u8>) -> Self {
        Self {
            key,
            outcome: FetchOutcome::Success(Arc::new(bytes)),
            load_time: Duration::ZERO,
            was_from_cache: true,
        }
    }
}

/// Fetch accounting. `requested` counts every caller (deduplicated callers
/// included); the completion counters count operations.
#[derive(Debug, Clone, Default)]
pub struct FetchStats {
    pub requested: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub cache_hits: u64,
}

struct InFlightEntry {
    waiters: Vec<oneshot::Sender<FetchResult>>,
}

struct ClientInner {
    transport: Arc<dyn FrameTransport>,
    cache: CacheStore,
    urls: UrlBuilder,
    in_flight: Mutex<HashMap<FrameKey, InFlightEntry>>,
    /// Cancellation generation. Bumping it resolves every in-flight
    /// operation with `Cancelled`.
    cancel: watch::Sender<u64>,
    stats: Mutex<FetchStats>,
}

/// Deduplicating fetch client. Cheap to clone; clones share the in-flight
/// map, cache, and cancellation generation.
#[derive(Clone)]
pub struct FetchClient {
    inner: Arc<ClientInner>,
}

impl FetchClient {
    pub fn new(transport: Arc<dyn FrameTransport>, cache: CacheStore, urls: UrlBuilder) -> Self {
        let (cancel, _) = watch::channel(0u64);
        Self {
            inner: Arc::new(ClientInner {
                transport,
                cache,
                urls,
                in_flight: Mutex::new(HashMap::new()),
                cancel,
                stats: Mutex::new(FetchStats::default()),
            }),
        }
    }

    /// Resolve a single frame, deduplicating against in-flight requests.
    pub async fn fetch(&self, key: FrameKey) -> FetchResult {
        self.inner.stats.lock().requested += 1;

        // Cache-first: a hit completes immediately and never touches the
        // in-flight map.
        match self.inner.cache.get(&key).await {
            Ok(Some(bytes)) => {
                debug!(frame = %key, "Cache hit");
                let mut stats = self.inner.stats.lock();
                stats.cache_hits += 1;
                stats.succeeded += 1;
                return FetchResult::cache_hit(key, bytes);
            }
            Ok(None) => {}
            Err(e) => {
                // An unreadable cache is a miss, not a fetch failure.
                warn!(frame = %key, error = %e, "Cache lookup failed, fetching from network");
            }
        }

        let generation = *self.inner.cancel.borrow();
        let (tx, rx) = oneshot::channel();
        let spawn_op = {
            let mut in_flight = self.inner.in_flight.lock();
            match in_flight.entry(key) {
                Entry::Occupied(mut entry) => {
                    debug!(frame = %key, "Attaching to in-flight request");
                    entry.get_mut().waiters.push(tx);
                    false
                }
                Entry::Vacant(entry) => {
                    entry.insert(InFlightEntry { waiters: vec![tx] });
                    true
                }
            }
        };

        if spawn_op {
            let client = self.clone();
            tokio::spawn(async move {
                let result = client.run_operation(key, generation).await;
                client.complete(key, result);
            });
        }

        match rx.await {
            Ok(result) => result,
            // The operation task disappeared without completing; treat as
            // cancellation rather than inventing a failure.
            Err(_) => FetchResult {
                key,
                outcome: FetchOutcome::Cancelled,
                load_time: Duration::ZERO,
                was_from_cache: false,
            },
        }
    }

    /// Resolve many frames, streaming one result per key in completion
    /// order. The receiver ends once every key has a result.
    pub fn fetch_many(
        &self,
        keys: Vec<FrameKey>,
        strategy: FetchStrategy,
    ) -> mpsc::Receiver<FetchResult> {
        let (tx, rx) = mpsc::channel(keys.len().max(1));
        debug!(count = keys.len(), ?strategy, "Starting fetch batch");

        match strategy {
            FetchStrategy::Sequential => {
                let client = self.clone();
                tokio::spawn(async move {
                    for key in keys {
                        let result = client.fetch(key).await;
                        if tx.send(result).await.is_err() {
                            break;
                        }
                    }
                });
            }
            FetchStrategy::Parallel { max_concurrent } => {
                let client = self.clone();
                tokio::spawn(async move {
                    let semaphore = Arc::new(Semaphore::new(max_concurrent.max(1)));
                    let mut handles = Vec::with_capacity(keys.len());
                    for key in keys {
                        let client = client.clone();
                        let tx = tx.clone();
                        let semaphore = Arc::clone(&semaphore);
                        handles.push(tokio::spawn(async move {
                            let Ok(_permit) = semaphore.acquire_owned().await else {
                                return;
                            };
                            let result = client.fetch(key).await;
                            let _ = tx.send(result).await;
                        }));
                    }
                    futures::future::join_all(handles).await;
                });
            }
        }

        rx
    }

    /// Cancel every in-flight operation. Idempotent; cancelling with
    /// nothing in flight is a no-op.
    pub fn cancel_all(&self) {
        let in_flight = self.inner.in_flight.lock().len();
        if in_flight > 0 {
            debug!(in_flight, "Cancelling in-flight fetches");
        }
        self.inner.cancel.send_modify(|generation| *generation += 1);
    }

    pub fn stats(&self) -> FetchStats {
        self.inner.stats.lock().clone()
    }

    /// The network half of one operation: build the URL, race the transport
    /// against cancellation, validate and cache the payload.
    async fn run_operation(&self, key: FrameKey, generation: u64) -> FetchResult {
        let start = Instant::now();

        let url = match self.inner.urls.url_for(&key) {
            Ok(url) => url,
            Err(e) => {
                return FetchResult {
                    key,
                    outcome: FetchOutcome::Failure(e),
                    load_time: start.elapsed(),
                    was_from_cache: false,
                }
            }
        };

        let priority = RequestPriority::for_frame(&key, Utc::now());
        let mut cancelled = self.inner.cancel.subscribe();

        let outcome = tokio::select! {
            result = self.inner.transport.fetch(&url, priority) => match result {
                Ok(bytes) if is_valid_radar_image(&bytes) => {
                    let image = Arc::new(bytes);
                    // Best-effort write-back; a cache failure never fails
                    // the fetch.
                    if let Err(e) = self.inner.cache.put(&key, image.as_ref().clone()).await {
                        warn!(frame = %key, error = %e, "Failed to cache fetched image");
                    }
                    FetchOutcome::Success(image)
                }
                Ok(_) => FetchOutcome::Failure(FetchError::Decode),
                Err(e) => FetchOutcome::Failure(e),
            },
            _ = wait_cancelled(&mut cancelled, generation) => FetchOutcome::Cancelled,
        };

        FetchResult {
            key,
            outcome,
            load_time: start.elapsed(),
            was_from_cache: false,
        }
    }

    /// Remove the in-flight entry (exactly once) and fan the result out to
    /// every waiter.
    fn complete(&self, key: FrameKey, result: FetchResult) {
        let waiters = self
            .inner
            .in_flight
            .lock()
            .remove(&key)
            .map(|entry| entry.waiters)
            .unwrap_or_default();

        {
            let mut stats = self.inner.stats.lock();
            match &result.outcome {
                FetchOutcome::Success(_) => stats.succeeded += 1,
                FetchOutcome::Failure(_) => stats.failed += 1,
                FetchOutcome::Cancelled => stats.cancelled += 1,
            }
        }

        match &result.outcome {
            FetchOutcome::Success(image) => {
                let elapsed_ms = result.load_time.as_millis() as u64;
                debug!(frame = %result.key, bytes = image.len(), elapsed_ms, "Fetch succeeded");
            }
            FetchOutcome::Failure(e) => {
                debug!(frame = %result.key, error = %e, "Fetch failed");
            }
            FetchOutcome::Cancelled => {
                debug!(frame = %result.key, "Fetch cancelled");
            }
        }

        for tx in waiters {
            let _ = tx.send(result.clone());
        }
    }
}

/// Resolves once `cancel_all` bumps the generation past the value captured
/// when the operation started. Never resolves if cancellation cannot
/// happen anymore.
async fn wait_cancelled(rx: &mut watch::Receiver<u64>, since: u64) {
    if rx.wait_for(|generation| *generation > since).await.is_err() {
        futures::future::pending::<()>().await;
    }
}
