//! Shared test utilities for integration tests
//!
//! Provides a scripted transport, a pipeline harness wired to a temporary
//! cache directory, and small helpers for awaiting pipeline state without
//! wall-clock sleeps (tests run on tokio's paused clock).

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use radarloop::cache::CacheStore;
use radarloop::config::RadarConfig;
use radarloop::error::FetchError;
use radarloop::fetch::{FetchClient, FrameTransport, RequestPriority, UrlBuilder};
use radarloop::frame::FrameKey;
use radarloop::pipeline::{PipelineEvent, RadarPipeline};
use radarloop::timegrid::GridTimestamp;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast;
use tokio::sync::Notify;

pub const WEEK: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// A minimal payload that passes the radar image signature check.
pub fn png(payload: &[u8]) -> Vec<u8> {
    let mut bytes = vec![0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
    bytes.extend_from_slice(payload);
    bytes
}

/// Scripted transport reply.
#[derive(Clone)]
pub enum Reply {
    Success(Vec<u8>),
    Fail,
    /// Wait for the gate before succeeding; lets tests hold an operation
    /// in flight deterministically.
    Gated(Arc<Notify>, Vec<u8>),
    /// Never reply; resolves only through cancellation.
    Hang,
}

/// Transport double with per-URL reply queues.
///
/// The last scripted reply for a URL repeats forever once the queue runs
/// down to it; URLs with no script use the default reply.
pub struct MockTransport {
    default_reply: Reply,
    replies: Mutex<HashMap<String, VecDeque<Reply>>>,
    calls: Mutex<Vec<String>>,
}

impl MockTransport {
    pub fn new(default_reply: Reply) -> Self {
        Self {
            default_reply,
            replies: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn script(&self, url: &str, reply: Reply) {
        self.replies
            .lock()
            .entry(url.to_string())
            .or_default()
            .push_back(reply);
    }

    pub fn call_count(&self, url: &str) -> usize {
        self.calls.lock().iter().filter(|c| c.as_str() == url).count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().len()
    }

    fn next_reply(&self, url: &str) -> Reply {
        let mut replies = self.replies.lock();
        match replies.get_mut(url) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
            Some(queue) if queue.len() == 1 => queue.front().unwrap().clone(),
            _ => self.default_reply.clone(),
        }
    }
}

#[async_trait]
impl FrameTransport for MockTransport {
    async fn fetch(&self, url: &str, _priority: RequestPriority) -> Result<Vec<u8>, FetchError> {
        self.calls.lock().push(url.to_string());
        match self.next_reply(url) {
            Reply::Success(bytes) => Ok(bytes),
            Reply::Fail => Err(FetchError::Transport("scripted failure".to_string())),
            Reply::Gated(gate, bytes) => {
                gate.notified().await;
                Ok(bytes)
            }
            Reply::Hang => {
                futures::future::pending::<()>().await;
                unreachable!()
            }
        }
    }
}

/// A fully wired pipeline over a scripted transport and a temp cache dir.
pub struct Harness {
    pub pipeline: RadarPipeline,
    pub transport: Arc<MockTransport>,
    pub cache: CacheStore,
    pub urls: UrlBuilder,
    pub config: RadarConfig,
    _cache_dir: TempDir,
}

/// Small fetch round: three observed frames, two forecast offsets.
pub fn test_config() -> RadarConfig {
    let mut config = RadarConfig::default();
    config.observed_frame_count = 3;
    config.forecast_horizon_minutes = 20;
    config.forecast_step_minutes = 10;
    config
}

pub fn harness(config: RadarConfig, default_reply: Reply) -> Harness {
    let cache_dir = TempDir::new().unwrap();
    let cache = CacheStore::open(
        cache_dir.path().to_path_buf(),
        config.cache.max_size_bytes,
        config.cache.max_age(),
    )
    .unwrap();
    let urls = UrlBuilder::new(&config.base_url, &config.forecast_base_url, config.quality);
    let transport = Arc::new(MockTransport::new(default_reply));
    let fetcher = FetchClient::new(transport.clone(), cache.clone(), urls.clone());
    let pipeline = RadarPipeline::with_fetcher(config.clone(), fetcher);

    Harness {
        pipeline,
        transport,
        cache,
        urls,
        config,
        _cache_dir: cache_dir,
    }
}

impl Harness {
    /// The observed timestamps the next round will target.
    pub fn observed_series(&self) -> Vec<GridTimestamp> {
        GridTimestamp::recent_series(
            Utc::now(),
            self.config.step_minutes,
            self.config.observed_frame_count,
        )
    }

    pub fn observed_url(&self, timestamp: GridTimestamp) -> String {
        self.urls.url_for(&FrameKey::observed(timestamp)).unwrap()
    }

    pub fn forecast_url(&self, source: GridTimestamp, offset: u32) -> String {
        self.urls.url_for(&FrameKey::forecast(source, offset)).unwrap()
    }
}

/// Receive events until the next `RoundCompleted`, returning its counters.
pub async fn next_round_completion(
    rx: &mut broadcast::Receiver<PipelineEvent>,
) -> (usize, usize) {
    loop {
        match rx.recv().await.expect("event bus closed") {
            PipelineEvent::RoundCompleted { succeeded, failed } => return (succeeded, failed),
            _ => {}
        }
    }
}

/// Receive events until the next `FetchFailed`, returning its message.
pub async fn next_fetch_failed(rx: &mut broadcast::Receiver<PipelineEvent>) -> String {
    loop {
        match rx.recv().await.expect("event bus closed") {
            PipelineEvent::FetchFailed { message } => return message,
            _ => {}
        }
    }
}

/// Poll a predicate until it holds. Runs on the paused clock, so the waits
/// are virtual; panics if the condition never becomes true.
pub async fn wait_until<F: Fn() -> bool>(what: &str, predicate: F) {
    for _ in 0..600 {
        if predicate() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("timed out waiting for: {}", what);
}
