//! HTTP transport seam.
//!
//! The fetch client talks to the network through the `FrameTransport` trait
//! so tests can script responses without sockets. The production
//! implementation wraps a shared `reqwest::Client` with the configured
//! connect/request timeouts and forwards the advisory request priority.

use crate::error::FetchError;
use crate::frame::FrameKey;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Advisory request priority.
///
/// Derived from frame kind and age; it maps to the transport's
/// request-priority knob and only influences scheduling under contention,
/// never deduplication or correctness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RequestPriority {
    Lowest,
    Normal,
    Highest,
}

impl RequestPriority {
    /// Priority for a frame: observed frames younger than 5 minutes are
    /// what the user is waiting to see; observed frames younger than 30
    /// minutes and all forecast frames are normal; older history loads
    /// last.
    pub fn for_frame(key: &FrameKey, now: DateTime<Utc>) -> Self {
        if key.kind().is_forecast() {
            return RequestPriority::Normal;
        }
        let age_minutes = key.target().age_minutes(now);
        if age_minutes < 5 {
            RequestPriority::Highest
        } else if age_minutes < 30 {
            RequestPriority::Normal
        } else {
            RequestPriority::Lowest
        }
    }

    /// RFC 9218 `Priority` header value (urgency 0 is highest).
    pub fn header_value(&self) -> &'static str {
        match self {
            RequestPriority::Highest => "u=1",
            RequestPriority::Normal => "u=3",
            RequestPriority::Lowest => "u=6",
        }
    }
}

/// Transport used by the fetch client to retrieve raw image bytes.
#[async_trait]
pub trait FrameTransport: Send + Sync {
    async fn fetch(&self, url: &str, priority: RequestPriority) -> Result<Vec<u8>, FetchError>;
}

/// Production transport over HTTP.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(connect_timeout: Duration, request_timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .build()
            .map_err(|e| FetchError::Transport(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl FrameTransport for HttpTransport {
    async fn fetch(&self, url: &str, priority: RequestPriority) -> Result<Vec<u8>, FetchError> {
        let response = self
            .client
            .get(url)
            .header("priority", priority.header_value())
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Transport(format!(
                "request failed with status {}",
                status
            )));
        }

        let bytes = response.bytes().await.map_err(map_transport_error)?;
        Ok(bytes.to_vec())
    }
}

fn map_transport_error(error: reqwest::Error) -> FetchError {
    if error.is_timeout() {
        FetchError::Transport(format!("request timeout: {}", error))
    } else if error.is_connect() {
        FetchError::Transport(format!("connection error: {}", error))
    } else {
        FetchError::Transport(error.to_string())
    }
}
