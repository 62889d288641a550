//! Error types for the radar frame pipeline.

use thiserror::Error;

/// Fetch-related errors.
///
/// Cancellation is deliberately absent: a cancelled request is a distinct
/// terminal outcome (`FetchOutcome::Cancelled`), never an error, so it can
/// reset a frame record to `Pending` instead of counting against its retry
/// budget.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// The target URL could not be constructed. Fails fast, no network call,
    /// never retried.
    #[error("invalid fetch target: {0}")]
    InvalidTarget(String),

    /// Timeout, connection failure, or a non-success HTTP status. Retried
    /// per policy.
    #[error("transport failure: {0}")]
    Transport(String),

    /// Bytes were received but are not a valid radar image. Retried per
    /// policy, same bucket as transport failures.
    #[error("response payload is not a valid radar image")]
    Decode,

    /// A fetch round completed without producing any result for a requested
    /// frame. Synthesized by the orchestrator; retried per policy.
    #[error("no result produced for requested frame")]
    MissingResult,
}

impl FetchError {
    /// Whether the retry scheduler may re-issue a fetch after this error.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, FetchError::InvalidTarget(_))
    }
}

/// Cache store errors.
///
/// Missing, expired, and corrupted entries are not errors; they surface as
/// `Ok(None)` from lookups. Only the store infrastructure itself can fail.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cache worker is shut down")]
    Closed,
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("failed to load configuration: {0}")]
    Load(String),
}

/// Pipeline construction errors.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("failed to initialize transport: {0}")]
    Transport(String),
}
