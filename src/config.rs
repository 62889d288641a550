//! Configuration System
//!
//! Runtime configuration for the radar pipeline: upstream URLs, image
//! quality, grid stepping, forecast horizon, cache limits, retry budgets and
//! timer delays. Supports layered loading (defaults, optional TOML file,
//! environment overrides) with validation.

use crate::error::ConfigError;
use crate::frame::FrameKind;
use crate::logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Radar step intervals the upstream grid supports, in minutes.
pub const ALLOWED_STEP_MINUTES: [u32; 5] = [5, 10, 15, 30, 60];

/// Resolution variant of the fetched overlay images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageQuality {
    /// High-resolution overlay (`2x` filename suffix).
    Best,
    /// Standard-resolution overlay (no suffix).
    Lower,
}

impl ImageQuality {
    /// Filename suffix selecting this resolution on the upstream server.
    pub fn url_suffix(&self) -> &'static str {
        match self {
            ImageQuality::Best => "2x",
            ImageQuality::Lower => "",
        }
    }
}

impl Default for ImageQuality {
    fn default() -> Self {
        ImageQuality::Best
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RadarConfig {
    /// Base URL for observed radar overlays
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Base URL for forecast radar overlays
    #[serde(default = "default_forecast_base_url")]
    pub forecast_base_url: String,

    /// Overlay image resolution
    #[serde(default)]
    pub quality: ImageQuality,

    /// Minutes between observed frames (must be a supported grid step)
    #[serde(default = "default_step_minutes")]
    pub step_minutes: u32,

    /// Number of observed frames per round
    #[serde(default = "default_observed_frame_count")]
    pub observed_frame_count: usize,

    /// How far ahead the forecast tail reaches, in minutes
    #[serde(default = "default_forecast_horizon_minutes")]
    pub forecast_horizon_minutes: u32,

    /// Minutes between forecast offsets
    #[serde(default = "default_forecast_step_minutes")]
    pub forecast_step_minutes: u32,

    /// Cache store settings
    #[serde(default)]
    pub cache: CacheConfig,

    /// Fetch client settings
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Periodic grid-boundary polling settings
    #[serde(default)]
    pub poll: PollConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_base_url() -> String {
    "https://img.radar.example.com/obs".to_string()
}

fn default_forecast_base_url() -> String {
    "https://img.radar.example.com/forecast".to_string()
}

fn default_step_minutes() -> u32 {
    5
}

fn default_observed_frame_count() -> usize {
    12
}

fn default_forecast_horizon_minutes() -> u32 {
    60
}

fn default_forecast_step_minutes() -> u32 {
    10
}

impl Default for RadarConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            forecast_base_url: default_forecast_base_url(),
            quality: ImageQuality::default(),
            step_minutes: default_step_minutes(),
            observed_frame_count: default_observed_frame_count(),
            forecast_horizon_minutes: default_forecast_horizon_minutes(),
            forecast_step_minutes: default_forecast_step_minutes(),
            cache: CacheConfig::default(),
            fetch: FetchConfig::default(),
            poll: PollConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Cache store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Cache directory. When unset, resolves under the platform cache dir.
    pub directory: Option<PathBuf>,

    /// Size budget for the cache directory, in bytes
    #[serde(default = "default_cache_max_size_bytes")]
    pub max_size_bytes: u64,

    /// Entry expiry age, in days
    #[serde(default = "default_cache_max_age_days")]
    pub max_age_days: u64,
}

fn default_cache_max_size_bytes() -> u64 {
    50 * 1024 * 1024 // 50 MB
}

fn default_cache_max_age_days() -> u64 {
    7
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            directory: None,
            max_size_bytes: default_cache_max_size_bytes(),
            max_age_days: default_cache_max_age_days(),
        }
    }
}

impl CacheConfig {
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_days * 24 * 60 * 60)
    }

    /// The configured directory, or the platform cache location.
    pub fn resolved_directory(&self) -> Result<PathBuf, ConfigError> {
        if let Some(dir) = &self.directory {
            return Ok(dir.clone());
        }
        directories::ProjectDirs::from("com", "radarloop", "radarloop")
            .map(|dirs| dirs.cache_dir().join("frames"))
            .ok_or_else(|| {
                ConfigError::Invalid("no home directory to place the cache under".to_string())
            })
    }
}

/// Fetch client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Per-request timeout, in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Connection establishment timeout, in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Concurrency bound for the parallel fetch strategy
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,

    /// Attempt budget for observed frames
    #[serde(default = "default_observed_max_attempts")]
    pub observed_max_attempts: u32,

    /// Attempt budget for forecast frames
    #[serde(default = "default_forecast_max_attempts")]
    pub forecast_max_attempts: u32,

    /// Delay before re-issuing failed frames, in seconds
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,

    /// Delay before restarting a round that produced no successes, in seconds
    #[serde(default = "default_restart_delay_secs")]
    pub restart_delay_secs: u64,
}

fn default_request_timeout_secs() -> u64 {
    25
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_max_parallel() -> usize {
    4
}

fn default_observed_max_attempts() -> u32 {
    5
}

fn default_forecast_max_attempts() -> u32 {
    10
}

fn default_retry_delay_secs() -> u64 {
    5
}

fn default_restart_delay_secs() -> u64 {
    10
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            max_parallel: default_max_parallel(),
            observed_max_attempts: default_observed_max_attempts(),
            forecast_max_attempts: default_forecast_max_attempts(),
            retry_delay_secs: default_retry_delay_secs(),
            restart_delay_secs: default_restart_delay_secs(),
        }
    }
}

impl FetchConfig {
    /// Attempt budget for a frame kind. Forecast frames carry a larger
    /// budget reflecting their lower urgency and longer retry cadence.
    pub fn max_attempts(&self, kind: FrameKind) -> u32 {
        match kind {
            FrameKind::Observed => self.observed_max_attempts,
            FrameKind::Forecast { .. } => self.forecast_max_attempts,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_secs(self.restart_delay_secs)
    }
}

/// Periodic grid-boundary polling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    /// How often to check whether a grid boundary was crossed, in seconds
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,

    /// Server-latency grace window after a grid boundary, in seconds
    #[serde(default = "default_grace_secs")]
    pub grace_secs: u64,
}

fn default_check_interval_secs() -> u64 {
    10
}

fn default_grace_secs() -> u64 {
    90
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: default_check_interval_secs(),
            grace_secs: default_grace_secs(),
        }
    }
}

impl PollConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }
}

impl RadarConfig {
    /// Load configuration: defaults, then an optional TOML file, then
    /// environment variables with the `RADARLOOP_` prefix (nested fields
    /// separated by `__`, e.g. `RADARLOOP_FETCH__RETRY_DELAY_SECS`).
    pub fn load(file: Option<&std::path::Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder().add_source(
            config::Config::try_from(&RadarConfig::default())
                .map_err(|e| ConfigError::Load(e.to_string()))?,
        );

        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("RADARLOOP")
                .separator("__")
                .try_parsing(true),
        );

        let loaded: RadarConfig = builder
            .build()
            .map_err(|e| ConfigError::Load(e.to_string()))?
            .try_deserialize()
            .map_err(|e| ConfigError::Load(e.to_string()))?;

        loaded.validate()?;
        Ok(loaded)
    }

    /// Write the effective configuration as a TOML file, e.g. to seed a
    /// user-editable config from the defaults.
    pub fn save_to(&self, path: &std::path::Path) -> Result<(), ConfigError> {
        let rendered = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::Invalid(format!("failed to render config: {}", e)))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ConfigError::Load(format!("failed to create {:?}: {}", parent, e)))?;
        }
        std::fs::write(path, rendered)
            .map_err(|e| ConfigError::Load(format!("failed to write {:?}: {}", path, e)))
    }

    /// Validate the configuration, collecting every problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if self.base_url.trim().is_empty() {
            errors.push("base_url cannot be empty".to_string());
        }
        if self.forecast_base_url.trim().is_empty() {
            errors.push("forecast_base_url cannot be empty".to_string());
        }
        if !ALLOWED_STEP_MINUTES.contains(&self.step_minutes) {
            errors.push(format!(
                "step_minutes must be one of {:?}, got {}",
                ALLOWED_STEP_MINUTES, self.step_minutes
            ));
        }
        if self.observed_frame_count == 0 {
            errors.push("observed_frame_count must be at least 1".to_string());
        }
        if self.forecast_step_minutes == 0 {
            errors.push("forecast_step_minutes must be at least 1".to_string());
        } else if self.forecast_horizon_minutes != 0
            && self.forecast_horizon_minutes < self.forecast_step_minutes
        {
            errors.push(format!(
                "forecast_horizon_minutes ({}) is shorter than one forecast step ({})",
                self.forecast_horizon_minutes, self.forecast_step_minutes
            ));
        }
        if self.fetch.observed_max_attempts == 0 || self.fetch.forecast_max_attempts == 0 {
            errors.push("attempt budgets must be at least 1".to_string());
        }
        if self.fetch.max_parallel == 0 {
            errors.push("fetch.max_parallel must be at least 1".to_string());
        }
        if self.cache.max_size_bytes == 0 {
            errors.push("cache.max_size_bytes must be non-zero".to_string());
        }
        if self.poll.check_interval_secs == 0 {
            errors.push("poll.check_interval_secs must be non-zero".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(errors.join("; ")))
        }
    }

    /// Forecast offsets in minutes: one per forecast step up to the
    /// horizon. Empty when the horizon is zero (forecast tail disabled).
    pub fn forecast_offsets(&self) -> Vec<u32> {
        let step = self.forecast_step_minutes.max(1);
        (1..=self.forecast_horizon_minutes / step)
            .map(|i| i * step)
            .collect()
    }
}
