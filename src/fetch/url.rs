//! Radar image URL construction.
//!
//! Observed overlays live at `{base}/radar_{TS}_overlay{Q}.png` and
//! forecast overlays at `{forecastBase}/radar_{TS}_forecast_fct{OFFSET}_overlay{Q}.png`,
//! where `TS` is the fixed-width UTC timestamp (`yyyyMMdd_HHmm`, the
//! *source* timestamp for forecasts) and `Q` selects the resolution.

use crate::config::ImageQuality;
use crate::error::FetchError;
use crate::frame::{FrameKey, FrameKind};

/// Builds and validates fetch URLs for frame keys.
#[derive(Debug, Clone)]
pub struct UrlBuilder {
    base_url: String,
    forecast_base_url: String,
    quality: ImageQuality,
}

impl UrlBuilder {
    pub fn new(
        base_url: impl Into<String>,
        forecast_base_url: impl Into<String>,
        quality: ImageQuality,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            forecast_base_url: forecast_base_url.into().trim_end_matches('/').to_string(),
            quality,
        }
    }

    /// The fetch URL for a frame key.
    ///
    /// A target that does not parse as an absolute URL fails fast with
    /// `InvalidTarget`; no network request is ever issued for it.
    pub fn url_for(&self, key: &FrameKey) -> Result<String, FetchError> {
        let url = match key.kind() {
            FrameKind::Observed => format!(
                "{}/radar_{}_overlay{}.png",
                self.base_url,
                key.target().format(),
                self.quality.url_suffix()
            ),
            FrameKind::Forecast { offset_minutes } => format!(
                "{}/radar_{}_forecast_fct{}_overlay{}.png",
                self.forecast_base_url,
                key.source().format(),
                offset_minutes,
                self.quality.url_suffix()
            ),
        };

        reqwest::Url::parse(&url)
            .map_err(|e| FetchError::InvalidTarget(format!("{}: {}", url, e)))?;
        Ok(url)
    }
}
