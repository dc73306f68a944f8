//! Static engine configuration.
//!
//! A `SyncConfig` is built once by the host and handed to each component at
//! construction. User-adjustable values live in [`crate::settings`] instead.

use std::str::FromStr;
use std::time::Duration;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};
use crate::location::{WatchOptions, WatchPolicy};
use crate::types::BoundingBox;

/// Minimum zoom at which segments are fetched.
pub const MIN_FETCH_ZOOM: i32 = 16;

const ENV_API_URL: &str = "ROADWATCH_API_URL";
const ENV_LOCATION_FALLBACK: &str = "ROADWATCH_LOCATION_FALLBACK";
const ENV_MIN_FETCH_ZOOM: &str = "ROADWATCH_MIN_FETCH_ZOOM";

/// What to do when no live location fix can be obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LocationFallback {
    /// Use the cached coordinate from settings, if one was supplied.
    Cached,
    /// Cached coordinate if supplied, otherwise a random point in `fallback_bbox`.
    /// Demo-mode degradation; never the default.
    RandomInBbox,
    /// Surface the failure.
    #[default]
    Fail,
}

impl FromStr for LocationFallback {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "cached" => Ok(LocationFallback::Cached),
            "random-in-bbox" => Ok(LocationFallback::RandomInBbox),
            "fail" => Ok(LocationFallback::Fail),
            other => Err(SyncError::Config {
                message: format!("unknown location fallback '{}'", other),
            }),
        }
    }
}

/// Configuration for the sync engine.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Base URL of the REST backend, without trailing slash
    pub api_base_url: String,
    /// Timeout for every backend request (default: 30s)
    pub request_timeout: Duration,
    /// Timeout for a one-shot location fix (default: 3s)
    pub location_timeout: Duration,
    /// Zoom below which the segment cache is cleared instead of fetched (default: 16)
    pub min_fetch_zoom: i32,
    /// Policy when no live fix is available (default: fail)
    pub location_fallback: LocationFallback,
    /// Area random fallback coordinates are drawn from
    pub fallback_bbox: BoundingBox,
    /// Continuous watch thresholds
    pub watch_options: WatchOptions,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:3000".to_string(),
            request_timeout: Duration::from_secs(30),
            location_timeout: Duration::from_secs(3),
            min_fetch_zoom: MIN_FETCH_ZOOM,
            location_fallback: LocationFallback::Fail,
            // Central Ho Chi Minh City
            fallback_bbox: BoundingBox {
                lon_min: 106.60,
                lat_min: 10.72,
                lon_max: 106.75,
                lat_max: 10.85,
            },
            watch_options: WatchOptions {
                distance_interval_m: 500.0,
                time_interval: Duration::from_secs(60),
                policy: WatchPolicy::Both,
            },
        }
    }
}

impl SyncConfig {
    pub fn with_base_url(api_base_url: impl Into<String>) -> Self {
        Self {
            api_base_url: api_base_url.into().trim_end_matches('/').to_string(),
            ..Self::default()
        }
    }

    /// Defaults overridden by `ROADWATCH_*` environment variables.
    ///
    /// Unparseable values are rejected rather than silently ignored.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(url) = std::env::var(ENV_API_URL) {
            config.api_base_url = url.trim_end_matches('/').to_string();
        }
        if let Ok(value) = std::env::var(ENV_LOCATION_FALLBACK) {
            config.location_fallback = value.parse()?;
            if config.location_fallback == LocationFallback::RandomInBbox {
                warn!("[SyncConfig] Random location fallback enabled (demo mode)");
            }
        }
        if let Ok(value) = std::env::var(ENV_MIN_FETCH_ZOOM) {
            config.min_fetch_zoom = value.trim().parse().map_err(|e| SyncError::Config {
                message: format!("{}='{}': {}", ENV_MIN_FETCH_ZOOM, value, e),
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.api_base_url.is_empty() {
            return Err(SyncError::Config {
                message: "api_base_url is empty".to_string(),
            });
        }
        BoundingBox::new(
            self.fallback_bbox.lon_min,
            self.fallback_bbox.lat_min,
            self.fallback_bbox.lon_max,
            self.fallback_bbox.lat_max,
        )
        .map_err(|e| SyncError::Config {
            message: format!("fallback_bbox: {}", e),
        })?;
        Ok(())
    }

    #[cfg_attr(not(feature = "http"), allow(dead_code))]
    pub(crate) fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.api_base_url.trim_end_matches('/'), path)
    }
}
