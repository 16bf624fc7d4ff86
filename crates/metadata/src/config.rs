use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::MetadataError;

/// Tracker timing and tolerance settings.
///
/// Every field is optional in the YAML file; missing fields take the defaults
/// below.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// How often the playback position is sampled
    pub progress_interval_ms: u64,
    /// Delay between manifest fetches
    pub metadata_fetch_interval_ms: u64,
    /// Ad breaks first cached longer ago than this are evicted
    pub cache_retention_ms: i64,
    /// Expected spacing of position samples; ranges within twice this are joined
    pub played_range_sampling_interval_ms: i64,
    pub event_window_lower_ms: i64,
    pub event_window_upper_ms: i64,
    /// Slack after an ad break or ad ends during which it stays current
    pub ad_break_end_tolerance_ms: i64,
    pub normal_speed_min: f32,
    pub normal_speed_max: f32,
    pub fetch_timeout_ms: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            progress_interval_ms: 100,
            metadata_fetch_interval_ms: 2000,
            cache_retention_ms: 30 * 60 * 1000,
            played_range_sampling_interval_ms: 500,
            event_window_lower_ms: 1000,
            event_window_upper_ms: 1000,
            ad_break_end_tolerance_ms: 500,
            normal_speed_min: 0.95,
            normal_speed_max: 1.05,
            fetch_timeout_ms: 10_000,
        }
    }
}

impl TrackerConfig {
    /// Load and validate a config from a YAML file
    pub fn load(path: &Path) -> Result<Self, MetadataError> {
        let content = std::fs::read_to_string(path)?;
        let config: TrackerConfig = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), MetadataError> {
        if self.progress_interval_ms == 0 {
            return Err(MetadataError::Validation(
                "progress_interval_ms must be positive".to_string(),
            ));
        }
        if self.metadata_fetch_interval_ms == 0 {
            return Err(MetadataError::Validation(
                "metadata_fetch_interval_ms must be positive".to_string(),
            ));
        }
        if self.played_range_sampling_interval_ms <= 0 {
            return Err(MetadataError::Validation(
                "played_range_sampling_interval_ms must be positive".to_string(),
            ));
        }
        if self.cache_retention_ms <= 0 {
            return Err(MetadataError::Validation(
                "cache_retention_ms must be positive".to_string(),
            ));
        }
        if self.event_window_lower_ms < 0
            || self.event_window_upper_ms < 0
            || self.ad_break_end_tolerance_ms < 0
        {
            return Err(MetadataError::Validation(
                "event windows and tolerances must not be negative".to_string(),
            ));
        }
        if self.normal_speed_min > self.normal_speed_max {
            return Err(MetadataError::Validation(format!(
                "normal speed band is inverted: {} > {}",
                self.normal_speed_min, self.normal_speed_max
            )));
        }
        Ok(())
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    pub fn metadata_fetch_interval(&self) -> Duration {
        Duration::from_millis(self.metadata_fetch_interval_ms)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    /// Merge distance for played ranges: two sampling intervals
    pub fn played_range_tolerance_ms(&self) -> i64 {
        self.played_range_sampling_interval_ms * 2
    }

    pub fn is_normal_speed(&self, rate: f32) -> bool {
        rate >= self.normal_speed_min && rate <= self.normal_speed_max
    }
}
