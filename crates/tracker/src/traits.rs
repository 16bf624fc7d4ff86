use async_trait::async_trait;

use crate::error::FetchError;

/// Read-only view of the media player driving the tracker
#[async_trait]
pub trait Player: Send + Sync {
    /// Position within the current period, in milliseconds
    async fn current_position_ms(&self) -> i64;

    /// Wall-clock start of the presentation in milliseconds, `-1` when unknown.
    /// Added to the period position to get the manifest timeline position.
    async fn presentation_start_time_ms(&self) -> i64;

    async fn playback_rate(&self) -> f32;

    async fn duration_ms(&self) -> i64;

    async fn audio_volume(&self) -> f32;

    async fn is_paused(&self) -> bool;
}

/// Source of raw manifest documents
#[async_trait]
pub trait ManifestFetcher: Send + Sync {
    async fn fetch_manifest_text(&self, url: &str) -> Result<String, FetchError>;
}
