//! Test doubles for driving a tracker without a real player or network.
//!
//! `MockPlayer` advances its position with tokio time, so tests running with
//! `start_paused = true` get deterministic playback. `MockFetcher` serves
//! canned manifest documents and records every requested URL.

use std::sync::Arc;

use adtrack_metadata::{Ad, AdBreak, DataRange, EventKind, Manifest, Tracking};
use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::FetchError;
use crate::traits::{ManifestFetcher, Player};

// =============================================================================
// Player
// =============================================================================

#[derive(Debug)]
pub struct MockPlayerState {
    /// Position at `anchor`
    pub position_ms: i64,
    anchor: Instant,
    pub presentation_start_ms: i64,
    pub rate: f32,
    pub paused: bool,
    pub duration_ms: i64,
    pub volume: f32,
}

impl MockPlayerState {
    fn position_now(&self) -> i64 {
        if self.paused {
            return self.position_ms;
        }
        let elapsed = self.anchor.elapsed().as_millis() as f64;
        self.position_ms
            .saturating_add((elapsed * self.rate as f64) as i64)
    }

    /// Freeze the current position so a setting change applies from now on
    fn rebase(&mut self) {
        self.position_ms = self.position_now();
        self.anchor = Instant::now();
    }
}

impl Default for MockPlayerState {
    fn default() -> Self {
        Self {
            position_ms: 0,
            anchor: Instant::now(),
            presentation_start_ms: 0,
            rate: 1.0,
            paused: false,
            duration_ms: 0,
            volume: 1.0,
        }
    }
}

/// Player whose position advances with tokio time at the configured rate
pub struct MockPlayer {
    pub state: Arc<Mutex<MockPlayerState>>,
}

impl Default for MockPlayer {
    fn default() -> Self {
        Self::new()
    }
}

impl MockPlayer {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockPlayerState::default())),
        }
    }

    /// Shared handle for adjusting playback after the player was moved into a tracker
    pub fn handle(&self) -> MockPlayerHandle {
        MockPlayerHandle {
            state: self.state.clone(),
        }
    }
}

#[derive(Clone)]
pub struct MockPlayerHandle {
    state: Arc<Mutex<MockPlayerState>>,
}

impl MockPlayerHandle {
    pub async fn seek(&self, position_ms: i64) {
        let mut state = self.state.lock().await;
        state.position_ms = position_ms;
        state.anchor = Instant::now();
    }

    pub async fn set_rate(&self, rate: f32) {
        let mut state = self.state.lock().await;
        state.rebase();
        state.rate = rate;
    }

    pub async fn set_paused(&self, paused: bool) {
        let mut state = self.state.lock().await;
        state.rebase();
        state.paused = paused;
    }

    pub async fn set_presentation_start(&self, start_ms: i64) {
        self.state.lock().await.presentation_start_ms = start_ms;
    }

    pub async fn position(&self) -> i64 {
        self.state.lock().await.position_now()
    }
}

#[async_trait]
impl Player for MockPlayer {
    async fn current_position_ms(&self) -> i64 {
        self.state.lock().await.position_now()
    }

    async fn presentation_start_time_ms(&self) -> i64 {
        self.state.lock().await.presentation_start_ms
    }

    async fn playback_rate(&self) -> f32 {
        self.state.lock().await.rate
    }

    async fn duration_ms(&self) -> i64 {
        self.state.lock().await.duration_ms
    }

    async fn audio_volume(&self) -> f32 {
        self.state.lock().await.volume
    }

    async fn is_paused(&self) -> bool {
        self.state.lock().await.paused
    }
}

// =============================================================================
// Fetcher
// =============================================================================

/// Configurable response for `fetch_manifest_text`.
#[derive(Clone, Debug)]
pub enum FetchBehavior {
    /// Return the document.
    Respond(String),
    /// Return Err(Status) with the given code.
    Status(u16),
    /// Never complete.
    Hang,
}

#[derive(Debug)]
pub struct MockFetcherState {
    pub default: FetchBehavior,
    /// `(url substring, behavior)`; the first match wins over `default`.
    pub overrides: Vec<(String, FetchBehavior)>,
    /// Log of requested URLs (for assertions).
    pub requests: Vec<String>,
}

impl Default for MockFetcherState {
    fn default() -> Self {
        Self {
            default: FetchBehavior::Respond("{}".to_string()),
            overrides: Vec::new(),
            requests: Vec::new(),
        }
    }
}

pub struct MockFetcher {
    pub state: Arc<Mutex<MockFetcherState>>,
}

impl Default for MockFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl MockFetcher {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockFetcherState::default())),
        }
    }

    pub async fn set_default(&self, behavior: FetchBehavior) {
        self.state.lock().await.default = behavior;
    }

    pub async fn set_override(&self, url_contains: &str, behavior: FetchBehavior) {
        self.state
            .lock()
            .await
            .overrides
            .push((url_contains.to_string(), behavior));
    }

    pub async fn requests(&self) -> Vec<String> {
        self.state.lock().await.requests.clone()
    }
}

#[async_trait]
impl ManifestFetcher for MockFetcher {
    async fn fetch_manifest_text(&self, url: &str) -> Result<String, FetchError> {
        let behavior = {
            let mut state = self.state.lock().await;
            state.requests.push(url.to_string());
            state
                .overrides
                .iter()
                .find(|(needle, _)| url.contains(needle.as_str()))
                .map(|(_, b)| b.clone())
                .unwrap_or_else(|| state.default.clone())
        };

        match behavior {
            FetchBehavior::Respond(body) => Ok(body),
            FetchBehavior::Status(status) => Err(FetchError::Status {
                status,
                body: String::new(),
            }),
            FetchBehavior::Hang => std::future::pending().await,
        }
    }
}

// =============================================================================
// Manifest builders
// =============================================================================

pub fn tracking(event: EventKind, start_time: i64, url: &str) -> Tracking {
    Tracking::new(event, vec![url.to_string()], start_time)
}

pub fn ad(id: &str, start_time: i64, duration_ms: i64, tracking: Vec<Tracking>) -> Ad {
    Ad {
        id: id.to_string(),
        start_time,
        duration: duration_ms as f64,
        tracking,
        ..Default::default()
    }
}

pub fn ad_break(id: &str, start_time: i64, duration_ms: i64, ads: Vec<Ad>) -> AdBreak {
    AdBreak {
        id: id.to_string(),
        start_time,
        duration: duration_ms as f64,
        ads,
    }
}

pub fn manifest(data_range: DataRange, ad_breaks: Vec<AdBreak>) -> Manifest {
    Manifest::new(data_range, ad_breaks)
}

/// One ad with the usual time-based events plus a pause and a click tracking
pub fn standard_ad(id: &str, start_time: i64, duration_ms: i64) -> Ad {
    let url = |event: &str| format!("http://beacon.example/{id}/{event}");
    let at = |fraction: f64| start_time + (duration_ms as f64 * fraction) as i64;
    ad(
        id,
        start_time,
        duration_ms,
        vec![
            Tracking::new(EventKind::Impression, vec![url("impression")], start_time),
            Tracking::new(EventKind::Start, vec![url("start")], start_time),
            Tracking::new(EventKind::FirstQuartile, vec![url("q1")], at(0.25)),
            Tracking::new(EventKind::Midpoint, vec![url("mid")], at(0.5)),
            Tracking::new(EventKind::ThirdQuartile, vec![url("q3")], at(0.75)),
            Tracking::new(EventKind::Complete, vec![url("complete")], start_time + duration_ms),
            Tracking::new(EventKind::Pause, vec![url("pause")], start_time),
            Tracking::new(EventKind::ClickTracking, vec![url("click")], start_time),
        ],
    )
}

/// Wire JSON of a manifest, as the metadata endpoint would serve it
pub fn manifest_json(manifest: &Manifest) -> String {
    serde_json::to_string(manifest).unwrap_or_default()
}
