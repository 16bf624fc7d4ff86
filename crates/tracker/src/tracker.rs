use std::sync::{Arc, Mutex};

use adtrack_metadata::{Ad, AdBreak, EventKind, Manifest, TrackerConfig, Tracking};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::{CacheStats, Clock, MetadataCache};
use crate::error::TrackerError;
use crate::events::{AdBreakEvent, AdProgress};
use crate::loader::run_metadata_loop;
use crate::progress::ProgressLoop;
use crate::session::SessionInfo;
use crate::state::TrackerState;
use crate::traits::{ManifestFetcher, Player};

struct Running {
    shutdown: watch::Sender<bool>,
    loops: Vec<JoinHandle<()>>,
}

/// Tracks ads for one play session.
///
/// `prepare` a session, `start` the metadata and progress loops, subscribe to
/// the event channels, and `stop` when playback ends.
pub struct AdTracker {
    state: Arc<TrackerState>,
    session: Mutex<Option<SessionInfo>>,
    running: tokio::sync::Mutex<Option<Running>>,
}

impl AdTracker {
    pub fn new(
        player: Arc<dyn Player>,
        fetcher: Arc<dyn ManifestFetcher>,
        config: TrackerConfig,
    ) -> Self {
        let cache = MetadataCache::new(config.cache_retention_ms);
        Self::with_cache(player, fetcher, config, cache)
    }

    /// Like [`AdTracker::new`] with a custom wall clock for cache expiry
    pub fn with_clock(
        player: Arc<dyn Player>,
        fetcher: Arc<dyn ManifestFetcher>,
        config: TrackerConfig,
        clock: Clock,
    ) -> Self {
        let cache = MetadataCache::with_clock(config.cache_retention_ms, clock);
        Self::with_cache(player, fetcher, config, cache)
    }

    fn with_cache(
        player: Arc<dyn Player>,
        fetcher: Arc<dyn ManifestFetcher>,
        config: TrackerConfig,
        cache: MetadataCache,
    ) -> Self {
        Self {
            state: Arc::new(TrackerState::new(config, player, fetcher, cache)),
            session: Mutex::new(None),
            running: tokio::sync::Mutex::new(None),
        }
    }

    /// Set the session the next `start` will track
    pub fn prepare(&self, session: SessionInfo) {
        info!(
            metadata_url = %session.metadata_url,
            session_id = %session.session_id,
            "Session prepared"
        );
        *self
            .session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(session);
    }

    pub fn session(&self) -> Option<SessionInfo> {
        self.session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub async fn start(&self) -> Result<(), TrackerError> {
        let session = self.session().ok_or(TrackerError::SessionNotPrepared)?;
        self.state
            .config
            .validate()
            .map_err(|e| TrackerError::InvalidConfig(e.to_string()))?;

        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(TrackerError::AlreadyRunning);
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let metadata = tokio::spawn(run_metadata_loop(
            self.state.clone(),
            session.clone(),
            shutdown_rx.clone(),
        ));
        let progress = tokio::spawn(ProgressLoop::new(self.state.clone()).run(shutdown_rx));

        *running = Some(Running {
            shutdown,
            loops: vec![metadata, progress],
        });
        info!(session_id = %session.session_id, "Ad tracker started");
        Ok(())
    }

    /// Stop both loops, announce `Skipped` and forget all session state.
    /// Calling it again, or before `start`, does nothing.
    pub async fn stop(&self) {
        let mut guard = self.running.lock().await;
        let Some(running) = guard.take() else {
            debug!("Ad tracker not running, nothing to stop");
            return;
        };

        running.shutdown.send_replace(true);
        for handle in running.loops {
            if let Err(e) = handle.await {
                warn!(error = %e, "Tracker loop ended abnormally");
            }
        }

        self.state
            .progress
            .publish(&AdProgress::synthetic(EventKind::Skipped));
        self.state.reset().await;
        info!("Ad tracker stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    pub fn subscribe_ad_breaks(&self) -> mpsc::UnboundedReceiver<AdBreakEvent> {
        self.state.ad_breaks.subscribe()
    }

    pub fn subscribe_progress(&self) -> mpsc::UnboundedReceiver<AdProgress> {
        self.state.progress.subscribe()
    }

    pub fn subscribe_errors(&self) -> mpsc::UnboundedReceiver<Arc<TrackerError>> {
        self.state.errors.subscribe()
    }

    pub fn current_ad_break(&self) -> Option<AdBreak> {
        self.state.current().ad_break
    }

    pub fn current_ad(&self) -> Option<Ad> {
        self.state.current().ad
    }

    /// Tracking set of the current ad, click kinds excluded
    pub fn current_tracking(&self) -> Option<Vec<Tracking>> {
        self.state.current().tracking
    }

    pub fn is_playing_ad(&self) -> bool {
        self.state.current().ad.is_some()
    }

    /// Beacon URLs of the current ad for an event kind, clicks included.
    /// Used for player-initiated events such as pause or mute.
    pub fn tracking_urls_for_event(&self, kind: EventKind) -> Vec<String> {
        self.state
            .current()
            .ad
            .map(|ad| ad.urls_for(kind))
            .unwrap_or_default()
    }

    /// Latest published schedule
    pub fn manifest(&self) -> Option<Arc<Manifest>> {
        self.state.manifest()
    }

    pub async fn cache_stats(&self) -> CacheStats {
        self.state.cache.stats().await
    }

    pub async fn was_time_played(&self, position: i64) -> bool {
        self.state.played.was_played(position).await
    }
}
