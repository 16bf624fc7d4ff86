//! State shared between the tracker handle and its two loops

use std::sync::{Arc, Mutex, RwLock};

use adtrack_metadata::{Ad, AdBreak, Manifest, TrackerConfig, Tracking};
use tokio::sync::watch;

use crate::cache::MetadataCache;
use crate::error::TrackerError;
use crate::events::{AdBreakEvent, AdProgress, EventHub};
use crate::played_range::PlayedRangeTracker;
use crate::traits::{ManifestFetcher, Player};

/// The ad break, ad and tracking set at the last sampled position
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CurrentAd {
    pub ad_break: Option<AdBreak>,
    pub ad: Option<Ad>,
    /// Trackings of `ad` without click kinds
    pub tracking: Option<Vec<Tracking>>,
}

pub struct TrackerState {
    pub config: TrackerConfig,
    pub player: Arc<dyn Player>,
    pub fetcher: Arc<dyn ManifestFetcher>,
    pub cache: MetadataCache,
    pub played: PlayedRangeTracker,
    pub ad_breaks: EventHub<AdBreakEvent>,
    pub progress: EventHub<AdProgress>,
    pub errors: EventHub<Arc<TrackerError>>,
    manifest: watch::Sender<Option<Arc<Manifest>>>,
    current: RwLock<CurrentAd>,
    last_position: Mutex<Option<i64>>,
}

impl TrackerState {
    pub fn new(
        config: TrackerConfig,
        player: Arc<dyn Player>,
        fetcher: Arc<dyn ManifestFetcher>,
        cache: MetadataCache,
    ) -> Self {
        let played = PlayedRangeTracker::new(
            config.played_range_tolerance_ms(),
            config.cache_retention_ms,
        );
        let (manifest, _) = watch::channel(None);
        Self {
            config,
            player,
            fetcher,
            cache,
            played,
            ad_breaks: EventHub::new(),
            progress: EventHub::new(),
            errors: EventHub::new(),
            manifest,
            current: RwLock::new(CurrentAd::default()),
            last_position: Mutex::new(None),
        }
    }

    /// Replace the published snapshot
    pub fn publish_manifest(&self, manifest: Arc<Manifest>) {
        self.manifest.send_replace(Some(manifest));
    }

    pub fn manifest(&self) -> Option<Arc<Manifest>> {
        self.manifest.borrow().clone()
    }

    pub fn watch_manifest(&self) -> watch::Receiver<Option<Arc<Manifest>>> {
        self.manifest.subscribe()
    }

    pub fn set_last_position(&self, position: i64) {
        *self
            .last_position
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(position);
    }

    pub fn last_position(&self) -> Option<i64> {
        *self
            .last_position
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn store_current(&self, current: &CurrentAd) {
        let mut guard = self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if *guard != *current {
            *guard = current.clone();
        }
    }

    pub fn current(&self) -> CurrentAd {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Forget everything learned during the session
    pub async fn reset(&self) {
        self.cache.clear().await;
        self.played.clear().await;
        self.manifest.send_replace(None);
        self.store_current(&CurrentAd::default());
        *self
            .last_position
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = None;
    }
}
