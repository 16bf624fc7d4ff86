//! Metadata cache: merges refetched manifests without losing fired state

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use adtrack_metadata::{AdBreak, DataRange, Manifest, Tracking, TrackingKey};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Wall-clock source in epoch milliseconds
pub type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

pub fn system_clock() -> Clock {
    Arc::new(|| chrono::Utc::now().timestamp_millis())
}

/// Result of [`MetadataCache::mark_fired`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkOutcome {
    /// The cached tracking transitioned to fired
    Marked,
    /// Someone else already fired it
    AlreadyFired,
    /// Ad break, ad or tracking is not (or no longer) cached
    Missing,
}

impl MarkOutcome {
    /// Whether the caller should announce the event
    pub fn should_announce(&self) -> bool {
        !matches!(self, MarkOutcome::AlreadyFired)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub ad_breaks: usize,
    pub fired_events: usize,
    pub observed_range: Option<DataRange>,
    pub oldest_entry_age_ms: i64,
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ad_breaks={} fired_events={} ",
            self.ad_breaks, self.fired_events
        )?;
        match self.observed_range {
            Some(r) => write!(f, "range={}-{} ", r.start, r.end)?,
            None => write!(f, "range=unknown ")?,
        }
        write!(f, "oldest_entry_age={}ms", self.oldest_entry_age_ms)
    }
}

struct CacheEntry {
    ad_break: AdBreak,
    first_cached_ms: i64,
}

/// Authoritative store of every ad break seen this session.
///
/// Lock order is always `entries` then `range`.
pub struct MetadataCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    range: Mutex<Option<DataRange>>,
    retention_ms: i64,
    clock: Clock,
}

impl MetadataCache {
    pub fn new(retention_ms: i64) -> Self {
        Self::with_clock(retention_ms, system_clock())
    }

    pub fn with_clock(retention_ms: i64, clock: Clock) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            range: Mutex::new(None),
            retention_ms,
            clock,
        }
    }

    /// Merge a freshly fetched manifest and return the full cached schedule.
    ///
    /// New timing wins; fired flags only ever flow from the cache onto the
    /// incoming trackings.
    pub async fn merge(&self, incoming: Manifest) -> Manifest {
        let mut entries = self.entries.lock().await;
        let now = (self.clock)();

        debug!(
            ad_breaks = incoming.ad_breaks.len(),
            "Merging manifest into cache"
        );

        self.evict_expired(&mut entries, now).await;

        if incoming.data_range.is_known() {
            let mut range = self.range.lock().await;
            let widened = match *range {
                Some(r) => DataRange::new(
                    r.start.min(incoming.data_range.start),
                    r.end.max(incoming.data_range.end),
                ),
                None => incoming.data_range,
            };
            *range = Some(widened);
        }

        for mut ad_break in incoming.ad_breaks {
            let first_cached_ms = match entries.get(&ad_break.id) {
                Some(cached) => {
                    carry_fired_flags(&cached.ad_break, &mut ad_break);
                    cached.first_cached_ms
                }
                None => {
                    debug!(ad_break = %ad_break.id, "Caching new ad break");
                    now
                }
            };
            entries.insert(
                ad_break.id.clone(),
                CacheEntry {
                    ad_break,
                    first_cached_ms,
                },
            );
        }

        self.build_manifest(&entries).await
    }

    /// Mark the cached copy of `tracking` as fired.
    ///
    /// The outcome is decided under the cache lock, so when both loops race
    /// for the same event exactly one of them sees `Marked`.
    pub async fn mark_fired(&self, tracking: &Tracking, ad_break_id: &str, ad_id: &str) -> MarkOutcome {
        let mut entries = self.entries.lock().await;

        let Some(entry) = entries.get_mut(ad_break_id) else {
            warn!(ad_break = %ad_break_id, "Ad break not cached, cannot mark tracking fired");
            return MarkOutcome::Missing;
        };
        let Some(ad) = entry.ad_break.ad_mut(ad_id) else {
            warn!(ad_break = %ad_break_id, ad = %ad_id, "Ad not cached, cannot mark tracking fired");
            return MarkOutcome::Missing;
        };

        let key = tracking.key();
        match ad.tracking.iter_mut().find(|t| t.key() == key) {
            Some(cached) if cached.fired => MarkOutcome::AlreadyFired,
            Some(cached) => {
                cached.fired = true;
                debug!(
                    event = %tracking.event,
                    start_time = tracking.start_time,
                    ad = %ad_id,
                    "Marked tracking fired"
                );
                MarkOutcome::Marked
            }
            None => {
                warn!(
                    event = %tracking.event,
                    start_time = tracking.start_time,
                    ad = %ad_id,
                    "Tracking not cached, cannot mark fired"
                );
                MarkOutcome::Missing
            }
        }
    }

    /// Current cache contents as a manifest, ad breaks ordered by start time
    pub async fn snapshot(&self) -> Manifest {
        let entries = self.entries.lock().await;
        self.build_manifest(&entries).await
    }

    pub async fn observed_range(&self) -> Option<DataRange> {
        *self.range.lock().await
    }

    pub async fn stats(&self) -> CacheStats {
        let entries = self.entries.lock().await;
        let now = (self.clock)();

        let fired_events = entries
            .values()
            .flat_map(|e| e.ad_break.ads.iter())
            .map(|ad| ad.tracking.iter().filter(|t| t.fired).count())
            .sum();
        let oldest_entry_age_ms = entries
            .values()
            .map(|e| e.first_cached_ms)
            .min()
            .map(|oldest| now - oldest)
            .unwrap_or(0);

        CacheStats {
            ad_breaks: entries.len(),
            fired_events,
            observed_range: *self.range.lock().await,
            oldest_entry_age_ms,
        }
    }

    pub async fn clear(&self) {
        let mut entries = self.entries.lock().await;
        entries.clear();
        *self.range.lock().await = None;
        debug!("Cleared metadata cache");
    }

    async fn evict_expired(&self, entries: &mut HashMap<String, CacheEntry>, now: i64) {
        let before = entries.len();
        entries.retain(|_, e| now - e.first_cached_ms <= self.retention_ms);
        let evicted = before - entries.len();

        if evicted == 0 {
            return;
        }
        debug!(evicted, remaining = entries.len(), "Evicted expired ad breaks");

        let mut range = self.range.lock().await;
        let start = entries.values().map(|e| e.ad_break.start_time).min();
        let end = entries.values().map(|e| e.ad_break.end_time()).max();
        *range = match (start, end) {
            (Some(start), Some(end)) => Some(DataRange::new(start, end)),
            _ => None,
        };
    }

    async fn build_manifest(&self, entries: &HashMap<String, CacheEntry>) -> Manifest {
        let mut ad_breaks: Vec<AdBreak> = entries.values().map(|e| e.ad_break.clone()).collect();
        ad_breaks.sort_by(|a, b| a.start_time.cmp(&b.start_time).then_with(|| a.id.cmp(&b.id)));
        let data_range = self.range.lock().await.unwrap_or_default();
        Manifest::new(data_range, ad_breaks)
    }
}

/// Copy fired flags from a cached ad break onto its refetched version, ad by ad
fn carry_fired_flags(cached: &AdBreak, incoming: &mut AdBreak) {
    for ad in incoming.ads.iter_mut() {
        let Some(cached_ad) = cached.ad(&ad.id) else {
            continue;
        };
        let fired: HashSet<TrackingKey> = cached_ad
            .tracking
            .iter()
            .filter(|t| t.fired)
            .map(Tracking::key)
            .collect();
        if fired.is_empty() {
            continue;
        }
        for tracking in ad.tracking.iter_mut() {
            if fired.contains(&tracking.key()) {
                tracking.fired = true;
            }
        }
    }
}
