//! Playback progress loop: tracks the current ad and fires due events

use std::collections::HashSet;
use std::sync::Arc;

use adtrack_metadata::{Ad, AdBreak, EventKind, Manifest, Tracking, TrackingKey};
use tokio::select;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::events::{AdBreakEvent, AdProgress};
use crate::loader::shutdown_requested;
use crate::state::{CurrentAd, TrackerState};

/// Samples the player on a fixed interval and keeps the current ad break,
/// ad and tracking set in step with the published manifest.
///
/// This loop is the only writer of the current triple and of the played
/// ranges.
pub struct ProgressLoop {
    state: Arc<TrackerState>,
    current: CurrentAd,
    /// Snapshot the current triple was last derived from
    seen: Option<Arc<Manifest>>,
    waiting_logged: bool,
}

impl ProgressLoop {
    pub fn new(state: Arc<TrackerState>) -> Self {
        Self {
            state,
            current: CurrentAd::default(),
            seen: None,
            waiting_logged: false,
        }
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.state.config.progress_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            interval_ms = self.state.config.progress_interval_ms,
            "Progress loop started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }
            select! {
                _ = shutdown_requested(&mut shutdown) => break,
                _ = ticker.tick() => self.tick().await,
            }
        }

        info!("Progress loop stopped");
    }

    /// Process one position sample
    pub async fn tick(&mut self) {
        let player = self.state.player.clone();
        let presentation_start = player.presentation_start_time_ms().await.max(0);
        let position = player
            .current_position_ms()
            .await
            .saturating_add(presentation_start);
        self.state.set_last_position(position);

        let rate = player.playback_rate().await;
        let normal_speed = self.state.config.is_normal_speed(rate);
        if normal_speed && !player.is_paused().await {
            self.state.played.record_position(position).await;
        }

        let Some(manifest) = self.state.manifest() else {
            if !self.waiting_logged {
                debug!(position, "No ad metadata yet");
                self.waiting_logged = true;
            }
            return;
        };

        let refreshed = !matches!(&self.seen, Some(seen) if Arc::ptr_eq(seen, &manifest));
        self.update_current(&manifest, position, refreshed);
        self.seen = Some(manifest);

        if normal_speed {
            self.fire_due_events(position).await;
        } else {
            debug!(position, rate, "Off normal speed, not firing");
        }

        self.state.store_current(&self.current);
    }

    fn update_current(&mut self, manifest: &Manifest, position: i64, refreshed: bool) {
        let tolerance = self.state.config.ad_break_end_tolerance_ms;

        let Some(ad_break) = manifest
            .ad_breaks
            .iter()
            .find(|b| b.covers(position, tolerance))
        else {
            if let Some(previous) = self.current.ad_break.take() {
                info!(ad_break = %previous.id, position, "Left ad break");
                self.current = CurrentAd::default();
                self.announce(AdBreakEvent::AdBreakChanged(None));
                self.announce(AdBreakEvent::AdChanged(None));
                self.announce(AdBreakEvent::TrackingChanged(None));
                self.state
                    .progress
                    .publish(&AdProgress::synthetic(EventKind::Stopped));
            }
            return;
        };

        let break_changed = self.current.ad_break.as_ref().map(|b| &b.id) != Some(&ad_break.id);
        let mut break_announced = false;
        match &self.current.ad_break {
            Some(previous) if same_break_timing(previous, ad_break) => {}
            _ => {
                if break_changed {
                    info!(ad_break = %ad_break.id, position, "Entered ad break");
                }
                self.announce(AdBreakEvent::AdBreakChanged(Some(ad_break.clone())));
                break_announced = true;
            }
        }
        self.current.ad_break = Some(ad_break.clone());

        let ad = ad_break.ads.iter().find(|a| a.covers(position, tolerance));
        let previous_id = self.current.ad.as_ref().map(|a| a.id.as_str());

        // Ad ids are only unique within their break
        if previous_id != ad.map(|a| a.id.as_str()) || (break_changed && ad.is_some()) {
            debug!(
                ad_break = %ad_break.id,
                ad = ad.map(|a| a.id.as_str()).unwrap_or("-"),
                position,
                "Current ad changed"
            );
            self.current.ad = ad.cloned();
            self.current.tracking = ad.map(|a| without_clicks(&a.tracking));
            if !break_announced {
                self.announce(AdBreakEvent::AdBreakChanged(Some(ad_break.clone())));
            }
            self.announce(AdBreakEvent::AdChanged(self.current.ad.clone()));
            self.announce(AdBreakEvent::TrackingChanged(self.current.tracking.clone()));
            if ad.is_none() {
                self.state
                    .progress
                    .publish(&AdProgress::synthetic(EventKind::Stopped));
            }
            return;
        }

        let Some(ad) = ad else {
            return;
        };
        let timing_changed = self
            .current
            .ad
            .as_ref()
            .is_some_and(|previous| !same_ad_timing(previous, ad));
        if refreshed {
            self.current.tracking = Some(refresh_tracking(
                self.current.tracking.as_deref().unwrap_or_default(),
                &ad.tracking,
            ));
            self.current.ad = Some(ad.clone());
        }
        if timing_changed {
            self.current.ad = Some(ad.clone());
            self.announce(AdBreakEvent::AdChanged(Some(ad.clone())));
        }
    }

    async fn fire_due_events(&mut self, position: i64) {
        let (Some(ad_break), Some(ad), Some(tracking)) = (
            &self.current.ad_break,
            &self.current.ad,
            &mut self.current.tracking,
        ) else {
            return;
        };

        let lower = position.saturating_sub(self.state.config.event_window_lower_ms);
        let upper = position.saturating_add(self.state.config.event_window_upper_ms);

        for event in tracking.iter_mut() {
            if event.fired || !event.event.is_time_based() {
                continue;
            }
            if event.start_time < lower || event.start_time > upper {
                continue;
            }

            event.fired = true;
            let outcome = self.state.cache.mark_fired(event, &ad_break.id, &ad.id).await;
            if !outcome.should_announce() {
                debug!(event = %event.event, ad = %ad.id, "Already fired elsewhere");
                continue;
            }

            info!(
                event = %event.event,
                start_time = event.start_time,
                position,
                ad_break = %ad_break.id,
                ad = %ad.id,
                "Firing tracking event"
            );
            self.state
                .progress
                .publish(&AdProgress::fired(ad_break, ad, event));
        }
    }

    fn announce(&self, event: AdBreakEvent) {
        self.state.ad_breaks.publish(&event);
    }
}

fn same_break_timing(a: &AdBreak, b: &AdBreak) -> bool {
    a.id == b.id && a.start_time == b.start_time && a.duration == b.duration
}

fn same_ad_timing(a: &Ad, b: &Ad) -> bool {
    a.id == b.id && a.start_time == b.start_time && a.duration == b.duration
}

fn without_clicks(tracking: &[Tracking]) -> Vec<Tracking> {
    tracking
        .iter()
        .filter(|t| !t.event.is_click())
        .cloned()
        .collect()
}

/// Take the tracking set from a new snapshot, keeping anything fired locally
fn refresh_tracking(local: &[Tracking], incoming: &[Tracking]) -> Vec<Tracking> {
    let fired: HashSet<TrackingKey> = local.iter().filter(|t| t.fired).map(Tracking::key).collect();
    let mut refreshed = without_clicks(incoming);
    for tracking in refreshed.iter_mut() {
        if fired.contains(&tracking.key()) {
            tracking.fired = true;
        }
    }
    refreshed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MetadataCache;
    use crate::test_helpers::{
        ad_break, manifest, standard_ad, MockFetcher, MockPlayer, MockPlayerHandle,
    };
    use adtrack_metadata::{DataRange, TrackerConfig};
    use tokio::sync::mpsc::UnboundedReceiver;

    struct Harness {
        state: Arc<TrackerState>,
        player: MockPlayerHandle,
        progress: ProgressLoop,
        ad_breaks: UnboundedReceiver<AdBreakEvent>,
        fired: UnboundedReceiver<AdProgress>,
    }

    async fn harness(schedule: Manifest) -> Harness {
        let player = MockPlayer::new();
        let handle = player.handle();
        handle.set_paused(true).await;
        let config = TrackerConfig::default();
        let cache = MetadataCache::new(config.cache_retention_ms);
        let state = Arc::new(TrackerState::new(
            config,
            Arc::new(player),
            Arc::new(MockFetcher::new()),
            cache,
        ));
        let merged = state.cache.merge(schedule).await;
        state.publish_manifest(Arc::new(merged));

        Harness {
            ad_breaks: state.ad_breaks.subscribe(),
            fired: state.progress.subscribe(),
            progress: ProgressLoop::new(state.clone()),
            player: handle,
            state,
        }
    }

    fn schedule() -> Manifest {
        manifest(
            DataRange::new(1_000, 100_000),
            vec![ad_break(
                "pod1",
                10_000,
                20_000,
                vec![standard_ad("ad1", 10_000, 10_000), standard_ad("ad2", 20_000, 10_000)],
            )],
        )
    }

    fn drain<T>(rx: &mut UnboundedReceiver<T>) -> Vec<T> {
        let mut out = Vec::new();
        while let Ok(item) = rx.try_recv() {
            out.push(item);
        }
        out
    }

    fn fired_kinds(rx: &mut UnboundedReceiver<AdProgress>) -> Vec<EventKind> {
        drain(rx).into_iter().map(|p| p.tracking.event).collect()
    }

    #[tokio::test]
    async fn test_entering_break_announces_and_fires_start_events() {
        let mut h = harness(schedule()).await;
        h.player.seek(10_050).await;
        h.progress.tick().await;

        let events = drain(&mut h.ad_breaks);
        assert!(matches!(&events[0], AdBreakEvent::AdBreakChanged(Some(b)) if b.id == "pod1"));
        assert!(matches!(&events[1], AdBreakEvent::AdChanged(Some(a)) if a.id == "ad1"));
        match &events[2] {
            AdBreakEvent::TrackingChanged(Some(set)) => {
                assert!(set.iter().all(|t| !t.event.is_click()));
                assert_eq!(set.len(), 7);
            }
            e => panic!("expected TrackingChanged, got: {:?}", e),
        }
        assert_eq!(events.len(), 3);

        assert_eq!(
            fired_kinds(&mut h.fired),
            vec![EventKind::Impression, EventKind::Start]
        );

        let current = h.state.current();
        assert_eq!(current.ad.unwrap().id, "ad1");
    }

    #[tokio::test]
    async fn test_same_position_never_fires_twice() {
        let mut h = harness(schedule()).await;
        h.player.seek(12_500).await;
        h.progress.tick().await;
        h.progress.tick().await;
        h.progress.tick().await;

        assert_eq!(fired_kinds(&mut h.fired), vec![EventKind::FirstQuartile]);
        assert_eq!(drain(&mut h.ad_breaks).len(), 3);
    }

    #[tokio::test]
    async fn test_window_bounds() {
        let mut h = harness(schedule()).await;
        // Impression/Start at 10_000 are exactly `lower` away
        h.player.seek(11_000).await;
        h.progress.tick().await;
        assert_eq!(
            fired_kinds(&mut h.fired),
            vec![EventKind::Impression, EventKind::Start]
        );

        // FirstQuartile at 12_500 is 1_001 ahead: not yet
        h.player.seek(11_499).await;
        h.progress.tick().await;
        assert!(fired_kinds(&mut h.fired).is_empty());

        h.player.seek(11_500).await;
        h.progress.tick().await;
        assert_eq!(fired_kinds(&mut h.fired), vec![EventKind::FirstQuartile]);
    }

    #[tokio::test]
    async fn test_no_firing_off_normal_speed() {
        let mut h = harness(schedule()).await;
        h.player.set_rate(2.0).await;
        h.player.seek(15_000).await;
        h.progress.tick().await;

        assert!(fired_kinds(&mut h.fired).is_empty());
        // State still follows the position
        assert_eq!(h.state.current().ad.unwrap().id, "ad1");
        assert!(h.state.played.ranges().await.is_empty());
    }

    #[tokio::test]
    async fn test_ad_change_then_leaving_break_emits_stopped() {
        let mut h = harness(schedule()).await;
        h.player.seek(15_000).await;
        h.progress.tick().await;
        drain(&mut h.ad_breaks);
        drain(&mut h.fired);

        h.player.seek(25_000).await;
        h.progress.tick().await;
        let events = drain(&mut h.ad_breaks);
        assert!(matches!(&events[0], AdBreakEvent::AdBreakChanged(Some(_))));
        assert!(matches!(&events[1], AdBreakEvent::AdChanged(Some(a)) if a.id == "ad2"));
        assert_eq!(fired_kinds(&mut h.fired), vec![EventKind::Midpoint]);

        h.player.seek(60_000).await;
        h.progress.tick().await;
        assert_eq!(
            drain(&mut h.ad_breaks),
            vec![
                AdBreakEvent::AdBreakChanged(None),
                AdBreakEvent::AdChanged(None),
                AdBreakEvent::TrackingChanged(None),
            ]
        );
        let stopped = drain(&mut h.fired);
        assert_eq!(stopped.len(), 1);
        assert_eq!(stopped[0].tracking.event, EventKind::Stopped);
        assert!(stopped[0].ad_break.is_none());
        assert_eq!(h.state.current(), CurrentAd::default());
    }

    #[tokio::test]
    async fn test_end_tolerance_keeps_break_current() {
        let mut h = harness(schedule()).await;
        h.player.seek(29_000).await;
        h.progress.tick().await;
        drain(&mut h.ad_breaks);

        // 300 ms past the end: still inside the 500 ms tolerance
        h.player.seek(30_300).await;
        h.progress.tick().await;
        assert!(drain(&mut h.ad_breaks).is_empty());
        assert_eq!(h.state.current().ad_break.unwrap().id, "pod1");
    }

    #[tokio::test]
    async fn test_player_initiated_events_never_auto_fire() {
        let mut h = harness(schedule()).await;
        for p in (10_000..=20_000).step_by(100) {
            h.player.seek(p).await;
            h.progress.tick().await;
        }
        let kinds = fired_kinds(&mut h.fired);
        assert!(kinds.iter().all(|k| k.is_time_based()));
        assert!(!kinds.contains(&EventKind::Pause));
    }

    #[tokio::test]
    async fn test_refreshed_snapshot_keeps_local_fired_flags() {
        let mut h = harness(schedule()).await;
        h.player.seek(10_000).await;
        h.progress.tick().await;
        drain(&mut h.fired);
        drain(&mut h.ad_breaks);

        // Refetch with the break's end refined
        let mut refined = schedule();
        refined.ad_breaks[0].duration = 21_000.0;
        let merged = h.state.cache.merge(refined).await;
        h.state.publish_manifest(Arc::new(merged));

        h.progress.tick().await;
        assert!(fired_kinds(&mut h.fired).is_empty());
        let events = drain(&mut h.ad_breaks);
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], AdBreakEvent::AdBreakChanged(Some(b)) if b.duration == 21_000.0));
    }

    #[tokio::test]
    async fn test_same_ad_id_in_next_break_is_a_new_ad() {
        let mut h = harness(manifest(
            DataRange::new(1_000, 100_000),
            vec![
                ad_break("pod1", 10_000, 10_000, vec![standard_ad("ad1", 10_000, 10_000)]),
                ad_break("pod2", 40_000, 10_000, vec![standard_ad("ad1", 40_000, 10_000)]),
            ],
        ))
        .await;
        h.player.seek(10_050).await;
        h.progress.tick().await;
        drain(&mut h.ad_breaks);
        drain(&mut h.fired);

        h.player.seek(40_050).await;
        h.progress.tick().await;

        let fired = drain(&mut h.fired);
        let kinds: Vec<EventKind> = fired.iter().map(|p| p.tracking.event).collect();
        assert_eq!(kinds, vec![EventKind::Impression, EventKind::Start]);
        assert!(fired
            .iter()
            .all(|p| p.ad_break.as_ref().unwrap().id == "pod2" && p.tracking.start_time == 40_000));

        let events = drain(&mut h.ad_breaks);
        assert_eq!(events.len(), 3);
        assert!(matches!(&events[0], AdBreakEvent::AdBreakChanged(Some(b)) if b.id == "pod2"));
        assert!(matches!(&events[1], AdBreakEvent::AdChanged(Some(a)) if a.start_time == 40_000));
        assert!(matches!(&events[2], AdBreakEvent::TrackingChanged(Some(set)) if set[0].start_time == 40_000));

        let current = h.state.current();
        assert_eq!(current.tracking.unwrap()[0].start_time, 40_000);
        assert_eq!(h.state.cache.stats().await.fired_events, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_for_metadata() {
        let player = MockPlayer::new();
        let state = Arc::new(TrackerState::new(
            TrackerConfig::default(),
            Arc::new(player),
            Arc::new(MockFetcher::new()),
            MetadataCache::new(1_000),
        ));
        let mut progress = ProgressLoop::new(state.clone());
        progress.tick().await;
        assert_eq!(state.last_position(), Some(0));
        assert_eq!(state.current(), CurrentAd::default());
    }

    #[tokio::test]
    async fn test_presentation_start_offsets_position() {
        let mut h = harness(schedule()).await;
        h.player.set_presentation_start(10_000).await;
        h.player.seek(50).await;
        h.progress.tick().await;
        assert_eq!(h.state.last_position(), Some(10_050));
        assert_eq!(h.state.current().ad.unwrap().id, "ad1");

        h.player.set_presentation_start(-1).await;
        h.progress.tick().await;
        assert_eq!(h.state.last_position(), Some(50));
    }
}
