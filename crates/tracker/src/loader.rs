//! Metadata fetch loop and late-fire reconciliation

use std::sync::Arc;

use adtrack_metadata::Manifest;
use tokio::select;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::cache::MetadataCache;
use crate::error::TrackerError;
use crate::events::{AdProgress, EventHub};
use crate::fetch::{session_url, with_start_position};
use crate::played_range::PlayedRangeTracker;
use crate::session::SessionInfo;
use crate::state::TrackerState;

/// Poll the metadata endpoint until shutdown.
///
/// Failures are reported on the error channel and retried on the next
/// interval; the last good snapshot stays published.
pub async fn run_metadata_loop(
    state: Arc<TrackerState>,
    session: SessionInfo,
    mut shutdown: watch::Receiver<bool>,
) {
    let interval = state.config.metadata_fetch_interval();
    info!(
        url = %session.metadata_url,
        session_id = %session.session_id,
        interval_ms = interval.as_millis() as u64,
        "Metadata loop started"
    );

    loop {
        if *shutdown.borrow() {
            break;
        }

        select! {
            _ = shutdown_requested(&mut shutdown) => break,
            result = refresh(&state, &session) => {
                if let Err(e) = result {
                    warn!(error = %e, "Unable to refresh ad metadata");
                    state.errors.publish(&Arc::new(TrackerError::metadata(e)));
                }
            }
        }

        select! {
            _ = shutdown_requested(&mut shutdown) => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }

    info!("Metadata loop stopped");
}

/// Resolves once shutdown is signalled or the tracker handle is gone
pub(crate) async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// One fetch, merge and publish round. Returns the number of late-fired events.
async fn refresh(state: &TrackerState, session: &SessionInfo) -> Result<usize, TrackerError> {
    let request_url = session_url(&session.metadata_url, &session.session_id)?;
    let mut manifest = fetch_manifest(state, &request_url).await?;

    if let Some(position) = state.last_position() {
        let range = manifest.data_range;
        if range.is_known() && !range.contains(position) {
            debug!(
                position,
                range_start = range.start,
                range_end = range.end,
                "Position outside metadata range, refetching from position"
            );
            let url = with_start_position(&request_url, position)?;
            manifest = fetch_manifest(state, &url).await?;
        }
    }

    let merged = Arc::new(state.cache.merge(manifest).await);
    let stats = state.cache.stats().await;
    debug!(
        ad_breaks = merged.ad_breaks.len(),
        stats = %stats,
        "Published merged manifest"
    );
    state.publish_manifest(merged.clone());

    let fired =
        reconcile_played_events(&merged, &state.cache, &state.played, &state.progress).await;
    if fired > 0 {
        state.publish_manifest(Arc::new(state.cache.snapshot().await));
    }
    Ok(fired)
}

async fn fetch_manifest(state: &TrackerState, url: &str) -> Result<Manifest, TrackerError> {
    let text = state.fetcher.fetch_manifest_text(url).await?;
    Ok(Manifest::parse(&text)?)
}

/// Fire every unfired time-based event whose position is known to have been
/// played, e.g. because its metadata arrived after playback passed it.
pub async fn reconcile_played_events(
    manifest: &Manifest,
    cache: &MetadataCache,
    played: &PlayedRangeTracker,
    progress: &EventHub<AdProgress>,
) -> usize {
    let mut fired = 0;

    for (ad_break, ad, tracking) in manifest.trackings() {
        if tracking.fired || !tracking.event.is_time_based() {
            continue;
        }
        if !played.was_played(tracking.start_time).await {
            continue;
        }

        let outcome = cache.mark_fired(tracking, &ad_break.id, &ad.id).await;
        if !outcome.should_announce() {
            continue;
        }

        info!(
            event = %tracking.event,
            start_time = tracking.start_time,
            ad_break = %ad_break.id,
            ad = %ad.id,
            "Late-firing played event"
        );
        let mut announced = tracking.clone();
        announced.fired = true;
        progress.publish(&AdProgress::fired(ad_break, ad, &announced));
        fired += 1;
    }

    fired
}
