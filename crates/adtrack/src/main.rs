//! adtrack: Follow a live stream's ad schedule from the command line
//!
//! Polls the ad metadata endpoint for a session, simulates a player that
//! plays from a start position at normal speed, and logs every ad break
//! transition and tracking event the tracker announces.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use clap::Parser;
use tokio::time::Instant;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use adtrack_metadata::TrackerConfig;
use adtrack_tracker::{AdBreakEvent, AdTracker, HttpManifestFetcher, Player, SessionInfo};

#[derive(Parser, Debug)]
#[command(name = "adtrack")]
#[command(about = "Client-side ad event tracker")]
struct Args {
    /// Manifest URL carrying the session id, e.g. https://cdn/live/index.mpd?sessid=abc
    #[arg(long, env = "ADTRACK_MANIFEST_URL", conflicts_with = "metadata_url")]
    manifest_url: Option<String>,

    /// Ad metadata endpoint, used together with --session-id
    #[arg(long, env = "ADTRACK_METADATA_URL", requires = "session_id")]
    metadata_url: Option<String>,

    #[arg(long, env = "ADTRACK_SESSION_ID")]
    session_id: Option<String>,

    /// Simulated playback position to start from
    #[arg(long, default_value_t = 0)]
    start_position_ms: i64,

    /// Path to tracker configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

/// Player that advances in real time at normal speed from a fixed position
struct ClockPlayer {
    start_position_ms: i64,
    started: Instant,
}

impl ClockPlayer {
    fn new(start_position_ms: i64) -> Self {
        Self {
            start_position_ms,
            started: Instant::now(),
        }
    }
}

#[async_trait]
impl Player for ClockPlayer {
    async fn current_position_ms(&self) -> i64 {
        let elapsed = self.started.elapsed().as_millis() as i64;
        self.start_position_ms.saturating_add(elapsed)
    }

    async fn presentation_start_time_ms(&self) -> i64 {
        0
    }

    async fn playback_rate(&self) -> f32 {
        1.0
    }

    async fn duration_ms(&self) -> i64 {
        0
    }

    async fn audio_volume(&self) -> f32 {
        1.0
    }

    async fn is_paused(&self) -> bool {
        false
    }
}

fn session_from(args: &Args) -> anyhow::Result<SessionInfo> {
    if let Some(manifest_url) = &args.manifest_url {
        return Ok(SessionInfo::from_manifest_url(manifest_url)?);
    }
    match (&args.metadata_url, &args.session_id) {
        (Some(url), Some(session_id)) => Ok(SessionInfo::new(url, session_id)),
        _ => anyhow::bail!("either --manifest-url or --metadata-url with --session-id is required"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => TrackerConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => TrackerConfig::default(),
    };
    let session = session_from(&args)?;

    let fetcher = HttpManifestFetcher::new(config.fetch_timeout())?;
    let player = ClockPlayer::new(args.start_position_ms);
    let tracker = AdTracker::new(Arc::new(player), Arc::new(fetcher), config);

    let mut ad_breaks = tracker.subscribe_ad_breaks();
    let mut progress = tracker.subscribe_progress();
    let mut errors = tracker.subscribe_errors();

    tracker.prepare(session);
    tracker.start().await?;
    info!(start_position_ms = args.start_position_ms, "Tracking ads, Ctrl+C to stop");

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Received shutdown signal");
                break;
            }
            Some(event) = ad_breaks.recv() => match event {
                AdBreakEvent::AdBreakChanged(Some(b)) => {
                    info!(ad_break = %b.id, start_time = b.start_time, duration = b.duration, "Ad break")
                }
                AdBreakEvent::AdBreakChanged(None) => info!("Ad break ended"),
                AdBreakEvent::AdChanged(Some(ad)) => {
                    info!(ad = %ad.id, start_time = ad.start_time, duration = ad.duration, "Ad")
                }
                AdBreakEvent::AdChanged(None) => info!("No current ad"),
                AdBreakEvent::TrackingChanged(tracking) => {
                    info!(events = tracking.map(|t| t.len()).unwrap_or(0), "Tracking set")
                }
            },
            Some(p) = progress.recv() => {
                info!(
                    event = %p.tracking.event,
                    ad_break = p.ad_break.as_ref().map(|b| b.id.as_str()).unwrap_or("-"),
                    ad = p.ad.as_ref().map(|a| a.id.as_str()).unwrap_or("-"),
                    urls = ?p.tracking.urls,
                    "Tracking event"
                );
            }
            Some(e) = errors.recv() => {
                warn!(error = %e, recoverable = e.is_recoverable(), "Tracker error");
            }
        }
    }

    tracker.stop().await;
    info!(stats = %tracker.cache_stats().await, "Stopped");
    Ok(())
}
