//! Record of playback positions visited at normal speed

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::debug;

/// Minimum position advance between two prune passes
const PRUNE_EVERY_MS: i64 = 60_000;

/// Closed interval of played positions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PlayedRange {
    pub start: i64,
    pub end: i64,
}

impl PlayedRange {
    fn point(position: i64) -> Self {
        Self {
            start: position,
            end: position,
        }
    }

    pub fn contains(&self, position: i64) -> bool {
        position >= self.start && position <= self.end
    }

    fn is_near(&self, position: i64, tolerance: i64) -> bool {
        position >= self.start.saturating_sub(tolerance)
            && position <= self.end.saturating_add(tolerance)
    }
}

#[derive(Debug, Default)]
struct State {
    ranges: Vec<PlayedRange>,
    last_prune_position: Option<i64>,
}

pub struct PlayedRangeTracker {
    state: Mutex<State>,
    /// Samples closer than this to a range extend it
    tolerance_ms: i64,
    retention_ms: i64,
}

impl PlayedRangeTracker {
    pub fn new(tolerance_ms: i64, retention_ms: i64) -> Self {
        Self {
            state: Mutex::new(State::default()),
            tolerance_ms,
            retention_ms,
        }
    }

    pub async fn record_position(&self, position: i64) {
        if position < 0 {
            return;
        }

        let mut state = self.state.lock().await;

        if state.ranges.is_empty() {
            state.ranges.push(PlayedRange::point(position));
            state.last_prune_position = Some(position);
            debug!(position, "Started played range");
            return;
        }

        let tolerance = self.tolerance_ms;
        match state.ranges.iter_mut().find(|r| r.is_near(position, tolerance)) {
            Some(range) => {
                range.start = range.start.min(position);
                range.end = range.end.max(position);
            }
            None => {
                state.ranges.push(PlayedRange::point(position));
                debug!(position, "Opened new played range");
            }
        }

        state.ranges.sort_by_key(|r| r.start);
        coalesce(&mut state.ranges, tolerance);
        self.prune_if_due(&mut state, position);
    }

    pub async fn was_played(&self, position: i64) -> bool {
        self.state
            .lock()
            .await
            .ranges
            .iter()
            .any(|r| r.contains(position))
    }

    pub async fn ranges(&self) -> Vec<PlayedRange> {
        self.state.lock().await.ranges.clone()
    }

    pub async fn clear(&self) {
        let mut state = self.state.lock().await;
        state.ranges.clear();
        state.last_prune_position = None;
    }

    fn prune_if_due(&self, state: &mut State, position: i64) {
        if let Some(last) = state.last_prune_position {
            if position - last < PRUNE_EVERY_MS {
                return;
            }
        }

        let cutoff = position.saturating_sub(self.retention_ms);
        let before = state.ranges.len();
        state.ranges.retain(|r| r.end >= cutoff);
        state.last_prune_position = Some(position);

        let pruned = before - state.ranges.len();
        if pruned > 0 {
            debug!(pruned, remaining = state.ranges.len(), "Pruned played ranges");
        }
    }
}

/// Join sorted ranges whose gap is within `tolerance`
fn coalesce(ranges: &mut Vec<PlayedRange>, tolerance: i64) {
    if ranges.len() <= 1 {
        return;
    }

    let mut merged: Vec<PlayedRange> = Vec::with_capacity(ranges.len());
    for range in ranges.drain(..) {
        match merged.last_mut() {
            Some(current) if current.end.saturating_add(tolerance) >= range.start => {
                current.end = current.end.max(range.end);
            }
            _ => merged.push(range),
        }
    }
    *ranges = merged;
}
