//! Typed event fan-out to collaborators

use std::sync::Mutex;

use adtrack_metadata::{Ad, AdBreak, EventKind, Tracking};
use tokio::sync::mpsc;

/// Change of the current ad break, ad or tracking set
#[derive(Debug, Clone, PartialEq)]
pub enum AdBreakEvent {
    AdBreakChanged(Option<AdBreak>),
    AdChanged(Option<Ad>),
    TrackingChanged(Option<Vec<Tracking>>),
}

/// A tracking event that occurred and should be beaconed
#[derive(Debug, Clone, PartialEq)]
pub struct AdProgress {
    pub ad_break: Option<AdBreak>,
    pub ad: Option<Ad>,
    pub tracking: Tracking,
}

impl AdProgress {
    pub fn fired(ad_break: &AdBreak, ad: &Ad, tracking: &Tracking) -> Self {
        Self {
            ad_break: Some(ad_break.clone()),
            ad: Some(ad.clone()),
            tracking: tracking.clone(),
        }
    }

    /// `Stopped`/`Skipped` notification, detached from any ad
    pub fn synthetic(kind: EventKind) -> Self {
        Self {
            ad_break: None,
            ad: None,
            tracking: Tracking::synthetic(kind),
        }
    }
}

/// Fan-out of one event type to any number of subscribers.
///
/// Subscribers whose receiver was dropped are forgotten on the next publish.
pub struct EventHub<E> {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<E>>>,
}

impl<E: Clone> EventHub<E> {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<E> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().push(tx);
        rx
    }

    pub fn publish(&self, event: &E) {
        self.lock().retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<mpsc::UnboundedSender<E>>> {
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<E: Clone> Default for EventHub<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_every_subscriber() {
        let hub = EventHub::new();
        let mut a = hub.subscribe();
        let mut b = hub.subscribe();

        hub.publish(&AdProgress::synthetic(EventKind::Stopped));

        assert_eq!(a.recv().await.unwrap().tracking.event, EventKind::Stopped);
        assert_eq!(b.recv().await.unwrap().tracking.event, EventKind::Stopped);
    }

    #[tokio::test]
    async fn test_dropped_subscriber_is_forgotten() {
        let hub: EventHub<AdBreakEvent> = EventHub::new();
        let kept = hub.subscribe();
        drop(hub.subscribe());
        assert_eq!(hub.subscriber_count(), 2);

        hub.publish(&AdBreakEvent::AdChanged(None));
        assert_eq!(hub.subscriber_count(), 1);
        drop(kept);
    }

    #[test]
    fn test_synthetic_progress_has_no_context() {
        let progress = AdProgress::synthetic(EventKind::Skipped);
        assert!(progress.ad_break.is_none());
        assert!(progress.ad.is_none());
        assert!(progress.tracking.urls.is_empty());
    }
}
