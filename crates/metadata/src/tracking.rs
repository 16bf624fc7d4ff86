use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeSet;
use std::hash::{DefaultHasher, Hash, Hasher};

/// Kinds of tracking events carried by an ad
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventKind {
    Impression,
    Start,
    FirstQuartile,
    Midpoint,
    ThirdQuartile,
    Complete,
    ClickAbstractType,
    ClickTracking,
    Pause,
    Resume,
    Mute,
    Unmute,
    Rewind,
    Skip,
    PlayerExpand,
    PlayerCollapse,
    BufferStart,
    BufferEnd,
    Volume,
    /// Synthetic: the tracked session was stopped explicitly
    Skipped,
    /// Synthetic: playback left the ad break
    Stopped,
    Unknown,
}

impl EventKind {
    /// Map a wire event name, ignoring case. Unrecognized names become `Unknown`.
    ///
    /// The synthetic kinds are never produced from the wire.
    pub fn from_wire(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "impression" => EventKind::Impression,
            "start" => EventKind::Start,
            "firstquartile" => EventKind::FirstQuartile,
            "midpoint" => EventKind::Midpoint,
            "thirdquartile" => EventKind::ThirdQuartile,
            "complete" => EventKind::Complete,
            "clickabstracttype" => EventKind::ClickAbstractType,
            "clicktracking" => EventKind::ClickTracking,
            "pause" => EventKind::Pause,
            "resume" => EventKind::Resume,
            "mute" => EventKind::Mute,
            "unmute" => EventKind::Unmute,
            "rewind" => EventKind::Rewind,
            "skip" => EventKind::Skip,
            "playerexpand" => EventKind::PlayerExpand,
            "playercollapse" => EventKind::PlayerCollapse,
            "bufferstart" => EventKind::BufferStart,
            "bufferend" => EventKind::BufferEnd,
            "volume" => EventKind::Volume,
            _ => EventKind::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Impression => "impression",
            EventKind::Start => "start",
            EventKind::FirstQuartile => "firstQuartile",
            EventKind::Midpoint => "midpoint",
            EventKind::ThirdQuartile => "thirdQuartile",
            EventKind::Complete => "complete",
            EventKind::ClickAbstractType => "clickAbstractType",
            EventKind::ClickTracking => "clickTracking",
            EventKind::Pause => "pause",
            EventKind::Resume => "resume",
            EventKind::Mute => "mute",
            EventKind::Unmute => "unmute",
            EventKind::Rewind => "rewind",
            EventKind::Skip => "skip",
            EventKind::PlayerExpand => "playerExpand",
            EventKind::PlayerCollapse => "playerCollapse",
            EventKind::BufferStart => "bufferStart",
            EventKind::BufferEnd => "bufferEnd",
            EventKind::Volume => "volume",
            EventKind::Skipped => "skipped",
            EventKind::Stopped => "stopped",
            EventKind::Unknown => "unknown",
        }
    }

    /// Whether the event is fired by playback position crossing its start time.
    /// These are the only kinds the time-window and late-fire paths may fire.
    pub fn is_time_based(&self) -> bool {
        matches!(
            self,
            EventKind::Impression
                | EventKind::Start
                | EventKind::FirstQuartile
                | EventKind::Midpoint
                | EventKind::ThirdQuartile
                | EventKind::Complete
        )
    }

    /// Whether the event only fires on an explicit player action
    pub fn is_player_initiated(&self) -> bool {
        matches!(
            self,
            EventKind::Pause
                | EventKind::Resume
                | EventKind::Mute
                | EventKind::Unmute
                | EventKind::Rewind
                | EventKind::Skip
                | EventKind::PlayerExpand
                | EventKind::PlayerCollapse
                | EventKind::BufferStart
                | EventKind::BufferEnd
                | EventKind::Volume
        ) || self.is_click()
    }

    pub fn is_click(&self) -> bool {
        matches!(self, EventKind::ClickTracking | EventKind::ClickAbstractType)
    }

    pub fn is_synthetic(&self) -> bool {
        matches!(self, EventKind::Skipped | EventKind::Stopped)
    }
}

impl From<String> for EventKind {
    fn from(s: String) -> Self {
        EventKind::from_wire(&s)
    }
}

impl From<EventKind> for String {
    fn from(kind: EventKind) -> Self {
        kind.as_str().to_string()
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A measurement point inside an ad, with the beacon URLs to notify when it occurs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tracking {
    #[serde(default = "unknown_kind", deserialize_with = "null_as_unknown")]
    pub event: EventKind,
    #[serde(default, rename = "signalingUrls", deserialize_with = "string_list")]
    pub urls: Vec<String>,
    #[serde(default, deserialize_with = "crate::manifest::null_as_default")]
    pub start_time: i64,
    /// Set once the event has been announced; never read from the wire
    #[serde(skip)]
    pub fired: bool,
}

fn unknown_kind() -> EventKind {
    EventKind::Unknown
}

fn null_as_unknown<'de, D>(deserializer: D) -> Result<EventKind, D::Error>
where
    D: Deserializer<'de>,
{
    let name: Option<String> = Option::deserialize(deserializer)?;
    Ok(name.map(EventKind::from).unwrap_or(EventKind::Unknown))
}

/// Keep only string entries; a null list is empty
fn string_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let values: Option<Vec<serde_json::Value>> = Option::deserialize(deserializer)?;
    Ok(values
        .unwrap_or_default()
        .into_iter()
        .filter_map(|v| match v {
            serde_json::Value::String(s) => Some(s),
            _ => None,
        })
        .collect())
}

impl Tracking {
    pub fn new(event: EventKind, urls: Vec<String>, start_time: i64) -> Self {
        Self {
            event,
            urls,
            start_time,
            fired: false,
        }
    }

    /// A URL-less event that never appears in a manifest (`Stopped`, `Skipped`)
    pub fn synthetic(event: EventKind) -> Self {
        Self::new(event, Vec::new(), 0)
    }

    /// Identity used to carry fired state across manifest refetches
    pub fn key(&self) -> TrackingKey {
        TrackingKey {
            start_time: self.start_time,
            event: self.event,
            url_digest: url_set_digest(&self.urls),
        }
    }
}

/// Structural identity of a tracking event: `(start_time, kind, digest of URL set)`.
///
/// Two trackings parsed from different fetches compare equal here when they
/// describe the same logical event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TrackingKey {
    pub start_time: i64,
    pub event: EventKind,
    pub url_digest: u64,
}

/// Order-insensitive, duplicate-insensitive digest of a URL list
fn url_set_digest(urls: &[String]) -> u64 {
    let set: BTreeSet<&str> = urls.iter().map(String::as_str).collect();
    let mut hasher = DefaultHasher::new();
    set.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_kind_is_case_insensitive() {
        assert_eq!(EventKind::from_wire("firstQuartile"), EventKind::FirstQuartile);
        assert_eq!(EventKind::from_wire("FIRSTQUARTILE"), EventKind::FirstQuartile);
        assert_eq!(EventKind::from_wire("Impression"), EventKind::Impression);
        assert_eq!(EventKind::from_wire("clickTracking"), EventKind::ClickTracking);
        assert_eq!(EventKind::from_wire("playerCollapse"), EventKind::PlayerCollapse);
    }

    #[test]
    fn test_unrecognized_and_synthetic_names_map_to_unknown() {
        assert_eq!(EventKind::from_wire("creativeView"), EventKind::Unknown);
        assert_eq!(EventKind::from_wire(""), EventKind::Unknown);
        assert_eq!(EventKind::from_wire("stopped"), EventKind::Unknown);
        assert_eq!(EventKind::from_wire("skipped"), EventKind::Unknown);
    }

    #[test]
    fn test_classification() {
        assert!(EventKind::Impression.is_time_based());
        assert!(EventKind::Complete.is_time_based());
        assert!(!EventKind::Pause.is_time_based());
        assert!(!EventKind::Unknown.is_time_based());
        assert!(!EventKind::Stopped.is_time_based());

        for kind in [
            EventKind::Pause,
            EventKind::Resume,
            EventKind::Mute,
            EventKind::Unmute,
            EventKind::ClickTracking,
            EventKind::ClickAbstractType,
        ] {
            assert!(kind.is_player_initiated(), "{kind} should be player initiated");
        }
        assert!(!EventKind::Midpoint.is_player_initiated());
        assert!(EventKind::Skipped.is_synthetic());
    }

    #[test]
    fn test_key_ignores_url_order_and_duplicates() {
        let a = Tracking::new(
            EventKind::Start,
            vec!["http://a".into(), "http://b".into()],
            1000,
        );
        let b = Tracking::new(
            EventKind::Start,
            vec!["http://b".into(), "http://a".into(), "http://a".into()],
            1000,
        );
        assert_eq!(a.key(), b.key());
    }

    #[test]
    fn test_key_distinguishes_time_kind_and_urls() {
        let base = Tracking::new(EventKind::Start, vec!["http://a".into()], 1000);
        let later = Tracking::new(EventKind::Start, vec!["http://a".into()], 1001);
        let other_kind = Tracking::new(EventKind::Impression, vec!["http://a".into()], 1000);
        let other_url = Tracking::new(EventKind::Start, vec!["http://c".into()], 1000);

        assert_ne!(base.key(), later.key());
        assert_ne!(base.key(), other_kind.key());
        assert_ne!(base.key(), other_url.key());
    }

    #[test]
    fn test_key_ignores_fired_flag() {
        let mut fired = Tracking::new(EventKind::Midpoint, vec!["http://m".into()], 5000);
        let fresh = fired.clone();
        fired.fired = true;
        assert_eq!(fired.key(), fresh.key());
    }

    #[test]
    fn test_parse_tracking_drops_non_string_urls() {
        let json = r#"{"event": "MidPoint", "startTime": 42, "signalingUrls": ["http://x", 7, null]}"#;
        let tracking: Tracking = serde_json::from_str(json).unwrap();
        assert_eq!(tracking.event, EventKind::Midpoint);
        assert_eq!(tracking.start_time, 42);
        assert_eq!(tracking.urls, vec!["http://x".to_string()]);
        assert!(!tracking.fired);
    }

    #[test]
    fn test_parse_tracking_with_missing_fields() {
        let tracking: Tracking = serde_json::from_str(r#"{"signalingUrls": null}"#).unwrap();
        assert_eq!(tracking.event, EventKind::Unknown);
        assert_eq!(tracking.start_time, 0);
        assert!(tracking.urls.is_empty());
    }
}
