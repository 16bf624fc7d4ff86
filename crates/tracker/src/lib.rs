//! adtrack-tracker: Client-side ad event tracking
//!
//! Polls an ad metadata endpoint, merges each refetched schedule into a
//! cache that remembers which tracking events already fired, follows the
//! player's position through ad breaks and announces every tracking event
//! exactly once, including events whose metadata arrived after playback
//! passed them.

pub mod cache;
pub mod error;
pub mod events;
pub mod fetch;
pub mod loader;
pub mod played_range;
pub mod progress;
pub mod session;
pub mod state;
pub mod test_helpers;
pub mod traits;
pub mod tracker;

pub use cache::{CacheStats, Clock, MarkOutcome, MetadataCache};
pub use error::{FetchError, TrackerError};
pub use events::{AdBreakEvent, AdProgress, EventHub};
pub use fetch::HttpManifestFetcher;
pub use played_range::{PlayedRange, PlayedRangeTracker};
pub use session::SessionInfo;
pub use traits::{ManifestFetcher, Player};
pub use tracker::AdTracker;
