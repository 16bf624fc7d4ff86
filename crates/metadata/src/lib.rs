//! adtrack-metadata: Ad schedule ("event manifest") types and tracker configuration

pub mod config;
pub mod error;
pub mod manifest;
pub mod tracking;

pub use config::TrackerConfig;
pub use error::MetadataError;
pub use manifest::{Ad, AdBreak, AdVerification, DataRange, Manifest};
pub use tracking::{EventKind, Tracking, TrackingKey};
