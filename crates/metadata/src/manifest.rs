use serde::{Deserialize, Deserializer, Serialize};

use crate::error::MetadataError;
use crate::tracking::{EventKind, Tracking};

/// Window of playback positions a fetched manifest is valid for.
/// `{0, 0}` means the server did not say.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataRange {
    #[serde(default, deserialize_with = "null_as_default")]
    pub start: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub end: i64,
}

impl DataRange {
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    pub fn is_known(&self) -> bool {
        self.start != 0 && self.end != 0
    }

    pub fn contains(&self, position: i64) -> bool {
        position >= self.start && position <= self.end
    }
}

/// Schedule of ad breaks returned by the metadata endpoint
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    #[serde(default, deserialize_with = "null_as_default")]
    pub data_range: DataRange,
    #[serde(default, deserialize_with = "null_as_default")]
    pub ad_breaks: Vec<AdBreak>,
}

impl Manifest {
    pub fn new(data_range: DataRange, ad_breaks: Vec<AdBreak>) -> Self {
        Self {
            data_range,
            ad_breaks,
        }
    }

    /// Parse a manifest document
    pub fn parse(text: &str) -> Result<Self, MetadataError> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        if !value.is_object() {
            return Err(MetadataError::Json(serde::de::Error::custom(
                "manifest must be a JSON object",
            )));
        }
        Ok(serde_json::from_value(value)?)
    }

    pub fn ad_break(&self, id: &str) -> Option<&AdBreak> {
        self.ad_breaks.iter().find(|b| b.id == id)
    }

    /// Every tracking in schedule order, with its owning ad break and ad
    pub fn trackings(&self) -> impl Iterator<Item = (&AdBreak, &Ad, &Tracking)> {
        self.ad_breaks.iter().flat_map(|ad_break| {
            ad_break.ads.iter().flat_map(move |ad| {
                ad.tracking.iter().map(move |tracking| (ad_break, ad, tracking))
            })
        })
    }
}

/// A scheduled interruption containing one or more ads.
///
/// `id` is stable across refetches; a refetched break with the same id is the
/// same break with possibly refined timing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdBreak {
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub start_time: i64,
    /// Milliseconds; the wire value may be fractional
    #[serde(default, deserialize_with = "null_as_default")]
    pub duration: f64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub ads: Vec<Ad>,
}

impl AdBreak {
    pub fn end_time(&self) -> i64 {
        self.start_time.saturating_add(self.duration as i64)
    }

    /// Whether `position` lies in `[start, end + end_tolerance]`
    pub fn covers(&self, position: i64, end_tolerance: i64) -> bool {
        position >= self.start_time && position <= self.end_time().saturating_add(end_tolerance)
    }

    pub fn ad(&self, id: &str) -> Option<&Ad> {
        self.ads.iter().find(|a| a.id == id)
    }

    pub fn ad_mut(&mut self, id: &str) -> Option<&mut Ad> {
        self.ads.iter_mut().find(|a| a.id == id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ad {
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub start_time: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub duration: f64,
    #[serde(default, rename = "trackingEvents", deserialize_with = "null_as_default")]
    pub tracking: Vec<Tracking>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub ad_verifications: Vec<AdVerification>,
    /// Icon descriptors are rendered by the UI layer and kept as raw JSON
    #[serde(default, deserialize_with = "null_as_default")]
    pub icons: Vec<serde_json::Value>,
}

impl Ad {
    pub fn end_time(&self) -> i64 {
        self.start_time.saturating_add(self.duration as i64)
    }

    pub fn covers(&self, position: i64, end_tolerance: i64) -> bool {
        position >= self.start_time && position <= self.end_time().saturating_add(end_tolerance)
    }

    /// Beacon URLs of every tracking of the given kind, in manifest order
    pub fn urls_for(&self, kind: EventKind) -> Vec<String> {
        self.tracking
            .iter()
            .filter(|t| t.event == kind)
            .flat_map(|t| t.urls.iter().cloned())
            .collect()
    }
}

/// Verification script descriptor, handed to the verification SDK untouched
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdVerification {
    #[serde(default, deserialize_with = "null_as_default")]
    pub vendor: String,
    #[serde(default)]
    pub java_script_resource: Option<JavaScriptResource>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub verification_parameters: String,
}

impl AdVerification {
    pub fn script_url(&self) -> Option<&str> {
        self.java_script_resource.as_ref().map(|r| r.uri.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JavaScriptResource {
    #[serde(default, deserialize_with = "null_as_default")]
    pub uri: String,
}

/// Treat an explicit JSON `null` like a missing field
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
