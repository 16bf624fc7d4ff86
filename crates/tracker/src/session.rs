//! Play-session identification

use url::Url;

use crate::error::TrackerError;
use crate::fetch::SESSION_ID_PARAM;

const METADATA_SEGMENT: &str = "metadata";

/// Where to fetch ad metadata for one play session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub metadata_url: String,
    pub session_id: String,
}

impl SessionInfo {
    pub fn new(metadata_url: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            metadata_url: metadata_url.into(),
            session_id: session_id.into(),
        }
    }

    /// Derive the session from a manifest URL that already carries `sessid`.
    ///
    /// The manifest file name (`index.mpd`, `master.m3u8`, ...) is replaced by
    /// `metadata`; the query string is kept.
    pub fn from_manifest_url(manifest_url: &str) -> Result<Self, TrackerError> {
        let mut url = Url::parse(manifest_url)
            .map_err(|e| TrackerError::InvalidUrl(format!("{manifest_url}: {e}")))?;

        let session_id = url
            .query_pairs()
            .find(|(k, _)| k.eq_ignore_ascii_case(SESSION_ID_PARAM))
            .map(|(_, v)| v.into_owned())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| TrackerError::SessionInit {
                message: format!("no {SESSION_ID_PARAM} parameter in {manifest_url}"),
                recoverable: false,
            })?;

        let file_name = url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|segment| is_file_name(segment))
            .map(str::to_string)
            .ok_or_else(|| TrackerError::SessionInit {
                message: format!("no manifest file name in {manifest_url}"),
                recoverable: false,
            })?;

        url.path_segments_mut()
            .map_err(|_| TrackerError::InvalidUrl(manifest_url.to_string()))?
            .pop()
            .push(METADATA_SEGMENT);

        tracing::debug!(file = %file_name, session_id = %session_id, "Derived metadata URL");

        Ok(Self {
            metadata_url: url.into(),
            session_id,
        })
    }
}

/// `name.ext` where the extension is 3 or 4 word characters
fn is_file_name(segment: &str) -> bool {
    match segment.rsplit_once('.') {
        Some((stem, ext)) => {
            !stem.is_empty()
                && (3..=4).contains(&ext.len())
                && ext.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    }
}
