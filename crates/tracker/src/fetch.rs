//! HTTP manifest fetcher and metadata request URL construction

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;
use url::Url;

use crate::error::FetchError;
use crate::traits::ManifestFetcher;

pub const SESSION_ID_PARAM: &str = "sessid";
pub const START_PARAM: &str = "start";

/// reqwest-backed [`ManifestFetcher`]
pub struct HttpManifestFetcher {
    client: Client,
}

impl HttpManifestFetcher {
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    /// Reuse an existing client (shared connection pool)
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ManifestFetcher for HttpManifestFetcher {
    async fn fetch_manifest_text(&self, url: &str) -> Result<String, FetchError> {
        debug!(url = %url, "Fetching ad metadata");

        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::Status { status, body });
        }

        Ok(response.text().await?)
    }
}

/// Metadata request URL carrying the session id.
///
/// The URL is returned untouched when it already has a `sessid` parameter
/// (matched case-insensitively).
pub fn session_url(metadata_url: &str, session_id: &str) -> Result<String, FetchError> {
    let mut url = parse(metadata_url)?;
    let has_session = url
        .query_pairs()
        .any(|(k, _)| k.eq_ignore_ascii_case(SESSION_ID_PARAM));
    if !has_session {
        url.query_pairs_mut().append_pair(SESSION_ID_PARAM, session_id);
    }
    Ok(url.into())
}

/// Ask the server for the window starting at `position`
pub fn with_start_position(request_url: &str, position: i64) -> Result<String, FetchError> {
    let mut url = parse(request_url)?;
    url.query_pairs_mut()
        .append_pair(START_PARAM, &position.to_string());
    Ok(url.into())
}

fn parse(raw: &str) -> Result<Url, FetchError> {
    Url::parse(raw).map_err(|e| FetchError::InvalidUrl(format!("{raw}: {e}")))
}
