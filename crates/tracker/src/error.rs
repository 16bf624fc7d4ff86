use adtrack_metadata::MetadataError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("metadata endpoint returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid metadata URL: {0}")]
    InvalidUrl(String),
}

#[derive(Error, Debug)]
pub enum TrackerError {
    /// A fetch or parse failure inside the metadata loop; the loop keeps going
    #[error("metadata error: {message}")]
    Metadata { message: String },

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("failed to parse manifest: {0}")]
    Parse(#[from] MetadataError),

    #[error("session init failed: {message}")]
    SessionInit { message: String, recoverable: bool },

    #[error("no session prepared")]
    SessionNotPrepared,

    #[error("tracker is already running")]
    AlreadyRunning,

    #[error("invalid tracker config: {0}")]
    InvalidConfig(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

impl TrackerError {
    /// Whether retrying the same operation later can succeed
    pub fn is_recoverable(&self) -> bool {
        match self {
            TrackerError::Metadata { .. } | TrackerError::Fetch(_) | TrackerError::Parse(_) => {
                true
            }
            TrackerError::SessionInit { recoverable, .. } => *recoverable,
            TrackerError::SessionNotPrepared
            | TrackerError::AlreadyRunning
            | TrackerError::InvalidConfig(_)
            | TrackerError::InvalidUrl(_) => false,
        }
    }

    pub(crate) fn metadata(err: impl std::fmt::Display) -> Self {
        TrackerError::Metadata {
            message: err.to_string(),
        }
    }
}
