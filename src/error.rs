use thiserror::Error;

/// Failures surfaced by the catalog, the host bridge and the orchestrator.
///
/// None of these ever terminate the process; callers degrade to empty data or
/// turn them into download/install events.
#[derive(Debug, Error)]
pub enum Error {
    #[error("catalog endpoint {url} unreachable: {reason}")]
    Network { url: String, reason: String },

    #[error("unexpected catalog payload: {0}")]
    DataShape(String),

    #[error("download of {filename} failed: {reason}")]
    Download { filename: String, reason: String },

    #[error("installer launch for {path} failed: {reason}")]
    InstallLaunch { path: String, reason: String },

    #[error("no usable download source for {0}")]
    Resolution(String),

    #[error("a download for {0} is already in flight")]
    DownloadInFlight(String),

    #[error("invalid endpoint {url}: {reason}")]
    InvalidEndpoint { url: String, reason: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("host bridge is closed")]
    BridgeClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn network(url: impl Into<String>, reason: impl ToString) -> Self {
        Self::Network {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn invalid_endpoint(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidEndpoint {
            url: url.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
