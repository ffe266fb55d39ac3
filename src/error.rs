//! Error types for loading configs and uploading telemetry.

use std::time::Duration;

use thiserror::Error;

/// Failure of a single `Loader::load()` call.
///
/// Every variant except `NoEndpoints` and `Superseded` describes the last
/// attempt made; earlier attempts only show up in the debug log.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("no endpoints configured")]
    NoEndpoints,

    #[error("invalid endpoint URL {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("request to {endpoint} timed out after {timeout:?}")]
    Timeout { endpoint: String, timeout: Duration },

    #[error("request to {endpoint} failed: {source}")]
    Network {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{endpoint} responded with HTTP {status}")]
    Status { endpoint: String, status: u16 },

    #[error("{endpoint} returned an invalid payload: {reason}")]
    InvalidResponse { endpoint: String, reason: String },

    /// A newer `load()` on the same loader cancelled this one.
    #[error("load superseded by a newer request")]
    Superseded,
}

impl LoadError {
    /// Whether this error means the call was cancelled rather than failed.
    pub fn is_superseded(&self) -> bool {
        matches!(self, LoadError::Superseded)
    }
}

/// Telemetry POST that never got a response.
///
/// Non-2xx responses are not errors, see `UploadOutcome`.
#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("invalid telemetry URL {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("telemetry request to {url} failed: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

/// Errors surfaced by the `Prefab` facade.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("client not initialized; call init() first")]
    NotInitialized,

    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),

    #[error(transparent)]
    Load(#[from] LoadError),
}

impl ClientError {
    /// A load cancelled by a newer one; not a failure.
    pub fn is_superseded(&self) -> bool {
        matches!(self, ClientError::Load(e) if e.is_superseded())
    }
}
