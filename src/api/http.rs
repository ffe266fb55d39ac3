use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::Client;
use std::time::Duration;
use url::Url;

/// Header carrying the client name and version
pub const CLIENT_VERSION_HEADER: &str = "X-PrefabCloud-Client-Version";

/// `Basic base64("u:" + api_key)`
pub fn auth_header(api_key: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("u:{}", api_key)))
}

/// Shared HTTP client. Timeouts are applied per attempt, not here.
pub(crate) fn build_http_client() -> Result<Client, reqwest::Error> {
    Client::builder().build()
}

/// Timeout for the attempt at `index` out of `count` endpoints.
///
/// Every endpoint but the last is capped at `early_ceiling` so failover is
/// quick; the last one gets the full `timeout`.
pub(super) fn attempt_timeout(
    index: usize,
    count: usize,
    timeout: Duration,
    early_ceiling: Duration,
) -> Duration {
    if index + 1 < count {
        timeout.min(early_ceiling)
    } else {
        timeout
    }
}

/// Join `root` and `path` with exactly one slash and validate the result.
pub(super) fn build_url(root: &str, path: &str) -> Result<Url, url::ParseError> {
    let root = root.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    Url::parse(&format!("{}/{}", root, path))
}
