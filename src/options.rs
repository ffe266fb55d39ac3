//! Client configuration.
//!
//! `ClientOptions` carries everything `Prefab::init` needs. Defaults point
//! at the hosted service; every field can be overridden with the `with_*`
//! builders.

use std::time::Duration;

use tracing::debug;

use crate::api::CollectContextMode;
use crate::client::Bootstrap;

/// Environment variable to disable usage telemetry
pub const DISABLE_TELEMETRY_ENV: &str = "PREFAB_DISABLE_TELEMETRY";

/// Environment variable holding the API key (read by the CLI)
pub const API_KEY_ENV: &str = "PREFAB_API_KEY";

/// Evaluation endpoints, tried in order
pub const DEFAULT_ENDPOINTS: [&str; 2] = [
    "https://api-prefab-cloud.global.ssl.fastly.net/api/v1",
    "https://api.prefab.cloud/api/v1",
];

pub const DEFAULT_TELEMETRY_ENDPOINT: &str = "https://telemetry.prefab.cloud/api/v1";

/// Per-attempt timeout for the last endpoint (and the telemetry POST)
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(10_000);

/// Per-attempt timeout cap for every endpoint except the last
pub const DEFAULT_EARLY_TIMEOUT_CEILING: Duration = Duration::from_millis(2_000);

pub const DEFAULT_MAX_KEYS: usize = 100_000;

pub const DEFAULT_LOGGER_SYNC_INTERVAL: Duration = Duration::from_secs(30);

/// Default client version (from Cargo.toml)
const DEFAULT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build the value of the client version header
pub fn default_client_version() -> String {
    format!("prefab-cloud-rust-{}", DEFAULT_VERSION)
}

/// Check if telemetry is enabled
pub fn is_telemetry_enabled() -> bool {
    match std::env::var(DISABLE_TELEMETRY_ENV) {
        Ok(val) => {
            let val_lower = val.to_lowercase();
            !matches!(val_lower.as_str(), "1" | "true" | "yes" | "on")
        }
        Err(_) => true,
    }
}

/// Options for a `Prefab` client.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub api_key: String,
    pub endpoints: Vec<String>,
    pub telemetry_endpoint: String,
    pub timeout: Duration,
    pub early_timeout_ceiling: Duration,
    pub collect_context_mode: CollectContextMode,
    pub collect_evaluation_summaries: bool,
    pub max_evaluation_summary_keys: usize,
    /// `None` flushes on an exponential backoff schedule.
    pub evaluation_summary_interval: Option<Duration>,
    pub collect_logger_names: bool,
    pub max_logger_names: usize,
    pub logger_sync_interval: Option<Duration>,
    pub client_version: String,
    /// Pre-fetched evaluations used instead of the first network load when
    /// their context matches.
    pub bootstrap: Option<Bootstrap>,
}

impl ClientOptions {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            endpoints: DEFAULT_ENDPOINTS.iter().map(|e| e.to_string()).collect(),
            telemetry_endpoint: DEFAULT_TELEMETRY_ENDPOINT.to_string(),
            timeout: DEFAULT_TIMEOUT,
            early_timeout_ceiling: DEFAULT_EARLY_TIMEOUT_CEILING,
            collect_context_mode: CollectContextMode::default(),
            collect_evaluation_summaries: true,
            max_evaluation_summary_keys: DEFAULT_MAX_KEYS,
            evaluation_summary_interval: None,
            collect_logger_names: false,
            max_logger_names: DEFAULT_MAX_KEYS,
            logger_sync_interval: Some(DEFAULT_LOGGER_SYNC_INTERVAL),
            client_version: default_client_version(),
            bootstrap: None,
        }
    }

    pub fn with_endpoints<I, S>(mut self, endpoints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.endpoints = endpoints.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_telemetry_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.telemetry_endpoint = endpoint.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_early_timeout_ceiling(mut self, ceiling: Duration) -> Self {
        self.early_timeout_ceiling = ceiling;
        self
    }

    pub fn with_collect_context_mode(mut self, mode: CollectContextMode) -> Self {
        self.collect_context_mode = mode;
        self
    }

    pub fn with_evaluation_summaries(mut self, enabled: bool) -> Self {
        self.collect_evaluation_summaries = enabled;
        self
    }

    pub fn with_evaluation_summary_interval(mut self, interval: Option<Duration>) -> Self {
        self.evaluation_summary_interval = interval;
        self
    }

    pub fn with_logger_names(mut self, enabled: bool) -> Self {
        self.collect_logger_names = enabled;
        self
    }

    pub fn with_client_version(mut self, version: impl Into<String>) -> Self {
        self.client_version = version.into();
        self
    }

    pub fn with_bootstrap(mut self, bootstrap: Bootstrap) -> Self {
        self.bootstrap = Some(bootstrap);
        self
    }

    /// Telemetry switches after applying `PREFAB_DISABLE_TELEMETRY`.
    pub(crate) fn effective_telemetry(&self) -> (bool, bool) {
        if !is_telemetry_enabled() {
            debug!("Telemetry disabled via {}", DISABLE_TELEMETRY_ENV);
            return (false, false);
        }
        (self.collect_evaluation_summaries, self.collect_logger_names)
    }
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self::new(String::new())
    }
}
