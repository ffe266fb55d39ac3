//! Evaluation fetch with endpoint failover.
//!
//! Endpoints are tried strictly in order, one at a time. Every endpoint but
//! the last gets a shortened timeout so a slow CDN edge does not eat the
//! whole budget. A new `load()` cancels whatever the previous `load()` on the
//! same loader still has in flight; the cancelled call settles with
//! `LoadError::Superseded`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::Duration;

use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::Client;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use super::http::{attempt_timeout, auth_header, CLIENT_VERSION_HEADER};
use super::types::CollectContextMode;
use crate::codec::EVALUATIONS_KEY;
use crate::context::Context;
use crate::error::LoadError;
use crate::options::ClientOptions;

pub const EVAL_WITH_CONTEXT_PATH: &str = "configs/eval-with-context";

/// Fetches evaluations for one bound context.
pub struct Loader {
    client: Client,
    api_key: String,
    endpoints: Vec<String>,
    context: RwLock<Context>,
    timeout: Duration,
    early_timeout_ceiling: Duration,
    client_version: String,
    collect_context_mode: CollectContextMode,
    generation: AtomicU64,
    /// Token of the current `load()`, tagged with its generation.
    in_flight: Mutex<Option<(u64, CancellationToken)>>,
}

impl Loader {
    pub fn new(client: Client, options: &ClientOptions, context: Context) -> Self {
        Self {
            client,
            api_key: options.api_key.clone(),
            endpoints: options.endpoints.clone(),
            context: RwLock::new(context),
            timeout: options.timeout,
            early_timeout_ceiling: options.early_timeout_ceiling,
            client_version: options.client_version.clone(),
            collect_context_mode: options.collect_context_mode,
            generation: AtomicU64::new(0),
            in_flight: Mutex::new(None),
        }
    }

    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    pub fn context(&self) -> Context {
        match self.context.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Rebind the context used by subsequent loads.
    pub fn set_context(&self, context: Context) {
        match self.context.write() {
            Ok(mut guard) => *guard = context,
            Err(poisoned) => *poisoned.into_inner() = context,
        }
    }

    /// `{endpoint}/configs/eval-with-context/{ctx}?collectContextMode=..`
    pub fn url(&self, endpoint: &str) -> String {
        format!(
            "{}/{}/{}?collectContextMode={}",
            endpoint.trim_end_matches('/'),
            EVAL_WITH_CONTEXT_PATH,
            self.context().encode_url_safe(),
            self.collect_context_mode
        )
    }

    /// Timeout applied to the attempt against `endpoints[index]`.
    pub fn timeout_for(&self, index: usize) -> Duration {
        attempt_timeout(
            index,
            self.endpoints.len(),
            self.timeout,
            self.early_timeout_ceiling,
        )
    }

    /// Fetch the evaluation payload from the first endpoint that answers.
    ///
    /// Returns the full `{evaluations, ..}` body. On exhaustion the error of
    /// the last attempt is returned.
    pub async fn load(&self) -> Result<Value, LoadError> {
        if self.endpoints.is_empty() {
            return Err(LoadError::NoEndpoints);
        }

        let (generation, token) = self.begin();
        let result = self.load_in_order(&token).await;
        self.finish(generation);
        result
    }

    /// Cancel the previous in-flight load, if any, and register a new one.
    fn begin(&self) -> (u64, CancellationToken) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let token = CancellationToken::new();

        let previous = {
            let mut in_flight = match self.in_flight.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            in_flight.replace((generation, token.clone()))
        };

        // Taken out of the slot, so each token is cancelled at most once.
        if let Some((previous_generation, previous_token)) = previous {
            debug!(
                "Cancelling load #{} superseded by load #{}",
                previous_generation, generation
            );
            previous_token.cancel();
        }

        (generation, token)
    }

    fn finish(&self, generation: u64) {
        let mut in_flight = match self.in_flight.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if matches!(in_flight.as_ref(), Some((current, _)) if *current == generation) {
            *in_flight = None;
        }
    }

    async fn load_in_order(&self, token: &CancellationToken) -> Result<Value, LoadError> {
        let mut last_error = LoadError::NoEndpoints;

        for (index, endpoint) in self.endpoints.iter().enumerate() {
            let timeout = self.timeout_for(index);
            debug!(
                "Loading configs from {} (attempt {}/{}, timeout {:?})",
                endpoint,
                index + 1,
                self.endpoints.len(),
                timeout
            );

            match self.attempt(endpoint, timeout, token).await {
                Ok(payload) => return Ok(payload),
                Err(LoadError::Superseded) => return Err(LoadError::Superseded),
                Err(err) => {
                    if index + 1 < self.endpoints.len() {
                        debug!("{}; failing over to next endpoint", err);
                    } else {
                        warn!("Failed to load configs from all endpoints: {}", err);
                    }
                    last_error = err;
                }
            }
        }

        Err(last_error)
    }

    async fn attempt(
        &self,
        endpoint: &str,
        timeout: Duration,
        token: &CancellationToken,
    ) -> Result<Value, LoadError> {
        // The timer and the in-flight request are both dropped on every path.
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(LoadError::Superseded),
            outcome = tokio::time::timeout(timeout, self.request(endpoint)) => match outcome {
                Ok(result) => result,
                Err(_) => Err(LoadError::Timeout {
                    endpoint: endpoint.to_string(),
                    timeout,
                }),
            },
        }
    }

    async fn request(&self, endpoint: &str) -> Result<Value, LoadError> {
        let url = self.url(endpoint);
        let url = Url::parse(&url).map_err(|source| LoadError::InvalidUrl {
            url: url.clone(),
            source,
        })?;

        let response = self
            .client
            .get(url)
            .header(AUTHORIZATION, auth_header(&self.api_key))
            .header(CLIENT_VERSION_HEADER, &self.client_version)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|source| LoadError::Network {
                endpoint: endpoint.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(LoadError::Status {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await.map_err(|source| LoadError::Network {
            endpoint: endpoint.to_string(),
            source,
        })?;

        parse_envelope(endpoint, &body)
    }
}

/// A 2xx body only counts as success if it carries the evaluations object.
fn parse_envelope(endpoint: &str, body: &[u8]) -> Result<Value, LoadError> {
    let payload: Value =
        serde_json::from_slice(body).map_err(|e| LoadError::InvalidResponse {
            endpoint: endpoint.to_string(),
            reason: e.to_string(),
        })?;

    if !payload
        .get(EVALUATIONS_KEY)
        .is_some_and(Value::is_object)
    {
        return Err(LoadError::InvalidResponse {
            endpoint: endpoint.to_string(),
            reason: format!("missing `{}` object", EVALUATIONS_KEY),
        });
    }

    Ok(payload)
}

impl std::fmt::Debug for Loader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Loader")
            .field("endpoints", &self.endpoints)
            .field("api_key", &"[REDACTED]")
            .field("timeout", &self.timeout)
            .finish()
    }
}
