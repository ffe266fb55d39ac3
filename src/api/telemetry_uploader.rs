use std::time::Duration;

use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use super::http::{auth_header, build_url, CLIENT_VERSION_HEADER};
use crate::error::TelemetryError;
use crate::options::ClientOptions;

pub const TELEMETRY_PATH: &str = "telemetry";

/// How a telemetry POST settled.
#[derive(Debug, Clone, PartialEq)]
pub enum UploadOutcome {
    /// 2xx; carries the parsed response body (`Null` if it was not JSON).
    Accepted(Value),
    /// Non-2xx. Logged, never surfaced as an error.
    Rejected { status: u16 },
    /// The request hit its timeout and was dropped.
    Aborted,
}

impl UploadOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, UploadOutcome::Accepted(_))
    }
}

/// Posts telemetry events to a single endpoint.
pub struct TelemetryUploader {
    client: Client,
    api_key: String,
    endpoint: String,
    timeout: Duration,
    client_version: String,
}

impl TelemetryUploader {
    pub fn new(client: Client, options: &ClientOptions) -> Self {
        Self {
            client,
            api_key: options.api_key.clone(),
            endpoint: options.telemetry_endpoint.clone(),
            timeout: options.timeout,
            client_version: options.client_version.clone(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// POST `body` to `{endpoint}/telemetry`.
    ///
    /// Only a request that never got a response is an error.
    pub async fn post<T>(&self, body: &T) -> Result<UploadOutcome, TelemetryError>
    where
        T: Serialize,
    {
        let url = build_url(&self.endpoint, TELEMETRY_PATH).map_err(|source| {
            TelemetryError::InvalidUrl {
                url: self.endpoint.clone(),
                source,
            }
        })?;

        match tokio::time::timeout(self.timeout, self.send(url.clone(), body)).await {
            Ok(Ok(UploadOutcome::Rejected { status })) => {
                warn!("Error uploading telemetry: HTTP {}", status);
                Ok(UploadOutcome::Rejected { status })
            }
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(source)) => Err(TelemetryError::Network {
                url: url.to_string(),
                source,
            }),
            Err(_) => {
                debug!("Telemetry request aborted after {:?}", self.timeout);
                Ok(UploadOutcome::Aborted)
            }
        }
    }

    async fn send<T>(&self, url: Url, body: &T) -> Result<UploadOutcome, reqwest::Error>
    where
        T: Serialize,
    {
        let response = self
            .client
            .post(url)
            .header(AUTHORIZATION, auth_header(&self.api_key))
            .header(CLIENT_VERSION_HEADER, &self.client_version)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json")
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Ok(UploadOutcome::Rejected {
                status: status.as_u16(),
            });
        }

        let bytes = response.bytes().await?;
        let parsed = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        Ok(UploadOutcome::Accepted(parsed))
    }
}

impl std::fmt::Debug for TelemetryUploader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryUploader")
            .field("endpoint", &self.endpoint)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_invalid_endpoint_is_an_error() {
        let options = ClientOptions::new("key").with_telemetry_endpoint("not a url");
        let uploader = TelemetryUploader::new(Client::new(), &options);

        let err = uploader.post(&serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, TelemetryError::InvalidUrl { .. }));
    }

    #[test]
    fn test_default_endpoint() {
        let uploader = TelemetryUploader::new(Client::new(), &ClientOptions::new("key"));
        assert_eq!(uploader.endpoint(), "https://telemetry.prefab.cloud/api/v1");
    }
}
