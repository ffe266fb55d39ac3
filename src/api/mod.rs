//! HTTP side of the client.
//!
//! `Loader` fetches evaluations with endpoint failover; `TelemetryUploader`
//! posts aggregated usage events. Both share the auth and version headers
//! defined in `http`.

mod http;
mod loader;
mod telemetry_uploader;
mod types;

pub use http::{auth_header, CLIENT_VERSION_HEADER};
pub use loader::{Loader, EVAL_WITH_CONTEXT_PATH};
pub use telemetry_uploader::{TelemetryUploader, UploadOutcome, TELEMETRY_PATH};
pub use types::{
    CollectContextMode, ConfigEvaluationCounter, ConfigEvaluationSummaries,
    ConfigEvaluationSummary, LoggerCounter, LoggersTelemetryEvent, TelemetryEvent,
    TelemetryEvents,
};

pub(crate) use http::build_http_client;
