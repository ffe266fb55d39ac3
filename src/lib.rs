//! Client runtime for the Prefab feature-flag and dynamic-config service.
//!
//! ```no_run
//! use prefab_cloud::{ClientOptions, Context, Prefab};
//!
//! # async fn run() -> Result<(), prefab_cloud::ClientError> {
//! let prefab = Prefab::new();
//! let context = Context::new().with_value("user", "key", "abc123");
//! prefab.init(ClientOptions::new("my-api-key"), context).await?;
//!
//! if prefab.is_enabled("new-checkout") {
//!     // ...
//! }
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod client;
pub mod codec;
pub mod context;
pub mod error;
pub mod logger;
pub mod options;
pub mod telemetry;

pub use client::{AfterEvaluationCallback, Bootstrap, PollStatus, Prefab};
pub use codec::{digest, Config, ConfigSet, ConfigValue, DurationValue, ValueType};
pub use context::{Context, ContextValue};
pub use error::{ClientError, LoadError, TelemetryError};
pub use logger::Severity;
pub use options::ClientOptions;
