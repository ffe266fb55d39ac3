//! Wire types for the evaluation and telemetry endpoints.

use serde::{Deserialize, Serialize};
use std::fmt;

/// How much of the request context the server may keep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CollectContextMode {
    None,
    ShapeOnly,
    #[default]
    PeriodicExample,
}

impl CollectContextMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CollectContextMode::None => "NONE",
            CollectContextMode::ShapeOnly => "SHAPE_ONLY",
            CollectContextMode::PeriodicExample => "PERIODIC_EXAMPLE",
        }
    }
}

impl fmt::Display for CollectContextMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Telemetry
// ============================================================================

/// Body of `POST /telemetry`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryEvents {
    pub instance_hash: String,
    pub events: Vec<TelemetryEvent>,
}

/// Serializes as `{"summaries": {...}}` or `{"loggers": {...}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TelemetryEvent {
    Summaries(ConfigEvaluationSummaries),
    Loggers(LoggersTelemetryEvent),
}

/// Evaluation counts for one window. Times are epoch milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigEvaluationSummaries {
    pub start: i64,
    pub end: i64,
    pub summaries: Vec<ConfigEvaluationSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigEvaluationSummary {
    pub key: String,
    /// CONFIG, FEATURE_FLAG ...
    #[serde(rename = "type")]
    pub config_type: String,
    pub counters: Vec<ConfigEvaluationCounter>,
}

/// Running count for one (key, type) in the current window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigEvaluationCounter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_row_index: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conditional_value_index: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weighted_value_index: Option<i64>,
    pub selected_value: serde_json::Value,
    pub count: u64,
}

/// Logger counts for one window. Times are epoch milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggersTelemetryEvent {
    pub start_at: i64,
    pub end_at: i64,
    pub loggers: Vec<LoggerCounter>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggerCounter {
    pub logger_name: String,
    pub traces: u64,
    pub debugs: u64,
    pub infos: u64,
    pub warns: u64,
    pub errors: u64,
    pub fatals: u64,
}

impl LoggerCounter {
    pub fn new(logger_name: impl Into<String>) -> Self {
        Self {
            logger_name: logger_name.into(),
            ..Default::default()
        }
    }
}
