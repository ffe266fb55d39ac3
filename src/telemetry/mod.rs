//! Usage telemetry: periodic aggregation and upload.

mod backoff;
mod evaluation_summary;
mod logger_counts;
mod periodic;

pub use backoff::ExponentialBackoff;
pub use evaluation_summary::{
    selected_value, summaries_event, EvaluationSummaryAggregator, EvaluationSummaryHook,
};
pub use logger_counts::{loggers_event, LoggerAggregator, LoggerCountsHook};
pub use periodic::{
    PeriodicSync, SyncHook, SyncSchedule, DEFAULT_INITIAL_SYNC_DELAY, DEFAULT_MAX_SYNC_DELAY,
};
