use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::periodic::{PeriodicSync, SyncHook, SyncSchedule};
use crate::api::{
    LoggerCounter, LoggersTelemetryEvent, TelemetryEvent, TelemetryEvents, TelemetryUploader,
};
use crate::logger::Severity;

const NAME: &str = "LoggerAggregator";

pub struct LoggerCountsHook {
    uploader: Arc<TelemetryUploader>,
    instance_hash: String,
}

impl SyncHook for LoggerCountsHook {
    type Counter = LoggerCounter;

    fn instance_hash(&self) -> &str {
        &self.instance_hash
    }

    async fn flush(&self, batch: HashMap<String, LoggerCounter>, window_start: DateTime<Utc>) {
        let count = batch.len();
        let events = TelemetryEvents {
            instance_hash: self.instance_hash.clone(),
            events: vec![loggers_event(batch, window_start, Utc::now())],
        };

        match self.uploader.post(&events).await {
            Ok(outcome) if outcome.is_accepted() => {
                debug!(
                    aggregator = NAME,
                    instance_hash = %self.instance_hash,
                    "uploaded {} loggers",
                    count
                );
            }
            Ok(_) => {}
            Err(e) => warn!(
                aggregator = NAME,
                instance_hash = %self.instance_hash,
                "failed to upload loggers: {}",
                e
            ),
        }
    }
}

/// Counts `should_log` calls per logger name and severity.
pub struct LoggerAggregator {
    sync: PeriodicSync<LoggerCountsHook>,
}

impl LoggerAggregator {
    pub fn new(uploader: Arc<TelemetryUploader>, instance_hash: String, max_keys: usize) -> Self {
        let hook = LoggerCountsHook {
            uploader,
            instance_hash,
        };
        Self {
            sync: PeriodicSync::new(NAME, hook, max_keys),
        }
    }

    pub fn start(&self, interval: Option<Duration>) {
        self.sync.start(SyncSchedule::from_interval(interval));
    }

    pub fn stop(&self) {
        self.sync.stop();
    }

    pub fn record(&self, logger_name: &str, severity: Severity) {
        self.sync.record(
            logger_name,
            || LoggerCounter::new(logger_name),
            |counter| match severity {
                Severity::Trace => counter.traces += 1,
                Severity::Debug => counter.debugs += 1,
                Severity::Info => counter.infos += 1,
                Severity::Warn => counter.warns += 1,
                Severity::Error => counter.errors += 1,
                Severity::Fatal => counter.fatals += 1,
            },
        );
    }

    pub async fn sync(&self) -> bool {
        self.sync.sync().await
    }

    pub fn len(&self) -> usize {
        self.sync.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sync.is_empty()
    }

    pub fn instance_hash(&self) -> &str {
        self.sync.hook().instance_hash()
    }

    pub fn counter(&self, logger_name: &str) -> Option<LoggerCounter> {
        self.sync.get(logger_name)
    }
}

pub fn loggers_event(
    batch: HashMap<String, LoggerCounter>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> TelemetryEvent {
    let mut loggers: Vec<LoggerCounter> = batch.into_values().collect();
    loggers.sort_by(|a, b| a.logger_name.cmp(&b.logger_name));

    TelemetryEvent::Loggers(LoggersTelemetryEvent {
        start_at: start.timestamp_millis(),
        end_at: end.timestamp_millis(),
        loggers,
    })
}
