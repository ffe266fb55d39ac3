//! Counts how often each (config key, config type) was evaluated.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::periodic::{PeriodicSync, SyncHook, SyncSchedule};
use crate::api::{
    ConfigEvaluationCounter, ConfigEvaluationSummaries, ConfigEvaluationSummary, TelemetryEvent,
    TelemetryEvents, TelemetryUploader,
};
use crate::codec::{Config, ValueType};

const NAME: &str = "EvaluationSummaryAggregator";

/// Uploads one window of evaluation counters.
pub struct EvaluationSummaryHook {
    uploader: Arc<TelemetryUploader>,
    instance_hash: String,
}

impl SyncHook for EvaluationSummaryHook {
    type Counter = ConfigEvaluationCounter;

    fn instance_hash(&self) -> &str {
        &self.instance_hash
    }

    async fn flush(
        &self,
        batch: HashMap<String, ConfigEvaluationCounter>,
        window_start: DateTime<Utc>,
    ) {
        let count = batch.len();
        debug!(
            aggregator = NAME,
            instance_hash = %self.instance_hash,
            "flushing {} summaries",
            count
        );

        let events = TelemetryEvents {
            instance_hash: self.instance_hash.clone(),
            events: vec![summaries_event(batch, window_start, Utc::now())],
        };

        match self.uploader.post(&events).await {
            Ok(outcome) if outcome.is_accepted() => {
                debug!(
                    aggregator = NAME,
                    instance_hash = %self.instance_hash,
                    "uploaded {} summaries",
                    count
                );
            }
            Ok(_) => {}
            Err(e) => warn!(
                aggregator = NAME,
                instance_hash = %self.instance_hash,
                "failed to upload summaries: {}",
                e
            ),
        }
    }
}

/// Evaluation-summary aggregator.
pub struct EvaluationSummaryAggregator {
    sync: PeriodicSync<EvaluationSummaryHook>,
}

impl EvaluationSummaryAggregator {
    pub fn new(uploader: Arc<TelemetryUploader>, instance_hash: String, max_keys: usize) -> Self {
        let hook = EvaluationSummaryHook {
            uploader,
            instance_hash,
        };
        Self {
            sync: PeriodicSync::new(NAME, hook, max_keys),
        }
    }

    /// Schedule flushes; `None` uses the default backoff.
    pub fn start(&self, interval: Option<Duration>) {
        self.sync.start(SyncSchedule::from_interval(interval));
    }

    pub fn stop(&self) {
        self.sync.stop();
    }

    /// Count one evaluation. Configs without evaluation metadata are ignored.
    pub fn record(&self, config: &Config) {
        let Some(metadata) = config.metadata.as_ref() else {
            return;
        };

        let key = summary_key(&config.key, metadata.config_type.as_deref().unwrap_or_default());
        self.sync.record(
            &key,
            || ConfigEvaluationCounter {
                config_id: metadata.id.clone(),
                config_row_index: metadata.config_row_index,
                conditional_value_index: metadata.conditional_value_index,
                weighted_value_index: metadata.weighted_value_index,
                selected_value: selected_value(config),
                count: 0,
            },
            |counter| counter.count += 1,
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

    pub fn counter(&self, key: &str, config_type: &str) -> Option<ConfigEvaluationCounter> {
        self.sync.get(&summary_key(key, config_type))
    }
}

fn summary_key(key: &str, config_type: &str) -> String {
    format!("{},{}", key, config_type)
}

/// The still-tagged value as the telemetry endpoint expects it.
///
/// `stringList` is wrapped in `{values}` and `json` carries the raw string
/// under `{json}`; everything else is sent as received.
pub fn selected_value(config: &Config) -> Value {
    let Some(raw) = config.raw.as_ref() else {
        return json!({ config.value_type.as_str(): config.value.to_json() });
    };
    let Some((tag, inner)) = raw.as_object().and_then(|m| m.iter().next()) else {
        return raw.clone();
    };

    match ValueType::from_tag(tag) {
        Some(ValueType::StringList) if inner.is_array() => json!({ tag: { "values": inner } }),
        Some(ValueType::Json) => json!({ tag: { "json": inner } }),
        _ => raw.clone(),
    }
}

/// Build the `{summaries: ..}` event for one window.
pub fn summaries_event(
    batch: HashMap<String, ConfigEvaluationCounter>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> TelemetryEvent {
    let summaries = batch
        .into_iter()
        .map(|(composite, counter)| {
            let (key, config_type) = match composite.rsplit_once(',') {
                Some((key, config_type)) => (key.to_string(), config_type.to_string()),
                None => (composite, String::new()),
            };
            ConfigEvaluationSummary {
                key,
                config_type,
                // One counter per key: this client sees a single context.
                counters: vec![counter],
            }
        })
        .collect();

    TelemetryEvent::Summaries(ConfigEvaluationSummaries {
        start: start.timestamp_millis(),
        end: end.timestamp_millis(),
        summaries,
    })
}
