//! The `Prefab` client facade.
//!
//! Reads are synchronous against the last loaded snapshot. Loads, polling
//! and telemetry run on the Tokio runtime the client is used from. Side
//! effects of `get` (the evaluation summary and the after-evaluation
//! callback) are queued to a per-client dispatcher task and never run inside
//! the read itself.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::api::{build_http_client, Loader, TelemetryUploader};
use crate::codec::{digest, Config, ConfigSet, ConfigValue, DurationValue, EVALUATIONS_KEY};
use crate::context::Context;
use crate::error::ClientError;
use crate::logger::{self, Severity};
use crate::options::ClientOptions;
use crate::telemetry::{EvaluationSummaryAggregator, LoggerAggregator};

/// Called after every `get` with the key, the value (if any) and the
/// context it was evaluated for.
pub type AfterEvaluationCallback = Arc<dyn Fn(&str, Option<&ConfigValue>, &Context) + Send + Sync>;

/// Pre-fetched evaluations for a known context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bootstrap {
    pub context: Context,
    /// Either the full `{evaluations: {..}}` body or just its inner map.
    pub evaluations: Value,
}

impl Bootstrap {
    pub fn new(context: Context, evaluations: Value) -> Self {
        Self {
            context,
            evaluations,
        }
    }

    fn payload(&self) -> Value {
        if self.evaluations.get(EVALUATIONS_KEY).is_some() {
            self.evaluations.clone()
        } else {
            json!({ EVALUATIONS_KEY: self.evaluations })
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStatus {
    NotStarted,
    /// The first load of `poll()` is in flight.
    Pending,
    Running { frequency: Duration },
    Stopped,
}

struct PollState {
    status: PollStatus,
    /// Bumped by every `poll()` and `stop_polling()`; a tick loop only keeps
    /// going while its generation is current.
    generation: u64,
    timer: Option<JoinHandle<()>>,
}

/// Parts built by `init`.
struct Components {
    loader: Arc<Loader>,
    evaluation_summaries: Option<EvaluationSummaryAggregator>,
    loggers: Option<LoggerAggregator>,
}

impl Components {
    fn stop(&self) {
        if let Some(aggregator) = &self.evaluation_summaries {
            aggregator.stop();
        }
        if let Some(aggregator) = &self.loggers {
            aggregator.stop();
        }
    }
}

/// One `get` waiting for its side effects.
struct Evaluation {
    key: String,
    config: Option<Config>,
    context: Context,
}

struct Inner {
    instance_hash: String,
    components: RwLock<Option<Arc<Components>>>,
    context: RwLock<Context>,
    configs: RwLock<Arc<ConfigSet>>,
    loaded: AtomicBool,
    warned_unloaded: AtomicBool,
    poll: Mutex<PollState>,
    poll_count: AtomicU64,
    after_evaluation: RwLock<Option<AfterEvaluationCallback>>,
    evaluations_tx: UnboundedSender<Evaluation>,
    /// Taken when the dispatcher task is spawned.
    evaluations_rx: Mutex<Option<UnboundedReceiver<Evaluation>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        let poll = self.poll.get_mut().unwrap_or_else(|p| p.into_inner());
        if let Some(timer) = poll.timer.take() {
            timer.abort();
        }
        let components = self.components.get_mut().unwrap_or_else(|p| p.into_inner());
        if let Some(components) = components.take() {
            components.stop();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn read<T: Clone>(lock: &RwLock<T>) -> T {
    match lock.read() {
        Ok(guard) => guard.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

fn write<T>(lock: &RwLock<T>, value: T) {
    match lock.write() {
        Ok(mut guard) => *guard = value,
        Err(poisoned) => *poisoned.into_inner() = value,
    }
}

/// Feature-flag and dynamic-config client.
///
/// Cheap to clone; clones share state. Independent clients can coexist in
/// one process.
#[derive(Clone)]
pub struct Prefab {
    inner: Arc<Inner>,
}

impl Prefab {
    pub fn new() -> Self {
        let (evaluations_tx, evaluations_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                instance_hash: Uuid::new_v4().to_string(),
                components: RwLock::new(None),
                context: RwLock::new(Context::new()),
                configs: RwLock::new(Arc::new(ConfigSet::new())),
                loaded: AtomicBool::new(false),
                warned_unloaded: AtomicBool::new(false),
                poll: Mutex::new(PollState {
                    status: PollStatus::NotStarted,
                    generation: 0,
                    timer: None,
                }),
                poll_count: AtomicU64::new(0),
                after_evaluation: RwLock::new(None),
                evaluations_tx,
                evaluations_rx: Mutex::new(Some(evaluations_rx)),
            }),
        }
    }

    /// Identifies this client in telemetry.
    pub fn instance_hash(&self) -> &str {
        &self.inner.instance_hash
    }

    /// Build the loader and telemetry for `context`, then load once.
    ///
    /// When `options.bootstrap` carries an equal context its evaluations are
    /// used and no request is made. Telemetry keeps running even if the
    /// first load fails. Calling `init` again replaces everything but the
    /// loaded snapshot.
    pub async fn init(&self, options: ClientOptions, context: Context) -> Result<(), ClientError> {
        let http = build_http_client().map_err(ClientError::HttpClient)?;
        let loader = Arc::new(Loader::new(http.clone(), &options, context.clone()));
        let uploader = Arc::new(TelemetryUploader::new(http, &options));

        let (collect_summaries, collect_loggers) = options.effective_telemetry();
        let evaluation_summaries = collect_summaries.then(|| {
            let aggregator = EvaluationSummaryAggregator::new(
                Arc::clone(&uploader),
                self.inner.instance_hash.clone(),
                options.max_evaluation_summary_keys,
            );
            aggregator.start(options.evaluation_summary_interval);
            aggregator
        });
        let loggers = collect_loggers.then(|| {
            let aggregator = LoggerAggregator::new(
                Arc::clone(&uploader),
                self.inner.instance_hash.clone(),
                options.max_logger_names,
            );
            aggregator.start(options.logger_sync_interval);
            aggregator
        });

        let components = Arc::new(Components {
            loader,
            evaluation_summaries,
            loggers,
        });
        let previous = {
            let mut slot = match self.inner.components.write() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            slot.replace(components)
        };
        if let Some(previous) = previous {
            previous.stop();
        }

        write(&self.inner.context, context.clone());
        self.ensure_dispatcher();

        if let Some(bootstrap) = options.bootstrap.as_ref() {
            if bootstrap.context.equals(&context) {
                info!("Using bootstrapped evaluations; skipping initial load");
                self.apply(digest(&bootstrap.payload()));
                return Ok(());
            }
            debug!("Bootstrap context does not match; loading from network");
        }

        self.load().await
    }

    fn components(&self) -> Result<Arc<Components>, ClientError> {
        read(&self.inner.components).ok_or(ClientError::NotInitialized)
    }

    /// Fetch evaluations for the current context and swap them in.
    pub async fn load(&self) -> Result<(), ClientError> {
        let components = self.components()?;
        components.loader.set_context(self.context());

        let result = components.loader.load().await;
        if let Ok(payload) = &result {
            self.apply(digest(payload));
        }

        if matches!(self.poll_status(), PollStatus::Running { .. }) {
            self.inner.poll_count.fetch_add(1, Ordering::SeqCst);
        }

        result.map(|_| ()).map_err(ClientError::from)
    }

    fn apply(&self, configs: ConfigSet) {
        debug!("Loaded {} configs", configs.len());
        write(&self.inner.configs, Arc::new(configs));
        self.inner.loaded.store(true, Ordering::SeqCst);
    }

    pub fn is_loaded(&self) -> bool {
        self.inner.loaded.load(Ordering::SeqCst)
    }

    // ------------------------------------------------------------------------
    // Polling
    // ------------------------------------------------------------------------

    fn poll_state(&self) -> MutexGuard<'_, PollState> {
        lock(&self.inner.poll)
    }

    /// Stop any earlier polling, load once, then reload every `frequency`.
    ///
    /// Returns the result of the immediate load; the tick loop is started
    /// either way.
    pub async fn poll(&self, frequency: Duration) -> Result<(), ClientError> {
        self.components()?;

        let generation = {
            let mut poll = self.poll_state();
            if let Some(timer) = poll.timer.take() {
                debug!("Cancelling previous poll timer");
                timer.abort();
            }
            poll.generation += 1;
            poll.status = PollStatus::Pending;
            poll.generation
        };

        let result = self.load().await;
        self.start_ticks(generation, frequency);
        result
    }

    fn start_ticks(&self, generation: u64, frequency: Duration) {
        let mut poll = self.poll_state();
        if poll.generation != generation {
            // Stopped or restarted while the first load was in flight.
            return;
        }

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let timer = tokio::spawn(async move {
            loop {
                tokio::time::sleep(frequency).await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let client = Prefab { inner };

                match client.load().await {
                    Ok(()) => {}
                    Err(e) if e.is_superseded() => debug!("Polling load superseded"),
                    Err(e) => warn!("Polling load failed: {}", e),
                }
                if client.poll_state().generation != generation {
                    break;
                }
            }
        });

        poll.status = PollStatus::Running { frequency };
        poll.timer = Some(timer);
    }

    /// Cancel the pending tick. A load already in flight is dropped.
    pub fn stop_polling(&self) {
        let mut poll = self.poll_state();
        if let Some(timer) = poll.timer.take() {
            timer.abort();
        }
        poll.generation += 1;
        poll.status = PollStatus::Stopped;
    }

    pub fn poll_status(&self) -> PollStatus {
        self.poll_state().status
    }

    /// Loads completed while polling was running.
    pub fn poll_count(&self) -> u64 {
        self.inner.poll_count.load(Ordering::SeqCst)
    }

    // ------------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------------

    fn snapshot(&self) -> Arc<ConfigSet> {
        read(&self.inner.configs)
    }

    /// Value for `key` in the current snapshot.
    ///
    /// Before the first successful load this returns `None` and warns once.
    pub fn get(&self, key: &str) -> Option<ConfigValue> {
        if !self.is_loaded() {
            if !self.inner.warned_unloaded.swap(true, Ordering::SeqCst) {
                warn!(
                    "Config `{}` read before any successful load; call init() and wait for it",
                    key
                );
            }
            return None;
        }

        let config = self.snapshot().get(key).cloned();
        let value = config.as_ref().map(|c| c.value.clone());

        self.dispatch(Evaluation {
            key: key.to_string(),
            config,
            context: self.context(),
        });

        value
    }

    /// True only for a `bool` value of `true`.
    pub fn is_enabled(&self, key: &str) -> bool {
        matches!(self.get(key), Some(ConfigValue::Bool(true)))
    }

    pub fn get_duration(&self, key: &str) -> Option<DurationValue> {
        self.get(key).and_then(|v| v.as_duration())
    }

    /// Whether `logger_name` should emit a message at `desired`, using the
    /// `log-level.*` configs.
    pub fn should_log(&self, logger_name: &str, desired: Severity, default: Severity) -> bool {
        if let Ok(components) = self.components() {
            if let Some(loggers) = &components.loggers {
                loggers.record(logger_name, desired);
            }
        }

        let snapshot = self.snapshot();
        logger::should_log(logger_name, desired, default, |key| {
            snapshot.get(key).map(|c| c.value.clone())
        })
    }

    /// Decoded values of the current snapshot.
    pub fn values(&self) -> HashMap<String, ConfigValue> {
        self.snapshot()
            .iter()
            .map(|(key, config)| (key.clone(), config.value.clone()))
            .collect()
    }

    /// The current snapshot as a flat `{key: {tag: value}}` map.
    ///
    /// Passing the result to `hydrate` on another client reproduces the
    /// same values and types.
    pub fn extract(&self) -> Value {
        let tagged: Map<String, Value> = self
            .snapshot()
            .iter()
            .map(|(key, config)| (key.clone(), config.to_tagged()))
            .collect();
        Value::Object(tagged)
    }

    /// Replace the snapshot from a flat `{key: value}` map or an
    /// evaluations payload, without a network call.
    pub fn hydrate(&self, payload: &Value) {
        self.apply(digest(payload));
    }

    pub fn context(&self) -> Context {
        read(&self.inner.context)
    }

    /// Replace the context and, unless `skip_load`, load for it.
    pub async fn update_context(&self, context: Context, skip_load: bool) -> Result<(), ClientError> {
        write(&self.inner.context, context);
        if skip_load {
            return Ok(());
        }
        self.load().await
    }

    pub fn set_after_evaluation_callback(&self, callback: AfterEvaluationCallback) {
        write(&self.inner.after_evaluation, Some(callback));
    }

    pub fn clear_after_evaluation_callback(&self) {
        write(&self.inner.after_evaluation, None);
    }

    /// Flush both telemetry windows now.
    pub async fn flush_telemetry(&self) {
        let Ok(components) = self.components() else {
            return;
        };
        if let Some(aggregator) = &components.evaluation_summaries {
            aggregator.sync().await;
        }
        if let Some(aggregator) = &components.loggers {
            aggregator.sync().await;
        }
    }

    // ------------------------------------------------------------------------
    // Deferred side effects
    // ------------------------------------------------------------------------

    /// Spawn the dispatcher on first use. Returns false outside a runtime.
    fn ensure_dispatcher(&self) -> bool {
        let mut slot = lock(&self.inner.evaluations_rx);
        let Some(rx) = slot.take() else {
            return true;
        };
        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(run_dispatcher(Arc::downgrade(&self.inner), rx));
                true
            }
            Err(_) => {
                *slot = Some(rx);
                false
            }
        }
    }

    fn dispatch(&self, evaluation: Evaluation) {
        if !self.ensure_dispatcher() {
            debug!("No async runtime; skipping side effects for `{}`", evaluation.key);
            return;
        }
        if self.inner.evaluations_tx.send(evaluation).is_err() {
            debug!("Evaluation dispatcher is gone");
        }
    }
}

impl Default for Prefab {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Prefab {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Prefab")
            .field("instance_hash", &self.inner.instance_hash)
            .field("loaded", &self.is_loaded())
            .field("poll_status", &self.poll_status())
            .finish()
    }
}

/// Runs queued side effects in order: summary first, then the callback.
/// Ends when the client is dropped.
async fn run_dispatcher(inner: Weak<Inner>, mut rx: UnboundedReceiver<Evaluation>) {
    while let Some(evaluation) = rx.recv().await {
        let Some(client) = inner.upgrade() else {
            break;
        };

        if let Some(config) = &evaluation.config {
            let components = read(&client.components);
            let aggregator = components
                .as_ref()
                .and_then(|c| c.evaluation_summaries.as_ref());
            if let Some(aggregator) = aggregator {
                aggregator.record(config);
            }
        }

        let callback = read(&client.after_evaluation);
        if let Some(callback) = callback {
            let value = evaluation.config.as_ref().map(|c| &c.value);
            callback(&evaluation.key, value, &evaluation.context);
        }
    }
    debug!("Evaluation dispatcher stopped");
}
