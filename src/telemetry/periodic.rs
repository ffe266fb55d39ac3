//! Rolling-window batcher shared by the telemetry aggregators.
//!
//! Counters accumulate in a keyed map. On every tick the map is swapped for
//! an empty one and the old contents go to the hook's `flush`, together with
//! the start of the window they cover. The next tick is scheduled right away,
//! whether or not the flush succeeds. `stop()` cancels the timer and drops
//! whatever has not been flushed yet.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::debug;

use super::backoff::ExponentialBackoff;

/// First delay of the default backoff schedule
pub const DEFAULT_INITIAL_SYNC_DELAY: Duration = Duration::from_secs(8);

/// Cap of the default backoff schedule
pub const DEFAULT_MAX_SYNC_DELAY: Duration = Duration::from_secs(5 * 60);

/// What to do with a finished window.
pub trait SyncHook: Send + Sync + 'static {
    type Counter: Send + 'static;

    /// Client instance the counters belong to, attached to log events.
    fn instance_hash(&self) -> &str {
        ""
    }

    fn flush(
        &self,
        batch: HashMap<String, Self::Counter>,
        window_start: DateTime<Utc>,
    ) -> impl Future<Output = ()> + Send;
}

/// Delay between flushes.
#[derive(Debug, Clone)]
pub enum SyncSchedule {
    Fixed(Duration),
    /// Spreads out the first flushes of many freshly started clients.
    Backoff(ExponentialBackoff),
}

impl SyncSchedule {
    /// `Some(interval)` is fixed; `None` is the default backoff.
    pub fn from_interval(interval: Option<Duration>) -> Self {
        match interval {
            Some(interval) => SyncSchedule::Fixed(interval),
            None => SyncSchedule::Backoff(ExponentialBackoff::new(
                DEFAULT_INITIAL_SYNC_DELAY,
                DEFAULT_MAX_SYNC_DELAY,
            )),
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        match self {
            SyncSchedule::Fixed(interval) => *interval,
            SyncSchedule::Backoff(backoff) => backoff.next_delay(),
        }
    }
}

struct Window<T> {
    data: HashMap<String, T>,
    start: DateTime<Utc>,
}

struct Shared<H: SyncHook> {
    name: &'static str,
    max_keys: usize,
    window: Mutex<Window<H::Counter>>,
    hook: H,
}

impl<H: SyncHook> Shared<H> {
    fn window(&self) -> MutexGuard<'_, Window<H::Counter>> {
        match self.window.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Swap out the current window, or `None` if it is empty.
    fn take_batch(&self) -> Option<(HashMap<String, H::Counter>, DateTime<Utc>)> {
        let mut window = self.window();
        if window.data.is_empty() {
            return None;
        }
        let batch = std::mem::take(&mut window.data);
        let start = std::mem::replace(&mut window.start, Utc::now());
        Some((batch, start))
    }

    async fn sync(&self) -> bool {
        let Some((batch, start)) = self.take_batch() else {
            return false;
        };
        debug!(
            aggregator = self.name,
            instance_hash = self.hook.instance_hash(),
            "syncing {} items",
            batch.len()
        );
        self.hook.flush(batch, start).await;
        true
    }
}

/// Keyed counters flushed on a schedule through a `SyncHook`.
pub struct PeriodicSync<H: SyncHook> {
    shared: Arc<Shared<H>>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl<H: SyncHook> PeriodicSync<H> {
    /// Create a batcher. Nothing is scheduled until `start`.
    pub fn new(name: &'static str, hook: H, max_keys: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                name,
                max_keys,
                window: Mutex::new(Window {
                    data: HashMap::new(),
                    start: Utc::now(),
                }),
                hook,
            }),
            timer: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &'static str {
        self.shared.name
    }

    pub fn hook(&self) -> &H {
        &self.shared.hook
    }

    /// Begin a fresh window and schedule flushes. Must run inside a Tokio
    /// runtime. Restarting replaces the previous timer.
    pub fn start(&self, schedule: SyncSchedule) {
        self.shared.window().start = Utc::now();

        let shared = Arc::clone(&self.shared);
        let handle = tokio::spawn(async move {
            let mut schedule = schedule;
            loop {
                let delay = schedule.next_delay();
                debug!(
                    aggregator = shared.name,
                    instance_hash = shared.hook.instance_hash(),
                    "scheduled next sync in {:?}",
                    delay
                );
                tokio::time::sleep(delay).await;

                let shared = Arc::clone(&shared);
                tokio::spawn(async move {
                    shared.sync().await;
                });
            }
        });

        if let Some(previous) = self.timer_slot().replace(handle) {
            previous.abort();
        }
    }

    /// Cancel the scheduled flush. Pending counts are not flushed.
    pub fn stop(&self) {
        if let Some(handle) = self.timer_slot().take() {
            debug!(
                aggregator = self.shared.name,
                instance_hash = self.shared.hook.instance_hash(),
                "stopped"
            );
            handle.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.timer_slot()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    fn timer_slot(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        match self.timer.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Insert-or-update the counter for `key`.
    ///
    /// A new key is dropped once `max_keys` distinct keys are tracked;
    /// existing keys always update. Returns whether the update was applied.
    pub fn record<I, U>(&self, key: &str, init: I, update: U) -> bool
    where
        I: FnOnce() -> H::Counter,
        U: FnOnce(&mut H::Counter),
    {
        let mut window = self.shared.window();
        if let Some(counter) = window.data.get_mut(key) {
            update(counter);
            return true;
        }
        if window.data.len() >= self.shared.max_keys {
            return false;
        }
        let mut counter = init();
        update(&mut counter);
        window.data.insert(key.to_string(), counter);
        true
    }

    /// Flush now. Returns `false` without calling the hook if nothing was
    /// recorded in the current window.
    pub async fn sync(&self) -> bool {
        self.shared.sync().await
    }

    pub fn len(&self) -> usize {
        self.shared.window().data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn window_start(&self) -> DateTime<Utc> {
        self.shared.window().start
    }
}

impl<H> PeriodicSync<H>
where
    H: SyncHook,
    H::Counter: Clone,
{
    pub fn get(&self, key: &str) -> Option<H::Counter> {
        self.shared.window().data.get(key).cloned()
    }
}

impl<H: SyncHook> Drop for PeriodicSync<H> {
    fn drop(&mut self) {
        if let Some(handle) = self.timer_slot().take() {
            handle.abort();
        }
    }
}
