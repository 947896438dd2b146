//! # Poller
//!
//! Push style subscriptions on top of the pull only `/sync` endpoint.
//!
//! Callers subscribe a callback to a collection name and never touch a timer.
//! The poller fetches `/sync` every interval, fingerprints each collection and
//! calls the subscribers of the collections whose fingerprint moved.
//!
//! ## Lifecycle
//!
//! - Stopped until [`Poller::start`], which polls right away and then every interval
//! - [`Poller::stop`] cancels the timer, a response still on the wire is thrown away
//! - [`Poller::set_poll_rate`] restarts the timer, the cache and subscribers stay
//!
//! ## Guarantees
//!
//! - One poll in flight per run at most, a manual poll that lands during one is skipped
//! - The next timer poll starts one full interval after the previous one finished
//! - Failed polls change nothing and call nobody, the next tick retries
//! - Subscribing to a collection that is already cached calls back before `subscribe` returns
//! - A subscriber never sees an older snapshot after a newer one
//! - A panicking callback is logged and the others still run
use std::{
    collections::HashMap,
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc, Mutex, MutexGuard, PoisonError, Weak,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use collections::CollectionSet;
use serde_json::Value;
use tokio::{task::JoinHandle, time::interval};
use tracing::{debug, error, info, warn};

pub mod error;
pub mod remote;
pub mod snapshot;

use error::PollError;
use remote::{HttpSource, SyncSource};
use snapshot::Snapshot;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(3000);
/// Floor for the interval so a zero rate cannot turn into a busy loop.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

type Callback = Arc<dyn Fn(&Value) + Send + Sync>;

#[derive(Debug)]
pub enum PollOutcome {
    Updated { changed: Vec<String> },
    /// Another poll was still in flight.
    Skipped,
    /// The poller was stopped or restarted while the request was out.
    Discarded,
    Failed(PollError),
}

#[derive(Clone)]
struct Subscriber {
    id: u64,
    active: Arc<AtomicBool>,
    /// Sequence of the newest snapshot delivered to this subscriber.
    seen: Arc<AtomicU64>,
    callback: Callback,
}

impl Subscriber {
    fn deliver(&self, collection: &str, sequence: u64, value: &Value) {
        if !self.active.load(Ordering::Acquire) {
            return;
        }

        if self.seen.fetch_max(sequence, Ordering::AcqRel) >= sequence {
            debug!("Subscriber {} already has {collection} #{sequence}", self.id);
            return;
        }

        let callback = &self.callback;
        if panic::catch_unwind(AssertUnwindSafe(|| callback(value))).is_err() {
            error!("Subscriber {} panicked handling {collection}", self.id);
        }
    }
}

struct PollerState {
    timer: Option<JoinHandle<()>>,
    /// Bumped on every start and stop so late responses can tell they are stale.
    epoch: u64,
    interval: Duration,
    collections: CollectionSet,
    snapshot: Option<Arc<Snapshot>>,
    sequence: u64,
    subscribers: HashMap<String, Vec<Subscriber>>,
    next_id: u64,
    /// Epoch of the poll currently on the wire. A poll left over from an
    /// older epoch never blocks the current one.
    in_flight: Option<u64>,
}

struct Shared {
    source: Arc<dyn SyncSource>,
    state: Mutex<PollerState>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, PollerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn poll_cycle(&self) -> PollOutcome {
        let Some((in_flight, collections)) = InFlight::acquire(self) else {
            debug!("Poll already in flight, skipping");
            return PollOutcome::Skipped;
        };
        let epoch = in_flight.epoch;

        let fresh = match self
            .source
            .fetch(&collections)
            .await
            .and_then(Snapshot::from_payload)
        {
            Ok(fresh) => fresh,
            Err(e) => {
                warn!("Polling error: {e}");
                return PollOutcome::Failed(e);
            }
        };

        let (snapshot, sequence, changed, deliveries) = {
            let mut state = self.lock();

            if state.epoch != epoch {
                debug!("Poller restarted mid request, discarding response");
                return PollOutcome::Discarded;
            }

            let previous = state.snapshot.take();
            let changed = fresh.changed_since(previous.as_deref());
            let snapshot = Arc::new(fresh.carry_forward(previous.as_deref()));

            let deliveries: Vec<(String, Subscriber)> = changed
                .iter()
                .filter_map(|name| state.subscribers.get(name).map(|subs| (name, subs)))
                .flat_map(|(name, subs)| subs.iter().map(|sub| (name.clone(), sub.clone())))
                .collect();

            state.sequence += 1;
            state.snapshot = Some(snapshot.clone());

            (snapshot, state.sequence, changed, deliveries)
        };

        debug!(
            "Poll #{sequence} at {}: {} changed, {} deliveries",
            snapshot.timestamp(),
            changed.len(),
            deliveries.len()
        );

        for (name, subscriber) in &deliveries {
            if let Some(value) = snapshot.get(name) {
                subscriber.deliver(name, sequence, value);
            }
        }

        PollOutcome::Updated { changed }
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);

        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
    }
}

/// Marks a poll of one epoch as in flight until dropped.
struct InFlight<'a> {
    shared: &'a Shared,
    epoch: u64,
}

impl<'a> InFlight<'a> {
    /// Also hands back the collections to request, read under the same lock.
    fn acquire(shared: &'a Shared) -> Option<(Self, CollectionSet)> {
        let mut state = shared.lock();

        if state.in_flight == Some(state.epoch) {
            return None;
        }

        state.in_flight = Some(state.epoch);
        let guard = Self {
            shared,
            epoch: state.epoch,
        };

        Some((guard, state.collections.clone()))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut state = self.shared.lock();

        if state.in_flight == Some(self.epoch) {
            state.in_flight = None;
        }
    }
}

#[derive(Clone)]
pub struct Poller {
    shared: Arc<Shared>,
}

impl Poller {
    pub fn new(source: Arc<dyn SyncSource>) -> Self {
        Self {
            shared: Arc::new(Shared {
                source,
                state: Mutex::new(PollerState {
                    timer: None,
                    epoch: 0,
                    interval: DEFAULT_POLL_INTERVAL,
                    collections: CollectionSet::All,
                    snapshot: None,
                    sequence: 0,
                    subscribers: HashMap::new(),
                    next_id: 0,
                    in_flight: None,
                }),
            }),
        }
    }

    /// Polls `{base_url}/sync` over HTTP.
    pub fn http(base_url: &str) -> Result<Self, PollError> {
        Ok(Self::new(Arc::new(HttpSource::new(base_url)?)))
    }

    pub fn with_interval(self, period: Duration) -> Self {
        self.shared.lock().interval = period.max(MIN_POLL_INTERVAL);
        self
    }

    pub fn with_collections(self, collections: CollectionSet) -> Self {
        self.shared.lock().collections = collections;
        self
    }

    /// Must be called inside a tokio runtime. No-op while already running.
    pub fn start(&self) {
        let mut state = self.shared.lock();

        if state.timer.is_some() {
            return;
        }

        state.epoch += 1;
        let period = state.interval;
        state.timer = Some(tokio::spawn(run_timer(
            Arc::downgrade(&self.shared),
            period,
        )));

        info!("Polling every {}ms", period.as_millis());
    }

    pub fn stop(&self) {
        let mut state = self.shared.lock();

        if let Some(timer) = state.timer.take() {
            timer.abort();
            state.epoch += 1;

            info!("Polling stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.lock().timer.is_some()
    }

    pub fn poll_interval(&self) -> Duration {
        self.shared.lock().interval
    }

    pub fn set_poll_rate(&self, period: Duration) {
        let was_running = {
            let mut state = self.shared.lock();
            state.interval = period.max(MIN_POLL_INTERVAL);
            state.timer.is_some()
        };

        if was_running {
            self.stop();
            self.start();
        }
    }

    /// Runs one poll cycle now, the same one a timer tick runs.
    pub async fn poll_once(&self) -> PollOutcome {
        self.shared.poll_cycle().await
    }

    /// Registers `callback` for `collection`. Replays the cached value first, if any.
    ///
    /// Dropping the returned [`Subscription`] does not unsubscribe.
    pub fn subscribe<F>(&self, collection: &str, callback: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let (subscriber, cached) = {
            let mut state = self.shared.lock();
            state.next_id += 1;

            let subscriber = Subscriber {
                id: state.next_id,
                active: Arc::new(AtomicBool::new(true)),
                seen: Arc::new(AtomicU64::new(0)),
                callback: Arc::new(callback),
            };

            state
                .subscribers
                .entry(collection.to_string())
                .or_default()
                .push(subscriber.clone());

            let cached = state.snapshot.clone().map(|snapshot| (snapshot, state.sequence));
            (subscriber, cached)
        };

        if let Some((snapshot, sequence)) = cached {
            if let Some(value) = snapshot.get(collection) {
                subscriber.deliver(collection, sequence, value);
            }
        }

        Subscription {
            poller: Arc::downgrade(&self.shared),
            collection: collection.to_string(),
            id: subscriber.id,
            active: subscriber.active,
        }
    }

    /// Cached value of one collection from the last successful poll.
    pub fn get_data(&self, collection: &str) -> Option<Value> {
        self.shared
            .lock()
            .snapshot
            .as_ref()
            .and_then(|snapshot| snapshot.get(collection).cloned())
    }

    pub fn snapshot(&self) -> Option<Arc<Snapshot>> {
        self.shared.lock().snapshot.clone()
    }

    pub fn subscriber_count(&self, collection: &str) -> usize {
        self.shared
            .lock()
            .subscribers
            .get(collection)
            .map_or(0, Vec::len)
    }
}

async fn run_timer(shared: Weak<Shared>, period: Duration) {
    let mut ticker = interval(period);

    loop {
        // First tick completes immediately.
        ticker.tick().await;

        let Some(shared) = shared.upgrade() else {
            break;
        };

        shared.poll_cycle().await;

        // Measured from the end of the poll so a slow one is not chased by an immediate retry.
        ticker.reset();
    }
}

pub struct Subscription {
    poller: Weak<Shared>,
    collection: String,
    id: u64,
    active: Arc<AtomicBool>,
}

impl Subscription {
    /// Idempotent.
    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }

        let Some(shared) = self.poller.upgrade() else {
            return;
        };

        let mut state = shared.lock();
        if let Some(subscribers) = state.subscribers.get_mut(&self.collection) {
            subscribers.retain(|sub| sub.id != self.id);

            if subscribers.is_empty() {
                state.subscribers.remove(&self.collection);
            }
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}
