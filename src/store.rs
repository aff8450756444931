// Reactive state store for playback consumers
//
// Holds the values the rendering side reads (playhead, metadata, stream
// settings, ...) and tells subscribers when they changed. Notification is
// coalesced: any number of `set` calls before the next tick produce a single
// flush carrying the latest version. Derived values are memoized through
// `Selector`, which only recomputes when one of its inputs changed identity.

use crate::types::{LogMetadata, StreamMap, StreamSettings};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

/// Keys of the loader state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateKey {
    Timestamp,
    LookAhead,
    Metadata,
    StreamSettings,
    StreamsMetadata,
    DataVersion,
}

/// Value stored under a [`StateKey`]
#[derive(Debug, Clone)]
pub enum StateValue {
    Number(f64),
    Metadata(Arc<LogMetadata>),
    StreamSettings(Arc<StreamSettings>),
    StreamsMetadata(Arc<StreamMap>),
}

impl StateValue {
    pub fn identity(&self) -> Identity {
        match self {
            StateValue::Number(n) => Identity::Number(n.to_bits()),
            StateValue::Metadata(v) => Identity::of(v),
            StateValue::StreamSettings(v) => Identity::of(v),
            StateValue::StreamsMetadata(v) => Identity::of(v),
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            StateValue::Number(n) => Some(*n),
            _ => None,
        }
    }
}

/// Cheap identity of a value: numbers by bit pattern, shared values by pointer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Identity {
    Absent,
    Number(u64),
    Pointer(usize),
}

impl Identity {
    pub fn of<T: ?Sized>(value: &Arc<T>) -> Self {
        Identity::Pointer(Arc::as_ptr(value) as *const () as usize)
    }

    pub fn of_option<T: ?Sized>(value: &Option<Arc<T>>) -> Self {
        value.as_ref().map(Identity::of).unwrap_or(Identity::Absent)
    }

    pub fn of_number(value: Option<f64>) -> Self {
        value
            .map(|n| Identity::Number(n.to_bits()))
            .unwrap_or(Identity::Absent)
    }
}

/// Deferred flush handed to a [`TickScheduler`]
pub type FlushTask = Box<dyn FnOnce() + Send>;

/// Decides when a pending store flush runs (the "next UI tick")
pub trait TickScheduler: Send + Sync {
    fn schedule(&self, flush: FlushTask);
}

/// Queues flushes until the host drives them with [`ManualTick::run_pending`]
#[derive(Default)]
pub struct ManualTick {
    queue: Mutex<Vec<FlushTask>>,
}

impl ManualTick {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run every queued flush, returning how many ran
    pub fn run_pending(&self) -> usize {
        let tasks: Vec<FlushTask> = std::mem::take(&mut *self.queue.lock());
        let count = tasks.len();
        for task in tasks {
            task();
        }
        count
    }

    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }
}

impl TickScheduler for ManualTick {
    fn schedule(&self, flush: FlushTask) {
        self.queue.lock().push(flush);
    }
}

/// Runs flushes on the tokio runtime one frame interval later
pub struct TokioTick {
    frame: Duration,
}

impl TokioTick {
    pub fn new(frame: Duration) -> Self {
        Self { frame }
    }
}

impl Default for TokioTick {
    fn default() -> Self {
        // ~60 Hz refresh
        Self::new(Duration::from_millis(16))
    }
}

impl TickScheduler for TokioTick {
    fn schedule(&self, flush: FlushTask) {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let frame = self.frame;
                handle.spawn(async move {
                    tokio::time::sleep(frame).await;
                    flush();
                });
            }
            Err(_) => flush(),
        }
    }
}

/// Handle returned by [`ReactiveStore::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Listener = Arc<dyn Fn(u64) + Send + Sync>;

#[derive(Default)]
struct StoreState {
    values: HashMap<StateKey, StateValue>,
    version: u64,
    flush_pending: bool,
}

#[derive(Default)]
struct StoreInner {
    state: Mutex<StoreState>,
    listeners: Mutex<Vec<(SubscriptionId, Listener)>>,
    next_subscription: AtomicU64,
    flushes: AtomicU64,
}

impl StoreInner {
    fn flush(&self) {
        let version = {
            let mut state = self.state.lock();
            state.flush_pending = false;
            state.version
        };

        // Listeners may subscribe/unsubscribe from inside the callback
        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        self.flushes.fetch_add(1, Ordering::Relaxed);
        for listener in listeners {
            listener(version);
        }
    }
}

/// Keyed state container with coalesced change notification
#[derive(Clone)]
pub struct ReactiveStore {
    inner: Arc<StoreInner>,
    ticker: Arc<dyn TickScheduler>,
}

impl ReactiveStore {
    pub fn new(ticker: Arc<dyn TickScheduler>) -> Self {
        Self {
            inner: Arc::new(StoreInner::default()),
            ticker,
        }
    }

    pub fn get(&self, key: StateKey) -> Option<StateValue> {
        self.inner.state.lock().values.get(&key).cloned()
    }

    pub fn get_number(&self, key: StateKey) -> Option<f64> {
        self.get(key).and_then(|v| v.as_number())
    }

    pub fn identity(&self, key: StateKey) -> Identity {
        self.inner
            .state
            .lock()
            .values
            .get(&key)
            .map(StateValue::identity)
            .unwrap_or(Identity::Absent)
    }

    /// Store a value. Returns false (and does nothing) when the value is
    /// identical to the current one.
    pub fn set(&self, key: StateKey, value: StateValue) -> bool {
        let schedule = {
            let mut state = self.inner.state.lock();
            let unchanged = state
                .values
                .get(&key)
                .map(|current| current.identity() == value.identity())
                .unwrap_or(false);
            if unchanged {
                return false;
            }

            state.values.insert(key, value);
            state.version += 1;

            let schedule = !state.flush_pending;
            state.flush_pending = true;
            schedule
        };

        if schedule {
            let inner: Weak<StoreInner> = Arc::downgrade(&self.inner);
            self.ticker.schedule(Box::new(move || {
                if let Some(inner) = inner.upgrade() {
                    inner.flush();
                }
            }));
        }

        true
    }

    /// Current version; increases on every effective `set`
    pub fn version(&self) -> u64 {
        self.inner.state.lock().version
    }

    /// Number of flushes delivered so far
    pub fn flush_count(&self) -> u64 {
        self.inner.flushes.load(Ordering::Relaxed)
    }

    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(u64) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.inner.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.inner.listeners.lock().push((id, Arc::new(listener)));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.inner.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }
}

struct Memo<T> {
    version: u64,
    inputs: Vec<Identity>,
    output: T,
}

/// Memoized derived value
///
/// `select` returns the cached output while the store version is unchanged.
/// When the version moved, the input identities are compared against the last
/// evaluation and the output is recomputed only if one of them differs. Pass
/// another selector's output identity as an input to compose selectors.
pub struct Selector<T> {
    memo: Mutex<Option<Memo<T>>>,
    evaluations: AtomicU64,
}

impl<T> Default for Selector<T> {
    fn default() -> Self {
        Self {
            memo: Mutex::new(None),
            evaluations: AtomicU64::new(0),
        }
    }
}

impl<T: Clone> Selector<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn select<I, C>(&self, version: u64, inputs: I, compute: C) -> T
    where
        I: FnOnce() -> Vec<Identity>,
        C: FnOnce() -> T,
    {
        let mut memo = self.memo.lock();

        if let Some(cached) = memo.as_mut() {
            if cached.version == version {
                return cached.output.clone();
            }
        }

        let inputs = inputs();
        if let Some(cached) = memo.as_mut() {
            if cached.inputs == inputs {
                cached.version = version;
                return cached.output.clone();
            }
        }

        self.evaluations.fetch_add(1, Ordering::Relaxed);
        let output = compute();
        *memo = Some(Memo {
            version,
            inputs,
            output: output.clone(),
        });
        output
    }

    /// How many times the output was actually computed
    pub fn evaluations(&self) -> u64 {
        self.evaluations.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn manual_store() -> (ReactiveStore, Arc<ManualTick>) {
        let tick = Arc::new(ManualTick::new());
        (ReactiveStore::new(tick.clone()), tick)
    }

    #[test]
    fn test_set_same_value_is_noop() {
        let (store, tick) = manual_store();
        assert!(store.set(StateKey::Timestamp, StateValue::Number(1.0)));
        assert!(!store.set(StateKey::Timestamp, StateValue::Number(1.0)));
        assert_eq!(store.version(), 1);
        assert_eq!(tick.pending(), 1);
    }

    #[test]
    fn test_identity_is_pointer_based() {
        let (store, _tick) = manual_store();
        let metadata = Arc::new(LogMetadata::default());
        store.set(StateKey::Metadata, StateValue::Metadata(metadata.clone()));
        assert!(!store.set(StateKey::Metadata, StateValue::Metadata(metadata)));

        // Equal content, different allocation
        assert!(store.set(
            StateKey::Metadata,
            StateValue::Metadata(Arc::new(LogMetadata::default()))
        ));
        assert_eq!(store.version(), 2);
    }

    #[test]
    fn test_sets_before_tick_coalesce_into_one_notification() {
        let (store, tick) = manual_store();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        store.subscribe(move |version| sink.lock().push(version));

        store.set(StateKey::Timestamp, StateValue::Number(1.0));
        store.set(StateKey::LookAhead, StateValue::Number(0.5));

        assert_eq!(tick.pending(), 1);
        assert_eq!(tick.run_pending(), 1);
        assert_eq!(*seen.lock(), vec![2]);

        // A later set schedules a fresh flush
        store.set(StateKey::Timestamp, StateValue::Number(2.0));
        tick.run_pending();
        assert_eq!(*seen.lock(), vec![2, 3]);
        assert_eq!(store.flush_count(), 2);
    }

    #[test]
    fn test_unsubscribe_stops_notifications() {
        let (store, tick) = manual_store();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let id = store.subscribe(move |_| {
            counter.fetch_add(1, Ordering::Relaxed);
        });

        store.set(StateKey::Timestamp, StateValue::Number(1.0));
        tick.run_pending();
        assert!(store.unsubscribe(id));
        assert!(!store.unsubscribe(id));

        store.set(StateKey::Timestamp, StateValue::Number(2.0));
        tick.run_pending();
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_selector_skips_unrelated_changes() {
        let (store, _tick) = manual_store();
        let selector: Selector<f64> = Selector::new();
        store.set(StateKey::Timestamp, StateValue::Number(4.0));

        let read = |store: &ReactiveStore| {
            selector.select(
                store.version(),
                || vec![store.identity(StateKey::Timestamp)],
                || store.get_number(StateKey::Timestamp).unwrap_or(0.0) * 2.0,
            )
        };

        assert_eq!(read(&store), 8.0);
        assert_eq!(read(&store), 8.0);
        assert_eq!(selector.evaluations(), 1);

        // Version advances, but not because of the timestamp
        store.set(StateKey::LookAhead, StateValue::Number(1.0));
        assert_eq!(read(&store), 8.0);
        assert_eq!(selector.evaluations(), 1);

        store.set(StateKey::Timestamp, StateValue::Number(5.0));
        assert_eq!(read(&store), 10.0);
        assert_eq!(selector.evaluations(), 2);
    }

    #[test]
    fn test_composed_selector_uses_output_identity() {
        let (store, _tick) = manual_store();
        let base: Selector<Arc<Vec<f64>>> = Selector::new();
        let derived: Selector<usize> = Selector::new();
        store.set(StateKey::Timestamp, StateValue::Number(1.0));

        let read = |store: &ReactiveStore| {
            let version = store.version();
            let list = base.select(
                version,
                || vec![store.identity(StateKey::Timestamp)],
                || Arc::new(vec![store.get_number(StateKey::Timestamp).unwrap_or(0.0)]),
            );
            derived.select(version, || vec![Identity::of(&list)], || list.len())
        };

        read(&store);
        store.set(StateKey::LookAhead, StateValue::Number(3.0));
        read(&store);
        assert_eq!(base.evaluations(), 1);
        assert_eq!(derived.evaluations(), 1);

        store.set(StateKey::Timestamp, StateValue::Number(2.0));
        read(&store);
        assert_eq!(base.evaluations(), 2);
        assert_eq!(derived.evaluations(), 2);
    }

    #[test]
    fn test_tokio_tick_without_runtime_flushes_inline() {
        let store = ReactiveStore::new(Arc::new(TokioTick::default()));
        let seen = Arc::new(AtomicU64::new(0));
        let sink = seen.clone();
        store.subscribe(move |version| sink.store(version, Ordering::Relaxed));

        store.set(StateKey::Timestamp, StateValue::Number(1.0));
        assert_eq!(seen.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_tokio_tick_coalesces_on_runtime() {
        let store = ReactiveStore::new(Arc::new(TokioTick::new(Duration::from_millis(5))));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        store.subscribe(move |version| sink.lock().push(version));

        store.set(StateKey::Timestamp, StateValue::Number(1.0));
        store.set(StateKey::Timestamp, StateValue::Number(2.0));
        store.set(StateKey::LookAhead, StateValue::Number(0.1));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(*seen.lock(), vec![3]);
    }
}
