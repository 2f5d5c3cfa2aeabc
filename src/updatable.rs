//! Lazily populated, invalidatable, mergeable value cells.
//!
//! An `Updatable` behaves like a replay-latest hub whose first value may
//! come from a factory. The factory runs the first time the cell is read or
//! observed without a value, and again after `invalidate`. A value written
//! with `next` while a factory computation is still in flight wins; the
//! computation's result is discarded when it arrives.

use std::fmt;
use std::sync::{Arc, Mutex, Weak};

use serde::{Deserialize, Serialize};

use crate::error::SourceFault;
use crate::stream::{lock, Observable, SerialSubscription, Subject, Subscriber, Subscription};
use crate::value::Value;

/// Produces a source whose first value populates a cell.
pub type Factory = Arc<dyn Fn() -> Observable<Value> + Send + Sync>;

type ReleaseFn = Box<dyn Fn(&Updatable) + Send + Sync>;

/// How `next` combines an incoming value with the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// Replace the value.
    #[default]
    Overwrite,
    /// One-level union of map fields.
    Merge,
    /// Recursive union of nested map fields.
    MergeDeep,
}

#[derive(Debug, Default)]
struct CellState {
    value: Option<Value>,
    has_value: bool,
    has_pending_value: bool,
    fault: Option<SourceFault>,
    ref_count: usize,
    disposed: bool,
}

struct UpdatableInner {
    state: Mutex<CellState>,
    subject: Subject<Value>,
    factory: Option<Factory>,
    strategy: MergeStrategy,
    on_release: Option<ReleaseFn>,
    inflight: SerialSubscription,
    teardowns: Subscription,
}

/// A replay-latest, invalidatable, mergeable single-value cell.
///
/// Clones share the same cell.
#[derive(Clone)]
pub struct Updatable {
    inner: Arc<UpdatableInner>,
}

impl Updatable {
    /// A cell with no factory and the overwrite strategy.
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// A cell populated lazily from `factory`.
    pub fn with_factory(factory: impl Fn() -> Observable<Value> + Send + Sync + 'static) -> Self {
        Self::builder().factory(factory).build()
    }

    /// Starts building a cell.
    #[must_use]
    pub fn builder() -> UpdatableBuilder {
        UpdatableBuilder::default()
    }

    /// True when both handles refer to the same cell.
    #[must_use]
    pub fn ptr_eq(&self, other: &Updatable) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// The merge strategy applied by `next`.
    #[must_use]
    pub fn strategy(&self) -> MergeStrategy {
        self.inner.strategy
    }

    /// Reads the current value, running the factory first if no value has
    /// been produced or requested yet. A stored fault is returned as `Err`.
    pub fn value(&self) -> Result<Option<Value>, SourceFault> {
        let kick = {
            let st = lock(&self.inner.state);
            !st.disposed && !st.has_pending_value && self.inner.factory.is_some()
        };
        if kick {
            self.run_factory();
        }

        let st = lock(&self.inner.state);
        match &st.fault {
            Some(fault) => Err(fault.clone()),
            None => Ok(st.value.clone()),
        }
    }

    /// The current value without running the factory.
    #[must_use]
    pub fn peek(&self) -> Option<Value> {
        lock(&self.inner.state).value.clone()
    }

    /// Whether a value (or a fault) has been produced.
    #[must_use]
    pub fn has_value(&self) -> bool {
        lock(&self.inner.state).has_value
    }

    /// Whether a value has been written or a factory computation started.
    #[must_use]
    pub fn has_pending_value(&self) -> bool {
        lock(&self.inner.state).has_pending_value
    }

    /// The stored fault, if the cell has failed.
    #[must_use]
    pub fn fault(&self) -> Option<SourceFault> {
        lock(&self.inner.state).fault.clone()
    }

    /// Number of live observers counted for the release callback.
    #[must_use]
    pub fn ref_count(&self) -> usize {
        lock(&self.inner.state).ref_count
    }

    /// Writes a value according to the merge strategy and broadcasts the result.
    ///
    /// With a merge strategy, a `Null` value is refused and logged.
    pub fn next(&self, value: Value) {
        if value.is_null() && self.inner.strategy != MergeStrategy::Overwrite {
            tracing::warn!(
                strategy = ?self.inner.strategy,
                "updatable with a merge strategy received null, ignoring"
            );
            return;
        }

        let merged = {
            let mut st = lock(&self.inner.state);
            if st.disposed || st.fault.is_some() {
                return;
            }
            let merged = match (&st.value, self.inner.strategy) {
                (Some(current), MergeStrategy::Merge) => current.shallow_merge(&value),
                (Some(current), MergeStrategy::MergeDeep) => current.deep_merge(&value),
                _ => value,
            };
            st.has_pending_value = true;
            st.has_value = true;
            st.value = Some(merged.clone());
            merged
        };

        self.inner.subject.next(merged);
    }

    /// Fails the cell. Current and future observers receive the fault and
    /// reads re-raise it until the cell is rebuilt.
    pub fn error(&self, fault: SourceFault) {
        let current = {
            let mut st = lock(&self.inner.state);
            if st.disposed || st.fault.is_some() {
                return;
            }
            st.has_value = true;
            st.fault = Some(fault.clone());
            st.value.clone()
        };

        tracing::debug!(
            error = %fault,
            current = %current.map_or(serde_json::Value::Null, |v| v.to_json()),
            "updatable faulted"
        );
        self.inner.subject.error(fault);
    }

    /// Drops the current value and, when a factory is present, runs it again.
    pub fn invalidate(&self) {
        {
            let mut st = lock(&self.inner.state);
            if st.disposed {
                return;
            }
            st.has_pending_value = false;
            st.has_value = false;
            st.value = None;
        }
        self.run_factory();
    }

    /// Populates the cell from the first value of `source`, unless a value
    /// arrives by other means first. Supersedes any earlier computation.
    pub fn next_async(&self, source: Observable<Value>) {
        lock(&self.inner.state).has_pending_value = true;

        let holder = Subscription::new();
        self.inner.inflight.set(holder.clone());

        let on_value = Arc::downgrade(&self.inner);
        let on_fault = Arc::downgrade(&self.inner);
        source.take(1).subscribe_with(Subscriber::with_subscription(
            holder,
            move |v| {
                let Some(cell) = upgrade(&on_value) else {
                    return;
                };
                if cell.has_value() {
                    tracing::debug!("discarding factory result, the cell already has a value");
                    return;
                }
                cell.next(v);
            },
            move |fault| {
                if let Some(cell) = upgrade(&on_fault) {
                    cell.error(fault);
                }
            },
            || {},
        ));
    }

    /// The cell as a stream: replays the current value (or fault) to each
    /// new observer, running the factory if nothing has been requested yet.
    #[must_use]
    pub fn observe(&self) -> Observable<Value> {
        let cell = self.clone();
        Observable::create(move |sub| cell.attach(sub))
    }

    /// Ties a subscription to the cell's lifetime.
    pub fn add_teardown(&self, teardown: Subscription) {
        self.inner.teardowns.add(teardown);
    }

    /// Shuts the cell down: observers are dropped without notification,
    /// in-flight computations cancelled, and teardowns released.
    pub fn dispose(&self) {
        {
            let mut st = lock(&self.inner.state);
            if st.disposed {
                return;
            }
            st.disposed = true;
        }
        self.inner.inflight.unsubscribe();
        self.inner.subject.close();
        self.inner.teardowns.unsubscribe();
    }

    /// Whether `dispose` has run.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        lock(&self.inner.state).disposed
    }

    fn attach(&self, sub: Subscriber<Value>) {
        // Counted before anything is delivered: a subscriber that finishes on
        // the replay still releases through its teardown.
        if self.inner.on_release.is_some() {
            lock(&self.inner.state).ref_count += 1;
            let weak = Arc::downgrade(&self.inner);
            sub.add_teardown(move || {
                if let Some(cell) = upgrade(&weak) {
                    cell.release_one();
                }
            });
        }

        self.inner.subject.subscribe_with(sub.clone());
        if sub.is_closed() {
            return;
        }

        let kick = {
            let st = lock(&self.inner.state);
            !st.has_pending_value && self.inner.factory.is_some()
        };
        if kick {
            self.run_factory();
        } else {
            let replay = {
                let st = lock(&self.inner.state);
                if st.has_value && st.fault.is_none() {
                    st.value.clone()
                } else {
                    None
                }
            };
            if let Some(value) = replay {
                sub.next(value);
            }
        }
    }

    fn release_one(&self) {
        let fire = {
            let mut st = lock(&self.inner.state);
            if st.ref_count == 0 {
                false
            } else {
                st.ref_count -= 1;
                st.ref_count == 0
            }
        };

        if fire {
            if let Some(on_release) = &self.inner.on_release {
                tracing::debug!("last observer left, releasing updatable");
                on_release(self);
            }
        }
    }

    fn run_factory(&self) {
        if let Some(factory) = &self.inner.factory {
            self.next_async(factory());
        }
    }
}

fn upgrade(weak: &Weak<UpdatableInner>) -> Option<Updatable> {
    weak.upgrade().map(|inner| Updatable { inner })
}

#[cfg(feature = "tokio")]
impl Updatable {
    /// Resolves with the first value the cell holds or produces.
    pub async fn wait_for_value(&self) -> crate::error::WhenResult<Value> {
        use crate::error::WhenError;

        {
            let st = lock(&self.inner.state);
            if let Some(fault) = &st.fault {
                return Err(WhenError::Source(fault.clone()));
            }
            if let (true, Some(value)) = (st.has_value, &st.value) {
                return Ok(value.clone());
            }
        }

        let (tx, rx) = tokio::sync::oneshot::channel::<Result<Value, SourceFault>>();
        let tx = Arc::new(Mutex::new(Some(tx)));
        let tx_fault = Arc::clone(&tx);
        let sub = self.observe().take(1).subscribe_all(
            move |v| {
                if let Some(tx) = lock(&tx).take() {
                    let _ = tx.send(Ok(v));
                }
            },
            move |fault| {
                if let Some(tx) = lock(&tx_fault).take() {
                    let _ = tx.send(Err(fault));
                }
            },
            || {},
        );

        let outcome = rx.await;
        sub.unsubscribe();
        match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(fault)) => Err(WhenError::Source(fault)),
            Err(_) => Err(WhenError::StreamClosed {
                path: "updatable".to_string(),
            }),
        }
    }
}

impl Default for Updatable {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Updatable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = lock(&self.inner.state);
        f.debug_struct("Updatable")
            .field("value", &st.value)
            .field("has_value", &st.has_value)
            .field("faulted", &st.fault.is_some())
            .field("strategy", &self.inner.strategy)
            .finish_non_exhaustive()
    }
}

/// Builder for `Updatable`.
#[derive(Default)]
pub struct UpdatableBuilder {
    factory: Option<Factory>,
    strategy: MergeStrategy,
    on_release: Option<ReleaseFn>,
}

impl UpdatableBuilder {
    /// Sets the factory that lazily populates the cell.
    #[must_use]
    pub fn factory(mut self, factory: impl Fn() -> Observable<Value> + Send + Sync + 'static) -> Self {
        self.factory = Some(Arc::new(factory));
        self
    }

    /// Sets the merge strategy.
    #[must_use]
    pub fn strategy(mut self, strategy: MergeStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Sets a callback fired when the last counted observer unsubscribes.
    #[must_use]
    pub fn on_release(mut self, on_release: impl Fn(&Updatable) + Send + Sync + 'static) -> Self {
        self.on_release = Some(Box::new(on_release));
        self
    }

    /// Builds the cell.
    #[must_use]
    pub fn build(self) -> Updatable {
        Updatable {
            inner: Arc::new(UpdatableInner {
                state: Mutex::new(CellState::default()),
                subject: Subject::new(),
                factory: self.factory,
                strategy: self.strategy,
                on_release: self.on_release,
                inflight: SerialSubscription::new(),
                teardowns: Subscription::new(),
            }),
        }
    }
}

impl fmt::Debug for UpdatableBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdatableBuilder")
            .field("has_factory", &self.factory.is_some())
            .field("strategy", &self.strategy)
            .field("has_on_release", &self.on_release.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn v(json: serde_json::Value) -> Value {
        Value::from(json)
    }

    fn merging(strategy: MergeStrategy) -> Updatable {
        Updatable::builder()
            .factory(|| Observable::of(Value::from(json!({"a": 1}))))
            .strategy(strategy)
            .build()
    }

    #[test]
    fn test_mostly_acts_like_a_behavior_subject() {
        let fixture = Updatable::with_factory(|| Observable::of(Value::Int(42)));
        assert_eq!(fixture.value().unwrap(), Some(Value::Int(42)));

        let rec = fixture.observe().record();
        assert_eq!(rec.last(), Some(Value::Int(42)));

        fixture.next(Value::Int(10));
        assert_eq!(rec.last(), Some(Value::Int(10)));

        let fresh = Updatable::with_factory(|| Observable::of(Value::Int(42)));
        let rec = fresh.observe().record();
        assert_eq!(rec.values(), vec![Value::Int(42)]);
    }

    #[test]
    fn test_factory_fault_sticks_for_new_subscribers() {
        let input: Subject<Value> = Subject::new();
        let source = input.clone();
        let fixture = Updatable::with_factory(move || source.as_observable());

        let first = fixture.observe().record();
        assert!(first.faults().is_empty());

        input.error(SourceFault::new("Die"));
        assert_eq!(first.faults().len(), 1);

        let second = fixture.observe().record();
        assert_eq!(second.faults().len(), 1);
        assert!(fixture.value().is_err());
    }

    #[test]
    fn test_direct_error_reaches_subscribers() {
        let input: Subject<Value> = Subject::new();
        let source = input.clone();
        let fixture = Updatable::with_factory(move || source.as_observable());
        let rec = fixture.observe().record();
        assert!(rec.faults().is_empty());

        fixture.error(SourceFault::new("Die"));
        assert_eq!(rec.faults(), vec![SourceFault::new("Die")]);
        assert!(fixture.has_value());
    }

    #[test]
    fn test_calls_the_factory_but_replays_it() {
        let input: Subject<Value> = Subject::new();
        let source = input.clone();
        let fixture = Updatable::with_factory(move || source.as_observable());

        let rec = fixture.observe().record();
        assert!(rec.is_empty());

        input.next(Value::Int(42));
        input.complete();
        rec.unsubscribe();
        assert_eq!(rec.values(), vec![Value::Int(42)]);

        let replay = fixture.observe().record();
        assert_eq!(replay.values(), vec![Value::Int(42)]);
        replay.unsubscribe();

        let live = fixture.observe().record();
        fixture.next(Value::Int(50));
        assert_eq!(live.last(), Some(Value::Int(50)));
    }

    #[test]
    fn test_does_not_reset_once_next_is_called() {
        let fixture = Updatable::with_factory(|| Observable::of(Value::Int(-1)));
        fixture.next(Value::Int(42));
        let rec = fixture.observe().record();
        assert_eq!(rec.values(), vec![Value::Int(42)]);
    }

    #[test]
    fn test_manual_write_beats_inflight_factory() {
        let input: Subject<Value> = Subject::new();
        let source = input.clone();
        let fixture = Updatable::with_factory(move || source.as_observable());

        let rec = fixture.observe().record();
        fixture.next(Value::Int(7));
        input.next(Value::Int(1));

        assert_eq!(fixture.value().unwrap(), Some(Value::Int(7)));
        assert_eq!(rec.values(), vec![Value::Int(7)]);
    }

    #[test]
    fn test_shallow_merges_objects() {
        let fixture = merging(MergeStrategy::Merge);
        assert_eq!(fixture.value().unwrap(), Some(v(json!({"a": 1}))));

        fixture.next(v(json!({"b": 2})));
        assert_eq!(fixture.value().unwrap(), Some(v(json!({"a": 1, "b": 2}))));

        fixture.next(v(json!({"a": 5})));
        assert_eq!(fixture.value().unwrap(), Some(v(json!({"a": 5, "b": 2}))));
    }

    #[test]
    fn test_shallow_merge_replaces_nested_maps() {
        let fixture = merging(MergeStrategy::Merge);
        fixture.value().unwrap();

        fixture.next(v(json!({"b": {"c": 2}})));
        assert_eq!(fixture.value().unwrap(), Some(v(json!({"a": 1, "b": {"c": 2}}))));

        fixture.next(v(json!({"b": {"d": 4}})));
        assert_eq!(fixture.value().unwrap(), Some(v(json!({"a": 1, "b": {"d": 4}}))));
    }

    #[test]
    fn test_deep_merges_nested_maps() {
        let fixture = merging(MergeStrategy::MergeDeep);
        fixture.value().unwrap();

        fixture.next(v(json!({"b": {"c": 2}})));
        fixture.next(v(json!({"b": {"d": 4}})));
        assert_eq!(fixture.value().unwrap(), Some(v(json!({"a": 1, "b": {"c": 2, "d": 4}}))));
    }

    #[test]
    fn test_merge_refuses_null() {
        let fixture = merging(MergeStrategy::Merge);
        fixture.value().unwrap();
        fixture.next(Value::Null);
        assert_eq!(fixture.value().unwrap(), Some(v(json!({"a": 1}))));
    }

    #[test]
    fn test_overwrite_keeps_last_value() {
        let fixture = Updatable::new();
        fixture.next(Value::Int(1));
        fixture.next(Value::Int(2));
        assert_eq!(fixture.value().unwrap(), Some(Value::Int(2)));
    }

    #[test]
    fn test_invalidate_drops_current_value() {
        let fixture = merging(MergeStrategy::Merge);
        fixture.value().unwrap();
        fixture.next(v(json!({"b": 2})));
        fixture.next(v(json!({"a": 5})));
        assert_eq!(fixture.value().unwrap(), Some(v(json!({"a": 5, "b": 2}))));

        fixture.invalidate();
        assert_eq!(fixture.value().unwrap(), Some(v(json!({"a": 1}))));
    }

    #[test]
    fn test_release_fires_after_last_unsubscribe() {
        let released = Arc::new(AtomicUsize::new(0));
        let r = Arc::clone(&released);
        let fixture = Updatable::builder()
            .factory(|| Observable::of(Value::from(json!({"a": 1}))))
            .strategy(MergeStrategy::Merge)
            .on_release(move |_| {
                r.fetch_add(1, Ordering::SeqCst);
            })
            .build();
        assert_eq!(released.load(Ordering::SeqCst), 0);

        let disp1 = fixture.observe().subscribe(|_| {});
        let disp2 = fixture.observe().subscribe(|_| {});
        assert_eq!(fixture.ref_count(), 2);
        assert_eq!(released.load(Ordering::SeqCst), 0);

        disp2.unsubscribe();
        assert_eq!(released.load(Ordering::SeqCst), 0);
        disp1.unsubscribe();
        assert_eq!(released.load(Ordering::SeqCst), 1);

        disp1.unsubscribe();
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_release_fires_for_observer_finished_by_replay() {
        let released = Arc::new(AtomicUsize::new(0));
        let r = Arc::clone(&released);
        let fixture = Updatable::builder()
            .on_release(move |_| {
                r.fetch_add(1, Ordering::SeqCst);
            })
            .build();
        fixture.next(Value::Int(2));

        let seen = fixture.observe().take(1).record();
        assert_eq!(seen.values(), vec![Value::Int(2)]);
        assert!(seen.is_completed());
        assert_eq!(fixture.ref_count(), 0);
        assert_eq!(released.load(Ordering::SeqCst), 1);

        seen.unsubscribe();
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dispose_silences_observers() {
        let fixture = Updatable::new();
        let rec = fixture.observe().record();
        fixture.dispose();
        fixture.next(Value::Int(1));
        assert!(rec.is_empty());
        assert!(fixture.is_disposed());
    }

    #[cfg(feature = "tokio")]
    #[tokio::test]
    async fn test_wait_for_value_from_future_factory() {
        let fixture = Updatable::with_factory(|| Observable::from_future(async { Ok(Value::Int(6)) }));
        assert_eq!(fixture.wait_for_value().await.unwrap(), Value::Int(6));
        assert_eq!(fixture.peek(), Some(Value::Int(6)));
    }
}
