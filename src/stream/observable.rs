use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::SourceFault;

use super::subscriber::Subscriber;
use super::subscription::{SerialSubscription, Subscription};
use super::{lock, Item};

type SubscribeFn<T> = dyn Fn(Subscriber<T>) + Send + Sync;

/// A cold, push-based stream.
///
/// Each subscription runs the subscribe function anew. Cloning shares the
/// definition, not any subscription state.
pub struct Observable<T> {
    subscribe_fn: Arc<SubscribeFn<T>>,
}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            subscribe_fn: Arc::clone(&self.subscribe_fn),
        }
    }
}

impl<T> fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observable").finish_non_exhaustive()
    }
}

impl<T: Item> Observable<T> {
    /// Defines a stream by its subscribe function.
    ///
    /// The function pushes into the subscriber and registers any teardown on
    /// the subscriber's subscription.
    pub fn create(subscribe: impl Fn(Subscriber<T>) + Send + Sync + 'static) -> Self {
        Self {
            subscribe_fn: Arc::new(subscribe),
        }
    }

    /// Emits `value` once, then completes.
    pub fn of(value: T) -> Self {
        Self::create(move |sub| {
            sub.next(value.clone());
            sub.complete();
        })
    }

    /// Emits every item in order, then completes.
    pub fn from_iter(items: impl IntoIterator<Item = T>) -> Self {
        let items: Vec<T> = items.into_iter().collect();
        Self::create(move |sub| {
            for item in &items {
                if sub.is_closed() {
                    return;
                }
                sub.next(item.clone());
            }
            sub.complete();
        })
    }

    /// Completes immediately.
    pub fn empty() -> Self {
        Self::create(|sub| sub.complete())
    }

    /// Never emits, never completes.
    pub fn never() -> Self {
        Self::create(|_| {})
    }

    /// Fails immediately with `fault`.
    pub fn throw(fault: SourceFault) -> Self {
        Self::create(move |sub| sub.error(fault.clone()))
    }

    /// Subscribes a prepared subscriber and returns its subscription.
    pub fn subscribe_with(&self, subscriber: Subscriber<T>) -> Subscription {
        let subscription = subscriber.subscription().clone();
        (self.subscribe_fn)(subscriber);
        subscription
    }

    /// Subscribes to values only. Faults are logged and end the subscription.
    pub fn subscribe(&self, next: impl Fn(T) + Send + Sync + 'static) -> Subscription {
        self.subscribe_with(Subscriber::new(
            next,
            |fault| tracing::warn!(error = %fault, "unhandled stream fault"),
            || {},
        ))
    }

    /// Subscribes with all three callbacks.
    pub fn subscribe_all(
        &self,
        next: impl Fn(T) + Send + Sync + 'static,
        error: impl Fn(SourceFault) + Send + Sync + 'static,
        complete: impl Fn() + Send + Sync + 'static,
    ) -> Subscription {
        self.subscribe_with(Subscriber::new(next, error, complete))
    }

    /// Transforms each value.
    pub fn map<U: Item>(&self, f: impl Fn(T) -> U + Send + Sync + 'static) -> Observable<U> {
        let source = self.clone();
        let f = Arc::new(f);
        Observable::create(move |down: Subscriber<U>| {
            let f = Arc::clone(&f);
            let d = down.clone();
            source.subscribe_with(down.derive(move |v| d.next(f(v))));
        })
    }

    /// Passes only values matching `predicate`.
    pub fn filter(&self, predicate: impl Fn(&T) -> bool + Send + Sync + 'static) -> Self {
        let source = self.clone();
        let predicate = Arc::new(predicate);
        Self::create(move |down| {
            let predicate = Arc::clone(&predicate);
            let d = down.clone();
            source.subscribe_with(down.derive(move |v| {
                if predicate(&v) {
                    d.next(v);
                }
            }));
        })
    }

    /// Emits `first` before anything from the source.
    pub fn start_with(&self, first: T) -> Self {
        let source = self.clone();
        Self::create(move |down| {
            down.next(first.clone());
            if !down.is_closed() {
                source.subscribe_with(down);
            }
        })
    }

    /// Drops the first `count` values.
    pub fn skip(&self, count: usize) -> Self {
        let source = self.clone();
        Self::create(move |down| {
            let seen = AtomicUsize::new(0);
            let d = down.clone();
            source.subscribe_with(down.derive(move |v| {
                if seen.fetch_add(1, Ordering::AcqRel) >= count {
                    d.next(v);
                }
            }));
        })
    }

    /// Emits at most `count` values, then completes.
    pub fn take(&self, count: usize) -> Self {
        let source = self.clone();
        Self::create(move |down| {
            if count == 0 {
                down.complete();
                return;
            }
            let seen = AtomicUsize::new(0);
            let d = down.clone();
            source.subscribe_with(down.derive(move |v| {
                let n = seen.fetch_add(1, Ordering::AcqRel) + 1;
                if n <= count {
                    d.next(v);
                }
                if n >= count {
                    d.complete();
                }
            }));
        })
    }

    /// Emits while `predicate` holds; completes on the first value that fails it.
    pub fn take_while(&self, predicate: impl Fn(&T) -> bool + Send + Sync + 'static) -> Self {
        let source = self.clone();
        let predicate = Arc::new(predicate);
        Self::create(move |down| {
            let predicate = Arc::clone(&predicate);
            let d = down.clone();
            source.subscribe_with(down.derive(move |v| {
                if predicate(&v) {
                    d.next(v);
                } else {
                    d.complete();
                }
            }));
        })
    }

    /// Suppresses values equal (per `eq`) to the previously emitted one.
    pub fn distinct_until_changed_by(&self, eq: impl Fn(&T, &T) -> bool + Send + Sync + 'static) -> Self {
        let source = self.clone();
        let eq = Arc::new(eq);
        Self::create(move |down| {
            let eq = Arc::clone(&eq);
            let last: Mutex<Option<T>> = Mutex::new(None);
            let d = down.clone();
            source.subscribe_with(down.derive(move |v: T| {
                {
                    let mut last = lock(&last);
                    if last.as_ref().is_some_and(|prev| eq(prev, &v)) {
                        return;
                    }
                    *last = Some(v.clone());
                }
                d.next(v);
            }));
        })
    }

    /// Maps each value to an inner stream and follows only the latest one.
    ///
    /// The previous inner subscription is released before the next inner
    /// stream is subscribed, and a released inner subscriber drops anything
    /// still in flight. Completes once the source and the current inner
    /// stream have both completed.
    pub fn switch_map<U: Item>(&self, f: impl Fn(T) -> Observable<U> + Send + Sync + 'static) -> Observable<U> {
        let source = self.clone();
        let f = Arc::new(f);
        Observable::create(move |down: Subscriber<U>| {
            let serial = SerialSubscription::new();
            down.add(serial.to_subscription());
            let state = Arc::new(Mutex::new(SwitchState::default()));

            let on_next = {
                let f = Arc::clone(&f);
                let serial = serial.clone();
                let state = Arc::clone(&state);
                let down = down.clone();
                move |v: T| {
                    let inner = f(v);
                    serial.clear();
                    if down.is_closed() {
                        return;
                    }

                    let generation = {
                        let mut st = lock(&state);
                        st.generation += 1;
                        st.inner_active = true;
                        st.generation
                    };

                    let inner_sub = Subscription::new();
                    serial.set(inner_sub.clone());

                    let d_next = down.clone();
                    let d_error = down.clone();
                    let d_complete = down.clone();
                    let st = Arc::clone(&state);
                    inner.subscribe_with(Subscriber::with_subscription(
                        inner_sub,
                        move |u| d_next.next(u),
                        move |fault| d_error.error(fault),
                        move || {
                            let finished = {
                                let mut st = lock(&st);
                                if st.generation != generation {
                                    return;
                                }
                                st.inner_active = false;
                                st.outer_done
                            };
                            if finished {
                                d_complete.complete();
                            }
                        },
                    ));
                }
            };

            let on_error = {
                let down = down.clone();
                move |fault| down.error(fault)
            };

            let on_complete = {
                let down = down.clone();
                move || {
                    let finished = {
                        let mut st = lock(&state);
                        st.outer_done = true;
                        !st.inner_active
                    };
                    if finished {
                        down.complete();
                    }
                }
            };

            let outer_sub = Subscription::new();
            down.add(outer_sub.clone());
            source.subscribe_with(Subscriber::with_subscription(outer_sub, on_next, on_error, on_complete));
        })
    }

    /// Emits a vector of the latest value from every source whenever any
    /// source emits, once all of them have emitted at least once.
    pub fn combine_latest(sources: Vec<Observable<T>>) -> Observable<Vec<T>> {
        Observable::create(move |down: Subscriber<Vec<T>>| {
            let total = sources.len();
            if total == 0 {
                down.complete();
                return;
            }
            let state = Arc::new(Mutex::new(CombineState {
                latest: vec![None; total],
                completed: 0,
            }));

            for (index, source) in sources.iter().enumerate() {
                if down.is_closed() {
                    return;
                }
                let child = Subscription::new();
                down.add(child.clone());

                let d_next = down.clone();
                let d_error = down.clone();
                let d_complete = down.clone();
                let st_next = Arc::clone(&state);
                let st_complete = Arc::clone(&state);
                source.subscribe_with(Subscriber::with_subscription(
                    child,
                    move |v| {
                        let snapshot = {
                            let mut st = lock(&st_next);
                            st.latest[index] = Some(v);
                            st.latest.iter().cloned().collect::<Option<Vec<T>>>()
                        };
                        if let Some(values) = snapshot {
                            d_next.next(values);
                        }
                    },
                    move |fault| d_error.error(fault),
                    move || {
                        let done = {
                            let mut st = lock(&st_complete);
                            st.completed += 1;
                            st.completed == total
                        };
                        if done {
                            d_complete.complete();
                        }
                    },
                ));
            }
        })
    }

    /// Interleaves every source; completes once all of them have completed.
    pub fn merge(sources: Vec<Observable<T>>) -> Self {
        Self::create(move |down| {
            let total = sources.len();
            if total == 0 {
                down.complete();
                return;
            }
            let completed = Arc::new(AtomicUsize::new(0));
            for source in &sources {
                if down.is_closed() {
                    return;
                }
                let child = Subscription::new();
                down.add(child.clone());
                let d_next = down.clone();
                let d_error = down.clone();
                let d_complete = down.clone();
                let completed = Arc::clone(&completed);
                source.subscribe_with(Subscriber::with_subscription(
                    child,
                    move |v| d_next.next(v),
                    move |fault| d_error.error(fault),
                    move || {
                        if completed.fetch_add(1, Ordering::AcqRel) + 1 == total {
                            d_complete.complete();
                        }
                    },
                ));
            }
        })
    }
}

impl<T: Item + PartialEq> Observable<T> {
    /// Suppresses consecutive equal values.
    pub fn distinct_until_changed(&self) -> Self {
        self.distinct_until_changed_by(|a, b| a == b)
    }
}

#[derive(Default)]
struct SwitchState {
    generation: u64,
    inner_active: bool,
    outer_done: bool,
}

struct CombineState<T> {
    latest: Vec<Option<T>>,
    completed: usize,
}
