use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use super::lock;

type Teardown = Box<dyn FnOnce() + Send>;

enum Entry {
    Teardown(Teardown),
    Child(Subscription),
}

struct SubscriptionInner {
    closed: AtomicBool,
    entries: Mutex<Vec<Entry>>,
}

/// A disposable bundle.
///
/// Aggregates teardown closures and child subscriptions and releases them
/// together, exactly once. Clones share the same bundle. Dropping a handle
/// does not unsubscribe.
#[derive(Clone)]
pub struct Subscription {
    inner: Arc<SubscriptionInner>,
}

impl Subscription {
    /// Creates an open, empty subscription.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SubscriptionInner {
                closed: AtomicBool::new(false),
                entries: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Creates a subscription that runs `teardown` when released.
    #[must_use]
    pub fn from_teardown(teardown: impl FnOnce() + Send + 'static) -> Self {
        let sub = Self::new();
        sub.add_teardown(teardown);
        sub
    }

    /// Creates a subscription that is already released.
    #[must_use]
    pub fn closed() -> Self {
        let sub = Self::new();
        sub.unsubscribe();
        sub
    }

    /// Whether `unsubscribe` has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Registers a teardown. Runs it immediately if already released.
    pub fn add_teardown(&self, teardown: impl FnOnce() + Send + 'static) {
        self.push(Entry::Teardown(Box::new(teardown)));
    }

    /// Adds a child that is released together with this subscription.
    pub fn add(&self, child: Subscription) {
        if self.ptr_eq(&child) {
            return;
        }
        self.push(Entry::Child(child));
    }

    /// Detaches a child without releasing it.
    pub fn remove(&self, child: &Subscription) {
        lock(&self.inner.entries).retain(|entry| match entry {
            Entry::Child(existing) => !existing.ptr_eq(child),
            Entry::Teardown(_) => true,
        });
    }

    /// Releases every teardown and child. Idempotent.
    pub fn unsubscribe(&self) {
        let entries = {
            let mut guard = lock(&self.inner.entries);
            if self.inner.closed.swap(true, Ordering::AcqRel) {
                return;
            }
            std::mem::take(&mut *guard)
        };

        for entry in entries {
            run(entry);
        }
    }

    /// True when both handles refer to the same bundle.
    #[must_use]
    pub fn ptr_eq(&self, other: &Subscription) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn push(&self, entry: Entry) {
        {
            let mut guard = lock(&self.inner.entries);
            if !self.inner.closed.load(Ordering::Acquire) {
                guard.push(entry);
                return;
            }
        }
        run(entry);
    }
}

fn run(entry: Entry) {
    match entry {
        Entry::Teardown(teardown) => teardown(),
        Entry::Child(child) => child.unsubscribe(),
    }
}

impl Default for Subscription {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct SerialState {
    current: Option<Subscription>,
    closed: bool,
}

/// A single-slot subscription holder.
///
/// Setting a new subscription releases the previous one, so the holder has
/// at most one live upstream subscription at any time. Once the holder is
/// released, anything set into it is released immediately.
#[derive(Clone, Default)]
pub struct SerialSubscription {
    state: Arc<Mutex<SerialState>>,
}

impl SerialSubscription {
    /// Creates an empty holder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the held subscription, releasing the previous one.
    pub fn set(&self, next: Subscription) {
        let previous = {
            let mut state = lock(&self.state);
            if state.closed {
                None
            } else {
                Some(state.current.replace(next.clone()))
            }
        };

        match previous {
            None => next.unsubscribe(),
            Some(Some(prev)) if !prev.ptr_eq(&next) => prev.unsubscribe(),
            Some(_) => {}
        }
    }

    /// Releases the held subscription and leaves the slot empty.
    pub fn clear(&self) {
        let previous = lock(&self.state).current.take();
        if let Some(prev) = previous {
            prev.unsubscribe();
        }
    }

    /// The subscription currently held, if any.
    #[must_use]
    pub fn current(&self) -> Option<Subscription> {
        lock(&self.state).current.clone()
    }

    /// Whether the holder itself has been released.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }

    /// Releases the held subscription and closes the holder.
    pub fn unsubscribe(&self) {
        let previous = {
            let mut state = lock(&self.state);
            state.closed = true;
            state.current.take()
        };
        if let Some(prev) = previous {
            prev.unsubscribe();
        }
    }

    /// A plain subscription that releases this holder.
    #[must_use]
    pub fn to_subscription(&self) -> Subscription {
        let serial = self.clone();
        Subscription::from_teardown(move || serial.unsubscribe())
    }
}

impl fmt::Debug for SerialSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("SerialSubscription")
            .field("occupied", &state.current.is_some())
            .field("closed", &state.closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter() -> (Arc<AtomicUsize>, impl Fn() -> Subscription) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let make = move || {
            let c = Arc::clone(&c);
            Subscription::from_teardown(move || {
                c.fetch_add(1, Ordering::SeqCst);
            })
        };
        (count, make)
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let (count, make) = counter();
        let sub = make();
        sub.unsubscribe();
        sub.unsubscribe();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(sub.is_closed());
    }

    #[test]
    fn test_children_released_with_parent() {
        let (count, make) = counter();
        let parent = Subscription::new();
        parent.add(make());
        parent.add(make());
        assert_eq!(count.load(Ordering::SeqCst), 0);
        parent.unsubscribe();
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_add_after_close_runs_immediately() {
        let (count, make) = counter();
        let parent = Subscription::closed();
        parent.add(make());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_removed_child_survives_parent() {
        let (count, make) = counter();
        let parent = Subscription::new();
        let child = make();
        parent.add(child.clone());
        parent.remove(&child);
        parent.unsubscribe();
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(!child.is_closed());
    }

    #[test]
    fn test_serial_releases_previous() {
        let (count, make) = counter();
        let serial = SerialSubscription::new();
        serial.set(make());
        assert_eq!(count.load(Ordering::SeqCst), 0);
        serial.set(make());
        assert_eq!(count.load(Ordering::SeqCst), 1);
        serial.unsubscribe();
        assert_eq!(count.load(Ordering::SeqCst), 2);

        serial.set(make());
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert!(serial.current().is_none());
    }
}
