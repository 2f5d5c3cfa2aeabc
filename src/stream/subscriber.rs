use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::SourceFault;

use super::subscription::Subscription;

type NextFn<T> = dyn Fn(T) + Send + Sync;
type ErrorFn = dyn Fn(SourceFault) + Send + Sync;
type CompleteFn = dyn Fn() + Send + Sync;

struct Callbacks<T> {
    next: Box<NextFn<T>>,
    error: Box<ErrorFn>,
    complete: Box<CompleteFn>,
}

/// The receiving end of a stream.
///
/// A subscriber stops delivering as soon as it is stopped (error or
/// completion) or its subscription is released, including for items that
/// were already in flight from a snapshot of a hub's observers.
pub struct Subscriber<T> {
    callbacks: Arc<Callbacks<T>>,
    stopped: Arc<AtomicBool>,
    subscription: Subscription,
}

impl<T> Clone for Subscriber<T> {
    fn clone(&self) -> Self {
        Self {
            callbacks: Arc::clone(&self.callbacks),
            stopped: Arc::clone(&self.stopped),
            subscription: self.subscription.clone(),
        }
    }
}

impl<T: 'static> Subscriber<T> {
    /// Creates a subscriber with a fresh subscription.
    pub fn new(
        next: impl Fn(T) + Send + Sync + 'static,
        error: impl Fn(SourceFault) + Send + Sync + 'static,
        complete: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        Self::with_subscription(Subscription::new(), next, error, complete)
    }

    /// Creates a subscriber bound to an existing subscription.
    pub fn with_subscription(
        subscription: Subscription,
        next: impl Fn(T) + Send + Sync + 'static,
        error: impl Fn(SourceFault) + Send + Sync + 'static,
        complete: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        Self {
            callbacks: Arc::new(Callbacks {
                next: Box::new(next),
                error: Box::new(error),
                complete: Box::new(complete),
            }),
            stopped: Arc::new(AtomicBool::new(false)),
            subscription,
        }
    }

    /// Builds an upstream subscriber for an operator: same subscription,
    /// errors and completion forwarded here, values handled by `next`.
    pub fn derive<U: 'static>(&self, next: impl Fn(U) + Send + Sync + 'static) -> Subscriber<U> {
        let on_error = self.clone();
        let on_complete = self.clone();
        Subscriber::with_subscription(
            self.subscription.clone(),
            next,
            move |fault| on_error.error(fault),
            move || on_complete.complete(),
        )
    }

    /// Delivers a value unless stopped.
    pub fn next(&self, value: T) {
        if self.is_closed() {
            return;
        }
        (self.callbacks.next)(value);
    }

    /// Delivers a fault, then releases the subscription.
    pub fn error(&self, fault: SourceFault) {
        if self.subscription.is_closed() || self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        (self.callbacks.error)(fault);
        self.subscription.unsubscribe();
    }

    /// Signals completion, then releases the subscription.
    pub fn complete(&self) {
        if self.subscription.is_closed() || self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        (self.callbacks.complete)();
        self.subscription.unsubscribe();
    }

    /// Whether no further values will be delivered.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.stopped.load(Ordering::Acquire) || self.subscription.is_closed()
    }

    /// The subscription controlling this subscriber.
    #[must_use]
    pub const fn subscription(&self) -> &Subscription {
        &self.subscription
    }

    /// Registers a teardown on this subscriber's subscription.
    pub fn add_teardown(&self, teardown: impl FnOnce() + Send + 'static) {
        self.subscription.add_teardown(teardown);
    }

    /// Ties a child subscription to this subscriber's lifetime.
    pub fn add(&self, child: Subscription) {
        self.subscription.add(child);
    }
}

impl<T> fmt::Debug for Subscriber<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("stopped", &self.stopped.load(Ordering::Acquire))
            .field("subscription", &self.subscription)
            .finish()
    }
}
