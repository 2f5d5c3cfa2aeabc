use std::fmt;
use std::sync::{Arc, Mutex, Weak};

use crate::error::SourceFault;

use super::observable::Observable;
use super::subscriber::Subscriber;
use super::subscription::Subscription;
use super::{lock, Item};

#[derive(Clone)]
enum Terminal {
    Error(SourceFault),
    Complete,
}

struct SubjectState<T> {
    observers: Vec<(u64, Subscriber<T>)>,
    next_id: u64,
    terminal: Option<Terminal>,
    closed: bool,
}

/// A multicast event hub.
///
/// Each item is delivered, in emission order, to every observer subscribed
/// at the time of emission. A terminated hub replays its error or completion
/// to late subscribers.
pub struct Subject<T> {
    state: Arc<Mutex<SubjectState<T>>>,
}

impl<T> Clone for Subject<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<T: Item> Default for Subject<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Item> Subject<T> {
    /// Creates an open hub with no observers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SubjectState {
                observers: Vec::new(),
                next_id: 0,
                terminal: None,
                closed: false,
            })),
        }
    }

    /// Broadcasts a value to current observers.
    pub fn next(&self, value: T) {
        let observers: Vec<Subscriber<T>> = {
            let state = lock(&self.state);
            if state.closed || state.terminal.is_some() {
                return;
            }
            state.observers.iter().map(|(_, sub)| sub.clone()).collect()
        };

        for observer in observers {
            observer.next(value.clone());
        }
    }

    /// Terminates the hub with a fault.
    pub fn error(&self, fault: SourceFault) {
        let observers = {
            let mut state = lock(&self.state);
            if state.closed || state.terminal.is_some() {
                return;
            }
            state.terminal = Some(Terminal::Error(fault.clone()));
            std::mem::take(&mut state.observers)
        };

        for (_, observer) in observers {
            observer.error(fault.clone());
        }
    }

    /// Terminates the hub normally.
    pub fn complete(&self) {
        let observers = {
            let mut state = lock(&self.state);
            if state.closed || state.terminal.is_some() {
                return;
            }
            state.terminal = Some(Terminal::Complete);
            std::mem::take(&mut state.observers)
        };

        for (_, observer) in observers {
            observer.complete();
        }
    }

    /// Drops every observer without notifying them. Later emissions and
    /// subscriptions are ignored.
    pub fn close(&self) {
        let observers = {
            let mut state = lock(&self.state);
            state.closed = true;
            std::mem::take(&mut state.observers)
        };
        drop(observers);
    }

    /// Number of live observers.
    #[must_use]
    pub fn observer_count(&self) -> usize {
        lock(&self.state).observers.len()
    }

    /// The fault this hub terminated with, if any.
    #[must_use]
    pub fn fault(&self) -> Option<SourceFault> {
        match &lock(&self.state).terminal {
            Some(Terminal::Error(fault)) => Some(fault.clone()),
            _ => None,
        }
    }

    /// Whether the hub has errored, completed, or been closed.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        let state = lock(&self.state);
        state.closed || state.terminal.is_some()
    }

    /// Registers an observer.
    pub fn subscribe_with(&self, subscriber: Subscriber<T>) -> Subscription {
        let subscription = subscriber.subscription().clone();
        let registered = {
            let mut state = lock(&self.state);
            if state.closed {
                return subscription;
            }
            match state.terminal.clone() {
                Some(terminal) => Err(terminal),
                None => {
                    let id = state.next_id;
                    state.next_id += 1;
                    state.observers.push((id, subscriber.clone()));
                    Ok(id)
                }
            }
        };

        match registered {
            Ok(id) => {
                let weak: Weak<Mutex<SubjectState<T>>> = Arc::downgrade(&self.state);
                subscriber.add_teardown(move || {
                    if let Some(state) = weak.upgrade() {
                        lock(&state).observers.retain(|(existing, _)| *existing != id);
                    }
                });
            }
            Err(Terminal::Error(fault)) => subscriber.error(fault),
            Err(Terminal::Complete) => subscriber.complete(),
        }

        subscription
    }

    /// This hub as a stream.
    #[must_use]
    pub fn as_observable(&self) -> Observable<T> {
        let subject = self.clone();
        Observable::create(move |sub| {
            subject.subscribe_with(sub);
        })
    }
}

impl<T> fmt::Debug for Subject<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("Subject")
            .field("observers", &state.observers.len())
            .field("stopped", &(state.closed || state.terminal.is_some()))
            .finish()
    }
}

/// A replay-latest hub.
///
/// Remembers its most recent value and delivers it to every new subscriber
/// immediately.
pub struct BehaviorSubject<T> {
    subject: Subject<T>,
    latest: Arc<Mutex<T>>,
}

impl<T> Clone for BehaviorSubject<T> {
    fn clone(&self) -> Self {
        Self {
            subject: self.subject.clone(),
            latest: Arc::clone(&self.latest),
        }
    }
}

impl<T: Item> BehaviorSubject<T> {
    /// Creates a hub holding `initial`.
    pub fn new(initial: T) -> Self {
        Self {
            subject: Subject::new(),
            latest: Arc::new(Mutex::new(initial)),
        }
    }

    /// The most recent value.
    #[must_use]
    pub fn value(&self) -> T {
        lock(&self.latest).clone()
    }

    /// Stores and broadcasts a value.
    pub fn next(&self, value: T) {
        if self.subject.is_stopped() {
            return;
        }
        *lock(&self.latest) = value.clone();
        self.subject.next(value);
    }

    /// Terminates the hub with a fault.
    pub fn error(&self, fault: SourceFault) {
        self.subject.error(fault);
    }

    /// Terminates the hub normally.
    pub fn complete(&self) {
        self.subject.complete();
    }

    /// Number of live observers.
    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.subject.observer_count()
    }

    /// This hub as a stream, replaying the latest value on subscribe.
    #[must_use]
    pub fn as_observable(&self) -> Observable<T> {
        let this = self.clone();
        Observable::create(move |sub: Subscriber<T>| {
            this.subject.subscribe_with(sub.clone());
            if !sub.is_closed() {
                sub.next(this.value());
            }
        })
    }
}

impl<T: fmt::Debug> fmt::Debug for BehaviorSubject<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BehaviorSubject")
            .field("latest", &*lock(&self.latest))
            .field("subject", &self.subject)
            .finish()
    }
}
