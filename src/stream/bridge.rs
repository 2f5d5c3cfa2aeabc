use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, TryRecvError, TrySendError};

use crate::error::{SourceFault, WhenError, WhenResult};

use super::observable::Observable;
use super::subscription::Subscription;
use super::{lock, Item};

/// Every emission of a stream, collected in order.
pub struct Recording<T> {
    items: Arc<Mutex<Vec<T>>>,
    faults: Arc<Mutex<Vec<SourceFault>>>,
    completed: Arc<AtomicBool>,
    subscription: Subscription,
}

impl<T: Item> Recording<T> {
    /// Number of values recorded so far.
    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.items).len()
    }

    /// True when no value has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        lock(&self.items).is_empty()
    }

    /// A copy of every recorded value.
    #[must_use]
    pub fn values(&self) -> Vec<T> {
        lock(&self.items).clone()
    }

    /// The value at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<T> {
        lock(&self.items).get(index).cloned()
    }

    /// The most recent value.
    #[must_use]
    pub fn last(&self) -> Option<T> {
        lock(&self.items).last().cloned()
    }

    /// Removes and returns the most recent value.
    pub fn pop(&self) -> Option<T> {
        lock(&self.items).pop()
    }

    /// Faults delivered to the recording.
    #[must_use]
    pub fn faults(&self) -> Vec<SourceFault> {
        lock(&self.faults).clone()
    }

    /// Whether the stream completed.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }

    /// The subscription feeding the recording.
    #[must_use]
    pub const fn subscription(&self) -> &Subscription {
        &self.subscription
    }

    /// Stops recording.
    pub fn unsubscribe(&self) {
        self.subscription.unsubscribe();
    }
}

impl<T: fmt::Debug> fmt::Debug for Recording<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Recording")
            .field("items", &*lock(&self.items))
            .field("faults", &*lock(&self.faults))
            .field("completed", &self.completed.load(Ordering::Acquire))
            .finish()
    }
}

/// One delivery on an `ObservedStream`.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent<T> {
    /// A value.
    Next(T),
    /// The stream failed.
    Error(SourceFault),
    /// The stream completed.
    Complete,
}

/// Blocking consumer for a stream.
///
/// Values are buffered in a bounded channel; when the buffer is full new
/// values are dropped and counted rather than blocking the emitter.
/// Dropping this handle unsubscribes.
pub struct ObservedStream<T> {
    rx: Receiver<StreamEvent<T>>,
    subscription: Subscription,
    dropped: Arc<AtomicU64>,
    unregistered: AtomicBool,
}

impl<T: Item> ObservedStream<T> {
    /// Receive the next value (blocking).
    pub fn recv(&self) -> WhenResult<T> {
        match self.rx.recv() {
            Ok(event) => unpack(event),
            Err(_) => Err(closed()),
        }
    }

    /// Receive the next value with a timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> WhenResult<T> {
        match self.rx.recv_timeout(timeout) {
            Ok(event) => unpack(event),
            Err(RecvTimeoutError::Timeout) => Err(WhenError::Timeout {
                path: "observed_stream".to_string(),
                duration_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }),
            Err(RecvTimeoutError::Disconnected) => Err(closed()),
        }
    }

    /// Receive a value if one is buffered.
    pub fn try_recv(&self) -> WhenResult<Option<T>> {
        match self.rx.try_recv() {
            Ok(event) => unpack(event).map(Some),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(closed()),
        }
    }

    /// Number of values dropped because the buffer was full.
    #[must_use]
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Stops the upstream subscription. Idempotent.
    pub fn unsubscribe(&self) {
        if self.unregistered.swap(true, Ordering::AcqRel) {
            return;
        }
        self.subscription.unsubscribe();
    }
}

impl<T> Drop for ObservedStream<T> {
    fn drop(&mut self) {
        if !self.unregistered.swap(true, Ordering::AcqRel) {
            self.subscription.unsubscribe();
        }
    }
}

impl<T> fmt::Debug for ObservedStream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservedStream")
            .field("buffered", &self.rx.len())
            .field("dropped", &self.dropped.load(Ordering::Relaxed))
            .finish()
    }
}

fn closed() -> WhenError {
    WhenError::StreamClosed {
        path: "observed_stream".to_string(),
    }
}

fn unpack<T>(event: StreamEvent<T>) -> WhenResult<T> {
    match event {
        StreamEvent::Next(value) => Ok(value),
        StreamEvent::Error(fault) => Err(WhenError::Source(fault)),
        StreamEvent::Complete => Err(closed()),
    }
}

impl<T: Item> Observable<T> {
    /// Subscribes and collects every emission (test and diagnostics helper).
    pub fn record(&self) -> Recording<T> {
        let items = Arc::new(Mutex::new(Vec::new()));
        let faults = Arc::new(Mutex::new(Vec::new()));
        let completed = Arc::new(AtomicBool::new(false));

        let i = Arc::clone(&items);
        let f = Arc::clone(&faults);
        let c = Arc::clone(&completed);
        let subscription = self.subscribe_all(
            move |v| lock(&i).push(v),
            move |fault| lock(&f).push(fault),
            move || c.store(true, Ordering::Release),
        );

        Recording {
            items,
            faults,
            completed,
            subscription,
        }
    }

    /// Subscribes into a bounded channel for blocking consumers.
    pub fn into_blocking(&self, capacity: usize) -> ObservedStream<T> {
        let (tx, rx) = bounded::<StreamEvent<T>>(capacity.max(1));
        let dropped = Arc::new(AtomicU64::new(0));

        let tx_next = tx.clone();
        let tx_error = tx.clone();
        let d = Arc::clone(&dropped);
        let subscription = self.subscribe_all(
            move |v| match tx_next.try_send(StreamEvent::Next(v)) {
                Ok(()) => {}
                Err(TrySendError::Full(_) | TrySendError::Disconnected(_)) => {
                    d.fetch_add(1, Ordering::Relaxed);
                }
            },
            move |fault| {
                let _ = tx_error.try_send(StreamEvent::Error(fault));
            },
            move || {
                let _ = tx.try_send(StreamEvent::Complete);
            },
        );

        ObservedStream {
            rx,
            subscription,
            dropped,
            unregistered: AtomicBool::new(false),
        }
    }
}

#[cfg(feature = "tokio")]
mod future_source {
    use std::future::Future;
    use std::sync::{Arc, Mutex};

    use crate::error::SourceFault;
    use crate::stream::{lock, Item, Observable};

    impl<T: Item> Observable<T> {
        /// Runs `future` on the current tokio runtime and emits its result once.
        ///
        /// The future runs for the first subscriber only and is aborted when
        /// that subscriber unsubscribes; later subscribers receive a fault.
        /// Subscribing outside a runtime fails with a fault.
        pub fn from_future<F>(future: F) -> Self
        where
            F: Future<Output = Result<T, SourceFault>> + Send + 'static,
        {
            let slot = Arc::new(Mutex::new(Some(future)));
            Self::create(move |sub| {
                let Some(future) = lock(&slot).take() else {
                    sub.error(SourceFault::new("future source was already consumed"));
                    return;
                };
                let handle = match tokio::runtime::Handle::try_current() {
                    Ok(handle) => handle,
                    Err(err) => {
                        sub.error(SourceFault::new(format!("no tokio runtime for future source: {err}")));
                        return;
                    }
                };

                let downstream = sub.clone();
                let task = handle.spawn(async move {
                    match future.await {
                        Ok(value) => {
                            downstream.next(value);
                            downstream.complete();
                        }
                        Err(fault) => downstream.error(fault),
                    }
                });
                sub.add_teardown(move || task.abort());
            })
        }

        /// Like `from_future`, but builds a fresh future for every subscriber.
        pub fn from_future_fn<F, Fut>(make: F) -> Self
        where
            F: Fn() -> Fut + Send + Sync + 'static,
            Fut: Future<Output = Result<T, SourceFault>> + Send + 'static,
        {
            Self::create(move |sub| {
                Self::from_future(make()).subscribe_with(sub);
            })
        }
    }
}
