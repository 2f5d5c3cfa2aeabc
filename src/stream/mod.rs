//! Push-based stream primitives.
//!
//! Everything in the notification graph is built on four pieces: a disposal
//! handle (`Subscription`), a callback bundle (`Subscriber`), a cold stream
//! (`Observable`), and multicast hubs (`Subject`, `BehaviorSubject`).
//! Delivery is synchronous and ordered; nothing here spawns threads. The
//! `tokio` feature adds a bridge that runs futures on the caller's runtime.
//!
//! No lock is held while a callback runs, so subscribers may freely write to
//! the sources they observe.

/// Recording and blocking-channel consumers.
pub mod bridge;
/// Cold streams and operators.
pub mod observable;
/// Multicast hubs.
pub mod subject;
/// Callback bundles.
pub mod subscriber;
/// Disposal handles.
pub mod subscription;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use bridge::{ObservedStream, Recording, StreamEvent};
pub use observable::Observable;
pub use subject::{BehaviorSubject, Subject};
pub use subscriber::Subscriber;
pub use subscription::{SerialSubscription, Subscription};

/// Bound shared by every item that flows through a stream.
pub trait Item: Clone + Send + Sync + 'static {}

impl<T: Clone + Send + Sync + 'static> Item for T {}

/// Locks a mutex, recovering the guard if a panicking callback poisoned it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
