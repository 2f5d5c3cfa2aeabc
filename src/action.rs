//! De-duplicated asynchronous commands.
//!
//! `execute` starts the factory only when no execution is in flight;
//! otherwise it hands back the running execution. Results land on a
//! replay-latest `result` stream and failures on `thrown_errors`.

use std::fmt;
use std::sync::{Arc, Mutex};

use crate::error::SourceFault;
use crate::stream::{lock, BehaviorSubject, Item, Observable, SerialSubscription, Subject, Subscriber};

type ExecuteFactory<T> = Arc<dyn Fn() -> Result<Observable<T>, SourceFault> + Send + Sync>;

struct ActionInner<T> {
    factory: ExecuteFactory<T>,
    result: BehaviorSubject<T>,
    thrown_errors: Subject<SourceFault>,
    inflight: SerialSubscription,
    current: Arc<Mutex<Option<Observable<T>>>>,
}

/// A command whose executions never overlap.
///
/// Clones share the same command.
pub struct Action<T> {
    inner: Arc<ActionInner<T>>,
}

impl<T> Clone for Action<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Item> Action<T> {
    /// An action running a synchronous function.
    pub fn create(func: impl Fn() -> T + Send + Sync + 'static, initial: T) -> Self {
        Self::create_async(move || Ok(Observable::of(func())), initial)
    }

    /// An action running a stream-producing factory.
    ///
    /// A factory that fails outright reports the fault on `thrown_errors`
    /// and `execute` returns a failing stream.
    pub fn create_async(
        factory: impl Fn() -> Result<Observable<T>, SourceFault> + Send + Sync + 'static,
        initial: T,
    ) -> Self {
        Self {
            inner: Arc::new(ActionInner {
                factory: Arc::new(factory),
                result: BehaviorSubject::new(initial),
                thrown_errors: Subject::new(),
                inflight: SerialSubscription::new(),
                current: Arc::new(Mutex::new(None)),
            }),
        }
    }

    /// A reusable closure that executes the action.
    pub fn bind(&self) -> impl Fn() -> Observable<T> + Send + Sync + 'static {
        let action = self.clone();
        move || action.execute()
    }

    /// Runs the action, or returns the execution already in flight.
    ///
    /// The returned stream is shared: it delivers what the execution emits
    /// from the moment of subscription, and replays a failure or completion
    /// to late subscribers.
    pub fn execute(&self) -> Observable<T> {
        if let Some(current) = lock(&self.inner.current).clone() {
            return current;
        }
        tracing::debug!("executing action");

        let source = match (self.inner.factory)() {
            Ok(source) => source,
            Err(fault) => {
                tracing::debug!(error = %fault, "action factory failed");
                self.inner.thrown_errors.next(fault.clone());
                return Observable::throw(fault);
            }
        };

        let shared: Subject<T> = Subject::new();
        let execution = shared.as_observable();

        let result = self.inner.result.clone();
        let thrown = self.inner.thrown_errors.clone();
        let on_error = Arc::clone(&self.inner.current);
        let on_complete = Arc::clone(&self.inner.current);
        shared.subscribe_with(Subscriber::new(
            move |x: T| {
                tracing::trace!("dispatching action result");
                result.next(x);
            },
            move |fault| {
                lock(&on_error).take();
                thrown.next(fault);
            },
            move || {
                lock(&on_complete).take();
            },
        ));

        *lock(&self.inner.current) = Some(execution.clone());

        let (s_next, s_error, s_complete) = (shared.clone(), shared.clone(), shared);
        let connection = source.subscribe_all(
            move |x| s_next.next(x),
            move |fault| s_error.error(fault),
            move || s_complete.complete(),
        );
        self.inner.inflight.set(connection);

        execution
    }

    /// Whether an execution is in flight.
    #[must_use]
    pub fn is_executing(&self) -> bool {
        lock(&self.inner.current).is_some()
    }

    /// Replay-latest stream of results, starting with the initial value.
    #[must_use]
    pub fn result(&self) -> Observable<T> {
        self.inner.result.as_observable()
    }

    /// The most recent result.
    #[must_use]
    pub fn latest(&self) -> T {
        self.inner.result.value()
    }

    /// Faults raised by executions.
    #[must_use]
    pub fn thrown_errors(&self) -> Observable<SourceFault> {
        self.inner.thrown_errors.as_observable()
    }
}

impl<T: Item + fmt::Debug> fmt::Debug for Action<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action")
            .field("latest", &self.inner.result.value())
            .field("executing", &self.is_executing())
            .finish_non_exhaustive()
    }
}
