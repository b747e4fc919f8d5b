//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Asynchronous flow-control primitives."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Single-settlement operation handles.
//!
//! An [`Operation`] is a unit of work that is already in flight. It settles
//! exactly once, either with a value or with a failure reason, and observing it
//! never starts, retries or cancels the work. Dropping the handle only detaches
//! the observer.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::warn;

static SETTLEMENT_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Outcome of an operation stamped with the global settlement order.
pub(crate) struct Settlement<T, E> {
    pub(crate) sequence: u64,
    pub(crate) outcome: Result<T, E>,
}

impl<T, E> Settlement<T, E> {
    fn now(outcome: Result<T, E>) -> Self {
        Self {
            sequence: SETTLEMENT_SEQUENCE.fetch_add(1, Ordering::Relaxed),
            outcome,
        }
    }
}

enum Source<T, E> {
    Settled(Settlement<T, E>),
    Channel(oneshot::Receiver<Settlement<T, E>>),
    Task(JoinHandle<Settlement<T, E>>),
    // Producer went away without settling; behaves like a hung operation.
    Abandoned,
    Consumed,
}

/// Handle to an in-flight asynchronous operation.
///
/// Resolves to `Ok(T)` or `Err(E)` exactly once. Polling after the outcome
/// has been taken returns [`Poll::Pending`].
pub struct Operation<T, E> {
    source: Source<T, E>,
}

// The outcome is only ever moved out by value, never pinned.
impl<T, E> Unpin for Operation<T, E> {}

impl<T, E> Operation<T, E> {
    /// Create an unsettled operation together with the [`Completer`] that settles it.
    pub fn channel() -> (Completer<T, E>, Self) {
        let (sender, receiver) = oneshot::channel();
        (
            Completer { sender },
            Self {
                source: Source::Channel(receiver),
            },
        )
    }

    /// An operation that has already succeeded.
    pub fn ready(value: T) -> Self {
        Self::settled(Ok(value))
    }

    /// An operation that has already failed.
    pub fn failed(reason: E) -> Self {
        Self::settled(Err(reason))
    }

    /// An operation that has already settled with the given outcome.
    pub fn settled(outcome: Result<T, E>) -> Self {
        Self {
            source: Source::Settled(Settlement::now(outcome)),
        }
    }

    pub(crate) fn poll_settlement(&mut self, cx: &mut Context<'_>) -> Poll<Settlement<T, E>> {
        let polled = match &mut self.source {
            Source::Settled(_) => None,
            Source::Channel(receiver) => match Pin::new(receiver).poll(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Ok(settlement)) => Some(settlement),
                Poll::Ready(Err(_)) => {
                    warn!(
                        target: "r_ems::flow::operation",
                        "operation completer dropped without settling; operation will never settle",
                    );
                    self.source = Source::Abandoned;
                    return Poll::Pending;
                }
            },
            Source::Task(handle) => match Pin::new(handle).poll(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Ok(settlement)) => Some(settlement),
                Poll::Ready(Err(err)) => {
                    self.source = Source::Abandoned;
                    if err.is_panic() {
                        std::panic::resume_unwind(err.into_panic());
                    }
                    warn!(
                        target: "r_ems::flow::operation",
                        error = %err,
                        "operation task cancelled before settling; operation will never settle",
                    );
                    return Poll::Pending;
                }
            },
            Source::Abandoned | Source::Consumed => return Poll::Pending,
        };

        match polled {
            Some(settlement) => {
                self.source = Source::Consumed;
                Poll::Ready(settlement)
            }
            None => match std::mem::replace(&mut self.source, Source::Consumed) {
                Source::Settled(settlement) => Poll::Ready(settlement),
                other => {
                    self.source = other;
                    Poll::Pending
                }
            },
        }
    }
}

impl<T, E> Operation<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    /// Start `future` on the current tokio runtime and return a handle to it.
    ///
    /// The work keeps running if the handle is dropped. A panic inside the
    /// future is resumed in whichever task observes the handle.
    ///
    /// # Panics
    ///
    /// Panics when called outside of a tokio runtime.
    pub fn spawn<F>(future: F) -> Self
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
    {
        let handle = tokio::spawn(async move { Settlement::now(future.await) });
        Self {
            source: Source::Task(handle),
        }
    }
}

impl<T, E> Future for Operation<T, E> {
    type Output = Result<T, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.get_mut()
            .poll_settlement(cx)
            .map(|settlement| settlement.outcome)
    }
}

impl<T, E> From<Result<T, E>> for Operation<T, E> {
    fn from(outcome: Result<T, E>) -> Self {
        Self::settled(outcome)
    }
}

impl<T, E> fmt::Debug for Operation<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.source {
            Source::Settled(_) => "settled",
            Source::Channel(_) | Source::Task(_) => "in-flight",
            Source::Abandoned => "abandoned",
            Source::Consumed => "consumed",
        };
        f.debug_struct("Operation").field("state", &state).finish()
    }
}

/// Producer side of [`Operation::channel`]. Consumed on settlement, so an
/// operation can only ever settle once.
pub struct Completer<T, E> {
    sender: oneshot::Sender<Settlement<T, E>>,
}

impl<T, E> Completer<T, E> {
    /// Settle the operation successfully.
    pub fn resolve(self, value: T) {
        self.settle(Ok(value));
    }

    /// Settle the operation with a failure reason.
    pub fn reject(self, reason: E) {
        self.settle(Err(reason));
    }

    /// Settle the operation with the provided outcome.
    ///
    /// An observer that already detached silently absorbs the outcome.
    pub fn settle(self, outcome: Result<T, E>) {
        let _ = self.sender.send(Settlement::now(outcome));
    }

    /// Whether an observer is still attached to the operation.
    pub fn is_observed(&self) -> bool {
        !self.sender.is_closed()
    }
}

impl<T, E> fmt::Debug for Completer<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completer")
            .field("observed", &self.is_observed())
            .finish()
    }
}
