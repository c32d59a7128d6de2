//! Deferred values: results produced inside an activation, observed by the caller.
//!
//! A [`Deferred`] is the receiving half of a one-shot channel. It can be
//! awaited, polled without waiting via [`Deferred::try_take`], or waited on
//! from synchronous code with [`Deferred::wait`]. The producing side is a
//! [`Completer`], which travels with the queued command and settles the
//! value exactly once. If the completer is dropped unsettled (the command was
//! discarded), the deferred resolves to [`TaskError::Abandoned`].

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use super::TaskError;

/// Create a connected completer/deferred pair.
#[must_use]
pub fn channel<T>() -> (Completer<T>, Deferred<T>) {
    let (tx, rx) = oneshot::channel();
    (Completer { tx }, Deferred { rx })
}

/// Producing half of a deferred value.
#[derive(Debug)]
pub struct Completer<T> {
    tx: oneshot::Sender<Result<T, TaskError>>,
}

impl<T> Completer<T> {
    /// Complete with a value.
    pub fn complete(self, value: T) {
        self.settle(Ok(value));
    }

    /// Complete with an error.
    pub fn fail(self, error: TaskError) {
        self.settle(Err(error));
    }

    /// Complete with an outcome. A caller that stopped listening is not an error.
    pub fn settle(self, outcome: Result<T, TaskError>) {
        if self.tx.send(outcome).is_err() {
            tracing::trace!("deferred receiver dropped before completion");
        }
    }

    /// Whether the observing side has been dropped.
    #[must_use]
    pub fn is_abandoned(&self) -> bool {
        self.tx.is_closed()
    }
}

/// A result or error that becomes available later.
#[derive(Debug)]
#[must_use = "a deferred value does nothing unless observed"]
pub struct Deferred<T> {
    rx: oneshot::Receiver<Result<T, TaskError>>,
}

impl<T> Deferred<T> {
    /// Take the outcome if it is already available.
    ///
    /// Returns `None` while the value is still pending.
    pub fn try_take(&mut self) -> Option<Result<T, TaskError>> {
        match self.rx.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(TaskError::Abandoned)),
        }
    }

    /// Block the current thread until the outcome is available.
    ///
    /// # Panics
    ///
    /// Panics if called from within an asynchronous execution context; await
    /// the deferred there instead.
    pub fn wait(self) -> Result<T, TaskError> {
        self.rx.blocking_recv().unwrap_or(Err(TaskError::Abandoned))
    }
}

impl<T> Future for Deferred<T> {
    type Output = Result<T, TaskError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(_)) => Poll::Ready(Err(TaskError::Abandoned)),
            Poll::Pending => Poll::Pending,
        }
    }
}
