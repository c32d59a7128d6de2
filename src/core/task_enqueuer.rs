//! Enqueuer whose items are commands run against a privately owned state.

use std::panic::{catch_unwind, AssertUnwindSafe};

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::config::EnqueuerConfig;

use super::deferred::{self, Deferred};
use super::{Activate, Activation, Enqueuer, EnqueuerError, EnqueuerStats, TaskError};

/// A queued command. It receives exclusive access to the state for the
/// duration of its activation, including any pending signal it returns.
pub type Command<S> = Box<dyn for<'a> FnOnce(&'a mut S) -> Activation<'a> + Send>;

struct CommandRunner<S> {
    state: S,
}

impl<S: Send + 'static> Activate<Command<S>> for CommandRunner<S> {
    fn activate(&mut self, item: Option<Command<S>>) -> Activation<'_> {
        match item {
            Some(command) => command(&mut self.state),
            None => Activation::Idle,
        }
    }
}

/// Serializes closures over a state value of type `S`.
///
/// The state is owned by the enqueuer's consumer and is only reachable from
/// inside commands, so no two commands ever observe it concurrently.
pub struct TaskEnqueuer<S> {
    enq: Enqueuer<Command<S>>,
}

impl<S> Clone for TaskEnqueuer<S> {
    fn clone(&self) -> Self {
        Self {
            enq: self.enq.clone(),
        }
    }
}

impl<S> std::fmt::Debug for TaskEnqueuer<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("TaskEnqueuer").field(&self.enq).finish()
    }
}

impl<S: Send + 'static> TaskEnqueuer<S> {
    /// Create a task enqueuer owning `state`.
    ///
    /// # Errors
    ///
    /// See [`Enqueuer::new`].
    pub fn new(config: &EnqueuerConfig, state: S) -> Result<Self, EnqueuerError> {
        Ok(Self {
            enq: Enqueuer::new(config, CommandRunner { state })?,
        })
    }

    /// Attempt a non-blocking enqueue of a command.
    ///
    /// Returns `false` iff the inbound queue is full.
    pub fn offer<F>(&self, command: F) -> bool
    where
        F: for<'a> FnOnce(&'a mut S) -> Activation<'a> + Send + 'static,
    {
        self.enq.offer(Box::new(command))
    }

    /// Enqueue a command or report [`EnqueuerError::Rejected`].
    ///
    /// # Errors
    ///
    /// Returns `EnqueuerError::Rejected` if the inbound queue is full.
    pub fn must_offer<F>(&self, command: F) -> Result<(), EnqueuerError>
    where
        F: for<'a> FnOnce(&'a mut S) -> Activation<'a> + Send + 'static,
    {
        self.enq.must_offer(Box::new(command))
    }

    /// Enqueue a call whose eventual result completes the returned deferred.
    ///
    /// `supplier` runs inside a future activation. The enqueuer does not move
    /// on to the next command until the future it returns resolves. Panics in
    /// either the supplier or its future fail the deferred with
    /// [`TaskError::Panicked`].
    ///
    /// # Errors
    ///
    /// Returns `EnqueuerError::Rejected` if the inbound queue is full.
    pub fn must_offer_call<A, F>(&self, supplier: F) -> Result<Deferred<A>, EnqueuerError>
    where
        A: Send + 'static,
        F: for<'a> FnOnce(&'a mut S) -> BoxFuture<'a, A> + Send + 'static,
    {
        let (completer, deferred) = deferred::channel();
        self.must_offer(move |state: &mut S| {
            let call = match catch_unwind(AssertUnwindSafe(move || supplier(state))) {
                Ok(call) => call,
                Err(panic) => {
                    completer.fail(TaskError::from_panic(panic));
                    return Activation::Idle;
                }
            };
            Activation::Pending(Box::pin(async move {
                match AssertUnwindSafe(call).catch_unwind().await {
                    Ok(value) => completer.complete(value),
                    Err(panic) => completer.fail(TaskError::from_panic(panic)),
                }
            }))
        })?;
        Ok(deferred)
    }

    /// Enqueue a synchronous call whose result completes the returned deferred.
    ///
    /// # Errors
    ///
    /// Returns `EnqueuerError::Rejected` if the inbound queue is full.
    pub fn must_offer_call_sync<A, F>(&self, call: F) -> Result<Deferred<A>, EnqueuerError>
    where
        A: Send + 'static,
        F: FnOnce(&mut S) -> A + Send + 'static,
    {
        let (completer, deferred) = deferred::channel();
        self.must_offer(move |state: &mut S| {
            completer.settle(
                catch_unwind(AssertUnwindSafe(|| call(state))).map_err(TaskError::from_panic),
            );
            Activation::Idle
        })?;
        Ok(deferred)
    }

    /// The underlying enqueuer.
    #[must_use]
    pub const fn enqueuer(&self) -> &Enqueuer<Command<S>> {
        &self.enq
    }

    /// Get current enqueuer statistics.
    #[must_use]
    pub fn stats(&self) -> EnqueuerStats {
        self.enq.stats()
    }
}
