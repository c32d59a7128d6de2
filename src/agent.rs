//! Agent: asynchronous, serialized access to a shared state value.
//!
//! An [`Agent`] owns a state `S` inside a [`TaskEnqueuer`]. Every operation is
//! a command queued behind all previously accepted commands, so each command
//! observes exactly the state left by its predecessor. Asynchronous variants
//! hold the agent until their future resolves: nothing else reads or writes
//! the state in the meantime.
//!
//! All operations fail fast with [`EnqueuerError::Rejected`] when the inbound
//! queue is full. Failures of the user functions themselves never reach the
//! caller's stack: value-returning operations report them through the
//! [`Deferred`], fire-and-forget updates log them and leave the state as it
//! was.
//!
//! # Example
//!
//! ```rust,no_run
//! use actorish_enqueuer::Agent;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let counter = Agent::new(0_u64)?;
//! counter.update(|n| n + 1)?;
//! let previous = counter.get_and_update(|n| (n * 10, *n))?.await?;
//! assert_eq!(previous, 1);
//! assert_eq!(counter.get()?.await?, 10);
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};

use futures::FutureExt;
use tracing::warn;

use crate::config::EnqueuerConfig;
use crate::core::error::panic_message;
use crate::core::{Activation, Command, Deferred, Enqueuer, EnqueuerError, EnqueuerStats, TaskEnqueuer};

/// Shared state guarded by a single-consumer enqueuer.
///
/// `S` is best kept immutable-by-convention: updates produce a new value
/// from a reference to the current one.
pub struct Agent<S> {
    enq: TaskEnqueuer<S>,
}

impl<S> Clone for Agent<S> {
    fn clone(&self) -> Self {
        Self {
            enq: self.enq.clone(),
        }
    }
}

impl<S> std::fmt::Debug for Agent<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent").field("enq", &self.enq).finish()
    }
}

impl<S: Send + 'static> Agent<S> {
    /// Create an agent with the default configuration.
    ///
    /// # Errors
    ///
    /// Returns `EnqueuerError::NoExecutor` outside a tokio runtime.
    pub fn new(initial_state: S) -> Result<Self, EnqueuerError> {
        Self::with_config(initial_state, &EnqueuerConfig::default())
    }

    /// Create an agent with an explicit enqueuer configuration.
    ///
    /// # Errors
    ///
    /// - `EnqueuerError::InvalidConfig` if the configuration is invalid
    /// - `EnqueuerError::NoExecutor` if no executor is configured and no tokio
    ///   runtime is running
    pub fn with_config(initial_state: S, config: &EnqueuerConfig) -> Result<Self, EnqueuerError> {
        Ok(Self {
            enq: TaskEnqueuer::new(config, initial_state)?,
        })
    }

    /// Read a projection of the state.
    ///
    /// # Errors
    ///
    /// Returns `EnqueuerError::Rejected` if the inbound queue is full.
    pub fn get_with<A, F>(&self, mapper: F) -> Result<Deferred<A>, EnqueuerError>
    where
        A: Send + 'static,
        F: FnOnce(&S) -> A + Send + 'static,
    {
        self.enq.must_offer_call_sync(move |state: &mut S| mapper(state))
    }

    /// Read a projection computed asynchronously.
    ///
    /// The agent processes no other command until the returned future resolves.
    ///
    /// # Errors
    ///
    /// Returns `EnqueuerError::Rejected` if the inbound queue is full.
    pub fn get_async<A, F, Fut>(&self, mapper: F) -> Result<Deferred<A>, EnqueuerError>
    where
        A: Send + 'static,
        F: FnOnce(&S) -> Fut + Send + 'static,
        Fut: Future<Output = A> + Send + 'static,
    {
        self.enq
            .must_offer_call(move |state: &mut S| mapper(state).boxed())
    }

    /// Schedule `state = modifier(&state)`.
    ///
    /// A panicking modifier is logged and leaves the state unchanged.
    ///
    /// # Errors
    ///
    /// Returns `EnqueuerError::Rejected` if the inbound queue is full.
    pub fn update<F>(&self, modifier: F) -> Result<(), EnqueuerError>
    where
        F: FnOnce(&S) -> S + Send + 'static,
    {
        self.enq.must_offer(move |state: &mut S| {
            match catch_unwind(AssertUnwindSafe(|| modifier(state))) {
                Ok(next) => *state = next,
                Err(panic) => warn!(
                    panic = %panic_message(panic.as_ref()),
                    "agent update panicked, state unchanged"
                ),
            }
            Activation::Idle
        })
    }

    /// Schedule `state = modifier(&state).await`.
    ///
    /// Later commands wait until the future resolves. A panic in the modifier
    /// or its future is logged and leaves the state unchanged.
    ///
    /// # Errors
    ///
    /// Returns `EnqueuerError::Rejected` if the inbound queue is full.
    pub fn update_async<F, Fut>(&self, modifier: F) -> Result<(), EnqueuerError>
    where
        F: FnOnce(&S) -> Fut + Send + 'static,
        Fut: Future<Output = S> + Send + 'static,
    {
        self.enq.must_offer(move |state: &mut S| {
            let pending = match catch_unwind(AssertUnwindSafe(|| modifier(state))) {
                Ok(pending) => pending,
                Err(panic) => {
                    warn!(
                        panic = %panic_message(panic.as_ref()),
                        "agent async update panicked, state unchanged"
                    );
                    return Activation::Idle;
                }
            };
            Activation::Pending(
                async move {
                    match AssertUnwindSafe(pending).catch_unwind().await {
                        Ok(next) => *state = next,
                        Err(panic) => warn!(
                            panic = %panic_message(panic.as_ref()),
                            "agent async update panicked, state unchanged"
                        ),
                    }
                }
                .boxed(),
            )
        })
    }

    /// Atomically replace the state and return a value computed from the old one.
    ///
    /// `modifier` returns `(new_state, value)`. No other command runs between
    /// the read and the write.
    ///
    /// # Errors
    ///
    /// Returns `EnqueuerError::Rejected` if the inbound queue is full.
    pub fn get_and_update<A, F>(&self, modifier: F) -> Result<Deferred<A>, EnqueuerError>
    where
        A: Send + 'static,
        F: FnOnce(&S) -> (S, A) + Send + 'static,
    {
        self.enq.must_offer_call_sync(move |state: &mut S| {
            let (next, value) = modifier(state);
            *state = next;
            value
        })
    }

    /// Asynchronous [`Agent::get_and_update`]: the agent is held until the
    /// future resolves, then the new state is installed.
    ///
    /// # Errors
    ///
    /// Returns `EnqueuerError::Rejected` if the inbound queue is full.
    pub fn get_and_update_async<A, F, Fut>(&self, modifier: F) -> Result<Deferred<A>, EnqueuerError>
    where
        A: Send + 'static,
        F: FnOnce(&S) -> Fut + Send + 'static,
        Fut: Future<Output = (S, A)> + Send + 'static,
    {
        self.enq.must_offer_call(move |state: &mut S| {
            let pending = modifier(state);
            async move {
                let (next, value) = pending.await;
                *state = next;
                value
            }
            .boxed()
        })
    }

    /// The underlying enqueuer.
    #[must_use]
    pub const fn enqueuer(&self) -> &Enqueuer<Command<S>> {
        self.enq.enqueuer()
    }

    /// Get current enqueuer statistics.
    #[must_use]
    pub fn stats(&self) -> EnqueuerStats {
        self.enq.stats()
    }
}

impl<S: Clone + Send + 'static> Agent<S> {
    /// Read a copy of the current state.
    ///
    /// The value reflects every update accepted before this call.
    ///
    /// # Errors
    ///
    /// Returns `EnqueuerError::Rejected` if the inbound queue is full.
    pub fn get(&self) -> Result<Deferred<S>, EnqueuerError> {
        self.get_with(S::clone)
    }
}
