//! Executor abstraction: where activations and off-loop computations run.

use std::sync::Arc;

use futures::future::BoxFuture;

use super::SpawnError;

/// Abstraction for spawning work on a runtime.
///
/// Enqueuers never own a blocked thread; every activation is a future handed
/// to a `Spawn` implementation. Value-producing scheduled calls are dispatched
/// through [`Spawn::spawn_blocking`] so they never run inside the serialized
/// loop.
///
/// # Example
///
/// ```rust,ignore
/// use actorish_enqueuer::core::{Spawn, SpawnError};
/// use futures::future::BoxFuture;
///
/// struct Detached;
///
/// impl Spawn for Detached {
///     fn spawn(&self, fut: BoxFuture<'static, ()>) -> Result<(), SpawnError> {
///         tokio::spawn(fut);
///         Ok(())
///     }
///
///     fn spawn_blocking(&self, job: Box<dyn FnOnce() + Send>) -> Result<(), SpawnError> {
///         std::thread::spawn(job);
///         Ok(())
///     }
/// }
/// ```
pub trait Spawn: Send + Sync + 'static {
    /// Spawn an async task.
    ///
    /// # Errors
    ///
    /// Returns [`SpawnError`] if the executor refuses the task.
    fn spawn(&self, fut: BoxFuture<'static, ()>) -> Result<(), SpawnError>;

    /// Run a synchronous job somewhere it may block.
    ///
    /// # Errors
    ///
    /// Returns [`SpawnError`] if the executor refuses the job.
    fn spawn_blocking(&self, job: Box<dyn FnOnce() + Send>) -> Result<(), SpawnError>;
}

/// Shared handle to an executor.
pub type Executor = Arc<dyn Spawn>;
