//! Tokio runtime spawner implementation.

use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::runtime::{Handle, Runtime};

use crate::core::{EnqueuerError, Executor, Spawn, SpawnError};

/// Tokio-based spawner that executes tasks on a tokio runtime.
#[derive(Clone)]
pub struct TokioSpawner {
    handle: Handle,
    /// Keeps a runtime built by this spawner alive.
    _owned: Option<Arc<OwnedRuntime>>,
}

/// Runtime built by [`TokioSpawner::with_worker_threads`].
///
/// The last handle may be dropped from inside one of the runtime's own tasks,
/// so shutdown must not block.
struct OwnedRuntime(Option<Runtime>);

impl Drop for OwnedRuntime {
    fn drop(&mut self) {
        if let Some(runtime) = self.0.take() {
            runtime.shutdown_background();
        }
    }
}

impl TokioSpawner {
    /// Create a new `TokioSpawner` from a tokio runtime handle.
    #[must_use]
    pub const fn new(handle: Handle) -> Self {
        Self {
            handle,
            _owned: None,
        }
    }

    /// Bind to the runtime the caller is currently running on.
    ///
    /// # Errors
    ///
    /// Returns [`EnqueuerError::NoExecutor`] outside a tokio runtime.
    pub fn current() -> Result<Self, EnqueuerError> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|e| EnqueuerError::NoExecutor(e.to_string()))
    }

    /// Create a `TokioSpawner` with a new multi-threaded runtime with specified worker threads.
    ///
    /// # Errors
    ///
    /// Returns the I/O error raised while building the runtime.
    pub fn with_worker_threads(worker_threads: usize) -> Result<Self, std::io::Error> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(worker_threads)
            .thread_name("enqueuer-worker")
            .enable_all()
            .build()?;
        Ok(Self {
            handle: runtime.handle().clone(),
            _owned: Some(Arc::new(OwnedRuntime(Some(runtime)))),
        })
    }

    /// Create a `TokioSpawner` with one worker thread per logical CPU.
    ///
    /// # Errors
    ///
    /// Returns the I/O error raised while building the runtime.
    pub fn multi_thread() -> Result<Self, std::io::Error> {
        Self::with_worker_threads(num_cpus::get().max(1))
    }

    /// The underlying runtime handle.
    #[must_use]
    pub const fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Wrap this spawner as a shared [`Executor`].
    #[must_use]
    pub fn into_executor(self) -> Executor {
        Arc::new(self)
    }
}

impl Spawn for TokioSpawner {
    fn spawn(&self, fut: BoxFuture<'static, ()>) -> Result<(), SpawnError> {
        self.handle.spawn(fut);
        Ok(())
    }

    fn spawn_blocking(&self, job: Box<dyn FnOnce() + Send>) -> Result<(), SpawnError> {
        self.handle.spawn_blocking(job);
        Ok(())
    }
}

/// Resolve an executor: the configured one, or the ambient tokio runtime.
pub(crate) fn resolve(configured: Option<&Executor>) -> Result<Executor, EnqueuerError> {
    match configured {
        Some(executor) => Ok(Arc::clone(executor)),
        None => TokioSpawner::current().map(TokioSpawner::into_executor),
    }
}
