//! Tokio-backed one-shot timer.

use std::time::Duration;

use tokio::runtime::Handle;

use crate::core::{EnqueuerError, Timer, TimerCallback};

/// Timer that sleeps on a tokio runtime and then fires the callback.
#[derive(Clone, Debug)]
pub struct TokioTimer {
    handle: Handle,
}

impl TokioTimer {
    /// Create a timer that sleeps on the given runtime.
    #[must_use]
    pub const fn new(handle: Handle) -> Self {
        Self { handle }
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
}

impl Timer for TokioTimer {
    fn after(&self, delay: Duration, callback: TimerCallback) {
        self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            callback();
        });
    }
}
