//! Error types for enqueuer operations.

use std::any::Any;
use std::time::Duration;

use thiserror::Error;

/// Admission-time errors surfaced to producers.
#[derive(Debug, Error)]
pub enum EnqueuerError {
    /// The bounded inbound queue is at capacity.
    #[error("rejected: inbound queue of `{name}` is full (capacity {capacity})")]
    Rejected {
        /// Name of the enqueuer that refused the item.
        name: String,
        /// Configured inbound capacity.
        capacity: usize,
    },
    /// Configuration validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// No executor was configured and none could be resolved.
    #[error("no executor available: {0}")]
    NoExecutor(String),
    /// A relative delay does not fit the clock's range.
    #[error("delay of {0:?} overflows the clock")]
    DelayOverflow(Duration),
}

/// Failures delivered through a [`Deferred`](crate::core::Deferred).
#[derive(Debug, Error)]
pub enum TaskError {
    /// User code panicked while running inside an activation or on an executor.
    #[error("task panicked: {0}")]
    Panicked(String),
    /// A value-producing task returned an error.
    #[error("task failed: {0}")]
    Failed(anyhow::Error),
    /// The task was discarded before it could produce a result.
    #[error("task abandoned before completion")]
    Abandoned,
}

impl TaskError {
    /// Build a [`TaskError::Panicked`] from a caught panic payload.
    #[must_use]
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        Self::Panicked(panic_message(payload.as_ref()))
    }
}

/// An executor refused to accept a task.
#[derive(Debug, Error)]
#[error("executor rejected task: {0}")]
pub struct SpawnError(pub String);

/// Extract a printable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
