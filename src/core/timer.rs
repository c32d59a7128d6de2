//! One-shot timer collaborator.

use std::sync::Arc;
use std::time::Duration;

/// Callback fired by a [`Timer`].
pub type TimerCallback = Box<dyn FnOnce() + Send + 'static>;

/// Schedules a one-shot callback after a delay.
///
/// Callbacks run no earlier than `delay` after the call. No ordering is
/// guaranteed between separate timers, and cancellation is not part of the
/// contract.
pub trait Timer: Send + Sync + 'static {
    /// Run `callback` once, no earlier than `delay` from now.
    fn after(&self, delay: Duration, callback: TimerCallback);
}

impl<T: Timer + ?Sized> Timer for Arc<T> {
    fn after(&self, delay: Duration, callback: TimerCallback) {
        (**self).after(delay, callback);
    }
}
