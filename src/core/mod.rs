//! Core serialization primitive: the enqueuer, its collaborators, and deferred values.

pub mod deferred;
pub mod enqueuer;
pub mod error;
pub mod executor;
pub mod task_enqueuer;
pub mod timer;

pub use deferred::{Completer, Deferred};
pub use enqueuer::{Activate, Activation, Enqueuer, EnqueuerStats, WeakEnqueuer};
pub use error::{EnqueuerError, SpawnError, TaskError};
pub use executor::{Executor, Spawn};
pub use task_enqueuer::{Command, TaskEnqueuer};
pub use timer::{Timer, TimerCallback};
