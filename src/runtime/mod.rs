//! Runtime adapters: the default executor and timer collaborators.

pub mod tokio_spawner;
pub mod tokio_timer;

pub use tokio_spawner::TokioSpawner;
pub use tokio_timer::TokioTimer;
