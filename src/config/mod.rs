//! Configuration models for enqueuers and schedulers.

pub mod enqueuer;

pub use enqueuer::{
    EnqueuerConfig, SchedulerConfig, DEFAULT_CAPACITY, DEFAULT_PLANNED_TASKS_LIMIT,
    DEFAULT_THROUGHPUT,
};
