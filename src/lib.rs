//! # Actorish Enqueuer
//!
//! Lock-free-for-users serialization of work: many producers append items to a
//! bounded queue, and a single logical consumer processes them one activation
//! at a time on a shared executor. No dedicated thread is held per queue.
//!
//! ## Core Problem Solved
//!
//! Mutable state shared between many tasks usually means locks around every
//! access. An enqueuer instead owns the state and serializes every operation
//! on it:
//!
//! - **Ordered delivery**: items are processed in the order they were accepted
//! - **No overlap**: at most one activation of a consumer runs at any time
//! - **Fail fast**: a full queue rejects new items instead of blocking
//! - **Async-aware**: an activation may return a pending future, and the next
//!   activation waits for it
//!
//! ## Building Blocks
//!
//! - [`Enqueuer`]: the bounded queue and activation loop
//! - [`TaskEnqueuer`]: an enqueuer of closures over private state
//! - [`Agent`]: read, update and get-and-update on a shared value
//! - [`ExactDateScheduler`]: run tasks at precise instants in due order
//!
//! ## Agent
//!
//! ```rust,no_run
//! use actorish_enqueuer::Agent;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let names = Agent::new(Vec::<String>::new())?;
//! names.update(|v| {
//!     let mut v = v.clone();
//!     v.push("ada".into());
//!     v
//! })?;
//! assert_eq!(names.get_with(Vec::len)?.await?, 1);
//! # Ok(())
//! # }
//! ```
//!
//! ## ExactDateScheduler
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use actorish_enqueuer::config::EnqueuerConfig;
//! use actorish_enqueuer::runtime::TokioTimer;
//! use actorish_enqueuer::ExactDateScheduler;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let scheduler = ExactDateScheduler::create(
//!     EnqueuerConfig::new().with_name("reminders"),
//!     Arc::new(TokioTimer::current()?),
//!     1024,
//! )?;
//! scheduler.schedule_after(Duration::from_millis(250), |info| {
//!     tracing::info!(late_by = ?info.delay(), "reminder");
//! })?;
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Enqueuer primitives, deferred results, and runtime collaborator traits.
pub mod core;
/// Configuration models for enqueuers and schedulers.
pub mod config;
/// Tokio adapters for the executor and timer collaborators.
pub mod runtime;
/// Shared utilities.
pub mod util;

pub mod agent;
pub mod scheduler;

pub use agent::Agent;
pub use crate::core::{
    Activate, Activation, Deferred, Enqueuer, EnqueuerError, EnqueuerStats, TaskEnqueuer,
    TaskError,
};
pub use scheduler::{ExactDateScheduler, SchedulerStats, TaskInfo};
