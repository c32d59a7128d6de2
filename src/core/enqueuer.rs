//! Bounded multi-producer / single-consumer enqueuer with a serialized driver loop.
//!
//! An [`Enqueuer`] pairs a bounded inbound queue with a consumer implementing
//! [`Activate`]. Producers call [`Enqueuer::offer`] from any thread; a
//! successful offer on an idle enqueuer spawns a drive task on the configured
//! executor. The drive task owns the consumer exclusively and runs one
//! activation per dequeued item until the queue is empty.
//!
//! # Mutual exclusion
//!
//! At most one drive task exists per enqueuer: the `active` flag is claimed
//! with a single swap before spawning, and released only after the consumer
//! has been parked back into its slot. An activation that returns
//! [`Activation::Pending`] is awaited to completion before the next item is
//! dequeued, so activations are totally ordered even when they suspend.
//!
//! The slot mutex is only touched when a drive task starts or parks, never
//! while user code runs, so it is uncontended by construction.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::EnqueuerConfig;
use crate::runtime::tokio_spawner;

use super::{EnqueuerError, Executor};

/// Completion signal returned by an activation.
pub enum Activation<'a> {
    /// Nothing outstanding; the next item may be processed right away.
    Idle,
    /// The next activation must wait until this future resolves.
    Pending(BoxFuture<'a, ()>),
}

impl std::fmt::Debug for Activation<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => f.write_str("Idle"),
            Self::Pending(_) => f.write_str("Pending(..)"),
        }
    }
}

/// Domain logic run by an enqueuer's activations.
///
/// Implementations own whatever state the enqueuer serializes access to.
/// `activate` receives at most one dequeued item (`None` when the enqueuer
/// was kicked with nothing queued) and must not panic: user code has to be
/// run behind its own catch boundary.
pub trait Activate<T>: Send + 'static {
    /// Process one activation.
    fn activate(&mut self, item: Option<T>) -> Activation<'_>;
}

/// Statistics about an enqueuer.
#[derive(Debug, Clone, Default)]
pub struct EnqueuerStats {
    /// Configured inbound capacity.
    pub capacity: usize,
    /// Items currently waiting in the inbound queue.
    pub queued: usize,
    /// Items accepted by `offer`.
    pub offered: u64,
    /// Items refused because the queue was full.
    pub rejected: u64,
    /// Activations run so far.
    pub activations: u64,
}

#[derive(Debug, Default)]
struct EnqueuerCounters {
    offered: AtomicU64,
    rejected: AtomicU64,
    activations: AtomicU64,
}

struct Shared<T> {
    name: String,
    capacity: usize,
    throughput: usize,
    tx: Sender<T>,
    rx: Receiver<T>,
    /// Parked consumer; `None` while a drive task owns it.
    consumer: Mutex<Option<Box<dyn Activate<T>>>>,
    active: AtomicBool,
    executor: Executor,
    counters: EnqueuerCounters,
}

/// Handle to a bounded single-consumer enqueuer.
///
/// Cloning the handle is cheap; all clones feed the same queue.
pub struct Enqueuer<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Enqueuer<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> std::fmt::Debug for Enqueuer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Enqueuer")
            .field("name", &self.shared.name)
            .field("capacity", &self.shared.capacity)
            .field("queued", &self.shared.rx.len())
            .finish_non_exhaustive()
    }
}

/// Non-owning enqueuer handle, for consumers that feed their own queue.
pub struct WeakEnqueuer<T> {
    shared: Weak<Shared<T>>,
}

impl<T> Clone for WeakEnqueuer<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Weak::clone(&self.shared),
        }
    }
}

impl<T: Send + 'static> WeakEnqueuer<T> {
    /// Offer an item if the enqueuer is still alive.
    ///
    /// Returns `false` if the queue is full or every strong handle is gone.
    pub fn offer(&self, item: T) -> bool {
        self.upgrade().is_some_and(|enq| enq.offer(item))
    }

    /// Recover a strong handle.
    #[must_use]
    pub fn upgrade(&self) -> Option<Enqueuer<T>> {
        self.shared.upgrade().map(|shared| Enqueuer { shared })
    }
}

impl<T: Send + 'static> Enqueuer<T> {
    /// Create an enqueuer driving `consumer`.
    ///
    /// # Errors
    ///
    /// - `EnqueuerError::InvalidConfig` if the configuration is invalid
    /// - `EnqueuerError::NoExecutor` if no executor is configured and no tokio
    ///   runtime is running
    pub fn new<A>(config: &EnqueuerConfig, consumer: A) -> Result<Self, EnqueuerError>
    where
        A: Activate<T>,
    {
        Self::new_cyclic(config, |_| consumer)
    }

    /// Create an enqueuer whose consumer holds a weak handle to it.
    ///
    /// Used by consumers that feed items back into their own queue (timer
    /// sentinels, retries) without keeping the enqueuer alive.
    ///
    /// # Errors
    ///
    /// Same as [`Enqueuer::new`].
    pub fn new_cyclic<A, F>(config: &EnqueuerConfig, make_consumer: F) -> Result<Self, EnqueuerError>
    where
        A: Activate<T>,
        F: FnOnce(WeakEnqueuer<T>) -> A,
    {
        config.check()?;
        let executor = tokio_spawner::resolve(config.executor.as_ref())?;
        let name = config
            .name
            .clone()
            .unwrap_or_else(|| format!("enqueuer-{}", Uuid::new_v4()));
        let (tx, rx) = bounded(config.capacity);

        let shared = Arc::new_cyclic(|weak| {
            let consumer = make_consumer(WeakEnqueuer {
                shared: Weak::clone(weak),
            });
            Shared {
                name,
                capacity: config.capacity,
                throughput: config.throughput,
                tx,
                rx,
                consumer: Mutex::new(Some(Box::new(consumer) as Box<dyn Activate<T>>)),
                active: AtomicBool::new(false),
                executor,
                counters: EnqueuerCounters::default(),
            }
        });

        info!(
            enqueuer = %shared.name,
            capacity = shared.capacity,
            throughput = shared.throughput,
            "enqueuer initialized"
        );
        Ok(Self { shared })
    }

    /// Attempt a non-blocking enqueue.
    ///
    /// Returns `false` iff the inbound queue is at capacity. Never blocks and
    /// never panics. A successful offer kicks the driver loop if it is idle.
    pub fn offer(&self, item: T) -> bool {
        match self.shared.tx.try_send(item) {
            Ok(()) => {
                self.shared.counters.offered.fetch_add(1, Ordering::Relaxed);
                Shared::kick(&self.shared);
                true
            }
            // The receiver lives in `Shared`, so the channel never disconnects
            // while this handle exists.
            Err(TrySendError::Full(_) | TrySendError::Disconnected(_)) => {
                self.shared.counters.rejected.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Offer an item, reporting a full queue as [`EnqueuerError::Rejected`].
    ///
    /// # Errors
    ///
    /// Returns `EnqueuerError::Rejected` if the inbound queue is full.
    pub fn must_offer(&self, item: T) -> Result<(), EnqueuerError> {
        if self.offer(item) {
            return Ok(());
        }
        warn!(
            enqueuer = %self.shared.name,
            capacity = self.shared.capacity,
            "inbound queue is full, rejecting item"
        );
        Err(self.rejected())
    }

    /// Run an activation even if nothing is queued.
    ///
    /// The consumer sees `None` if the queue is still empty when the drive
    /// task starts. No-op while a drive task is already running.
    pub fn kick(&self) {
        Shared::kick(&self.shared);
    }

    /// Downgrade to a non-owning handle.
    #[must_use]
    pub fn downgrade(&self) -> WeakEnqueuer<T> {
        WeakEnqueuer {
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Enqueuer name used in logs.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Get current enqueuer statistics.
    #[must_use]
    pub fn stats(&self) -> EnqueuerStats {
        let counters = &self.shared.counters;
        EnqueuerStats {
            capacity: self.shared.capacity,
            queued: self.shared.rx.len(),
            offered: counters.offered.load(Ordering::Relaxed),
            rejected: counters.rejected.load(Ordering::Relaxed),
            activations: counters.activations.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn rejected(&self) -> EnqueuerError {
        EnqueuerError::Rejected {
            name: self.shared.name.clone(),
            capacity: self.shared.capacity,
        }
    }
}

impl<T: Send + 'static> Shared<T> {
    /// Spawn a drive task unless one is already running.
    fn kick(this: &Arc<Self>) {
        if this.active.swap(true, Ordering::AcqRel) {
            return;
        }
        let runner = Arc::clone(this);
        if let Err(e) = this.executor.spawn(Box::pin(runner.drive())) {
            this.active.store(false, Ordering::Release);
            error!(
                enqueuer = %this.name,
                error = %e,
                queued = this.rx.len(),
                "executor rejected activation"
            );
        }
    }

    /// Take the parked consumer. Only called while holding the `active` flag.
    fn claim(&self) -> Option<Box<dyn Activate<T>>> {
        let consumer = self.consumer.lock().take();
        if consumer.is_none() {
            self.active.store(false, Ordering::Release);
            error!(enqueuer = %self.name, "consumer missing while claiming activation");
        }
        consumer
    }

    /// Return the consumer to its slot and release the `active` flag.
    fn park(&self, consumer: Box<dyn Activate<T>>) {
        *self.consumer.lock() = Some(consumer);
        self.active.store(false, Ordering::Release);
    }

    async fn drive(self: Arc<Self>) {
        let Some(mut consumer) = self.claim() else {
            return;
        };
        let mut item = self.rx.try_recv().ok();
        let mut budget = self.throughput;

        loop {
            let activation = self.counters.activations.fetch_add(1, Ordering::Relaxed);
            debug!(enqueuer = %self.name, activation, "activation");
            if let Activation::Pending(signal) = consumer.activate(item) {
                signal.await;
            }

            budget -= 1;
            if budget == 0 {
                // Hand the executor back; a fresh drive task picks up the rest.
                self.park(consumer);
                if !self.rx.is_empty() {
                    Self::kick(&self);
                }
                return;
            }

            item = if let Ok(next) = self.rx.try_recv() {
                Some(next)
            } else {
                self.park(consumer);
                // An offer between the failed `try_recv` and `park` saw the
                // flag still set and did not kick; re-check before leaving.
                if self.rx.is_empty() || self.active.swap(true, Ordering::AcqRel) {
                    return;
                }
                let Some(reclaimed) = self.claim() else {
                    return;
                };
                consumer = reclaimed;
                self.rx.try_recv().ok()
            };
        }
    }
}
