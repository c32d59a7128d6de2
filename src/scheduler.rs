//! Exact-date scheduler: run tasks at a precise instant, in strict due order.
//!
//! Producers append records to a bounded inbound [`Enqueuer`]. Each
//! activation admits at most one record into a private due-time heap,
//! ordered by `(begin, order)` where `order` is the admission sequence
//! number, then runs every record whose instant has passed. When the earliest
//! remaining record is still in the future, a one-shot [`Timer`] is armed to
//! push a [`Inbound::TimeoutTick`] back into the same queue, and the activation
//! returns. No thread ever sleeps waiting for work.
//!
//! Tasks run synchronously inside the activation behind a panic boundary, so
//! a failing task is logged and the loop moves on. Value-producing calls
//! scheduled with [`ExactDateScheduler::schedule_call`] are dispatched to a
//! separate executor when due, keeping slow user computations out of the
//! serialized loop.
//!
//! # Overflow
//!
//! A full inbound queue rejects `schedule` synchronously. A full due-time heap
//! (`planned_tasks_limit`) cannot be detected by the producer, because only
//! activations touch the heap: the record is dropped with a warning and
//! counted in [`SchedulerStats::dropped`]. Deferred values of dropped calls
//! resolve to [`TaskError::Abandoned`].

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{EnqueuerConfig, SchedulerConfig};
use crate::core::deferred::{self, Deferred};
use crate::core::error::panic_message;
use crate::core::{
    Activate, Activation, Enqueuer, EnqueuerError, Executor, TaskError, Timer, WeakEnqueuer,
};
use crate::runtime::tokio_spawner;
use crate::util::{Clock, MonotonicClock};

/// Timing details handed to a running task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskInfo {
    begin: Instant,
    real_begin: Instant,
    order: u64,
}

impl TaskInfo {
    /// Instant the task was scheduled for.
    #[must_use]
    pub const fn begin(&self) -> Instant {
        self.begin
    }

    /// Instant the task actually started. Never earlier than [`TaskInfo::begin`].
    #[must_use]
    pub const fn real_begin(&self) -> Instant {
        self.real_begin
    }

    /// Admission sequence number.
    #[must_use]
    pub const fn order(&self) -> u64 {
        self.order
    }

    /// How late the task started.
    #[must_use]
    pub fn delay(&self) -> Duration {
        self.real_begin.saturating_duration_since(self.begin)
    }
}

/// A scheduled task body.
pub type ScheduledFn = Box<dyn FnOnce(&TaskInfo) + Send + 'static>;

/// A task waiting to be admitted into the due-time heap.
pub struct Record {
    begin: Instant,
    task: ScheduledFn,
}

impl std::fmt::Debug for Record {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Record")
            .field("begin", &self.begin)
            .finish_non_exhaustive()
    }
}

/// Items carried by the scheduler's inbound queue.
#[derive(Debug)]
pub enum Inbound {
    /// A new task to admit.
    Record(Record),
    /// A timer fired: re-evaluate due tasks.
    TimeoutTick,
}

/// Statistics about scheduler activity.
#[derive(Debug, Clone, Default)]
pub struct SchedulerStats {
    /// Tasks admitted and not yet run.
    pub planned: usize,
    /// Tasks admitted into the due-time heap.
    pub admitted: u64,
    /// Tasks dropped because the planned limit was reached.
    pub dropped: u64,
    /// Tasks run, including those that panicked.
    pub executed: u64,
    /// Tasks that panicked.
    pub failed: u64,
}

#[derive(Debug, Default)]
struct SchedulerCounters {
    planned: AtomicUsize,
    admitted: AtomicU64,
    dropped: AtomicU64,
    executed: AtomicU64,
    failed: AtomicU64,
}

impl SchedulerCounters {
    fn snapshot(&self) -> SchedulerStats {
        SchedulerStats {
            planned: self.planned.load(AtomicOrdering::Relaxed),
            admitted: self.admitted.load(AtomicOrdering::Relaxed),
            dropped: self.dropped.load(AtomicOrdering::Relaxed),
            executed: self.executed.load(AtomicOrdering::Relaxed),
            failed: self.failed.load(AtomicOrdering::Relaxed),
        }
    }
}

/// Admitted record, ordered earliest-first for a max-heap.
struct PlannedTask {
    begin: Instant,
    order: u64,
    task: ScheduledFn,
}

impl PartialEq for PlannedTask {
    fn eq(&self, other: &Self) -> bool {
        self.begin == other.begin && self.order == other.order
    }
}

impl Eq for PlannedTask {}

impl PartialOrd for PlannedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PlannedTask {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: BinaryHeap pops the greatest, we want the earliest.
        other
            .begin
            .cmp(&self.begin)
            .then_with(|| other.order.cmp(&self.order))
    }
}

/// Activation state. Owned by the inbound enqueuer's consumer slot.
struct Planner {
    name: String,
    planned: BinaryHeap<PlannedTask>,
    limit: usize,
    next_order: u64,
    /// Deadline of the earliest timer believed to be outstanding.
    armed: Option<Instant>,
    timer: Arc<dyn Timer>,
    clock: Arc<dyn Clock>,
    inbound: WeakEnqueuer<Inbound>,
    counters: Arc<SchedulerCounters>,
}

impl Activate<Inbound> for Planner {
    fn activate(&mut self, item: Option<Inbound>) -> Activation<'_> {
        match item {
            Some(Inbound::Record(record)) => self.admit(record),
            Some(Inbound::TimeoutTick) => self.armed = None,
            None => {}
        }
        self.run_due();
        Activation::Idle
    }
}

impl Planner {
    fn admit(&mut self, record: Record) {
        if self.planned.len() >= self.limit {
            self.counters.dropped.fetch_add(1, AtomicOrdering::Relaxed);
            warn!(
                scheduler = %self.name,
                limit = self.limit,
                "planned queue exceeded its limit, dropping task"
            );
            return;
        }
        let order = self.next_order;
        self.next_order += 1;
        self.planned.push(PlannedTask {
            begin: record.begin,
            order,
            task: record.task,
        });
        self.counters.admitted.fetch_add(1, AtomicOrdering::Relaxed);
        self.counters
            .planned
            .store(self.planned.len(), AtomicOrdering::Relaxed);
        debug!(scheduler = %self.name, order, "task admitted");
    }

    fn run_due(&mut self) {
        loop {
            let Some(next_begin) = self.planned.peek().map(|next| next.begin) else {
                return;
            };
            let now = self.clock.now();
            if next_begin > now {
                self.arm(next_begin, now);
                return;
            }
            let Some(planned) = self.planned.pop() else {
                return;
            };
            self.counters
                .planned
                .store(self.planned.len(), AtomicOrdering::Relaxed);
            let info = TaskInfo {
                begin: planned.begin,
                real_begin: now,
                order: planned.order,
            };
            self.run_safely(planned.task, &info);
        }
    }

    fn run_safely(&self, task: ScheduledFn, info: &TaskInfo) {
        debug!(
            scheduler = %self.name,
            order = info.order,
            delay_us = u64::try_from(info.delay().as_micros()).unwrap_or(u64::MAX),
            "running task"
        );
        self.counters.executed.fetch_add(1, AtomicOrdering::Relaxed);
        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| task(info))) {
            self.counters.failed.fetch_add(1, AtomicOrdering::Relaxed);
            warn!(
                scheduler = %self.name,
                order = info.order,
                panic = %panic_message(panic.as_ref()),
                "uncaught task error"
            );
        }
    }

    /// Arm a timer for `deadline` unless an outstanding one already covers it.
    fn arm(&mut self, deadline: Instant, now: Instant) {
        // A recorded deadline already in the past may belong to a timer whose
        // tick was refused by a full queue, so it is not trusted.
        if matches!(self.armed, Some(armed) if armed <= deadline && armed > now) {
            return;
        }
        let delay = deadline - now;
        let inbound = self.inbound.clone();
        let name = self.name.clone();
        self.timer.after(
            delay,
            Box::new(move || {
                if !inbound.offer(Inbound::TimeoutTick) {
                    debug!(scheduler = %name, "timeout tick not delivered");
                }
            }),
        );
        self.armed = Some(deadline);
        debug!(
            scheduler = %self.name,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "timer armed"
        );
    }
}

/// Priority-ordered, due-time task scheduler built on an [`Enqueuer`].
pub struct ExactDateScheduler {
    inbound: Enqueuer<Inbound>,
    counters: Arc<SchedulerCounters>,
    clock: Arc<dyn Clock>,
    completion: Executor,
}

impl Clone for ExactDateScheduler {
    fn clone(&self) -> Self {
        Self {
            inbound: self.inbound.clone(),
            counters: Arc::clone(&self.counters),
            clock: Arc::clone(&self.clock),
            completion: Arc::clone(&self.completion),
        }
    }
}

impl std::fmt::Debug for ExactDateScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExactDateScheduler")
            .field("inbound", &self.inbound)
            .field("stats", &self.counters.snapshot())
            .finish_non_exhaustive()
    }
}

impl ExactDateScheduler {
    /// Create a scheduler on the monotonic clock.
    ///
    /// # Errors
    ///
    /// - `EnqueuerError::InvalidConfig` if the configuration is invalid
    /// - `EnqueuerError::NoExecutor` if no executor is configured and no tokio
    ///   runtime is running
    pub fn create(
        config: EnqueuerConfig,
        timer: Arc<dyn Timer>,
        planned_tasks_limit: usize,
    ) -> Result<Self, EnqueuerError> {
        let config = SchedulerConfig::new()
            .with_enqueuer(config)
            .with_planned_tasks_limit(planned_tasks_limit);
        Self::from_config(&config, timer, Arc::new(MonotonicClock))
    }

    /// Create a scheduler from a full configuration and an explicit clock.
    ///
    /// # Errors
    ///
    /// Same as [`ExactDateScheduler::create`].
    pub fn from_config(
        config: &SchedulerConfig,
        timer: Arc<dyn Timer>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, EnqueuerError> {
        config.validate().map_err(EnqueuerError::InvalidConfig)?;
        let completion = match &config.completion_executor {
            Some(executor) => Arc::clone(executor),
            None => tokio_spawner::resolve(config.enqueuer.executor.as_ref())?,
        };
        let name = config
            .enqueuer
            .name
            .clone()
            .unwrap_or_else(|| format!("scheduler-{}", Uuid::new_v4()));
        let inbound_config = config.enqueuer.clone().with_name(name.clone());
        let counters = Arc::new(SchedulerCounters::default());
        let limit = config.planned_tasks_limit;

        let planner_counters = Arc::clone(&counters);
        let planner_clock = Arc::clone(&clock);
        let inbound = Enqueuer::new_cyclic(&inbound_config, move |weak| Planner {
            name,
            planned: BinaryHeap::with_capacity(limit.min(512)),
            limit,
            next_order: 0,
            armed: None,
            timer,
            clock: planner_clock,
            inbound: weak,
            counters: planner_counters,
        })?;
        info!(
            scheduler = %inbound.name(),
            planned_tasks_limit = limit,
            "exact-date scheduler initialized"
        );
        Ok(Self {
            inbound,
            counters,
            clock,
            completion,
        })
    }

    /// Schedule `task` to run at `begin_at`.
    ///
    /// # Errors
    ///
    /// Returns `EnqueuerError::Rejected` if the inbound queue is full.
    pub fn schedule<F>(&self, begin_at: Instant, task: F) -> Result<(), EnqueuerError>
    where
        F: FnOnce(&TaskInfo) + Send + 'static,
    {
        self.inbound.must_offer(Inbound::Record(Record {
            begin: begin_at,
            task: Box::new(task),
        }))
    }

    /// Schedule a no-argument action to run at `begin_at`.
    ///
    /// # Errors
    ///
    /// Returns `EnqueuerError::Rejected` if the inbound queue is full.
    pub fn schedule_runnable<F>(&self, begin_at: Instant, runnable: F) -> Result<(), EnqueuerError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.schedule(begin_at, move |_: &TaskInfo| runnable())
    }

    /// Schedule `task` to run `delay` from now.
    ///
    /// # Errors
    ///
    /// - `EnqueuerError::DelayOverflow` if `now + delay` is not representable
    /// - `EnqueuerError::Rejected` if the inbound queue is full
    pub fn schedule_after<F>(&self, delay: Duration, task: F) -> Result<(), EnqueuerError>
    where
        F: FnOnce(&TaskInfo) + Send + 'static,
    {
        let begin_at = self
            .clock
            .now()
            .checked_add(delay)
            .ok_or(EnqueuerError::DelayOverflow(delay))?;
        self.schedule(begin_at, task)
    }

    /// Schedule a value-producing computation.
    ///
    /// When due, `callable` is dispatched to the completion executor rather
    /// than run inside the serialized loop. Its outcome completes the returned
    /// deferred: `Err` becomes [`TaskError::Failed`], a panic becomes
    /// [`TaskError::Panicked`].
    ///
    /// # Errors
    ///
    /// Returns `EnqueuerError::Rejected` if the inbound queue is full.
    pub fn schedule_call<T, F>(&self, begin_at: Instant, callable: F) -> Result<Deferred<T>, EnqueuerError>
    where
        T: Send + 'static,
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    {
        let (completer, deferred) = deferred::channel();
        let completion = Arc::clone(&self.completion);
        self.schedule(begin_at, move |info: &TaskInfo| {
            let order = info.order();
            if completer.is_abandoned() {
                debug!(order, "scheduled call no longer observed, skipping");
                return;
            }
            let job = Box::new(move || {
                let outcome = match catch_unwind(AssertUnwindSafe(callable)) {
                    Ok(Ok(value)) => Ok(value),
                    Ok(Err(e)) => Err(TaskError::Failed(e)),
                    Err(panic) => Err(TaskError::from_panic(panic)),
                };
                completer.settle(outcome);
            });
            if let Err(e) = completion.spawn_blocking(job) {
                error!(order, error = %e, "executor rejected scheduled call, result abandoned");
            }
        })?;
        Ok(deferred)
    }

    /// The inbound enqueuer.
    #[must_use]
    pub const fn enqueuer(&self) -> &Enqueuer<Inbound> {
        &self.inbound
    }

    /// Get current scheduler statistics.
    #[must_use]
    pub fn stats(&self) -> SchedulerStats {
        self.counters.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::TimerCallback;
    use parking_lot::Mutex;

    struct ManualClock(Mutex<Instant>);

    impl ManualClock {
        fn advance(&self, by: Duration) {
            *self.0.lock() += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            *self.0.lock()
        }
    }

    #[derive(Default)]
    struct ManualTimer(Mutex<Vec<(Duration, TimerCallback)>>);

    impl ManualTimer {
        fn armed(&self) -> Vec<Duration> {
            self.0.lock().iter().map(|(delay, _)| *delay).collect()
        }

        fn fire_all(&self) {
            let callbacks: Vec<_> = self.0.lock().drain(..).collect();
            for (_, callback) in callbacks {
                callback();
            }
        }
    }

    impl Timer for ManualTimer {
        fn after(&self, delay: Duration, callback: TimerCallback) {
            self.0.lock().push((delay, callback));
        }
    }

    async fn eventually(mut condition: impl FnMut() -> bool) {
        for _ in 0..400 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    fn manual(limit: usize) -> (ExactDateScheduler, Arc<ManualClock>, Arc<ManualTimer>, Instant) {
        let base = Instant::now();
        let clock = Arc::new(ManualClock(Mutex::new(base)));
        let timer = Arc::new(ManualTimer::default());
        let config = SchedulerConfig::new().with_planned_tasks_limit(limit);
        let scheduler = ExactDateScheduler::from_config(
            &config,
            Arc::clone(&timer) as Arc<dyn Timer>,
            Arc::clone(&clock) as Arc<dyn Clock>,
        )
        .unwrap();
        (scheduler, clock, timer, base)
    }

    #[test]
    fn test_planned_task_ordering() {
        let base = Instant::now();
        let mut heap = BinaryHeap::new();
        for (offset, order) in [(50, 0), (10, 1), (10, 2)] {
            heap.push(PlannedTask {
                begin: base + Duration::from_millis(offset),
                order,
                task: Box::new(|_| {}),
            });
        }
        let popped: Vec<u64> = std::iter::from_fn(|| heap.pop().map(|p| p.order)).collect();
        assert_eq!(popped, vec![1, 2, 0]);
    }

    #[test]
    fn test_task_info_delay() {
        let begin = Instant::now();
        let info = TaskInfo {
            begin,
            real_begin: begin + Duration::from_millis(7),
            order: 3,
        };
        assert_eq!(info.delay(), Duration::from_millis(7));
        assert_eq!(info.order(), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_runs_in_due_order_and_dedupes_timers() {
        let (scheduler, clock, timer, base) = manual(16);
        let ran = Arc::new(Mutex::new(Vec::new()));
        for (id, offset) in [(1, 50), (2, 10), (3, 10)] {
            let ran = Arc::clone(&ran);
            scheduler
                .schedule(base + Duration::from_millis(offset), move |info: &TaskInfo| {
                    assert!(info.real_begin() >= info.begin());
                    ran.lock().push(id);
                })
                .unwrap();
        }
        eventually(|| scheduler.stats().admitted == 3).await;
        assert!(ran.lock().is_empty());
        // +50 arms first, +10 is earlier and re-arms, the second +10 is covered.
        assert_eq!(timer.armed(), vec![Duration::from_millis(50), Duration::from_millis(10)]);

        clock.advance(Duration::from_millis(60));
        timer.fire_all();
        eventually(|| scheduler.stats().executed == 3).await;
        assert_eq!(*ran.lock(), vec![2, 3, 1]);
        assert_eq!(scheduler.stats().planned, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_overflow_drops_and_abandons() {
        let (scheduler, clock, timer, base) = manual(2);
        let later = base + Duration::from_secs(60);
        let ran = Arc::new(Mutex::new(Vec::new()));
        for id in 0..2 {
            let ran = Arc::clone(&ran);
            scheduler
                .schedule_runnable(later, move || ran.lock().push(id))
                .unwrap();
        }
        let dropped = scheduler.schedule_call(later, || Ok(1_u8)).unwrap();
        assert!(matches!(dropped.await, Err(TaskError::Abandoned)));
        let stats = scheduler.stats();
        assert_eq!(stats.admitted, 2);
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.planned, 2);

        // The admitted tasks still run once due.
        clock.advance(Duration::from_secs(61));
        timer.fire_all();
        eventually(|| scheduler.stats().executed == 2).await;
        assert_eq!(*ran.lock(), vec![0, 1]);
        let stats = scheduler.stats();
        assert_eq!(stats.planned, 0);
        assert_eq!(stats.dropped, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_unobserved_call_is_not_dispatched() {
        let (scheduler, _clock, _timer, base) = manual(8);
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&calls);
        drop(
            scheduler
                .schedule_call(base, move || {
                    counted.fetch_add(1, AtomicOrdering::SeqCst);
                    Ok(())
                })
                .unwrap(),
        );
        let observed = scheduler.schedule_call(base, || Ok("observed")).unwrap();
        assert_eq!(observed.await.unwrap(), "observed");
        assert_eq!(calls.load(AtomicOrdering::SeqCst), 0);
        assert_eq!(scheduler.stats().executed, 2);
    }

    #[tokio::test]
    async fn test_schedule_after_rejects_overflowing_delay() {
        let (scheduler, _clock, _timer, _base) = manual(8);
        let err = scheduler.schedule_after(Duration::MAX, |_| {}).unwrap_err();
        assert!(matches!(err, EnqueuerError::DelayOverflow(d) if d == Duration::MAX));
        assert_eq!(scheduler.enqueuer().stats().offered, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_failing_task_does_not_stop_loop() {
        let (scheduler, _clock, _timer, base) = manual(8);
        scheduler
            .schedule_runnable(base, || panic!("task blew up"))
            .unwrap();
        let value = scheduler.schedule_call(base, || Ok("still running")).unwrap();
        assert_eq!(value.await.unwrap(), "still running");
        let stats = scheduler.stats();
        assert_eq!(stats.executed, 2);
        assert_eq!(stats.failed, 1);
    }

    #[tokio::test]
    async fn test_schedule_call_reports_errors() {
        let (scheduler, _clock, _timer, base) = manual(8);
        let failed = scheduler
            .schedule_call::<u8, _>(base, || Err(anyhow::anyhow!("no value")))
            .unwrap();
        assert!(matches!(failed.await, Err(TaskError::Failed(e)) if e.to_string() == "no value"));
    }
}
