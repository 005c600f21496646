// Copyright 2022 Jeff Kim <hiking90@gmail.com>
// SPDX-License-Identifier: Apache-2.0

//! The global time ledger and serial drain loop.
//!
//! A [`TickScheduler`] owns everything that is shared across executors: the
//! tick counter, the queue of executors awaiting drain, the cooling set, and
//! the global per-tick spent counter. It is a cheap-clone handle over an
//! inner allocation, constructed once per simulation and passed to each
//! [`WorkExecutor`](crate::WorkExecutor) at creation — there is no process
//! global, which keeps the whole machine unit-testable.
//!
//! Per tick, the host calls [`tick`](Inner::tick) (advance the counter,
//! sweep the cooling set) and then [`drain`](Inner::drain) (run queued tasks
//! until the ledger or the executors run out of time). A [`TickDriver`]
//! (crate::TickDriver) can do both on a fixed tokio interval.

use std::collections::VecDeque;
use std::ops::Deref;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use log::trace;

use crate::config::{duration_nanos, SchedulerConfig};
use crate::error::Result;
use crate::executor::WorkExecutor;
use crate::tracker::TimingTracker;

/// Shared state behind a [`TickScheduler`] handle.
pub struct Inner {
    config: SchedulerConfig,

    /// Monotonically increasing tick index.
    tick: AtomicU64,

    /// Nanoseconds of attributed time spent so far this tick, queued and
    /// external work combined. Reset at each tick.
    global_spent: AtomicI64,

    /// Executors registered for draining, in round-robin order.
    drain_queue: Mutex<VecDeque<Arc<WorkExecutor>>>,

    /// Executors owed a mandatory `advance_tick` call each tick.
    cooling_set: Mutex<Vec<Arc<WorkExecutor>>>,

    tracker: TimingTracker,
}

impl Inner {
    /// The scheduler's tunables.
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Current tick index. Starts at 0; [`tick`](Self::tick) increments it.
    pub fn current_tick(&self) -> u64 {
        self.tick.load(Ordering::Acquire)
    }

    /// The per-actor timing telemetry registry.
    pub fn tracker(&self) -> &TimingTracker {
        &self.tracker
    }

    /// Attributed time spent so far this tick, across all executors.
    pub fn global_time_spent(&self) -> Duration {
        Duration::from_nanos(self.global_spent.load(Ordering::Acquire).max(0) as u64)
    }

    /// Number of executors currently registered for draining.
    pub fn queued_executors(&self) -> usize {
        self.lock_drain().len()
    }

    /// Number of executors currently in the cooling set.
    pub fn cooling_executors(&self) -> usize {
        self.lock_cooling().len()
    }

    /// Advances to the next tick: bumps the counter, resets the global
    /// spent counter, and gives every cooling executor its mandatory
    /// `advance_tick` call, dropping the ones that fully cooled.
    pub fn tick(&self) {
        let tick = self.tick.fetch_add(1, Ordering::AcqRel) + 1;
        self.global_spent.store(0, Ordering::Release);

        let cooling = std::mem::take(&mut *self.lock_cooling());
        if cooling.is_empty() {
            return;
        }

        let before = cooling.len();
        let mut still_cooling: Vec<_> = cooling
            .into_iter()
            .filter(|executor| !executor.advance_tick())
            .collect();

        trace!(
            "tick {tick}: {} cooling, {} recovered",
            still_cooling.len(),
            before - still_cooling.len()
        );

        // Merge rather than overwrite: an executor may have gone hot while
        // the sweep ran without its lock held.
        let mut guard = self.lock_cooling();
        still_cooling.append(&mut *guard);
        *guard = still_cooling;
    }

    /// Runs queued tasks serially until the drain queue empties, every
    /// queued executor exhausts its own budget, or the global per-tick
    /// ceiling is spent.
    ///
    /// Each pass times one `execute` call, bills the executor through
    /// `after_execute`, counts the same time against the global ceiling,
    /// and rotates the executor to the back of the queue while it still
    /// has budget and work.
    pub fn drain(&self) {
        let ceiling = self.config.global_budget_nanos();

        loop {
            if self.global_spent.load(Ordering::Acquire) >= ceiling {
                trace!(
                    "tick {}: global ceiling reached, deferring remaining work",
                    self.current_tick()
                );
                return;
            }

            let Some(executor) = self.lock_drain().pop_front() else {
                return;
            };

            let start = Instant::now();
            executor.execute();
            let elapsed = start.elapsed();

            self.consume_global(elapsed);
            if executor.after_execute(elapsed) {
                self.lock_drain().push_back(executor);
            }
        }
    }

    /// Registers an executor for draining. Callers (the executor itself)
    /// guarantee single registration via their queued flag.
    pub(crate) fn queue(&self, executor: Arc<WorkExecutor>) {
        trace!("{}: registered for drain", executor.identity());
        self.lock_drain().push_back(executor);
    }

    /// Adds an executor to the cooling set. Only a Cool executor going Hot
    /// registers here, and it cannot go Hot again before the sweep removes
    /// it, so membership is unique.
    pub(crate) fn cooling(&self, executor: Arc<WorkExecutor>) {
        trace!("{}: registered for cooling", executor.identity());
        self.lock_cooling().push(executor);
    }

    /// Accumulates attributed time into the global per-tick ceiling counter.
    pub(crate) fn consume_global(&self, elapsed: Duration) {
        self.global_spent
            .fetch_add(duration_nanos(elapsed), Ordering::AcqRel);
    }

    fn lock_drain(&self) -> MutexGuard<'_, VecDeque<Arc<WorkExecutor>>> {
        self.drain_queue.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_cooling(&self) -> MutexGuard<'_, Vec<Arc<WorkExecutor>>> {
        self.cooling_set.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Handle to the shared time ledger.
///
/// Clones are cheap and all refer to the same ledger; a
/// [`WorkExecutor`](crate::WorkExecutor) keeps one for the scheduler it was
/// created on.
#[derive(Clone)]
pub struct TickScheduler {
    inner: Arc<Inner>,
}

impl Deref for TickScheduler {
    type Target = Inner;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl TickScheduler {
    /// Creates a scheduler with the given tunables.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`](crate::Error::Config) if `config` fails
    /// validation.
    pub fn new(config: SchedulerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                tick: AtomicU64::new(0),
                global_spent: AtomicI64::new(0),
                drain_queue: Mutex::new(VecDeque::new()),
                cooling_set: Mutex::new(Vec::new()),
                tracker: TimingTracker::new(),
            }),
        })
    }
}

impl std::fmt::Debug for TickScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TickScheduler")
            .field("tick", &self.current_tick())
            .field("queued", &self.queued_executors())
            .field("cooling", &self.cooling_executors())
            .finish_non_exhaustive()
    }
}
