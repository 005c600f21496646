// Copyright 2022 Jeff Kim <hiking90@gmail.com>
// SPDX-License-Identifier: Apache-2.0

//! The per-actor executor and its throttle state machine.
//!
//! One [`WorkExecutor`] exists per actor. It keeps a bounded FIFO of tasks
//! the actor wants run on the shared main context, and a signed time budget
//! that every attributed duration is charged against — whether the time was
//! spent draining this queue or doing work for the actor somewhere else
//! entirely.
//!
//! The executor moves through three stages:
//!
//! When [`Cool`](ThrottleState::Cool), the actor is allocated one
//! per-tick allotment. The scheduler's drain loop runs queued tasks until
//! this allotment or the global ceiling runs out, and other subsystems
//! billing time via [`after_execute_external`](WorkExecutor::after_execute_external)
//! charge the same allotment.
//!
//! The moment cumulative charges push the budget negative the executor
//! becomes [`Hot`](ThrottleState::Hot): queued tasks stop running, though
//! externally attributed work is still billed so the actor cannot dodge
//! accounting by keeping its queue throttled.
//!
//! At the start of each following tick [`advance_tick`](WorkExecutor::advance_tick)
//! moves a Hot executor to [`Cooling`](ThrottleState::Cooling) and adds one
//! allotment back, capped at the full allotment. While Cooling *nothing*
//! runs — queued or external — which bounds recovery from any overrun.
//! Once the budget is whole again the executor is Cool and, if work is
//! pending, re-registers itself with the drain queue.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use log::{debug, trace};

use crate::config::duration_nanos;
use crate::scheduler::TickScheduler;
use crate::tracker::TimingHandle;
use crate::{Identity, Task};

/// Sentinel for "no tick has charged this budget yet".
const TICK_NONE: u64 = u64::MAX;

/// Throttle stage of a [`WorkExecutor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ThrottleState {
    /// Within budget; queued tasks may run.
    Cool = 0,
    /// Over budget this tick; queued tasks are blocked but external work is
    /// still billed. Always leaves for `Cooling` at the next tick.
    Hot = 1,
    /// Recovering; no queued or external work until fully replenished.
    Cooling = 2,
}

impl ThrottleState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ThrottleState::Cool,
            1 => ThrottleState::Hot,
            _ => ThrottleState::Cooling,
        }
    }
}

/// Budget accounting for the current tick.
///
/// Guarded by its own mutex, separate from the queue lock: the queue lock
/// is taken on the submission hot path and must stay brief, while budget
/// updates happen on the drain/accounting paths.
#[derive(Debug)]
struct BudgetState {
    /// Remaining allowance in nanoseconds; negative means overrun.
    remaining: i64,
    /// Last tick index at which `remaining` was reset.
    last_tick: u64,
}

/// Rate-limited task executor for a single actor.
///
/// Constructed with [`WorkExecutor::new`], which returns an `Arc` — the
/// scheduler holds transient clones of it while the executor is registered
/// for draining or cooling, but true ownership stays with the actor.
pub struct WorkExecutor {
    owner: Identity,
    scheduler: TickScheduler,
    timings: TimingHandle,

    /// Pending tasks. Lock scope is queue mutation only; tasks run outside
    /// the lock so a slow task never blocks concurrent submission.
    tasks: Mutex<VecDeque<Task>>,

    /// True iff this executor holds a registration with the drain queue.
    /// Written only while `tasks` is locked; lock-free reads are
    /// approximate and that is fine.
    queued: AtomicBool,

    budget: Mutex<BudgetState>,

    /// Current [`ThrottleState`]. Stored only while `budget` is locked, so
    /// transitions are serialized; reads are lock-free.
    state: AtomicU8,

    weak_self: Weak<WorkExecutor>,
}

impl WorkExecutor {
    /// Creates an executor for `owner`, attached to `scheduler`.
    pub fn new(scheduler: &TickScheduler, owner: Identity) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            owner,
            scheduler: scheduler.clone(),
            timings: scheduler.tracker().handle(owner),
            tasks: Mutex::new(VecDeque::with_capacity(4)),
            queued: AtomicBool::new(false),
            budget: Mutex::new(BudgetState {
                remaining: 0,
                last_tick: TICK_NONE,
            }),
            state: AtomicU8::new(ThrottleState::Cool as u8),
            weak_self: weak.clone(),
        })
    }

    /// The actor this executor serves.
    pub fn identity(&self) -> Identity {
        self.owner
    }

    /// Current throttle stage.
    pub fn state(&self) -> ThrottleState {
        ThrottleState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Number of pending tasks.
    pub fn queue_len(&self) -> usize {
        self.lock_tasks().len()
    }

    /// Whether this executor is currently registered with the drain queue.
    pub fn is_queued(&self) -> bool {
        self.queued.load(Ordering::Acquire)
    }

    /// Pushes a task onto this executor's queue, registering with the drain
    /// queue if needed.
    ///
    /// Returns whether the task was accepted. A full queue rejects the task
    /// with no other effect; handling the rejection (drop, log, push back to
    /// the actor) is the caller's decision.
    pub fn enqueue(&self, task: Task) -> bool {
        let mut tasks = self.lock_tasks();
        if tasks.len() >= self.scheduler.config().max_queued_tasks {
            debug!(
                "{}: task rejected, queue full ({} pending)",
                self.owner,
                tasks.len()
            );
            return false;
        }
        tasks.push_back(task);

        if !self.queued.load(Ordering::Relaxed) && self.state() == ThrottleState::Cool {
            self.queued.store(true, Ordering::Release);
            self.register_for_drain();
        }
        true
    }

    /// Runs at most one queued task. No-op unless the executor is Cool.
    ///
    /// The drain loop calls this repeatedly, timing each call and feeding
    /// the elapsed time back through [`after_execute`](Self::after_execute).
    /// The task itself runs outside the queue lock and may enqueue further
    /// tasks; those take their place at the back of the FIFO.
    pub fn execute(&self) {
        if self.state() != ThrottleState::Cool {
            return;
        }

        let task = self.lock_tasks().pop_front();
        if let Some(task) = task {
            task();
        }
    }

    /// Charges the time taken by a task just run via [`execute`](Self::execute)
    /// and decides continued registration.
    ///
    /// Returns whether the executor should stay on the drain queue: `false`
    /// once it is no longer Cool or has no work left. This is the only path
    /// that clears the registration flag.
    pub fn after_execute(&self, elapsed: Duration) -> bool {
        self.consume_time(elapsed);

        let tasks = self.lock_tasks();
        if self.state() != ThrottleState::Cool || tasks.is_empty() {
            self.queued.store(false, Ordering::Release);
            return false;
        }
        true
    }

    /// Charges time spent on this actor's behalf outside its own queue,
    /// counting it against the global per-tick ceiling as well.
    pub fn after_execute_external(&self, elapsed: Duration) {
        self.consume_time(elapsed);
        self.scheduler.consume_global(elapsed);
    }

    /// Whether external (non-queue) work attributed to this actor should
    /// proceed at all this tick.
    ///
    /// Hot executors may still do external work — only active recovery
    /// imposes a full blackout.
    pub fn can_execute_external(&self) -> bool {
        self.state() != ThrottleState::Cooling
    }

    /// Moves this executor forward one tick, replenishing its budget by one
    /// allotment (capped at the full allotment).
    ///
    /// Called once per tick by the scheduler for every executor in its
    /// cooling set. Returns whether the executor has fully cooled down and
    /// is drain-eligible again.
    pub fn advance_tick(&self) -> bool {
        let allotment = self.scheduler.config().executor_budget_nanos();
        let mut budget = self.lock_budget();

        self.state
            .store(ThrottleState::Cooling as u8, Ordering::Release);
        budget.last_tick = self.scheduler.current_tick();
        budget.remaining = (budget.remaining + allotment).min(allotment);
        if budget.remaining < allotment {
            trace!(
                "{}: still cooling, {}ns short",
                self.owner,
                allotment - budget.remaining
            );
            return false;
        }

        self.state.store(ThrottleState::Cool as u8, Ordering::Release);
        drop(budget);
        debug!("{}: cooled down", self.owner);

        let tasks = self.lock_tasks();
        if !tasks.is_empty() && !self.queued.load(Ordering::Relaxed) {
            self.queued.store(true, Ordering::Release);
            self.register_for_drain();
        }
        true
    }

    /// Shared accounting behind [`after_execute`](Self::after_execute) and
    /// [`after_execute_external`](Self::after_execute_external).
    fn consume_time(&self, elapsed: Duration) {
        // Telemetry is fire-and-forget and never feeds back into the
        // scheduling decision below.
        self.timings.record(self.owner, elapsed);

        let mut budget = self.lock_budget();

        // Reset the budget when first charged in a new tick. Safe: an
        // executor that overran the previous tick was in the cooling set, so
        // advance_tick() has already stamped last_tick for this tick.
        let tick = self.scheduler.current_tick();
        if budget.last_tick != tick {
            budget.last_tick = tick;
            budget.remaining = self.scheduler.config().executor_budget_nanos();
        }

        budget.remaining -= duration_nanos(elapsed);

        if budget.remaining < 0 && self.state() == ThrottleState::Cool {
            self.state.store(ThrottleState::Hot as u8, Ordering::Release);
            debug!(
                "{}: over budget by {}ns, throttled",
                self.owner, -budget.remaining
            );
            self.register_cooling();
        }
    }

    fn register_for_drain(&self) {
        if let Some(me) = self.weak_self.upgrade() {
            self.scheduler.queue(me);
        }
    }

    fn register_cooling(&self) {
        if let Some(me) = self.weak_self.upgrade() {
            self.scheduler.cooling(me);
        }
    }

    fn lock_tasks(&self) -> MutexGuard<'_, VecDeque<Task>> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_budget(&self) -> MutexGuard<'_, BudgetState> {
        self.budget.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for WorkExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkExecutor")
            .field("owner", &self.owner)
            .field("state", &self.state())
            .field("queued", &self.is_queued())
            .finish_non_exhaustive()
    }
}
