// Copyright 2022 Jeff Kim <hiking90@gmail.com>
// SPDX-License-Identifier: Apache-2.0

//! # tickslice: tick-synchronized main-thread rate limiting
//!
//! `tickslice` fairly rate-limits work that many independent logical actors
//! (simulated machines, scripted entities, plugins) perform on one shared,
//! serial "main" execution context. Each actor owns a [`WorkExecutor`] with a
//! bounded FIFO of deferred tasks and a per-tick time budget; a single
//! [`TickScheduler`] drains the queued executors once per tick, stopping when
//! a global per-tick ceiling is spent.
//!
//! ## The throttle
//!
//! An executor moves through three states:
//!
//! - **Cool**: within budget; queued tasks may run.
//! - **Hot**: over budget this tick; queued tasks are blocked, but work done
//!   on the actor's behalf elsewhere is still billed against it.
//! - **Cooling**: recovering; *no* work is allowed, queued or external,
//!   until the budget is fully replenished (one allotment per tick).
//!
//! On average an actor therefore uses at most one allotment of main-context
//! time per tick, and one misbehaving actor cannot starve the rest.
//!
//! Two accounting entry points exist because not all attributable work flows
//! through the queue: [`WorkExecutor::after_execute`] bills a task the
//! scheduler just drained, while [`WorkExecutor::after_execute_external`]
//! bills time spent on the actor's behalf inside some other subsystem's
//! update (gated beforehand by [`WorkExecutor::can_execute_external`]).
//!
//! ## Example
//!
//! ```rust
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//! use tickslice::{Identity, SchedulerConfig, TickScheduler, WorkExecutor};
//!
//! fn main() -> tickslice::Result<()> {
//!     let scheduler = TickScheduler::new(SchedulerConfig::default())?;
//!     let executor = WorkExecutor::new(&scheduler, Identity::next());
//!
//!     let ran = Arc::new(AtomicUsize::new(0));
//!     let ran2 = ran.clone();
//!     assert!(executor.enqueue(Box::new(move || {
//!         ran2.fetch_add(1, Ordering::Relaxed);
//!     })));
//!
//!     // Normally a TickDriver calls these on a fixed interval.
//!     scheduler.tick();
//!     scheduler.drain();
//!
//!     assert_eq!(ran.load(Ordering::Relaxed), 1);
//!     Ok(())
//! }
//! ```
//!
//! The tick clock is pluggable: call [`TickScheduler::tick`] and
//! [`TickScheduler::drain`] from your own game loop, or spawn a
//! [`TickDriver`] to run them on a tokio interval.

use std::sync::atomic::{AtomicU64, Ordering};

mod config;
mod driver;
mod error;
mod executor;
mod scheduler;
mod tracker;

pub use config::SchedulerConfig;
pub use driver::TickDriver;
pub use error::{Error, Result};
pub use executor::{ThrottleState, WorkExecutor};
pub use scheduler::TickScheduler;
pub use tracker::{TimingHandle, TimingSnapshot, TimingTracker};

/// A deferred unit of work submitted to a [`WorkExecutor`].
///
/// Tasks are opaque to the scheduler; each is run exactly once, on the
/// serial drain context, in submission order.
pub type Task = Box<dyn FnOnce() + Send>;

// Counter for generating unique actor identities.
static IDENTITY_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of the actor an executor serves.
///
/// Used purely for attribution: timing telemetry and log lines are keyed by
/// it. The scheduler itself never inspects it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Identity {
    id: u64,
}

impl Identity {
    /// Allocates the next process-unique identity.
    pub fn next() -> Self {
        Self {
            id: IDENTITY_COUNTER.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Returns the raw numeric id.
    pub const fn id(&self) -> u64 {
        self.id
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "actor#{}", self.id)
    }
}
