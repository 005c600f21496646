// Copyright 2022 Jeff Kim <hiking90@gmail.com>
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use crate::error::{Error, Result};

/// Default bound on any one executor's pending-task queue.
pub const DEFAULT_MAX_QUEUED_TASKS: usize = 5000;

/// Default per-tick time allotment for a single executor.
pub const DEFAULT_EXECUTOR_BUDGET: Duration = Duration::from_millis(5);

/// Default per-tick ceiling on main-context time across all executors.
pub const DEFAULT_GLOBAL_BUDGET: Duration = Duration::from_millis(10);

/// Tunables for a [`TickScheduler`](crate::TickScheduler).
///
/// The defaults suit a 50 ms simulation tick: each actor may spend up to
/// 5 ms of main-context time per tick, and the scheduler stops draining
/// queued work once 10 ms have been spent in total (external work included).
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Maximum number of pending tasks one executor will accept.
    pub max_queued_tasks: usize,
    /// Per-tick time allotment granted to each executor.
    pub executor_budget: Duration,
    /// Per-tick ceiling on total attributed time, at which the drain loop
    /// stops early.
    pub global_budget: Duration,
}

impl SchedulerConfig {
    /// Returns the per-executor allotment in nanoseconds, as used by the
    /// signed budget arithmetic.
    pub(crate) fn executor_budget_nanos(&self) -> i64 {
        duration_nanos(self.executor_budget)
    }

    pub(crate) fn global_budget_nanos(&self) -> i64 {
        duration_nanos(self.global_budget)
    }

    /// Checks the configuration for nonsensical values.
    ///
    /// Budgets must be positive durations and the queue bound non-zero;
    /// anything else would silence every executor forever.
    pub fn validate(&self) -> Result<()> {
        if self.max_queued_tasks == 0 {
            return Err(Error::Config {
                message: "max_queued_tasks must be non-zero".to_string(),
            });
        }
        if self.executor_budget.is_zero() {
            return Err(Error::Config {
                message: "executor_budget must be a positive duration".to_string(),
            });
        }
        if self.global_budget.is_zero() {
            return Err(Error::Config {
                message: "global_budget must be a positive duration".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_queued_tasks: DEFAULT_MAX_QUEUED_TASKS,
            executor_budget: DEFAULT_EXECUTOR_BUDGET,
            global_budget: DEFAULT_GLOBAL_BUDGET,
        }
    }
}

// Budgets live comfortably inside i64 nanoseconds (~292 years); clamp
// rather than wrap for absurd inputs.
pub(crate) fn duration_nanos(duration: Duration) -> i64 {
    duration.as_nanos().min(i64::MAX as u128) as i64
}
