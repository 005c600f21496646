// Copyright 2022 Jeff Kim <hiking90@gmail.com>
// SPDX-License-Identifier: Apache-2.0

//! Per-actor task timing telemetry.
//!
//! Every duration an executor bills against its budget is also reported
//! here, keyed by the owning actor's [`Identity`]. Recording is
//! fire-and-forget: it uses lock-free atomics on a pre-resolved slot and
//! has no effect on any scheduling decision, so a telemetry consumer can
//! never stall the drain loop.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::Identity;

/// Cumulative timing counters for one actor.
#[derive(Debug, Default)]
struct OwnerTimings {
    /// Number of attributed work units (queued and external alike).
    task_count: AtomicU64,
    /// Cumulative attributed time in nanoseconds (saturating).
    total_nanos: AtomicU64,
    /// Longest single attributed duration in nanoseconds.
    max_nanos: AtomicU64,
}

impl OwnerTimings {
    fn record(&self, duration: Duration) {
        self.task_count.fetch_add(1, Ordering::Relaxed);

        // Cap at u64::MAX (~584 years in nanos).
        let nanos = duration.as_nanos().min(u64::MAX as u128) as u64;

        // Saturating add to prevent wraparound.
        let _ = self
            .total_nanos
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                Some(current.saturating_add(nanos))
            });

        self.max_nanos.fetch_max(nanos, Ordering::Relaxed);
    }

    fn snapshot(&self) -> TimingSnapshot {
        let count = self.task_count.load(Ordering::Relaxed);
        let total_nanos = self.total_nanos.load(Ordering::Relaxed);

        TimingSnapshot {
            task_count: count,
            total_time: Duration::from_nanos(total_nanos),
            avg_time: if count > 0 {
                Duration::from_nanos(total_nanos / count)
            } else {
                Duration::ZERO
            },
            max_time: Duration::from_nanos(self.max_nanos.load(Ordering::Relaxed)),
        }
    }
}

/// Immutable read-out of one actor's cumulative timings.
///
/// Individual fields are each consistent, but a snapshot taken while work is
/// being recorded may mix values from slightly different points in time.
/// That is acceptable for monitoring purposes.
#[derive(Debug, Clone, Default)]
#[non_exhaustive]
pub struct TimingSnapshot {
    /// Total number of attributed work units.
    pub task_count: u64,
    /// Cumulative attributed time.
    pub total_time: Duration,
    /// Average attributed time per work unit (`Duration::ZERO` before any
    /// work is recorded).
    pub avg_time: Duration,
    /// Longest single attributed duration.
    pub max_time: Duration,
}

/// Process-wide registry of per-actor timings.
///
/// Slots are created on first use and live for the registry's lifetime;
/// the map lock is only taken to resolve a slot, never on the recording
/// hot path (executors hold a [`TimingHandle`] with the slot pre-resolved).
#[derive(Debug, Default)]
pub struct TimingTracker {
    owners: RwLock<HashMap<Identity, Arc<OwnerTimings>>>,
}

impl TimingTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a recording handle bound to `owner`, creating the owner's
    /// slot if this is its first appearance.
    pub fn handle(&self, owner: Identity) -> TimingHandle {
        TimingHandle {
            owner,
            timings: self.slot(owner),
        }
    }

    /// Reads the current timings for `owner`, or `None` if nothing has ever
    /// been recorded against it.
    pub fn snapshot(&self, owner: Identity) -> Option<TimingSnapshot> {
        let owners = self.owners.read().unwrap_or_else(|e| e.into_inner());
        owners.get(&owner).map(|timings| timings.snapshot())
    }

    fn slot(&self, owner: Identity) -> Arc<OwnerTimings> {
        {
            let owners = self.owners.read().unwrap_or_else(|e| e.into_inner());
            if let Some(timings) = owners.get(&owner) {
                return timings.clone();
            }
        }

        let mut owners = self.owners.write().unwrap_or_else(|e| e.into_inner());
        owners.entry(owner).or_default().clone()
    }
}

/// A recording accessor bound to a single owner.
///
/// Binding happens once, at executor construction. Passing a different
/// owner to [`record`](TimingHandle::record) is a programming-contract
/// violation and panics rather than silently reattributing time.
#[derive(Debug, Clone)]
pub struct TimingHandle {
    owner: Identity,
    timings: Arc<OwnerTimings>,
}

impl TimingHandle {
    /// Records `duration` of work attributed to `owner`.
    ///
    /// # Panics
    ///
    /// Panics if `owner` is not the identity this handle was bound to.
    pub fn record(&self, owner: Identity, duration: Duration) {
        assert_eq!(
            self.owner, owner,
            "timing handle bound to {} used for {}",
            self.owner, owner
        );
        self.timings.record(duration);
    }

    /// The identity this handle records against.
    pub fn owner(&self) -> Identity {
        self.owner
    }
}
