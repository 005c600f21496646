// Copyright 2022 Jeff Kim <hiking90@gmail.com>
// SPDX-License-Identifier: Apache-2.0

//! Fixed-interval tick clock on top of tokio.
//!
//! Hosts with their own simulation loop call
//! [`TickScheduler::tick`](crate::scheduler::Inner::tick) and
//! [`drain`](crate::scheduler::Inner::drain) themselves; everyone else can
//! spawn a [`TickDriver`] to do it on a tokio interval. Queued tasks run on
//! the driver's task, so the usual main-context rule applies: keep them
//! short, the budgets do the policing.

use std::time::Duration;

use log::debug;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::error::{Error, Result};
use crate::scheduler::TickScheduler;

/// Background task that ticks and drains a scheduler at a fixed period.
#[derive(Debug)]
pub struct TickDriver {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl TickDriver {
    /// Spawns the driver on the current tokio runtime.
    ///
    /// `period` is the wall-clock tick interval (50 ms in the source
    /// domain). If a tick overruns, delayed ticks are not bunched up —
    /// the interval simply restarts.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for a zero period.
    pub fn spawn(scheduler: TickScheduler, period: Duration) -> Result<Self> {
        if period.is_zero() {
            return Err(Error::Config {
                message: "tick period must be a positive duration".to_string(),
            });
        }

        let (shutdown, mut signal) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            debug!("tick driver started, period {period:?}");

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        scheduler.tick();
                        scheduler.drain();
                    }
                    changed = signal.changed() => {
                        if changed.is_err() || *signal.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("tick driver stopped");
        });

        Ok(Self { shutdown, handle })
    }

    /// Signals the driver to stop and waits for its task to finish.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Join`] if the driver task panicked or was cancelled.
    pub async fn shutdown(self) -> Result<()> {
        let _ = self.shutdown.send(true);
        self.handle.await.map_err(|source| Error::Join { source })
    }
}
