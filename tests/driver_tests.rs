// Copyright 2022 Jeff Kim <hiking90@gmail.com>
// SPDX-License-Identifier: Apache-2.0

//! Tests for the tokio tick driver.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tickslice::{
    Error, Identity, SchedulerConfig, TickDriver, TickScheduler, WorkExecutor,
};

#[tokio::test(flavor = "multi_thread")]
async fn driver_ticks_and_drains_queued_work() -> Result<()> {
    let scheduler = TickScheduler::new(SchedulerConfig::default())?;
    let executor = WorkExecutor::new(&scheduler, Identity::next());

    let ran = Arc::new(AtomicUsize::new(0));
    let ran2 = ran.clone();
    assert!(executor.enqueue(Box::new(move || {
        ran2.fetch_add(1, Ordering::Relaxed);
    })));

    let driver = TickDriver::spawn(scheduler.clone(), Duration::from_millis(5))?;
    tokio::time::sleep(Duration::from_millis(60)).await;
    driver.shutdown().await?;

    assert!(scheduler.current_tick() >= 1);
    assert_eq!(ran.load(Ordering::Relaxed), 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_stops_the_clock() -> Result<()> {
    let scheduler = TickScheduler::new(SchedulerConfig::default())?;

    let driver = TickDriver::spawn(scheduler.clone(), Duration::from_millis(5))?;
    tokio::time::sleep(Duration::from_millis(20)).await;
    driver.shutdown().await?;

    let tick_at_shutdown = scheduler.current_tick();
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(scheduler.current_tick(), tick_at_shutdown);
    Ok(())
}

#[tokio::test]
async fn zero_period_is_rejected() {
    let scheduler = TickScheduler::new(SchedulerConfig::default()).unwrap();
    let result = TickDriver::spawn(scheduler, Duration::ZERO);
    assert!(matches!(result, Err(Error::Config { .. })));
}
