//! Scheduler module: tick-based probe fan-out and the background rollup.

mod rollup;

pub use rollup::*;

use crate::db::{Ping, Store};
use crate::probe::ProbeExecutor;
use crate::status::StatusTracker;

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Result of one scheduler tick.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct TickSummary {
    /// Monitors that were due and got probed.
    pub probed: usize,
    /// Monitors whose persist/track step failed (logged, not fatal).
    pub failed: usize,
    /// True when the tick was skipped because another was in flight.
    pub skipped: bool,
}

/// Orchestrates probe execution. One `run_tick` probes every due monitor
/// under a process-wide concurrency cap; ticks never overlap.
pub struct Scheduler {
    store: Store,
    executor: Arc<ProbeExecutor>,
    tracker: Arc<StatusTracker>,
    semaphore: Arc<Semaphore>,
    tick_guard: Arc<tokio::sync::Mutex<()>>,
    tick_interval: Duration,
    rollup_manager: RollupManager,
}

impl Scheduler {
    pub fn new(
        store: Store,
        executor: ProbeExecutor,
        tracker: StatusTracker,
        max_concurrent_requests: usize,
        tick_interval: Duration,
        rollup_interval: Duration,
    ) -> Self {
        let rollup_manager = RollupManager::new(store.clone(), rollup_interval);
        Self {
            store,
            executor: Arc::new(executor),
            tracker: Arc::new(tracker),
            semaphore: Arc::new(Semaphore::new(max_concurrent_requests)),
            tick_guard: Arc::new(tokio::sync::Mutex::new(())),
            tick_interval,
            rollup_manager,
        }
    }

    /// Start the internal timer driving ticks, plus the rollup job.
    pub fn start(self: Arc<Self>) {
        self.rollup_manager.start();

        let scheduler = self;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(scheduler.tick_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                interval.tick().await;
                let summary = scheduler.run_tick().await;
                tracing::debug!(
                    "Tick done: probed={} failed={} skipped={}",
                    summary.probed,
                    summary.failed,
                    summary.skipped
                );
            }
        });
    }

    /// Run one tick: probe every due monitor with at most
    /// `max_concurrent_requests` probes in flight, then per monitor
    /// persist the ping and feed the status tracker. Failures for one
    /// monitor are logged and never abort the rest of the tick.
    pub async fn run_tick(&self) -> TickSummary {
        let _guard = match self.tick_guard.try_lock() {
            Ok(g) => g,
            Err(_) => {
                tracing::warn!("Skipping tick: previous tick still running");
                return TickSummary {
                    probed: 0,
                    failed: 0,
                    skipped: true,
                };
            }
        };

        let monitors = match self.store.list_due_monitors(Utc::now()) {
            Ok(m) => m,
            Err(e) => {
                tracing::error!("Failed to list due monitors: {}", e);
                return TickSummary {
                    probed: 0,
                    failed: 0,
                    skipped: false,
                };
            }
        };

        let probed = monitors.len();
        let mut tasks = JoinSet::new();

        for monitor in monitors {
            let semaphore = self.semaphore.clone();
            let executor = self.executor.clone();
            let store = self.store.clone();
            let tracker = self.tracker.clone();

            tasks.spawn(async move {
                // A probe that cannot get a slot waits; it is not dropped.
                let permit = match semaphore.acquire_owned().await {
                    Ok(p) => p,
                    Err(_) => return false,
                };

                let start_time = Utc::now();
                let outcome = executor.execute(&monitor).await;
                drop(permit);

                let mut ping = Ping {
                    id: 0,
                    monitor_id: monitor.id,
                    time: start_time,
                    success: outcome.success,
                    status_code: outcome.status_code,
                    response_time_ms: outcome.response_time_ms,
                    message: outcome.message,
                };

                if let Err(e) = store.add_ping(&mut ping) {
                    tracing::error!("Failed to persist ping for {}: {}", monitor.name, e);
                    return false;
                }

                if let Err(e) = tracker.record(&monitor, &ping) {
                    tracing::error!("Failed to track status for {}: {}", monitor.name, e);
                    return false;
                }

                true
            });
        }

        let mut failed = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(true) => {}
                Ok(false) => failed += 1,
                Err(e) => {
                    tracing::error!("Probe task panicked: {}", e);
                    failed += 1;
                }
            }
        }

        TickSummary {
            probed,
            failed,
            skipped: false,
        }
    }
}
