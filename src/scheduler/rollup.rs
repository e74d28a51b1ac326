//! Background rollup: folds closed-period pings into persisted buckets.
//!
//! Each pass takes every ping older than the start of the current hour,
//! folds it into its hour bucket and its day bucket, and deletes it in the
//! same transaction. The day bucket for the current day accumulates
//! partially; the read-time virtual merge accounts for that.

use crate::db::{Bucket, DbError, Granularity, Monitor, Ping, Store};
use crate::history::truncate_to_period;

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::time::Duration;

/// Manager driving periodic rollup passes. A single sequential task, so a
/// rollup never runs concurrently with itself for the same monitor/period.
pub struct RollupManager {
    store: Store,
    interval: Duration,
}

impl RollupManager {
    pub fn new(store: Store, interval: Duration) -> Self {
        Self { store, interval }
    }

    /// Start the rollup background task.
    pub fn start(&self) {
        let store = self.store.clone();
        let period = self.interval;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                interval.tick().await;
                run_rollup(&store, Utc::now());
            }
        });
    }
}

/// Run one rollup pass over all monitors. Per-monitor failures are logged
/// and do not stop the pass.
pub fn run_rollup(store: &Store, now: DateTime<Utc>) {
    let monitors = match store.get_monitors() {
        Ok(m) => m,
        Err(e) => {
            tracing::error!("Rollup: failed to list monitors: {}", e);
            return;
        }
    };

    let cutoff = truncate_to_period(now, Granularity::Hour);

    for monitor in monitors {
        if let Err(e) = rollup_monitor(store, &monitor, cutoff) {
            tracing::error!("Rollup failed for {}: {}", monitor.name, e);
        }
    }
}

/// Fold all of one monitor's pings before `cutoff` into hour and day
/// buckets, then delete them. Fold and delete commit together, so
/// replaying a completed rollup finds nothing to fold.
fn rollup_monitor(store: &Store, monitor: &Monitor, cutoff: DateTime<Utc>) -> Result<(), DbError> {
    let pings = store.get_pings_before(monitor.id, cutoff)?;
    if pings.is_empty() {
        return Ok(());
    }

    let mut deltas = Vec::new();
    deltas.extend(bucket_deltas(monitor.id, &pings, Granularity::Hour));
    deltas.extend(bucket_deltas(monitor.id, &pings, Granularity::Day));

    store.fold_pings(monitor.id, cutoff, &deltas)?;

    tracing::debug!(
        "Rollup: folded {} pings for {} into {} bucket deltas",
        pings.len(),
        monitor.name,
        deltas.len()
    );

    Ok(())
}

/// Group pings by period start and aggregate each group into one bucket
/// delta. The stored average carries the full latency sum over all
/// contributing pings, weighted by success + failure count.
fn bucket_deltas(monitor_id: i64, pings: &[Ping], granularity: Granularity) -> Vec<Bucket> {
    let mut groups: BTreeMap<DateTime<Utc>, (i64, i64, f64)> = BTreeMap::new();

    for ping in pings {
        let start = truncate_to_period(ping.time, granularity);
        let entry = groups.entry(start).or_insert((0, 0, 0.0));
        if ping.success {
            entry.0 += 1;
        } else {
            entry.1 += 1;
        }
        if let Some(ms) = ping.response_time_ms {
            entry.2 += ms as f64;
        }
    }

    groups
        .into_iter()
        .map(|(period_start, (success, failure, latency_sum))| Bucket {
            monitor_id,
            period_start,
            granularity,
            success_count: success,
            failure_count: failure,
            avg_latency_ms: latency_sum / (success + failure) as f64,
        })
        .collect()
}
