//! Read model for historical uptime charts.
//!
//! Combines persisted bucket rollups with not-yet-rolled-up pings. The
//! current (still-open) period is never persisted as a final bucket, so it
//! is computed virtually at read time.

use crate::db::{Bucket, BucketPoint, DbError, Granularity, Period, Ping, Store};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;

/// Answers `read_buckets` queries. Never mutates the stores.
pub struct BucketReader {
    store: Store,
}

impl BucketReader {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Read the chart slots for one monitor and period. Index 0 is the
    /// open period, index k is k periods earlier; slots with no data are
    /// `None`, never zero-filled.
    pub fn read_buckets(
        &self,
        monitor_id: i64,
        period: Period,
    ) -> Result<Vec<Option<BucketPoint>>, DbError> {
        self.read_buckets_at(monitor_id, period, Utc::now())
    }

    /// As `read_buckets`, with an explicit clock for deterministic tests.
    pub fn read_buckets_at(
        &self,
        monitor_id: i64,
        period: Period,
        now: DateTime<Utc>,
    ) -> Result<Vec<Option<BucketPoint>>, DbError> {
        let granularity = period.granularity();
        let step = ChronoDuration::seconds(granularity.seconds());
        let count = period.bucket_count();

        let current_start = truncate_to_period(now, granularity);
        let earliest = current_start - step * (count as i32 - 1);

        let persisted = self.store.get_buckets_in_range(
            monitor_id,
            granularity,
            earliest,
            current_start + step,
        )?;
        let by_start: HashMap<DateTime<Utc>, Bucket> = persisted
            .into_iter()
            .map(|b| (b.period_start, b))
            .collect();

        let open_pings = self.store.get_pings_since(monitor_id, current_start)?;

        let mut slots = Vec::with_capacity(count);
        slots.push(virtual_bucket(
            by_start.get(&current_start),
            &open_pings,
            current_start,
        ));

        for k in 1..count {
            let start = current_start - step * k as i32;
            slots.push(by_start.get(&start).map(|b| BucketPoint {
                timestamp: b.period_start,
                success_count: b.success_count,
                failure_count: b.failure_count,
                avg_latency_ms: b.avg_latency_ms,
            }));
        }

        Ok(slots)
    }
}

/// Merge the persisted current-period bucket (from a partial rollup, if
/// any) with the pings not yet folded into it. The merge weights by
/// latency sum, not by averaging the two averages, so it is exact no
/// matter how many pings fed each side.
fn virtual_bucket(
    persisted: Option<&Bucket>,
    pings: &[Ping],
    period_start: DateTime<Utc>,
) -> Option<BucketPoint> {
    if persisted.is_none() && pings.is_empty() {
        return None;
    }

    let (base_success, base_failure, base_avg) = match persisted {
        Some(b) => (b.success_count, b.failure_count, b.avg_latency_ms),
        None => (0, 0, 0.0),
    };

    let new_success = pings.iter().filter(|p| p.success).count() as i64;
    let new_failure = pings.len() as i64 - new_success;
    let latency_sum: f64 = pings
        .iter()
        .filter_map(|p| p.response_time_ms)
        .map(|ms| ms as f64)
        .sum();

    let success_count = base_success + new_success;
    let failure_count = base_failure + new_failure;
    let total = (success_count + failure_count) as f64;

    let avg_latency_ms =
        (base_avg * (base_success + base_failure) as f64 + latency_sum) / total;

    Some(BucketPoint {
        timestamp: period_start,
        success_count,
        failure_count,
        avg_latency_ms,
    })
}

/// Truncate a datetime to the start of its containing period: top of the
/// hour for hour granularity, UTC midnight for day granularity.
pub fn truncate_to_period(dt: DateTime<Utc>, granularity: Granularity) -> DateTime<Utc> {
    let secs = granularity.seconds();
    let ts = dt.timestamp();
    let truncated = ts - ts.rem_euclid(secs);
    DateTime::from_timestamp(truncated, 0).unwrap_or(dt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::NamedTempFile;

    fn test_reader() -> (NamedTempFile, Store, BucketReader) {
        let tmp = NamedTempFile::new().unwrap();
        let store = Store::new(tmp.path()).unwrap();
        let reader = BucketReader::new(store.clone());
        (tmp, store, reader)
    }

    fn seed_bucket(store: &Store, monitor_id: i64, b: Bucket) {
        // No pings exist before epoch, so this only upserts the bucket.
        let epoch = Utc.with_ymd_and_hms(1970, 1, 1, 0, 0, 0).unwrap();
        store.fold_pings(monitor_id, epoch, &[b]).unwrap();
    }

    fn add_ping(
        store: &Store,
        monitor_id: i64,
        time: DateTime<Utc>,
        success: bool,
        latency: i64,
    ) {
        let mut p = Ping {
            id: 0,
            monitor_id,
            time,
            success,
            status_code: Some(if success { 200 } else { 500 }),
            response_time_ms: Some(latency),
            message: None,
        };
        store.add_ping(&mut p).unwrap();
    }

    #[test]
    fn test_truncate_to_period() {
        let dt = Utc.with_ymd_and_hms(2024, 6, 1, 12, 34, 56).unwrap();
        assert_eq!(
            truncate_to_period(dt, Granularity::Hour),
            Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
        );
        assert_eq!(
            truncate_to_period(dt, Granularity::Day),
            Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_length_law_for_empty_monitor() {
        let (_tmp, _store, reader) = test_reader();
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 10, 30, 45).unwrap();

        for (period, len) in [
            (Period::Last24h, 24),
            (Period::Last4d, 96),
            (Period::Last90d, 90),
        ] {
            let slots = reader.read_buckets_at(1, period, now).unwrap();
            assert_eq!(slots.len(), len);
            assert!(slots.iter().all(|s| s.is_none()));
        }
    }

    #[test]
    fn test_seeded_hourly_buckets_land_at_their_indices() {
        let (_tmp, store, reader) = test_reader();
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 10, 30, 45).unwrap();
        let current_hour = Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap();

        seed_bucket(
            &store,
            1,
            Bucket {
                monitor_id: 1,
                period_start: current_hour - ChronoDuration::hours(1),
                granularity: Granularity::Hour,
                success_count: 59,
                failure_count: 1,
                avg_latency_ms: 120.0,
            },
        );
        seed_bucket(
            &store,
            1,
            Bucket {
                monitor_id: 1,
                period_start: current_hour - ChronoDuration::hours(2),
                granularity: Granularity::Hour,
                success_count: 60,
                failure_count: 0,
                avg_latency_ms: 95.0,
            },
        );

        let slots = reader.read_buckets_at(1, Period::Last24h, now).unwrap();
        assert_eq!(slots.len(), 24);

        let one_ago = slots[1].as_ref().unwrap();
        assert_eq!(one_ago.success_count, 59);
        assert_eq!(one_ago.failure_count, 1);
        assert!((one_ago.avg_latency_ms - 120.0).abs() < 1e-9);
        assert_eq!(one_ago.timestamp, current_hour - ChronoDuration::hours(1));

        let two_ago = slots[2].as_ref().unwrap();
        assert_eq!(two_ago.success_count, 60);
        assert!((two_ago.avg_latency_ms - 95.0).abs() < 1e-9);

        for (i, slot) in slots.iter().enumerate() {
            if i != 1 && i != 2 {
                assert!(slot.is_none(), "slot {} should be empty", i);
            }
        }
    }

    #[test]
    fn test_virtual_bucket_from_pings_alone() {
        let (_tmp, store, reader) = test_reader();
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 10, 30, 45).unwrap();
        let midnight = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();

        add_ping(&store, 1, midnight + ChronoDuration::hours(2), true, 100);
        add_ping(&store, 1, midnight + ChronoDuration::hours(3), false, 200);

        let slots = reader.read_buckets_at(1, Period::Last90d, now).unwrap();
        assert_eq!(slots.len(), 90);

        let today = slots[0].as_ref().unwrap();
        assert_eq!(today.success_count, 1);
        assert_eq!(today.failure_count, 1);
        assert!((today.avg_latency_ms - 150.0).abs() < 1e-9);
        assert_eq!(today.timestamp, midnight);
    }

    #[test]
    fn test_virtual_bucket_merges_partial_rollup_with_new_pings() {
        let (_tmp, store, reader) = test_reader();
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 10, 30, 45).unwrap();
        let midnight = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();

        seed_bucket(
            &store,
            1,
            Bucket {
                monitor_id: 1,
                period_start: midnight,
                granularity: Granularity::Day,
                success_count: 1,
                failure_count: 2,
                avg_latency_ms: 300.0,
            },
        );
        add_ping(&store, 1, midnight + ChronoDuration::hours(9), true, 100);
        add_ping(&store, 1, midnight + ChronoDuration::hours(10), false, 200);

        let slots = reader.read_buckets_at(1, Period::Last90d, now).unwrap();
        let today = slots[0].as_ref().unwrap();

        // (300 * 3 + 100 + 200) / 5 = 240
        assert_eq!(today.success_count, 2);
        assert_eq!(today.failure_count, 3);
        assert!((today.avg_latency_ms - 240.0).abs() < 1e-9);
    }

    #[test]
    fn test_pings_without_latency_count_but_add_no_latency() {
        let (_tmp, store, reader) = test_reader();
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 10, 30, 45).unwrap();
        let hour = Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap();

        add_ping(&store, 1, hour + ChronoDuration::minutes(5), true, 100);
        let mut timeout_ping = Ping {
            id: 0,
            monitor_id: 1,
            time: hour + ChronoDuration::minutes(10),
            success: false,
            status_code: None,
            response_time_ms: None,
            message: Some("probe timed out after 5s".into()),
        };
        store.add_ping(&mut timeout_ping).unwrap();

        let slots = reader.read_buckets_at(1, Period::Last24h, now).unwrap();
        let current = slots[0].as_ref().unwrap();
        assert_eq!(current.success_count, 1);
        assert_eq!(current.failure_count, 1);
        assert!((current.avg_latency_ms - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_closed_period_pings_do_not_leak_into_open_slot() {
        let (_tmp, store, reader) = test_reader();
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 10, 30, 45).unwrap();
        let hour = Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap();

        // Ping from the previous hour, not yet rolled up. It belongs to
        // slot 1 but that slot has no persisted bucket, so it reads None.
        add_ping(&store, 1, hour - ChronoDuration::minutes(30), true, 100);

        let slots = reader.read_buckets_at(1, Period::Last24h, now).unwrap();
        assert!(slots[0].is_none());
        assert!(slots[1].is_none());
    }
}
