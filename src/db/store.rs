//! SQLite database store implementation.

use chrono::{DateTime, Duration as ChronoDuration, NaiveDateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Result as SqlResult};
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;

use super::models::*;

/// Database error types.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("Not found")]
    NotFound,
}

/// Thread-safe database store.
///
/// Holds the monitor registry rows (read-mostly), the append-only ping log,
/// per-monitor status state, and the persisted bucket rollups.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Create a new store with the given database path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init()?;
        Ok(store)
    }

    /// Initialize the database with migrations.
    fn init(&self) -> Result<(), DbError> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(include_str!("../../migrations/000001_init.up.sql"))
            .map_err(|e| DbError::Migration(format!("Migration 1 failed: {}", e)))?;
        Ok(())
    }

    // --- Monitor registry ---

    /// Add a monitor and return its ID. This is the registry collaborator's
    /// seam; the engine itself never creates monitors.
    pub fn add_monitor(&self, monitor: &mut Monitor) -> Result<i64, DbError> {
        if monitor.check_interval_seconds <= 0 {
            monitor.check_interval_seconds = 60;
        }

        let channels = serde_json::to_string(&monitor.notification_channel_ids)
            .unwrap_or_else(|_| "[]".to_string());

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO monitors (name, url, notification_channel_ids, check_interval_seconds) VALUES (?1, ?2, ?3, ?4)",
            params![
                monitor.name,
                monitor.url,
                channels,
                monitor.check_interval_seconds,
            ],
        )?;
        let id = conn.last_insert_rowid();
        monitor.id = id;
        Ok(id)
    }

    /// Get a monitor by ID.
    pub fn get_monitor(&self, id: i64) -> Result<Monitor, DbError> {
        let conn = self.conn.lock().unwrap();
        let monitor = conn
            .query_row(
                "SELECT id, name, url, COALESCE(notification_channel_ids, '[]'), check_interval_seconds FROM monitors WHERE id = ?1",
                params![id],
                row_to_monitor,
            )
            .optional()?
            .ok_or(DbError::NotFound)?;
        Ok(monitor)
    }

    /// Get all monitors.
    pub fn get_monitors(&self) -> Result<Vec<Monitor>, DbError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, name, url, COALESCE(notification_channel_ids, '[]'), check_interval_seconds FROM monitors",
        )?;
        let monitors = stmt
            .query_map([], row_to_monitor)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(monitors)
    }

    /// List monitors due for a check at `now`: never checked, or whose
    /// check interval has elapsed since the last probe.
    pub fn list_due_monitors(&self, now: DateTime<Utc>) -> Result<Vec<Monitor>, DbError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT m.id, m.name, m.url, COALESCE(m.notification_channel_ids, '[]'),
                    m.check_interval_seconds, s.last_checked_at
             FROM monitors m LEFT JOIN monitor_status s ON s.monitor_id = m.id",
        )?;

        let rows = stmt
            .query_map([], |row| {
                let monitor = row_to_monitor(row)?;
                let last: Option<String> = row.get(5)?;
                Ok((monitor, last))
            })?
            .collect::<SqlResult<Vec<_>>>()?;

        let due = rows
            .into_iter()
            .filter(|(m, last)| match last.as_deref().and_then(parse_db_time) {
                Some(t) => t + ChronoDuration::seconds(m.check_interval_seconds) <= now,
                None => true,
            })
            .map(|(m, _)| m)
            .collect();

        Ok(due)
    }

    // --- Monitor status ---

    /// Get the status state for a monitor. Missing rows read as `Unknown`
    /// with no last-checked time; the row is created on the first write.
    pub fn get_status(&self, monitor_id: i64) -> Result<MonitorStatus, DbError> {
        let conn = self.conn.lock().unwrap();
        let state = conn
            .query_row(
                "SELECT status, last_checked_at FROM monitor_status WHERE monitor_id = ?1",
                params![monitor_id],
                |row| {
                    let status: String = row.get(0)?;
                    let last: Option<String> = row.get(1)?;
                    Ok(MonitorStatus {
                        monitor_id,
                        status: Status::from_str(&status),
                        last_checked_at: last.as_deref().and_then(parse_db_time),
                    })
                },
            )
            .optional()?;

        Ok(state.unwrap_or(MonitorStatus {
            monitor_id,
            status: Status::Unknown,
            last_checked_at: None,
        }))
    }

    /// Write the status state for a monitor (insert or update).
    pub fn set_status(
        &self,
        monitor_id: i64,
        status: Status,
        checked_at: DateTime<Utc>,
    ) -> Result<(), DbError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO monitor_status (monitor_id, status, last_checked_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(monitor_id) DO UPDATE SET
             status = excluded.status, last_checked_at = excluded.last_checked_at",
            params![monitor_id, status.as_str(), fmt_db_time(checked_at)],
        )?;
        Ok(())
    }

    // --- Pings ---

    /// Append one ping and fill in its row ID.
    pub fn add_ping(&self, ping: &mut Ping) -> Result<i64, DbError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO pings (monitor_id, time, success, status_code, response_time_ms, message)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                ping.monitor_id,
                fmt_db_time(ping.time),
                ping.success,
                ping.status_code,
                ping.response_time_ms,
                ping.message,
            ],
        )?;
        let id = conn.last_insert_rowid();
        ping.id = id;
        Ok(id)
    }

    /// Get the most recent pings for a monitor, newest first.
    pub fn get_recent_pings(&self, monitor_id: i64, limit: i64) -> Result<Vec<Ping>, DbError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, monitor_id, time, success, status_code, response_time_ms, message
             FROM pings WHERE monitor_id = ?1 ORDER BY time DESC, id DESC LIMIT ?2",
        )?;
        let pings = stmt
            .query_map(params![monitor_id, limit], row_to_ping)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(pings)
    }

    /// Get pings at or after `since`, oldest first.
    pub fn get_pings_since(
        &self,
        monitor_id: i64,
        since: DateTime<Utc>,
    ) -> Result<Vec<Ping>, DbError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, monitor_id, time, success, status_code, response_time_ms, message
             FROM pings WHERE monitor_id = ?1 AND time >= ?2 ORDER BY time ASC, id ASC",
        )?;
        let pings = stmt
            .query_map(params![monitor_id, fmt_db_time(since)], row_to_ping)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(pings)
    }

    /// Get pings strictly before `cutoff`, oldest first. Used by rollup.
    pub fn get_pings_before(
        &self,
        monitor_id: i64,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Ping>, DbError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, monitor_id, time, success, status_code, response_time_ms, message
             FROM pings WHERE monitor_id = ?1 AND time < ?2 ORDER BY time ASC, id ASC",
        )?;
        let pings = stmt
            .query_map(params![monitor_id, fmt_db_time(cutoff)], row_to_ping)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(pings)
    }

    // --- Buckets ---

    /// Get the bucket exactly matching (monitor, period start, granularity).
    pub fn get_bucket(
        &self,
        monitor_id: i64,
        period_start: DateTime<Utc>,
        granularity: Granularity,
    ) -> Result<Option<Bucket>, DbError> {
        let conn = self.conn.lock().unwrap();
        let bucket = conn
            .query_row(
                "SELECT monitor_id, period_start, granularity, success_count, failure_count, avg_latency_ms
                 FROM buckets WHERE monitor_id = ?1 AND period_start = ?2 AND granularity = ?3",
                params![monitor_id, fmt_db_time(period_start), granularity.as_str()],
                row_to_bucket,
            )
            .optional()?;
        Ok(bucket)
    }

    /// Get all buckets of one granularity with period start in [start, end).
    pub fn get_buckets_in_range(
        &self,
        monitor_id: i64,
        granularity: Granularity,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Bucket>, DbError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT monitor_id, period_start, granularity, success_count, failure_count, avg_latency_ms
             FROM buckets
             WHERE monitor_id = ?1 AND granularity = ?2 AND period_start >= ?3 AND period_start < ?4
             ORDER BY period_start ASC",
        )?;
        let buckets = stmt
            .query_map(
                params![
                    monitor_id,
                    granularity.as_str(),
                    fmt_db_time(start),
                    fmt_db_time(end),
                ],
                row_to_bucket,
            )?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(buckets)
    }

    /// Fold a batch of bucket deltas into persisted rows and delete the
    /// pings that produced them, in one transaction. Each delta is merged
    /// into any existing row with the latency-sum-weighted average, so a
    /// partial rollup followed by a later one over the same period stays
    /// exact. Deleting the folded pings in the same transaction is what
    /// keeps a replayed rollup from double-counting.
    pub fn fold_pings(
        &self,
        monitor_id: i64,
        cutoff: DateTime<Utc>,
        deltas: &[Bucket],
    ) -> Result<(), DbError> {
        let conn = self.conn.lock().unwrap();
        let tx = conn.unchecked_transaction()?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO buckets (monitor_id, period_start, granularity, success_count, failure_count, avg_latency_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(monitor_id, period_start, granularity) DO UPDATE SET
                 avg_latency_ms = (avg_latency_ms * (success_count + failure_count)
                                   + excluded.avg_latency_ms * (excluded.success_count + excluded.failure_count))
                                  / (success_count + failure_count + excluded.success_count + excluded.failure_count),
                 success_count = success_count + excluded.success_count,
                 failure_count = failure_count + excluded.failure_count",
            )?;

            for b in deltas {
                stmt.execute(params![
                    b.monitor_id,
                    fmt_db_time(b.period_start),
                    b.granularity.as_str(),
                    b.success_count,
                    b.failure_count,
                    b.avg_latency_ms,
                ])?;
            }
        }

        tx.execute(
            "DELETE FROM pings WHERE monitor_id = ?1 AND time < ?2",
            params![monitor_id, fmt_db_time(cutoff)],
        )?;

        tx.commit()?;
        Ok(())
    }
}

fn row_to_monitor(row: &rusqlite::Row<'_>) -> SqlResult<Monitor> {
    let channels: String = row.get(3)?;
    Ok(Monitor {
        id: row.get(0)?,
        name: row.get(1)?,
        url: row.get(2)?,
        notification_channel_ids: serde_json::from_str(&channels).unwrap_or_default(),
        check_interval_seconds: row.get(4)?,
    })
}

fn row_to_ping(row: &rusqlite::Row<'_>) -> SqlResult<Ping> {
    let time_str: String = row.get(2)?;
    Ok(Ping {
        id: row.get(0)?,
        monitor_id: row.get(1)?,
        time: parse_db_time(&time_str).unwrap_or_else(Utc::now),
        success: row.get(3)?,
        status_code: row.get(4)?,
        response_time_ms: row.get(5)?,
        message: row.get(6)?,
    })
}

fn row_to_bucket(row: &rusqlite::Row<'_>) -> SqlResult<Bucket> {
    let time_str: String = row.get(1)?;
    let granularity: String = row.get(2)?;
    Ok(Bucket {
        monitor_id: row.get(0)?,
        period_start: parse_db_time(&time_str).unwrap_or_else(Utc::now),
        granularity: if granularity == "day" {
            Granularity::Day
        } else {
            Granularity::Hour
        },
        success_count: row.get(3)?,
        failure_count: row.get(4)?,
        avg_latency_ms: row.get(5)?,
    })
}

/// Format a datetime for storage. The fixed-width form sorts
/// lexicographically, so string range scans match time ranges.
pub fn fmt_db_time(dt: DateTime<Utc>) -> String {
    dt.format("%Y-%m-%d %H:%M:%S%.9f").to_string()
}

/// Parse a datetime string from the database.
pub fn parse_db_time(s: &str) -> Option<DateTime<Utc>> {
    let formats = [
        "%Y-%m-%d %H:%M:%S%.9f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.9fZ",
        "%Y-%m-%dT%H:%M:%SZ",
    ];

    for fmt in &formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    None
}
