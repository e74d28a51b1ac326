//! Database model types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Up/down classification of a monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Unknown,
    Up,
    Down,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Unknown => "unknown",
            Status::Up => "up",
            Status::Down => "down",
        }
    }

    pub fn from_str(s: &str) -> Status {
        match s {
            "up" => Status::Up,
            "down" => Status::Down,
            _ => Status::Unknown,
        }
    }
}

/// A monitored endpoint. Rows are owned by the external registry; the
/// engine only reads them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Monitor {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub notification_channel_ids: Vec<i64>,
    pub check_interval_seconds: i64,
}

impl Default for Monitor {
    fn default() -> Self {
        Self {
            id: 0,
            name: String::new(),
            url: String::new(),
            notification_channel_ids: Vec::new(),
            check_interval_seconds: 60,
        }
    }
}

/// Persisted per-monitor status state, created lazily on first probe.
#[derive(Debug, Clone, Serialize)]
pub struct MonitorStatus {
    pub monitor_id: i64,
    pub status: Status,
    pub last_checked_at: Option<DateTime<Utc>>,
}

/// One immutable probe outcome.
#[derive(Debug, Clone, Serialize)]
pub struct Ping {
    pub id: i64,
    pub monitor_id: i64,
    pub time: DateTime<Utc>,
    pub success: bool,
    pub status_code: Option<i64>,
    pub response_time_ms: Option<i64>,
    pub message: Option<String>,
}

/// Aggregation resolution of a bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    Hour,
    Day,
}

impl Granularity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Hour => "hour",
            Granularity::Day => "day",
        }
    }

    /// Window length in seconds.
    pub fn seconds(&self) -> i64 {
        match self {
            Granularity::Hour => 3600,
            Granularity::Day => 86400,
        }
    }
}

/// A persisted aggregate of pings over one closed hour or day window.
#[derive(Debug, Clone, PartialEq)]
pub struct Bucket {
    pub monitor_id: i64,
    pub period_start: DateTime<Utc>,
    pub granularity: Granularity,
    pub success_count: i64,
    pub failure_count: i64,
    pub avg_latency_ms: f64,
}

/// Query window for historical bucket reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    Last24h,
    Last4d,
    Last90d,
}

impl Period {
    /// Parse the wire form; anything unsupported is a caller error.
    pub fn parse(s: &str) -> Option<Period> {
        match s {
            "24h" => Some(Period::Last24h),
            "4d" => Some(Period::Last4d),
            "90d" => Some(Period::Last90d),
            _ => None,
        }
    }

    pub fn granularity(&self) -> Granularity {
        match self {
            Period::Last24h | Period::Last4d => Granularity::Hour,
            Period::Last90d => Granularity::Day,
        }
    }

    /// Number of slots in the query result, index 0 being the open period.
    pub fn bucket_count(&self) -> usize {
        match self {
            Period::Last24h => 24,
            Period::Last4d => 96,
            Period::Last90d => 90,
        }
    }
}

/// One slot of a bucket query result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BucketPoint {
    pub timestamp: DateTime<Utc>,
    pub success_count: i64,
    pub failure_count: i64,
    pub avg_latency_ms: f64,
}
