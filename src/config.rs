//! Configuration module for uptimed.
//!
//! Loads configuration from environment variables with sensible defaults.

use std::env;
use std::time::Duration;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP port for the web server (default: 8080)
    pub http_port: u16,
    /// Path to the SQLite database file (default: "uptimed.db")
    pub db_path: String,
    /// Process-wide cap on probes in flight during a tick (default: 100)
    pub max_concurrent_requests: usize,
    /// Seconds between scheduler ticks (default: 30)
    pub tick_interval_secs: u64,
    /// Per-probe timeout in seconds (default: 10, always < tick interval)
    pub probe_timeout_secs: u64,
    /// Seconds between rollup passes (default: 60)
    pub rollup_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            db_path: "uptimed.db".to_string(),
            max_concurrent_requests: 100,
            tick_interval_secs: 30,
            probe_timeout_secs: 10,
            rollup_interval_secs: 60,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `UPTIMED_HTTP_PORT`: HTTP port (default: 8080)
    /// - `UPTIMED_DB_PATH`: Database file path (default: "uptimed.db")
    /// - `UPTIMED_MAX_CONCURRENT_REQUESTS`: probe concurrency cap (default: 100)
    /// - `UPTIMED_TICK_INTERVAL_SECS`: seconds between ticks (default: 30)
    /// - `UPTIMED_PROBE_TIMEOUT_SECS`: per-probe timeout (default: 10)
    /// - `UPTIMED_ROLLUP_INTERVAL_SECS`: seconds between rollups (default: 60)
    pub fn load() -> Self {
        let mut cfg = Self::default();

        if let Ok(s) = env::var("UPTIMED_HTTP_PORT") {
            if let Ok(port) = s.parse() {
                cfg.http_port = port;
            }
        }

        if let Ok(db_path) = env::var("UPTIMED_DB_PATH") {
            cfg.db_path = db_path;
        }

        if let Ok(s) = env::var("UPTIMED_MAX_CONCURRENT_REQUESTS") {
            if let Ok(n) = s.parse::<usize>() {
                if n > 0 {
                    cfg.max_concurrent_requests = n;
                }
            }
        }

        if let Ok(s) = env::var("UPTIMED_TICK_INTERVAL_SECS") {
            if let Ok(n) = s.parse::<u64>() {
                if n > 0 {
                    cfg.tick_interval_secs = n;
                }
            }
        }

        if let Ok(s) = env::var("UPTIMED_PROBE_TIMEOUT_SECS") {
            if let Ok(n) = s.parse::<u64>() {
                if n > 0 {
                    cfg.probe_timeout_secs = n;
                }
            }
        }

        if let Ok(s) = env::var("UPTIMED_ROLLUP_INTERVAL_SECS") {
            if let Ok(n) = s.parse::<u64>() {
                if n > 0 {
                    cfg.rollup_interval_secs = n;
                }
            }
        }

        // A probe slower than the tick would let in-flight work pile up
        // across ticks, so the timeout always stays below the interval.
        if cfg.probe_timeout_secs >= cfg.tick_interval_secs {
            cfg.probe_timeout_secs = cfg.tick_interval_secs.saturating_sub(1).max(1);
        }

        cfg
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    pub fn rollup_interval(&self) -> Duration {
        Duration::from_secs(self.rollup_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.http_port, 8080);
        assert_eq!(cfg.db_path, "uptimed.db");
        assert_eq!(cfg.max_concurrent_requests, 100);
        assert!(cfg.probe_timeout_secs < cfg.tick_interval_secs);
    }
}
