//! uptimed - HTTP uptime monitoring engine.
//!
//! Periodically probes registered endpoints, tracks per-monitor up/down
//! status, records every probe outcome and serves multi-resolution
//! historical aggregates.

mod config;
mod db;
mod history;
mod probe;
mod scheduler;
mod status;
mod web;

use config::ServerConfig;
use db::Store;
use probe::ProbeExecutor;
use scheduler::Scheduler;
use status::{LogDispatcher, StatusTracker};
use web::Server;

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("uptimed=info".parse()?),
        )
        .init();

    // Load configuration
    let cfg = ServerConfig::load();
    tracing::info!("Starting uptimed on port {}...", cfg.http_port);
    tracing::info!("Using database at {}", cfg.db_path);

    // Initialize database
    let store = Store::new(&cfg.db_path)?;
    tracing::info!("Database initialized successfully");

    // Wire the engine: probe executor, status tracker, scheduler
    let executor = ProbeExecutor::new(cfg.probe_timeout())?;
    let tracker = StatusTracker::new(store.clone(), Arc::new(LogDispatcher));
    let scheduler = Arc::new(Scheduler::new(
        store.clone(),
        executor,
        tracker,
        cfg.max_concurrent_requests,
        cfg.tick_interval(),
        cfg.rollup_interval(),
    ));

    // Add sample monitor if the registry is empty
    let monitors = store.get_monitors()?;
    if monitors.is_empty() {
        tracing::info!("Adding sample monitor: Google");
        let mut monitor = db::Monitor {
            name: "Google".to_string(),
            url: "https://google.com".to_string(),
            check_interval_seconds: 60,
            ..Default::default()
        };
        store.add_monitor(&mut monitor)?;
    }

    // Start internal timer and rollup job
    scheduler.clone().start();

    // Start web server
    let server = Server::new(cfg, store, scheduler);
    server.start().await?;

    Ok(())
}
