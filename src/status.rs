//! Per-monitor status state machine and transition detection.

use crate::db::{DbError, Monitor, Ping, Status, Store};

use serde::Serialize;
use std::sync::Arc;

/// Payload handed to the notification dispatcher on a status transition.
#[derive(Debug, Clone, Serialize)]
pub struct AlertEvent {
    pub monitor_id: i64,
    pub name: String,
    pub url: String,
    pub new_status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Delivery seam. Implementations own the transports and their failures;
/// dispatch is best-effort and must not affect the status mutation that
/// triggered it.
pub trait NotificationDispatcher: Send + Sync {
    fn dispatch(&self, channel_ids: &[i64], event: &AlertEvent);
}

/// Dispatcher that only logs the event. Stands in for real delivery
/// channels, which live outside this engine.
pub struct LogDispatcher;

impl NotificationDispatcher for LogDispatcher {
    fn dispatch(&self, channel_ids: &[i64], event: &AlertEvent) {
        tracing::info!(
            "Alert for monitor {} ({}): now {} (channels: {:?})",
            event.monitor_id,
            event.name,
            event.new_status.as_str(),
            channel_ids
        );
    }
}

/// Tracks the up/down state of each monitor and emits exactly one alert
/// per transition. Callers must process a given monitor's pings in probe
/// order; the scheduler guarantees this within and across ticks.
pub struct StatusTracker {
    store: Store,
    dispatcher: Arc<dyn NotificationDispatcher>,
}

impl StatusTracker {
    pub fn new(store: Store, dispatcher: Arc<dyn NotificationDispatcher>) -> Self {
        Self { store, dispatcher }
    }

    /// Record one probe outcome. Updates `last_checked_at` on every call;
    /// on a status change the new status is persisted first and the alert
    /// dispatched after, so the transition is committed regardless of
    /// delivery.
    pub fn record(&self, monitor: &Monitor, ping: &Ping) -> Result<(), DbError> {
        let state = self.store.get_status(monitor.id)?;
        let new_status = if ping.success { Status::Up } else { Status::Down };

        self.store.set_status(monitor.id, new_status, ping.time)?;

        if new_status != state.status {
            let event = AlertEvent {
                monitor_id: monitor.id,
                name: monitor.name.clone(),
                url: monitor.url.clone(),
                new_status,
                status_code: if new_status == Status::Down {
                    ping.status_code
                } else {
                    None
                },
                message: if new_status == Status::Down {
                    ping.message.clone()
                } else {
                    None
                },
            };
            self.dispatcher
                .dispatch(&monitor.notification_channel_ids, &event);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};
    use std::sync::Mutex;
    use tempfile::NamedTempFile;

    #[derive(Default)]
    struct RecordingDispatcher {
        events: Mutex<Vec<(Vec<i64>, AlertEvent)>>,
    }

    impl NotificationDispatcher for RecordingDispatcher {
        fn dispatch(&self, channel_ids: &[i64], event: &AlertEvent) {
            self.events
                .lock()
                .unwrap()
                .push((channel_ids.to_vec(), event.clone()));
        }
    }

    struct Fixture {
        _tmp: NamedTempFile,
        store: Store,
        tracker: StatusTracker,
        dispatcher: Arc<RecordingDispatcher>,
        monitor: Monitor,
    }

    fn setup() -> Fixture {
        let tmp = NamedTempFile::new().unwrap();
        let store = Store::new(tmp.path()).unwrap();
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let tracker = StatusTracker::new(store.clone(), dispatcher.clone());

        let mut monitor = Monitor {
            name: "Example".into(),
            url: "https://example.com".into(),
            notification_channel_ids: vec![3, 4],
            ..Default::default()
        };
        store.add_monitor(&mut monitor).unwrap();

        Fixture {
            _tmp: tmp,
            store,
            tracker,
            dispatcher,
            monitor,
        }
    }

    fn probe(monitor_id: i64, seq: i64, success: bool) -> Ping {
        let base = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        Ping {
            id: 0,
            monitor_id,
            time: base + ChronoDuration::seconds(seq),
            success,
            status_code: Some(if success { 200 } else { 500 }),
            response_time_ms: Some(100),
            message: if success {
                None
            } else {
                Some("unexpected HTTP status 500".into())
            },
        }
    }

    #[test]
    fn test_up_down_up_emits_three_alerts() {
        let f = setup();

        f.tracker.record(&f.monitor, &probe(f.monitor.id, 0, true)).unwrap();
        f.tracker.record(&f.monitor, &probe(f.monitor.id, 1, false)).unwrap();
        f.tracker.record(&f.monitor, &probe(f.monitor.id, 2, true)).unwrap();

        let events = f.dispatcher.events.lock().unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].1.new_status, Status::Up);
        assert_eq!(events[1].1.new_status, Status::Down);
        assert_eq!(events[2].1.new_status, Status::Up);

        // Down alerts carry the failing code and message; up alerts do not.
        assert_eq!(events[1].1.status_code, Some(500));
        assert!(events[1].1.message.is_some());
        assert_eq!(events[0].1.status_code, None);
        assert_eq!(events[2].1.status_code, None);

        // Channels come from the monitor.
        assert_eq!(events[0].0, vec![3, 4]);
    }

    #[test]
    fn test_repeated_status_never_realerts() {
        let f = setup();

        for i in 0..5 {
            f.tracker.record(&f.monitor, &probe(f.monitor.id, i, true)).unwrap();
        }
        assert_eq!(f.dispatcher.events.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_first_probe_down_alerts() {
        let f = setup();

        f.tracker.record(&f.monitor, &probe(f.monitor.id, 0, false)).unwrap();

        let events = f.dispatcher.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].1.new_status, Status::Down);
    }

    #[test]
    fn test_alert_count_equals_classification_changes() {
        let f = setup();

        let outcomes = [true, true, false, false, true, false, true, true];
        let mut expected = 0;
        let mut prev: Option<bool> = None;
        for (i, &ok) in outcomes.iter().enumerate() {
            f.tracker.record(&f.monitor, &probe(f.monitor.id, i as i64, ok)).unwrap();
            if prev != Some(ok) {
                expected += 1;
            }
            prev = Some(ok);
        }

        assert_eq!(f.dispatcher.events.lock().unwrap().len(), expected);
    }

    #[test]
    fn test_every_probe_updates_last_checked() {
        let f = setup();

        let p0 = probe(f.monitor.id, 0, true);
        f.tracker.record(&f.monitor, &p0).unwrap();
        let state = f.store.get_status(f.monitor.id).unwrap();
        assert_eq!(state.last_checked_at, Some(p0.time));

        // A same-status probe still advances last_checked_at.
        let p1 = probe(f.monitor.id, 30, true);
        f.tracker.record(&f.monitor, &p1).unwrap();
        let state = f.store.get_status(f.monitor.id).unwrap();
        assert_eq!(state.last_checked_at, Some(p1.time));
        assert_eq!(state.status, Status::Up);
    }
}
