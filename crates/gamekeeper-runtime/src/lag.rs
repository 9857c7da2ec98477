//! Fleet-wide lag aggregation.
//!
//! Instances track their own in-match lag budget; this ledger keeps the
//! cross-fleet view the health loop and management surfaces read: per-port
//! totals, rolling hour counts, and duration statistics.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use tracing::warn;

use gamekeeper_core::{Event, EventBus, EventPayload, EventType};

/// Retained events per port.
const HISTORY_CAP: usize = 1000;

/// Rolling-hour event count that rates a warning in the health sweep.
pub const HOURLY_WARNING_THRESHOLD: usize = 10;
/// Rolling-hour event count that rates a critical alert.
pub const HOURLY_CRITICAL_THRESHOLD: usize = 30;

/// Aggregated lag data for one port.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PortLagData {
    pub port: u16,
    pub total_events: u64,
    pub events_this_hour: usize,
    pub last_event_at: Option<DateTime<Utc>>,
    pub max_duration_ms: u32,
    pub avg_duration_ms: f64,
}

#[derive(Debug, Default)]
struct PortEntry {
    total: u64,
    max_duration_ms: u32,
    history: VecDeque<(DateTime<Utc>, u32)>,
}

/// One threshold breach found by [`LagLedger::check_thresholds`].
#[derive(Debug, Clone, Serialize)]
pub struct LagAlert {
    pub port: u16,
    pub level: &'static str,
    pub events_this_hour: usize,
}

/// Cross-instance lag bookkeeping, fed from the event bus.
#[derive(Default)]
pub struct LagLedger {
    ports: Mutex<HashMap<u16, PortEntry>>,
}

impl LagLedger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Subscribe the ledger to `long_frame` events.
    pub fn attach(self: &Arc<Self>, bus: &EventBus) {
        let ledger = Arc::clone(self);
        bus.subscribe(EventType::LongFrame, "lag_ledger", move |event| {
            let ledger = Arc::clone(&ledger);
            Box::pin(async move {
                if let EventPayload::LongFrame(frame) = &event.payload {
                    ledger.record(frame.port, frame.duration_ms);
                } else {
                    warn!(event = %event.event_type, "unexpected payload in lag ledger");
                }
                Ok(())
            })
        });
    }

    /// Record one lag event for `port`.
    pub fn record(&self, port: u16, duration_ms: u32) {
        let mut ports = self.ports.lock().expect("lag ledger lock");
        let entry = ports.entry(port).or_default();
        entry.total += 1;
        entry.max_duration_ms = entry.max_duration_ms.max(duration_ms);
        entry.history.push_back((Utc::now(), duration_ms));
        while entry.history.len() > HISTORY_CAP {
            entry.history.pop_front();
        }
    }

    /// Aggregated view for one port.
    pub fn port_data(&self, port: u16) -> Option<PortLagData> {
        let ports = self.ports.lock().expect("lag ledger lock");
        ports.get(&port).map(|entry| summarize(port, entry))
    }

    /// Aggregated view for every port that has reported lag.
    pub fn all_ports(&self) -> Vec<PortLagData> {
        let ports = self.ports.lock().expect("lag ledger lock");
        let mut all: Vec<PortLagData> = ports
            .iter()
            .map(|(&port, entry)| summarize(port, entry))
            .collect();
        all.sort_by_key(|data| data.port);
        all
    }

    /// Ports whose rolling-hour count crossed a threshold.
    pub fn check_thresholds(&self) -> Vec<LagAlert> {
        self.all_ports()
            .into_iter()
            .filter_map(|data| {
                let level = if data.events_this_hour >= HOURLY_CRITICAL_THRESHOLD {
                    "critical"
                } else if data.events_this_hour >= HOURLY_WARNING_THRESHOLD {
                    "warning"
                } else {
                    return None;
                };
                Some(LagAlert {
                    port: data.port,
                    level,
                    events_this_hour: data.events_this_hour,
                })
            })
            .collect()
    }

    /// Forget one port's data (instance removed).
    pub fn forget(&self, port: u16) {
        self.ports.lock().expect("lag ledger lock").remove(&port);
    }
}

fn summarize(port: u16, entry: &PortEntry) -> PortLagData {
    let hour_ago = Utc::now() - ChronoDuration::hours(1);
    let events_this_hour = entry
        .history
        .iter()
        .filter(|(at, _)| *at > hour_ago)
        .count();
    let avg = if entry.history.is_empty() {
        0.0
    } else {
        entry.history.iter().map(|(_, d)| f64::from(*d)).sum::<f64>() / entry.history.len() as f64
    };

    PortLagData {
        port,
        total_events: entry.total,
        events_this_hour,
        last_event_at: entry.history.back().map(|(at, _)| *at),
        max_duration_ms: entry.max_duration_ms,
        avg_duration_ms: avg,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gamekeeper_proto::LongFrame;

    #[test]
    fn records_totals_and_statistics() {
        let ledger = LagLedger::new();
        ledger.record(11235, 100);
        ledger.record(11235, 300);

        let data = ledger.port_data(11235).unwrap();
        assert_eq!(data.total_events, 2);
        assert_eq!(data.events_this_hour, 2);
        assert_eq!(data.max_duration_ms, 300);
        assert_eq!(data.avg_duration_ms, 200.0);
        assert!(data.last_event_at.is_some());
    }

    #[test]
    fn thresholds_classify_by_hourly_count() {
        let ledger = LagLedger::new();
        for _ in 0..HOURLY_WARNING_THRESHOLD {
            ledger.record(1, 100);
        }
        for _ in 0..HOURLY_CRITICAL_THRESHOLD {
            ledger.record(2, 100);
        }
        ledger.record(3, 100);

        let alerts = ledger.check_thresholds();
        assert_eq!(alerts.len(), 2);
        assert_eq!(alerts[0].port, 1);
        assert_eq!(alerts[0].level, "warning");
        assert_eq!(alerts[1].port, 2);
        assert_eq!(alerts[1].level, "critical");
    }

    #[test]
    fn forget_drops_a_port() {
        let ledger = LagLedger::new();
        ledger.record(11235, 100);
        ledger.forget(11235);
        assert!(ledger.port_data(11235).is_none());
        assert!(ledger.all_ports().is_empty());
    }

    #[tokio::test]
    async fn attaches_to_the_bus() {
        let bus = EventBus::new();
        let ledger = LagLedger::new();
        ledger.attach(&bus);

        bus.emit_sync(Event::new(
            EventType::LongFrame,
            Event::server_source(11235),
            EventPayload::LongFrame(LongFrame {
                port: 11235,
                duration_ms: 450,
            }),
        ))
        .await
        .unwrap();

        assert_eq!(ledger.port_data(11235).unwrap().total_events, 1);
    }
}
