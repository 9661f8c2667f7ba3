use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use common::time::now_ms;
use serde::Serialize;

/// Wall-clock start of the process, for uptime reporting.
#[derive(Clone, Copy, Debug)]
struct StartedAt(u64);

impl Default for StartedAt {
    fn default() -> Self {
        Self(now_ms())
    }
}

/// Minimal counters for operational visibility.
#[derive(Clone, Default)]
pub struct Counters {
    started_at: StartedAt,

    // ingress
    pub events_accepted: Arc<AtomicU64>,
    pub events_rejected: Arc<AtomicU64>,
    pub events_stale: Arc<AtomicU64>,
    pub events_malformed: Arc<AtomicU64>,
    pub derived_dropped: Arc<AtomicU64>,

    // detection + lifecycle
    pub findings: Arc<AtomicU64>,
    pub alerts_opened: Arc<AtomicU64>,
    pub alerts_refreshed: Arc<AtomicU64>,
    pub alerts_resolved: Arc<AtomicU64>,

    // delivery
    pub subscriber_lagged: Arc<AtomicU64>,
    pub sink_retries: Arc<AtomicU64>,
    pub sink_give_ups: Arc<AtomicU64>,
}

/// Point-in-time copy of [`Counters`].
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct CountersSnapshot {
    pub started_at_ms: u64,
    pub uptime_ms: u64,
    /// Accepted events averaged over the uptime.
    pub events_per_minute: f64,

    pub events_accepted: u64,
    pub events_rejected: u64,
    pub events_stale: u64,
    pub events_malformed: u64,
    pub derived_dropped: u64,
    pub findings: u64,
    pub alerts_opened: u64,
    pub alerts_refreshed: u64,
    pub alerts_resolved: u64,
    pub subscriber_lagged: u64,
    pub sink_retries: u64,
    pub sink_give_ups: u64,
}

pub(crate) fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl Counters {
    pub fn started_at_ms(&self) -> u64 {
        self.started_at.0
    }

    pub fn snapshot(&self) -> CountersSnapshot {
        self.snapshot_at(now_ms())
    }

    fn snapshot_at(&self, now_ms: u64) -> CountersSnapshot {
        let read = |c: &Arc<AtomicU64>| c.load(Ordering::Relaxed);

        let uptime_ms = now_ms.saturating_sub(self.started_at.0);
        let events_accepted = read(&self.events_accepted);
        // At least a minute, so a fresh process does not report a burst rate.
        let minutes = (uptime_ms as f64 / 60_000.0).max(1.0);

        CountersSnapshot {
            started_at_ms: self.started_at.0,
            uptime_ms,
            events_per_minute: events_accepted as f64 / minutes,
            events_accepted,
            events_rejected: read(&self.events_rejected),
            events_stale: read(&self.events_stale),
            events_malformed: read(&self.events_malformed),
            derived_dropped: read(&self.derived_dropped),
            findings: read(&self.findings),
            alerts_opened: read(&self.alerts_opened),
            alerts_refreshed: read(&self.alerts_refreshed),
            alerts_resolved: read(&self.alerts_resolved),
            subscriber_lagged: read(&self.subscriber_lagged),
            sink_retries: read(&self.sink_retries),
            sink_give_ups: read(&self.sink_give_ups),
        }
    }
}
