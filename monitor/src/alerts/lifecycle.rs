//! Alert identity and lifecycle.
//!
//! Findings become alerts here. The manager is sharded with the same
//! partitioner as the state store, so the shard owning a subject key is only
//! touched by that key's partition worker (findings and sweeps) and by
//! explicit resolves, all under the shard mutex. Transitions are published
//! while the mutex is held, which keeps each alert's transitions in order on
//! the feed.

use std::collections::{HashMap, HashSet, VecDeque};

use parking_lot::Mutex;
use tracing::{debug, info, instrument};

use super::model::{
    Alert, AlertDetails, AlertFilter, AlertId, AlertStats, AlertTransition, DedupKey,
    ResolveOutcome, ResolveReason,
};
use crate::config::LifecycleConfig;
use crate::error::EngineError;
use crate::metrics::{Counters, bump};
use crate::partition::Partitioner;
use crate::publisher::Publisher;
use crate::rules::Finding;

#[derive(Default)]
struct AlertShard {
    /// Open occurrence per dedup key.
    open: HashMap<DedupKey, AlertId>,
    /// Open alerts and retained resolved ones.
    alerts: HashMap<AlertId, Alert>,
    /// Resolution order, oldest first, for history pruning.
    resolved_order: VecDeque<AlertId>,
    /// Resolved alerts pruned from `alerts`, bounded by `tombstone_cap`.
    tombstones: HashSet<AlertId>,
    tombstone_order: VecDeque<AlertId>,
}

impl AlertShard {
    fn bury(&mut self, id: AlertId, cap: usize) {
        self.alerts.remove(&id);
        if self.tombstones.insert(id) {
            self.tombstone_order.push_back(id);
        }
        while self.tombstone_order.len() > cap {
            if let Some(old) = self.tombstone_order.pop_front() {
                self.tombstones.remove(&old);
            }
        }
    }
}

pub struct AlertLifecycleManager {
    shards: Vec<Mutex<AlertShard>>,
    partitioner: Partitioner,
    grace_ms: u64,
    history_cap: usize,
    tombstone_cap: usize,
    publisher: Publisher,
    counters: Counters,
}

impl AlertLifecycleManager {
    pub fn new(
        config: &LifecycleConfig,
        partitioner: Partitioner,
        publisher: Publisher,
        counters: Counters,
    ) -> Self {
        let shards = (0..partitioner.count())
            .map(|_| Mutex::new(AlertShard::default()))
            .collect();

        Self {
            shards,
            partitioner,
            grace_ms: config.grace_ms,
            history_cap: config.resolved_history_cap,
            tombstone_cap: config.tombstone_cap.max(1),
            publisher,
            counters,
        }
    }

    /// Opens a new alert for the finding's key or refreshes the open one.
    ///
    /// A refresh never lowers severity or `last_seen_ms`.
    #[instrument(
        level = "debug",
        skip_all,
        fields(rule = %finding.rule, subject = %finding.subject_key)
    )]
    pub fn reconcile(&self, finding: &Finding) -> AlertTransition {
        let key = DedupKey {
            kind: finding.rule,
            subject_key: finding.subject_key.clone(),
        };

        let mut guard = self.shards[self.partitioner.partition(&key.subject_key)].lock();
        let shard = &mut *guard;

        let open = shard
            .open
            .get(&key)
            .and_then(|id| shard.alerts.get_mut(id));

        let transition = match open {
            Some(alert) => {
                let previous = alert.severity;
                alert.severity = previous.max(finding.severity);
                alert.last_seen_ms = alert.last_seen_ms.max(finding.ts_ms);
                alert.details = AlertDetails::from(finding);
                alert.revision += 1;

                let severity_changed = alert.severity != previous;
                if severity_changed {
                    info!(alert_id = %alert.id, from = %previous, to = %alert.severity, "alert escalated");
                }
                bump(&self.counters.alerts_refreshed);

                AlertTransition::Refreshed {
                    alert: alert.clone(),
                    previous_severity: previous,
                    severity_changed,
                }
            }
            None => {
                let alert = Alert::open(finding);
                info!(alert_id = %alert.id, severity = %alert.severity, "alert opened");
                bump(&self.counters.alerts_opened);

                shard.open.insert(key, alert.id);
                shard.alerts.insert(alert.id, alert.clone());
                AlertTransition::Opened { alert }
            }
        };

        self.publisher.publish(transition.clone());
        transition
    }

    /// Resolves an alert by id. Resolving a resolved alert is a no-op.
    /// Ids that have aged out of both the history and the tombstones are
    /// reported as `NotFound`.
    ///
    /// `at_ms` is clamped to the alert's last sighting so the resolution
    /// never predates the evidence.
    #[instrument(level = "debug", skip(self))]
    pub fn resolve(&self, id: AlertId, at_ms: u64) -> Result<ResolveOutcome, EngineError> {
        for shard in &self.shards {
            let mut shard = shard.lock();

            if shard.tombstones.contains(&id) {
                return Ok(ResolveOutcome::AlreadyResolved);
            }

            let Some(alert) = shard.alerts.get(&id) else {
                continue;
            };
            if !alert.is_open() {
                return Ok(ResolveOutcome::AlreadyResolved);
            }

            let resolved_at = at_ms.max(alert.last_seen_ms);
            let alert = self.resolve_locked(&mut shard, id, resolved_at, ResolveReason::Manual);
            return Ok(alert.map_or(ResolveOutcome::AlreadyResolved, ResolveOutcome::Resolved));
        }

        Err(EngineError::NotFound(id))
    }

    /// Resolves the shard's open alerts that have not been seen for longer
    /// than the grace period before `reference_ts`. Returns how many.
    pub fn sweep_shard(&self, shard_idx: usize, reference_ts: u64) -> usize {
        let Some(shard) = self.shards.get(shard_idx) else {
            return 0;
        };
        let mut shard = shard.lock();

        let expired: Vec<AlertId> = shard
            .open
            .values()
            .filter(|id| {
                shard
                    .alerts
                    .get(id)
                    .is_some_and(|a| reference_ts.saturating_sub(a.last_seen_ms) > self.grace_ms)
            })
            .copied()
            .collect();

        for id in &expired {
            self.resolve_locked(&mut shard, *id, reference_ts, ResolveReason::Expired);
        }

        if !expired.is_empty() {
            debug!(shard = shard_idx, reference_ts, resolved = expired.len(), "sweep resolved alerts");
        }
        expired.len()
    }

    fn resolve_locked(
        &self,
        shard: &mut AlertShard,
        id: AlertId,
        resolved_at: u64,
        reason: ResolveReason,
    ) -> Option<Alert> {
        let alert = shard.alerts.get_mut(&id)?;
        alert.resolved_at_ms = Some(resolved_at);
        alert.revision += 1;
        let alert = alert.clone();

        shard.open.remove(&alert.dedup_key());
        shard.resolved_order.push_back(id);
        while shard.resolved_order.len() > self.history_cap {
            if let Some(old) = shard.resolved_order.pop_front() {
                shard.bury(old, self.tombstone_cap);
            }
        }

        info!(alert_id = %id, ?reason, resolved_at, "alert resolved");
        bump(&self.counters.alerts_resolved);

        self.publisher.publish(AlertTransition::Resolved {
            alert: alert.clone(),
            reason,
        });
        Some(alert)
    }

    /// Open or retained resolved alert by id.
    pub fn get(&self, id: AlertId) -> Option<Alert> {
        self.shards
            .iter()
            .find_map(|s| s.lock().alerts.get(&id).cloned())
    }

    /// Open alerts matching `filter`, most severe first, then most recent.
    pub fn active(&self, filter: &AlertFilter) -> Vec<Alert> {
        let mut out: Vec<Alert> = self
            .shards
            .iter()
            .flat_map(|s| {
                let s = s.lock();
                s.open
                    .values()
                    .filter_map(|id| s.alerts.get(id))
                    .filter(|a| filter.matches(a))
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect();

        out.sort_by(|a, b| {
            b.severity
                .cmp(&a.severity)
                .then(b.last_seen_ms.cmp(&a.last_seen_ms))
        });
        out
    }

    pub fn stats(&self) -> AlertStats {
        let mut stats = AlertStats::default();
        for shard in &self.shards {
            let shard = shard.lock();
            stats.open += shard.open.len();
            stats.resolved_retained += shard.resolved_order.len();
            for alert in shard.open.values().filter_map(|id| shard.alerts.get(id)) {
                *stats.open_by_severity.entry(alert.severity).or_default() += 1;
                *stats.open_by_kind.entry(alert.kind).or_default() += 1;
            }
        }
        stats
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }
}
