use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::rules::{Finding, RuleKind, Severity};

pub type AlertId = Uuid;

/// Identity of an alert occurrence: at most one is open per key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DedupKey {
    pub kind: RuleKind,
    pub subject_key: String,
}

/// Evidence carried by an alert, replaced by every refreshing finding.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AlertDetails {
    pub metric: String,
    pub threshold: f64,
    pub observed: f64,
    pub message: String,
}

impl From<&Finding> for AlertDetails {
    fn from(f: &Finding) -> Self {
        Self {
            metric: f.metric.clone(),
            threshold: f.threshold,
            observed: f.observed,
            message: f.message.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: AlertId,
    pub kind: RuleKind,
    pub subject_key: String,
    pub severity: Severity,
    pub opened_at_ms: u64,
    pub last_seen_ms: u64,
    pub resolved_at_ms: Option<u64>,
    /// Bumped on every transition; lets sinks discard stale redeliveries.
    pub revision: u32,
    pub details: AlertDetails,
}

impl Alert {
    pub(crate) fn open(finding: &Finding) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: finding.rule,
            subject_key: finding.subject_key.clone(),
            severity: finding.severity,
            opened_at_ms: finding.ts_ms,
            last_seen_ms: finding.ts_ms,
            resolved_at_ms: None,
            revision: 0,
            details: AlertDetails::from(finding),
        }
    }

    pub fn is_open(&self) -> bool {
        self.resolved_at_ms.is_none()
    }

    pub fn dedup_key(&self) -> DedupKey {
        DedupKey {
            kind: self.kind,
            subject_key: self.subject_key.clone(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolveReason {
    /// No finding within the grace period.
    Expired,
    /// Resolved through the public API.
    Manual,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    Opened,
    Refreshed,
    Resolved,
}

impl TransitionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransitionKind::Opened => "opened",
            TransitionKind::Refreshed => "refreshed",
            TransitionKind::Resolved => "resolved",
        }
    }
}

/// A lifecycle change, as fanned out to subscribers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "transition", rename_all = "snake_case")]
pub enum AlertTransition {
    Opened {
        alert: Alert,
    },
    Refreshed {
        alert: Alert,
        previous_severity: Severity,
        severity_changed: bool,
    },
    Resolved {
        alert: Alert,
        reason: ResolveReason,
    },
}

impl AlertTransition {
    pub fn alert(&self) -> &Alert {
        match self {
            AlertTransition::Opened { alert }
            | AlertTransition::Refreshed { alert, .. }
            | AlertTransition::Resolved { alert, .. } => alert,
        }
    }

    pub fn kind(&self) -> TransitionKind {
        match self {
            AlertTransition::Opened { .. } => TransitionKind::Opened,
            AlertTransition::Refreshed { .. } => TransitionKind::Refreshed,
            AlertTransition::Resolved { .. } => TransitionKind::Resolved,
        }
    }

    /// Redeliveries of the same transition carry the same key.
    pub fn idempotency_key(&self) -> (AlertId, TransitionKind, u32) {
        let alert = self.alert();
        (alert.id, self.kind(), alert.revision)
    }
}

/// Query filter for alerts. Unset fields match everything.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertFilter {
    pub min_severity: Option<Severity>,
    /// Alerts last seen before this are excluded.
    pub since_ms: Option<u64>,
    /// Alerts opened after this are excluded.
    pub until_ms: Option<u64>,
    pub kind: Option<RuleKind>,
}

impl AlertFilter {
    pub fn min_severity(severity: Severity) -> Self {
        Self {
            min_severity: Some(severity),
            ..Self::default()
        }
    }

    pub fn matches(&self, alert: &Alert) -> bool {
        self.min_severity.is_none_or(|s| alert.severity >= s)
            && self.since_ms.is_none_or(|t| alert.last_seen_ms >= t)
            && self.until_ms.is_none_or(|t| alert.opened_at_ms <= t)
            && self.kind.is_none_or(|k| alert.kind == k)
    }
}

/// Counts of open and retained resolved alerts.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct AlertStats {
    pub open: usize,
    pub resolved_retained: usize,
    pub open_by_severity: BTreeMap<Severity, usize>,
    pub open_by_kind: BTreeMap<RuleKind, usize>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ResolveOutcome {
    Resolved(Alert),
    /// Already resolved; nothing changed and nothing was published.
    AlreadyResolved,
}
