use serde::{Deserialize, Serialize};

use super::{Finding, RuleKind, Severity};
use crate::market::ProtocolUpdateEvent;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolUpdateConfig {
    pub severity: Severity,
}

impl Default for ProtocolUpdateConfig {
    fn default() -> Self {
        Self {
            severity: Severity::Medium,
        }
    }
}

/// Every protocol update is surfaced as-is.
pub fn evaluate(ev: &ProtocolUpdateEvent, cfg: &ProtocolUpdateConfig) -> Finding {
    Finding {
        rule: RuleKind::ProtocolUpdate,
        subject_key: ev.protocol.clone(),
        severity: cfg.severity,
        metric: "protocol_update".into(),
        threshold: 0.0,
        observed: 1.0,
        ts_ms: ev.ts_ms,
        message: format!("{}: {}", ev.protocol, ev.description),
    }
}
