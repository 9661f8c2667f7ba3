//! Anomaly detectors.
//!
//! A detector is a pure function of `(subject key, state snapshot, config)`
//! that yields at most one [`Finding`]. When several bands are crossed the
//! highest severity wins. Bands are inclusive on the lower bound and
//! exclusive on the upper bound for every detector.
//!
//! The rule set is closed: adding a detector means adding a [`RuleKind`]
//! variant and wiring its evaluator in [`RuleKind::evaluate`].

pub mod bands;
pub mod depeg;
pub mod liquidity;
pub mod price_move;
pub mod protocol;
pub mod volume;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::trace;

pub use bands::SeverityBands;

use crate::config::RulesConfig;
use crate::market::ProtocolUpdateEvent;
use crate::state::{AssetState, PoolState};

/// Denominators below this are treated as insufficient data.
pub const EPSILON: f64 = 1e-12;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            other => Err(format!("unknown severity: {other}")),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    Depeg,
    VolumeSpike,
    PriceMovement,
    ProtocolUpdate,
    LiquidityDrain,
}

impl RuleKind {
    pub const ALL: [RuleKind; 5] = [
        RuleKind::Depeg,
        RuleKind::VolumeSpike,
        RuleKind::PriceMovement,
        RuleKind::ProtocolUpdate,
        RuleKind::LiquidityDrain,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RuleKind::Depeg => "depeg",
            RuleKind::VolumeSpike => "volume_spike",
            RuleKind::PriceMovement => "price_movement",
            RuleKind::ProtocolUpdate => "protocol_update",
            RuleKind::LiquidityDrain => "liquidity_drain",
        }
    }

    /// Runs this rule against a snapshot. Rules that do not apply to the
    /// snapshot's subject type yield nothing.
    pub fn evaluate(
        &self,
        key: &str,
        snapshot: &SubjectSnapshot<'_>,
        cfg: &RulesConfig,
    ) -> Option<Finding> {
        match (self, snapshot) {
            (RuleKind::Depeg, SubjectSnapshot::Asset(a)) => depeg::evaluate(key, a, &cfg.depeg),
            (RuleKind::PriceMovement, SubjectSnapshot::Asset(a)) => {
                price_move::evaluate(key, a, &cfg.price_movement)
            }
            (RuleKind::VolumeSpike, SubjectSnapshot::Pool(p)) => {
                volume::evaluate(key, p, &cfg.volume_spike)
            }
            (RuleKind::LiquidityDrain, SubjectSnapshot::Pool(p)) => {
                liquidity::evaluate(key, p, &cfg.liquidity_drain)
            }
            (RuleKind::ProtocolUpdate, SubjectSnapshot::Protocol(ev)) => {
                Some(protocol::evaluate(ev, &cfg.protocol_update))
            }
            _ => None,
        }
    }
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuleKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RuleKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown rule kind: {s}"))
    }
}

/// Read-only view handed to detectors.
#[derive(Clone, Copy, Debug)]
pub enum SubjectSnapshot<'a> {
    Asset(&'a AssetState),
    Pool(&'a PoolState),
    Protocol(&'a ProtocolUpdateEvent),
}

/// Ephemeral output of one rule evaluation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub rule: RuleKind,
    pub subject_key: String,
    pub severity: Severity,
    pub metric: String,
    pub threshold: f64,
    pub observed: f64,
    pub ts_ms: u64,
    pub message: String,
}

/// The configured set of detectors.
pub struct RuleEngine {
    config: RulesConfig,
    rules: Vec<RuleKind>,
}

impl RuleEngine {
    pub fn new(config: RulesConfig) -> Self {
        let rules = RuleKind::ALL
            .into_iter()
            .filter(|k| !config.disabled.contains(k))
            .collect();
        Self { config, rules }
    }

    pub fn rules(&self) -> &[RuleKind] {
        &self.rules
    }

    pub fn config(&self) -> &RulesConfig {
        &self.config
    }

    /// Evaluates every enabled rule against one subject.
    pub fn evaluate(&self, key: &str, snapshot: &SubjectSnapshot<'_>) -> Vec<Finding> {
        let findings: Vec<Finding> = self
            .rules
            .iter()
            .filter_map(|rule| rule.evaluate(key, snapshot, &self.config))
            .collect();

        trace!(subject = key, findings = findings.len(), "rules evaluated");
        findings
    }
}
