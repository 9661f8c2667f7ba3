use serde::{Deserialize, Serialize};

use super::{EPSILON, Finding, RuleKind, SeverityBands};
use crate::state::PoolState;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiquidityDrainConfig {
    /// Prior liquidity samples needed before a drop is judged.
    pub min_samples: usize,
    pub bands: SeverityBands,
}

impl Default for LiquidityDrainConfig {
    fn default() -> Self {
        Self {
            min_samples: 3,
            bands: SeverityBands::new(0.10, 0.25, Some(0.50)),
        }
    }
}

/// Relative drop of the newest liquidity sample below the trailing mean.
///
/// Only judged while that sample is the pool's most recent event; once a later
/// swap has been applied the sample has already been reported.
pub fn evaluate(pool: &str, state: &PoolState, cfg: &LiquidityDrainConfig) -> Option<Finding> {
    let window = state.liquidity();
    let latest = window.latest()?;
    if state.last_seen_ms() != Some(latest.ts_ms) {
        return None;
    }

    let prior = window.len() - 1;
    if prior < cfg.min_samples.max(1) {
        return None;
    }

    let mean = window.iter().take(prior).map(|s| s.value).sum::<f64>() / prior as f64;
    if mean < EPSILON {
        return None;
    }

    let drop = (mean - latest.value) / mean;
    let (severity, threshold) = cfg.bands.classify(drop)?;

    Some(Finding {
        rule: RuleKind::LiquidityDrain,
        subject_key: pool.to_string(),
        severity,
        metric: "liquidity_drop".into(),
        threshold,
        observed: drop,
        ts_ms: latest.ts_ms,
        message: format!(
            "{pool} liquidity fell to {:.2} from a trailing mean of {mean:.2} ({:.1}% drop)",
            latest.value,
            drop * 100.0
        ),
    })
}
