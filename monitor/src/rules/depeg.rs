use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::{EPSILON, Finding, RuleKind, SeverityBands};
use crate::state::AssetState;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DepegConfig {
    /// Peg value per pegged asset. Assets missing here are never checked.
    pub pegs: HashMap<String, f64>,
    pub bands: SeverityBands,
}

impl Default for DepegConfig {
    fn default() -> Self {
        let pegs = ["USDC", "USDT", "DAI", "FRAX"]
            .into_iter()
            .map(|a| (a.to_string(), 1.0))
            .collect();

        Self {
            pegs,
            bands: SeverityBands::new(0.05, 0.10, Some(0.20)),
        }
    }
}

/// Relative deviation of the latest price from the asset's peg.
pub fn evaluate(asset: &str, state: &AssetState, cfg: &DepegConfig) -> Option<Finding> {
    let peg = *cfg.pegs.get(asset)?;
    if peg.abs() < EPSILON {
        return None;
    }

    let latest = state.latest_price()?;
    let deviation = (latest.value - peg).abs() / peg;
    let (severity, threshold) = cfg.bands.classify(deviation)?;

    Some(Finding {
        rule: RuleKind::Depeg,
        subject_key: asset.to_string(),
        severity,
        metric: "peg_deviation".into(),
        threshold,
        observed: deviation,
        ts_ms: latest.ts_ms,
        message: format!(
            "{asset} trading at {:.4} against a peg of {peg:.4} ({:.2}% off)",
            latest.value,
            deviation * 100.0
        ),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::Severity;

    fn asset_at(prices: &[(u64, f64)]) -> AssetState {
        let mut a = AssetState::new(86_400_000);
        for &(ts, p) in prices {
            a.apply_price(ts, p);
        }
        a
    }

    #[test]
    fn stable_price_raises_nothing() {
        let cfg = DepegConfig::default();
        let a = asset_at(&[(1, 1.00), (2, 0.97)]);
        assert!(evaluate("USDC", &a, &cfg).is_none());
    }

    #[test]
    fn six_percent_off_is_medium() {
        let cfg = DepegConfig::default();
        let a = asset_at(&[(1, 1.00), (2, 0.97), (3, 0.94)]);
        let f = evaluate("USDC", &a, &cfg).unwrap();
        assert_eq!(f.severity, Severity::Medium);
        assert_eq!(f.threshold, 0.05);
        assert_eq!(f.ts_ms, 3);
        assert!((f.observed - 0.06).abs() < 1e-9);
    }

    #[test]
    fn deviation_above_peg_counts_too() {
        let cfg = DepegConfig::default();
        let a = asset_at(&[(1, 1.25)]);
        let f = evaluate("DAI", &a, &cfg).unwrap();
        assert_eq!(f.severity, Severity::Critical);
    }

    #[test]
    fn unpegged_assets_are_skipped() {
        let cfg = DepegConfig::default();
        let a = asset_at(&[(1, 0.5)]);
        assert!(evaluate("ETH", &a, &cfg).is_none());
    }

    #[test]
    fn evaluates_the_latest_sample_not_the_last_arrival() {
        let cfg = DepegConfig::default();
        let a = asset_at(&[(10, 1.0), (30, 1.0), (20, 0.5)]);
        assert!(evaluate("USDT", &a, &cfg).is_none());
    }
}
