use serde::{Deserialize, Serialize};

use super::{EPSILON, Finding, RuleKind, SeverityBands};
use crate::state::AssetState;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriceMovementConfig {
    pub window_ms: u64,
    /// Minimum distance between the oldest and newest sample in the window.
    pub min_span_ms: u64,
    pub bands: SeverityBands,
}

impl Default for PriceMovementConfig {
    fn default() -> Self {
        Self {
            window_ms: 24 * 60 * 60 * 1000,
            min_span_ms: 60 * 60 * 1000,
            bands: SeverityBands::new(0.05, 0.10, Some(0.20)),
        }
    }
}

/// Relative change between the oldest and newest sample of the window.
pub fn evaluate(asset: &str, state: &AssetState, cfg: &PriceMovementConfig) -> Option<Finding> {
    let latest = state.latest_price()?;
    let oldest = state
        .prices()
        .since(latest.ts_ms.saturating_sub(cfg.window_ms))
        .next()?;

    if latest.ts_ms - oldest.ts_ms < cfg.min_span_ms || latest.ts_ms == oldest.ts_ms {
        return None;
    }
    if oldest.value.abs() < EPSILON {
        return None;
    }

    let change = (latest.value - oldest.value).abs() / oldest.value;
    let (severity, threshold) = cfg.bands.classify(change)?;
    let direction = if latest.value >= oldest.value { "up" } else { "down" };

    Some(Finding {
        rule: RuleKind::PriceMovement,
        subject_key: asset.to_string(),
        severity,
        metric: "price_change".into(),
        threshold,
        observed: change,
        ts_ms: latest.ts_ms,
        message: format!(
            "{asset} moved {direction} {:.2}% ({:.4} -> {:.4}) over {}s",
            change * 100.0,
            oldest.value,
            latest.value,
            (latest.ts_ms - oldest.ts_ms) / 1000
        ),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::Severity;

    const HOUR: u64 = 3_600_000;

    fn asset(prices: &[(u64, f64)]) -> AssetState {
        let mut a = AssetState::new(48 * HOUR);
        for &(ts, p) in prices {
            a.apply_price(ts, p);
        }
        a
    }

    #[test]
    fn twelve_percent_drop_is_high() {
        let a = asset(&[(0, 100.0), (2 * HOUR, 88.0)]);
        let f = evaluate("ETH", &a, &PriceMovementConfig::default()).unwrap();
        assert_eq!(f.severity, Severity::High);
        assert!(f.message.contains("down"));
    }

    #[test]
    fn short_span_is_insufficient() {
        let a = asset(&[(0, 100.0), (HOUR / 2, 50.0)]);
        assert!(evaluate("ETH", &a, &PriceMovementConfig::default()).is_none());
    }

    #[test]
    fn single_sample_is_insufficient() {
        let a = asset(&[(5 * HOUR, 100.0)]);
        assert!(evaluate("ETH", &a, &PriceMovementConfig::default()).is_none());
    }

    #[test]
    fn samples_outside_the_window_are_ignored() {
        // The 50.0 sample is 30h old and falls outside the 24h window.
        let a = asset(&[(0, 50.0), (10 * HOUR, 100.0), (30 * HOUR, 101.0)]);
        assert!(evaluate("ETH", &a, &PriceMovementConfig::default()).is_none());
    }
}
