use serde::Serialize;

use super::rolling_window::{RollingWindow, TimedValue};

/// One point of an asset's price history, as served to dashboards.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct PricePoint {
    pub ts_ms: u64,
    pub price: f64,
}

/// Rolling per-asset record.
///
/// Only the state store mutates it; detectors see it through shared borrows.
#[derive(Clone, Debug)]
pub struct AssetState {
    prices: RollingWindow<f64>,
    /// Trailing mean of every retained sample except the newest.
    baseline: Option<f64>,
    last_seen_ms: Option<u64>,
}

impl AssetState {
    pub fn new(retention_ms: u64) -> Self {
        Self {
            prices: RollingWindow::new(retention_ms),
            baseline: None,
            last_seen_ms: None,
        }
    }

    /// Records a price sample. Returns whether it is the latest seen for the
    /// asset, which is what makes it eligible for rule evaluation.
    pub(crate) fn apply_price(&mut self, ts_ms: u64, price: f64) -> bool {
        let is_latest = self.last_seen_ms.is_none_or(|last| ts_ms >= last);
        if is_latest {
            self.last_seen_ms = Some(ts_ms);
        }

        self.prices.insert(ts_ms, price);
        self.recompute_baseline();
        is_latest
    }

    fn recompute_baseline(&mut self) {
        let n = self.prices.len();
        if n < 2 {
            self.baseline = None;
            return;
        }

        let sum: f64 = self.prices.iter().take(n - 1).map(|s| s.value).sum();
        self.baseline = Some(sum / (n - 1) as f64);
    }

    pub fn latest_price(&self) -> Option<&TimedValue<f64>> {
        self.prices.latest()
    }

    pub fn baseline(&self) -> Option<f64> {
        self.baseline
    }

    pub fn last_seen_ms(&self) -> Option<u64> {
        self.last_seen_ms
    }

    pub fn prices(&self) -> &RollingWindow<f64> {
        &self.prices
    }

    /// Samples within `horizon_ms` of the newest one, oldest first.
    pub fn history(&self, horizon_ms: u64) -> Vec<PricePoint> {
        let Some(newest) = self.prices.newest_ts() else {
            return Vec::new();
        };

        self.prices
            .since(newest.saturating_sub(horizon_ms))
            .map(|s| PricePoint {
                ts_ms: s.ts_ms,
                price: s.value,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn baseline_excludes_newest_sample() {
        let mut a = AssetState::new(10_000);
        a.apply_price(1, 1.0);
        assert_eq!(a.baseline(), None);

        a.apply_price(2, 3.0);
        assert_eq!(a.baseline(), Some(1.0));

        a.apply_price(3, 100.0);
        assert_eq!(a.baseline(), Some(2.0));
    }

    #[test]
    fn late_sample_is_recorded_but_not_latest() {
        let mut a = AssetState::new(10_000);
        assert!(a.apply_price(10, 1.0));
        assert!(a.apply_price(30, 1.0));
        assert!(!a.apply_price(20, 0.5));

        assert_eq!(a.last_seen_ms(), Some(30));
        assert_eq!(a.prices().len(), 3);
        assert_eq!(a.latest_price().map(|s| s.ts_ms), Some(30));
    }

    #[test]
    fn equal_timestamp_counts_as_latest() {
        let mut a = AssetState::new(10_000);
        assert!(a.apply_price(10, 1.0));
        assert!(a.apply_price(10, 1.1));
    }

    #[test]
    fn history_respects_horizon() {
        let mut a = AssetState::new(10_000);
        for ts in [100, 200, 300, 400] {
            a.apply_price(ts, ts as f64);
        }
        let h = a.history(150);
        assert_eq!(
            h.iter().map(|p| p.ts_ms).collect::<Vec<_>>(),
            vec![300, 400]
        );
    }
}
