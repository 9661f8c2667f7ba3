use std::collections::{BTreeMap, VecDeque};

use super::rolling_window::RollingWindow;
use crate::market::{LiquidityEvent, SwapEvent};

/// Rolling per-pool record: bucketed swap volume, liquidity samples and a
/// bounded log of recent swaps.
#[derive(Clone, Debug)]
pub struct PoolState {
    /// Volume per bucket index (`ts_ms / bucket_ms`).
    volume: BTreeMap<u64, f64>,
    bucket_ms: u64,
    retention_ms: u64,

    /// Constant-product liquidity `sqrt(reserve0 * reserve1)` over time.
    liquidity: RollingWindow<f64>,

    recent_swaps: VecDeque<SwapEvent>,
    recent_cap: usize,

    last_seen_ms: Option<u64>,
}

impl PoolState {
    pub fn new(bucket_ms: u64, retention_ms: u64, recent_cap: usize) -> Self {
        Self {
            volume: BTreeMap::new(),
            bucket_ms: bucket_ms.max(1),
            retention_ms,
            liquidity: RollingWindow::new(retention_ms),
            recent_swaps: VecDeque::new(),
            recent_cap,
            last_seen_ms: None,
        }
    }

    fn observe(&mut self, ts_ms: u64) -> bool {
        let is_latest = self.last_seen_ms.is_none_or(|last| ts_ms >= last);
        if is_latest {
            self.last_seen_ms = Some(ts_ms);
        }
        is_latest
    }

    pub(crate) fn apply_swap(&mut self, swap: &SwapEvent) -> bool {
        let is_latest = self.observe(swap.ts_ms);

        *self.volume.entry(swap.ts_ms / self.bucket_ms).or_default() += swap.amount_in;
        self.evict_buckets();

        let idx = self
            .recent_swaps
            .partition_point(|s| s.ts_ms <= swap.ts_ms);
        self.recent_swaps.insert(idx, swap.clone());
        while self.recent_swaps.len() > self.recent_cap {
            self.recent_swaps.pop_front();
        }

        is_latest
    }

    pub(crate) fn apply_liquidity(&mut self, ev: &LiquidityEvent) -> bool {
        let is_latest = self.observe(ev.ts_ms);
        self.liquidity
            .insert(ev.ts_ms, (ev.reserve0 * ev.reserve1).sqrt());
        self.evict_buckets();
        is_latest
    }

    fn evict_buckets(&mut self) {
        let Some(latest) = self.last_seen_ms else {
            return;
        };
        let min_bucket = latest.saturating_sub(self.retention_ms) / self.bucket_ms;
        self.volume = self.volume.split_off(&min_bucket);
    }

    /// Bucket holding the latest applied event.
    pub fn current_bucket(&self) -> Option<u64> {
        self.last_seen_ms.map(|ts| ts / self.bucket_ms)
    }

    /// Earliest bucket still retained.
    pub fn first_bucket(&self) -> Option<u64> {
        self.volume.keys().next().copied()
    }

    pub fn bucket_volume(&self, bucket: u64) -> f64 {
        self.volume.get(&bucket).copied().unwrap_or(0.0)
    }

    pub fn volume_buckets(&self) -> &BTreeMap<u64, f64> {
        &self.volume
    }

    pub fn bucket_ms(&self) -> u64 {
        self.bucket_ms
    }

    pub fn liquidity(&self) -> &RollingWindow<f64> {
        &self.liquidity
    }

    pub fn last_seen_ms(&self) -> Option<u64> {
        self.last_seen_ms
    }

    /// Up to `limit` swaps, newest first.
    pub fn recent_swaps(&self, limit: usize) -> Vec<SwapEvent> {
        self.recent_swaps.iter().rev().take(limit).cloned().collect()
    }
}
