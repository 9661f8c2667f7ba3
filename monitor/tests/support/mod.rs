#![allow(dead_code)]

use std::time::Duration;

use monitor::alerts::AlertTransition;
use monitor::config::EngineConfig;
use monitor::engine::Engine;
use monitor::market::{LiquidityEvent, MarketEvent, PriceTick, SwapEvent};
use monitor::publisher::Subscription;

/// Small engine with the periodic sweep effectively disabled; tests drive
/// sweeps explicitly through `Engine::sweep_now`.
pub fn test_config() -> EngineConfig {
    let mut cfg = EngineConfig::default();
    cfg.runtime.partitions = 4;
    cfg.runtime.queue_capacity = 256;
    cfg.lifecycle.sweep_interval_ms = 3_600_000;
    cfg
}

pub fn start(cfg: EngineConfig) -> Engine {
    Engine::start(cfg).unwrap()
}

pub fn tick(asset: &str, ts_ms: u64, price: f64) -> MarketEvent {
    MarketEvent::PriceTick(PriceTick {
        asset: asset.into(),
        price,
        ts_ms,
        source: "test".into(),
    })
}

pub fn swap(pool: &str, ts_ms: u64, amount_in: f64, amount_out: f64) -> MarketEvent {
    MarketEvent::Swap(SwapEvent {
        pool: pool.into(),
        token_in: "ETH".into(),
        token_out: "USDC".into(),
        amount_in,
        amount_out,
        ts_ms,
    })
}

pub fn liquidity(pool: &str, ts_ms: u64, reserve: f64) -> MarketEvent {
    MarketEvent::Liquidity(LiquidityEvent {
        pool: pool.into(),
        reserve0: reserve,
        reserve1: reserve,
        ts_ms,
    })
}

/// Polls `cond` until it holds or two seconds pass.
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !cond() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Everything still buffered on a finished subscription.
pub fn drain(sub: &mut Subscription<AlertTransition>) -> Vec<AlertTransition> {
    std::iter::from_fn(|| sub.try_recv()).collect()
}
