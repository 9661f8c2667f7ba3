//! Synthetic market feed standing in for a real data source.
//!
//! Produces a jittered random walk over a small fixed universe (one volatile
//! asset, one stablecoin, one pool, one protocol) with occasional stress:
//! depeg excursions, volume bursts, liquidity pulls and late deliveries.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::engine::EventBus;
use crate::error::EngineError;
use crate::market::{
    LiquidityEvent, MarketEvent, PriceTick, ProtocolUpdateEvent, SwapEvent,
};

const POOL: &str = "ETH/USDC";

pub struct SimulatedFeed {
    rng: StdRng,
    clock_ms: u64,
    step_ms: u64,
    eth: f64,
    usdc: f64,
    reserve_eth: f64,
}

impl SimulatedFeed {
    pub fn new(seed: u64, start_ms: u64, step_ms: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            clock_ms: start_ms,
            step_ms: step_ms.max(1),
            eth: 2_000.0,
            usdc: 1.0,
            reserve_eth: 5_000.0,
        }
    }

    /// Advances event time by one step and returns that step's events.
    pub fn next_batch(&mut self) -> Vec<MarketEvent> {
        let jitter = self.rng.gen_range(0..=self.step_ms / 4);
        self.clock_ms += self.step_ms + jitter;
        let ts_ms = self.clock_ms;
        let mut out = Vec::with_capacity(5);

        self.eth *= 1.0 + self.rng.gen_range(-0.004..0.004);
        out.push(tick("ETH", self.eth, ts_ms));

        // Stablecoin hugs its peg, with a rare excursion.
        self.usdc = if self.rng.gen_bool(0.02) {
            self.rng.gen_range(0.90..0.96)
        } else {
            1.0 + self.rng.gen_range(-0.002..0.002)
        };
        out.push(tick("USDC", self.usdc, ts_ms));

        let burst = if self.rng.gen_bool(0.03) { 8.0 } else { 1.0 };
        let amount_in = self.rng.gen_range(0.5..5.0) * burst;
        out.push(MarketEvent::Swap(SwapEvent {
            pool: POOL.into(),
            token_in: "ETH".into(),
            token_out: "USDC".into(),
            amount_in,
            amount_out: amount_in * self.eth * 0.997,
            ts_ms,
        }));

        if self.rng.gen_bool(0.02) {
            self.reserve_eth *= 0.5;
        } else {
            self.reserve_eth = (self.reserve_eth * 1.01).min(5_000.0);
        }
        out.push(MarketEvent::Liquidity(LiquidityEvent {
            pool: POOL.into(),
            reserve0: self.reserve_eth,
            reserve1: self.reserve_eth * self.eth,
            ts_ms,
        }));

        if self.rng.gen_bool(0.005) {
            out.push(MarketEvent::ProtocolUpdate(ProtocolUpdateEvent {
                protocol: "uniswap-v3".into(),
                description: "fee tier parameters updated".into(),
                ts_ms,
            }));
        }

        // Late delivery from an earlier step.
        if self.rng.gen_bool(0.05) {
            let late = ts_ms.saturating_sub(self.step_ms * 2);
            out.push(tick("ETH", self.eth * 0.999, late));
        }

        out
    }
}

fn tick(asset: &str, price: f64, ts_ms: u64) -> MarketEvent {
    MarketEvent::PriceTick(PriceTick {
        asset: asset.into(),
        price,
        ts_ms,
        source: "simulated".into(),
    })
}

/// Pushes feed batches into the bus every `every` until shutdown.
/// Returns the number of events accepted.
pub async fn run_feed(
    bus: EventBus,
    mut feed: SimulatedFeed,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> usize {
    let mut ticker = tokio::time::interval(every);
    let mut accepted = 0usize;

    loop {
        tokio::select! {
            biased;

            _ = shutdown.changed() => break,

            _ = ticker.tick() => {
                for event in feed.next_batch() {
                    match bus.submit(event) {
                        Ok(()) => accepted += 1,
                        Err(EngineError::ShuttingDown) => return accepted,
                        Err(e) => debug!(error = %e, "feed event not accepted"),
                    }
                }
            }
        }
    }

    info!(component = "feed", accepted, "simulated feed stopped");
    accepted
}
