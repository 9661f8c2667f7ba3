//! Rolling per-asset and per-pool state.
//!
//! The store is sharded with the same [`Partitioner`] as the ingress queues,
//! so each shard is written by exactly one partition worker. Readers
//! (queries, dashboards) take the shard's read lock.

pub mod asset;
pub mod pool;
pub mod rolling_window;

use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::{debug, instrument};

pub use asset::{AssetState, PricePoint};
pub use pool::PoolState;

use crate::config::StateConfig;
use crate::error::EngineError;
use crate::market::{MarketEvent, PriceTick, SwapEvent};
use crate::partition::Partitioner;
use crate::rules::EPSILON;

/// A key rules are evaluated against.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Subject {
    Asset(String),
    Pool(String),
    Protocol(String),
}

impl Subject {
    pub fn key(&self) -> &str {
        match self {
            Subject::Asset(k) | Subject::Pool(k) | Subject::Protocol(k) => k,
        }
    }
}

/// Outcome of applying one event.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Applied {
    /// Subjects whose latest state changed and should be evaluated.
    pub affected: Vec<Subject>,
    /// The event was older than the latest applied for its key.
    pub stale: bool,
    /// Price ticks implied by a swap through an oracle pool.
    pub derived: Vec<PriceTick>,
}

#[derive(Default)]
struct StateShard {
    assets: HashMap<String, AssetState>,
    pools: HashMap<String, PoolState>,
    /// Latest announcement time per protocol.
    protocols: HashMap<String, u64>,
}

pub struct RollingStateStore {
    shards: Vec<RwLock<StateShard>>,
    partitioner: Partitioner,
    config: StateConfig,
}

impl RollingStateStore {
    pub fn new(config: StateConfig, partitioner: Partitioner) -> Self {
        let shards = (0..partitioner.count())
            .map(|_| RwLock::new(StateShard::default()))
            .collect();

        Self {
            shards,
            partitioner,
            config,
        }
    }

    fn shard(&self, key: &str) -> &RwLock<StateShard> {
        &self.shards[self.partitioner.partition(key)]
    }

    /// Applies an event to the state of its subject.
    ///
    /// Out-of-order events are merged into history but only an event at or
    /// after the key's latest timestamp reports the key as affected.
    #[instrument(level = "trace", skip_all, fields(subject = event.subject_key()))]
    pub fn apply(&self, event: &MarketEvent) -> Result<Applied, EngineError> {
        event.validate()?;

        let applied = match event {
            MarketEvent::PriceTick(tick) => {
                let latest = self
                    .shard(&tick.asset)
                    .write()
                    .assets
                    .entry(tick.asset.clone())
                    .or_insert_with(|| AssetState::new(self.config.retention_ms))
                    .apply_price(tick.ts_ms, tick.price);

                Applied::for_subject(Subject::Asset(tick.asset.clone()), latest)
            }
            MarketEvent::Swap(swap) => {
                let latest = self
                    .with_pool_mut(&swap.pool, |p| p.apply_swap(swap));

                let mut applied = Applied::for_subject(Subject::Pool(swap.pool.clone()), latest);
                applied.derived = self.derive_oracle_ticks(swap);
                applied
            }
            MarketEvent::Liquidity(ev) => {
                let latest = self.with_pool_mut(&ev.pool, |p| p.apply_liquidity(ev));
                Applied::for_subject(Subject::Pool(ev.pool.clone()), latest)
            }
            // Announcements carry no rolling state; each one at or after the
            // protocol's latest is news.
            MarketEvent::ProtocolUpdate(ev) => {
                let mut shard = self.shard(&ev.protocol).write();
                let last = shard.protocols.entry(ev.protocol.clone()).or_insert(ev.ts_ms);
                let latest = ev.ts_ms >= *last;
                if latest {
                    *last = ev.ts_ms;
                }
                Applied::for_subject(Subject::Protocol(ev.protocol.clone()), latest)
            }
        };

        if applied.stale {
            debug!(ts_ms = event.ts_ms(), "out-of-order event merged into history");
        }
        Ok(applied)
    }

    fn with_pool_mut<R>(&self, pool: &str, f: impl FnOnce(&mut PoolState) -> R) -> R {
        let mut shard = self.shard(pool).write();
        let state = shard.pools.entry(pool.to_string()).or_insert_with(|| {
            PoolState::new(
                self.config.volume_bucket_ms,
                self.config.retention_ms,
                self.config.recent_swaps_cap,
            )
        });
        f(state)
    }

    /// Implied prices for the tokens this pool is an oracle for, quoted in
    /// units of the other token.
    fn derive_oracle_ticks(&self, swap: &SwapEvent) -> Vec<PriceTick> {
        let Some(assets) = self.config.oracle_pools.get(&swap.pool) else {
            return Vec::new();
        };

        let source = format!("oracle:{}", swap.pool);
        assets
            .iter()
            .filter_map(|asset| {
                let price = if *asset == swap.token_in {
                    swap.amount_out / swap.amount_in
                } else if *asset == swap.token_out && swap.amount_out > EPSILON {
                    swap.amount_in / swap.amount_out
                } else {
                    return None;
                };

                (price.is_finite() && price > 0.0).then(|| PriceTick {
                    asset: asset.clone(),
                    price,
                    ts_ms: swap.ts_ms,
                    source: source.clone(),
                })
            })
            .collect()
    }

    /// Runs `f` against an asset's state under the shard read lock.
    pub fn with_asset<R>(&self, asset: &str, f: impl FnOnce(&AssetState) -> R) -> Option<R> {
        self.shard(asset).read().assets.get(asset).map(f)
    }

    /// Runs `f` against a pool's state under the shard read lock.
    pub fn with_pool<R>(&self, pool: &str, f: impl FnOnce(&PoolState) -> R) -> Option<R> {
        self.shard(pool).read().pools.get(pool).map(f)
    }

    /// Price samples within `horizon_ms` of the asset's newest sample.
    pub fn price_history(&self, asset: &str, horizon_ms: u64) -> Vec<PricePoint> {
        self.with_asset(asset, |a| a.history(horizon_ms))
            .unwrap_or_default()
    }

    /// Up to `limit` swaps for the pool, newest first.
    pub fn recent_swaps(&self, pool: &str, limit: usize) -> Vec<SwapEvent> {
        self.with_pool(pool, |p| p.recent_swaps(limit))
            .unwrap_or_default()
    }
}

impl Applied {
    fn for_subject(subject: Subject, latest: bool) -> Self {
        Self {
            affected: if latest { vec![subject] } else { Vec::new() },
            stale: !latest,
            derived: Vec::new(),
        }
    }
}
