use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::rules::RuleKind;
use crate::rules::depeg::DepegConfig;
use crate::rules::liquidity::LiquidityDrainConfig;
use crate::rules::price_move::PriceMovementConfig;
use crate::rules::protocol::ProtocolUpdateConfig;
use crate::rules::volume::VolumeSpikeConfig;

const MINUTE_MS: u64 = 60 * 1000;
const HOUR_MS: u64 = 60 * MINUTE_MS;
const DAY_MS: u64 = 24 * HOUR_MS;

/// Engine configuration. Immutable once the engine starts.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub state: StateConfig,
    pub rules: RulesConfig,
    pub lifecycle: LifecycleConfig,
    pub runtime: RuntimeConfig,

    /// Connection string for the persistence sink.
    pub database_url: Option<String>,
}

// =========================
// State configuration
// =========================
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// How far behind the latest sample of a key history is kept.
    ///
    /// Eviction is relative to event time, never wall clock, so replays
    /// behave exactly like live traffic.
    pub retention_ms: u64,

    /// Width of a swap volume bucket.
    pub volume_bucket_ms: u64,

    /// Swaps kept per pool for the recent-swaps query.
    pub recent_swaps_cap: usize,

    /// Pools that act as the primary price oracle for some of their tokens.
    ///
    /// A swap through such a pool derives a price tick for each listed
    /// token. Derived ticks re-enter the bus on the asset's own partition.
    pub oracle_pools: HashMap<String, Vec<String>>,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            retention_ms: 24 * HOUR_MS,
            volume_bucket_ms: 5 * MINUTE_MS,
            recent_swaps_cap: 200,
            oracle_pools: HashMap::new(),
        }
    }
}

// =========================
// Rule configuration
// =========================
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RulesConfig {
    pub depeg: DepegConfig,
    pub volume_spike: VolumeSpikeConfig,
    pub price_movement: PriceMovementConfig,
    pub protocol_update: ProtocolUpdateConfig,
    pub liquidity_drain: LiquidityDrainConfig,

    /// Rules that are never evaluated.
    pub disabled: Vec<RuleKind>,
}

// =========================
// Alert lifecycle configuration
// =========================
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// An open alert with no finding for longer than this (in event time)
    /// is resolved by the sweep.
    pub grace_ms: u64,

    /// Wall-clock cadence of the auto-resolution sweep.
    pub sweep_interval_ms: u64,

    /// Resolved alerts retained for lookups. Older ones are forgotten but
    /// their ids stay known, so resolving them again is still a no-op.
    pub resolved_history_cap: usize,

    /// Forgotten ids remembered per shard. Past this the oldest id is
    /// dropped and resolving it reports `NotFound`.
    pub tombstone_cap: usize,

    /// Resolved alerts older than this (wall clock) are purged from the
    /// persistence sink.
    pub data_retention_ms: u64,

    /// Wall-clock cadence of the persistence purge.
    pub cleanup_interval_ms: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            grace_ms: 30 * MINUTE_MS,
            sweep_interval_ms: 5_000,
            resolved_history_cap: 10_000,
            tombstone_cap: 100_000,
            data_retention_ms: 30 * DAY_MS,
            cleanup_interval_ms: HOUR_MS,
        }
    }
}

// =========================
// Runtime configuration
// =========================
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Number of partition workers. Fixed for the process lifetime.
    pub partitions: usize,

    /// Capacity of each partition's ingress queue.
    ///
    /// Acts as backpressure: a full queue rejects the event instead of
    /// blocking the producer.
    pub queue_capacity: usize,

    /// Per-subscriber buffer of the transition and event feeds.
    pub subscriber_buffer: usize,

    /// Upper bound on draining workers and flushing sinks at shutdown.
    pub shutdown_timeout_ms: u64,

    /// Delivery attempts per transition before a sink gives up on it.
    pub sink_max_attempts: u32,

    /// Backoff before the first redelivery; doubles on each further attempt.
    pub sink_backoff_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            partitions: 8,
            queue_capacity: 1024,
            subscriber_buffer: 256,
            shutdown_timeout_ms: 5_000,
            sink_max_attempts: 5,
            sink_backoff_ms: 50,
        }
    }
}

impl EngineConfig {
    /// Reads a JSON config file. Missing sections take their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing config file {}", path.display()))
    }

    /// Defaults, then `MONITOR_CONFIG` (a JSON file) if set, then scalar
    /// environment overrides.
    pub fn from_env() -> anyhow::Result<Self> {
        let mut cfg = match std::env::var("MONITOR_CONFIG") {
            Ok(path) => Self::from_file(path)?,
            Err(_) => Self::default(),
        };

        if let Some(v) = env_parse("MONITOR_PARTITIONS")? {
            cfg.runtime.partitions = v;
        }
        if let Some(v) = env_parse("MONITOR_QUEUE_CAPACITY")? {
            cfg.runtime.queue_capacity = v;
        }
        if let Some(v) = env_parse("MONITOR_GRACE_MS")? {
            cfg.lifecycle.grace_ms = v;
        }
        if let Some(v) = env_parse("MONITOR_RETENTION_MS")? {
            cfg.state.retention_ms = v;
        }
        if let Ok(url) = std::env::var("DATABASE_URL") {
            cfg.database_url = Some(url);
        }

        Ok(cfg)
    }

    /// Rejects configurations the engine cannot run with.
    pub fn validate(&self) -> Result<(), EngineError> {
        let nonzero = |name: &str, v: u64| {
            if v == 0 {
                return Err(EngineError::config(format!("{name} must be greater than zero")));
            }
            Ok(())
        };

        nonzero("state.retention_ms", self.state.retention_ms)?;
        nonzero("state.volume_bucket_ms", self.state.volume_bucket_ms)?;
        nonzero("state.recent_swaps_cap", self.state.recent_swaps_cap as u64)?;
        nonzero("lifecycle.sweep_interval_ms", self.lifecycle.sweep_interval_ms)?;
        nonzero("lifecycle.tombstone_cap", self.lifecycle.tombstone_cap as u64)?;
        nonzero("lifecycle.data_retention_ms", self.lifecycle.data_retention_ms)?;
        nonzero("lifecycle.cleanup_interval_ms", self.lifecycle.cleanup_interval_ms)?;
        nonzero("runtime.partitions", self.runtime.partitions as u64)?;
        nonzero("runtime.queue_capacity", self.runtime.queue_capacity as u64)?;
        nonzero("runtime.subscriber_buffer", self.runtime.subscriber_buffer as u64)?;
        nonzero("runtime.shutdown_timeout_ms", self.runtime.shutdown_timeout_ms)?;
        nonzero("runtime.sink_max_attempts", self.runtime.sink_max_attempts as u64)?;

        for (pool, assets) in &self.state.oracle_pools {
            if assets.is_empty() {
                return Err(EngineError::config(format!(
                    "state.oracle_pools.{pool} lists no assets"
                )));
            }
        }

        let rules = &self.rules;
        rules.depeg.bands.validate("rules.depeg.bands")?;
        for (asset, peg) in &rules.depeg.pegs {
            if !peg.is_finite() || *peg <= 0.0 {
                return Err(EngineError::config(format!(
                    "rules.depeg.pegs.{asset} must be positive, got {peg}"
                )));
            }
        }

        rules.volume_spike.bands.validate("rules.volume_spike.bands")?;
        nonzero(
            "rules.volume_spike.baseline_buckets",
            rules.volume_spike.baseline_buckets as u64,
        )?;
        if rules.volume_spike.min_baseline_buckets > rules.volume_spike.baseline_buckets {
            return Err(EngineError::config(format!(
                "rules.volume_spike.min_baseline_buckets ({}) exceeds baseline_buckets ({})",
                rules.volume_spike.min_baseline_buckets, rules.volume_spike.baseline_buckets
            )));
        }

        let pm = &rules.price_movement;
        pm.bands.validate("rules.price_movement.bands")?;
        nonzero("rules.price_movement.window_ms", pm.window_ms)?;
        if pm.min_span_ms > pm.window_ms {
            return Err(EngineError::config(format!(
                "rules.price_movement.min_span_ms ({}) exceeds window_ms ({})",
                pm.min_span_ms, pm.window_ms
            )));
        }
        if pm.window_ms > self.state.retention_ms {
            return Err(EngineError::config(format!(
                "rules.price_movement.window_ms ({}) exceeds state.retention_ms ({})",
                pm.window_ms, self.state.retention_ms
            )));
        }

        rules
            .liquidity_drain
            .bands
            .validate("rules.liquidity_drain.bands")?;

        Ok(())
    }
}

fn env_parse<T>(key: &str) -> anyhow::Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .with_context(|| format!("{key}={raw} is not valid")),
        Err(_) => Ok(None),
    }
}
