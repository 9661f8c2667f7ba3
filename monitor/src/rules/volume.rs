use serde::{Deserialize, Serialize};

use super::{EPSILON, Finding, RuleKind, SeverityBands};
use crate::state::PoolState;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VolumeSpikeConfig {
    /// Bucket slots preceding the current one that form the baseline.
    pub baseline_buckets: usize,
    /// Buckets with observed volume required among those slots.
    pub min_baseline_buckets: usize,
    pub bands: SeverityBands,
}

impl Default for VolumeSpikeConfig {
    fn default() -> Self {
        Self {
            baseline_buckets: 10,
            min_baseline_buckets: 3,
            bands: SeverityBands::new(2.0, 5.0, None),
        }
    }
}

/// Current bucket volume against the mean of the preceding bucket slots.
///
/// Slots start at the first bucket the pool ever retained, so a young pool
/// is not diluted by slots that predate it. Empty slots after that count as
/// zero volume.
pub fn evaluate(pool: &str, state: &PoolState, cfg: &VolumeSpikeConfig) -> Option<Finding> {
    let current = state.current_bucket()?;
    let first = state.first_bucket()?;

    let from = current
        .saturating_sub(cfg.baseline_buckets as u64)
        .max(first);
    if from >= current {
        return None;
    }

    let observed = state
        .volume_buckets()
        .range(from..current)
        .filter(|(_, v)| **v > 0.0)
        .count();
    if observed < cfg.min_baseline_buckets.max(1) {
        return None;
    }

    let slots = (current - from) as f64;
    let total: f64 = state.volume_buckets().range(from..current).map(|(_, v)| v).sum();
    let baseline = total / slots;
    if baseline < EPSILON {
        return None;
    }

    let volume = state.bucket_volume(current);
    let ratio = volume / baseline;
    let (severity, threshold) = cfg.bands.classify(ratio)?;

    Some(Finding {
        rule: RuleKind::VolumeSpike,
        subject_key: pool.to_string(),
        severity,
        metric: "volume_ratio".into(),
        threshold,
        observed: ratio,
        ts_ms: state.last_seen_ms().unwrap_or(current * state.bucket_ms()),
        message: format!(
            "{pool} bucket volume {volume:.2} is {ratio:.2}x the trailing mean of {baseline:.2}"
        ),
    })
}
