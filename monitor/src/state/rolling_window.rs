use std::collections::VecDeque;

/// A timestamped value used inside the rolling window
#[derive(Clone, Debug, PartialEq)]
pub struct TimedValue<T> {
    pub ts_ms: u64,
    pub value: T,
}

/// Time-ordered window bounded by age relative to its newest sample.
///
/// Samples may be inserted out of order; they are placed at their timestamp
/// position so the window contents depend only on the set of samples applied,
/// not on arrival order. Age is measured against the newest timestamp held,
/// never against wall clock.
#[derive(Clone, Debug)]
pub struct RollingWindow<T> {
    values: VecDeque<TimedValue<T>>,
    max_age_ms: u64,
}

impl<T> RollingWindow<T> {
    pub fn new(max_age_ms: u64) -> Self {
        Self {
            values: VecDeque::new(),
            max_age_ms,
        }
    }

    /// Inserts a sample at its timestamp position.
    ///
    /// Equal timestamps keep arrival order. Returns `false` when the sample is
    /// already beyond the horizon of the newest sample and was discarded.
    pub fn insert(&mut self, ts_ms: u64, value: T) -> bool {
        if let Some(newest) = self.newest_ts() {
            if newest.saturating_sub(ts_ms) > self.max_age_ms {
                return false;
            }
        }

        let idx = self.values.partition_point(|v| v.ts_ms <= ts_ms);
        self.values.insert(idx, TimedValue { ts_ms, value });
        self.evict_old();
        true
    }

    /// Evict values older than max_age
    fn evict_old(&mut self) {
        let Some(now_ms) = self.newest_ts() else {
            return;
        };

        while let Some(front) = self.values.front() {
            if now_ms - front.ts_ms > self.max_age_ms {
                self.values.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn latest(&self) -> Option<&TimedValue<T>> {
        self.values.back()
    }

    pub fn oldest(&self) -> Option<&TimedValue<T>> {
        self.values.front()
    }

    pub fn newest_ts(&self) -> Option<u64> {
        self.values.back().map(|v| v.ts_ms)
    }

    /// Samples with `ts_ms >= from_ms`, oldest first.
    pub fn since(&self, from_ms: u64) -> impl DoubleEndedIterator<Item = &TimedValue<T>> {
        let start = self.values.partition_point(|v| v.ts_ms < from_ms);
        self.values.range(start..)
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &TimedValue<T>> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn max_age_ms(&self) -> u64 {
        self.max_age_ms
    }
}
