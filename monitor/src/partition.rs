use std::hash::{DefaultHasher, Hash, Hasher};

/// Fixed hash partitioning of subject keys.
///
/// Every component that shards by key (ingress queues, state shards, alert
/// shards) uses the same partitioner, so one key always lands on one worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Partitioner {
    partitions: usize,
}

impl Partitioner {
    pub fn new(partitions: usize) -> Self {
        Self {
            partitions: partitions.max(1),
        }
    }

    pub fn count(&self) -> usize {
        self.partitions
    }

    pub fn partition(&self, key: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.partitions as u64) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_key_always_maps_to_same_partition() {
        let p = Partitioner::new(8);
        let first = p.partition("USDC");
        for _ in 0..100 {
            assert_eq!(p.partition("USDC"), first);
        }
        assert!(first < 8);
    }

    #[test]
    fn zero_partitions_is_clamped() {
        let p = Partitioner::new(0);
        assert_eq!(p.count(), 1);
        assert_eq!(p.partition("anything"), 0);
    }
}
