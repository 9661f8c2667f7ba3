use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::warn;

use crate::error::EngineError;
use crate::market::MarketEvent;
use crate::metrics::{Counters, bump};
use crate::partition::Partitioner;

/// Multi-producer ingress. Cheap to clone; every clone feeds the same
/// partition queues.
///
/// Enqueue never blocks: a saturated partition rejects the event.
#[derive(Clone)]
pub struct EventBus {
    partitioner: Partitioner,
    senders: Arc<Vec<mpsc::Sender<MarketEvent>>>,
    accepting: Arc<AtomicBool>,
    counters: Counters,
}

impl EventBus {
    pub(crate) fn new(
        partitioner: Partitioner,
        senders: Vec<mpsc::Sender<MarketEvent>>,
        counters: Counters,
    ) -> Self {
        Self {
            partitioner,
            senders: Arc::new(senders),
            accepting: Arc::new(AtomicBool::new(true)),
            counters,
        }
    }

    /// Enqueues an event on its subject's partition.
    pub fn submit(&self, event: MarketEvent) -> Result<(), EngineError> {
        if !self.is_accepting() {
            return Err(EngineError::ShuttingDown);
        }

        match self.route(event) {
            Ok(_) => {
                bump(&self.counters.events_accepted);
                Ok(())
            }
            Err(e) => {
                if let EngineError::Rejected { partition } = e {
                    bump(&self.counters.events_rejected);
                    warn!(component = "bus", event = "rejected", partition, "ingress queue saturated");
                }
                Err(e)
            }
        }
    }

    /// Enqueues without checking the accepting flag. Workers use this for
    /// derived events while draining.
    pub(crate) fn route(&self, event: MarketEvent) -> Result<usize, EngineError> {
        let partition = self.partitioner.partition(event.subject_key());
        match self.senders[partition].try_send(event) {
            Ok(()) => Ok(partition),
            Err(TrySendError::Full(_)) => Err(EngineError::Rejected { partition }),
            Err(TrySendError::Closed(_)) => Err(EngineError::ShuttingDown),
        }
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    pub(crate) fn close(&self) {
        self.accepting.store(false, Ordering::Release);
    }

    pub fn partitions(&self) -> usize {
        self.partitioner.count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::PriceTick;

    fn tick(ts_ms: u64) -> MarketEvent {
        MarketEvent::PriceTick(PriceTick {
            asset: "USDC".into(),
            price: 1.0,
            ts_ms,
            source: "test".into(),
        })
    }

    #[test]
    fn saturated_queue_rejects_and_counts() {
        let counters = Counters::default();
        let (tx, _rx) = mpsc::channel(1);
        let bus = EventBus::new(Partitioner::new(1), vec![tx], counters.clone());

        assert!(bus.submit(tick(1)).is_ok());
        assert_eq!(
            bus.submit(tick(2)),
            Err(EngineError::Rejected { partition: 0 })
        );

        let snap = counters.snapshot();
        assert_eq!(snap.events_accepted, 1);
        assert_eq!(snap.events_rejected, 1);
    }

    #[test]
    fn closed_bus_refuses_new_events() {
        let (tx, _rx) = mpsc::channel(8);
        let bus = EventBus::new(Partitioner::new(1), vec![tx], Counters::default());

        bus.close();
        assert_eq!(bus.submit(tick(1)), Err(EngineError::ShuttingDown));
        assert!(bus.route(tick(1)).is_ok());
    }

    #[test]
    fn dropped_receiver_reads_as_shutting_down() {
        let (tx, rx) = mpsc::channel(8);
        drop(rx);
        let bus = EventBus::new(Partitioner::new(1), vec![tx], Counters::default());
        assert_eq!(bus.submit(tick(1)), Err(EngineError::ShuttingDown));
    }
}
