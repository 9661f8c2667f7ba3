//! Broadcast fan-out of alert transitions and raw market events.
//!
//! Every subscriber has its own bounded buffer. A subscriber that falls
//! behind loses the oldest messages; the loss is logged as degraded delivery
//! and counted, and publishing never blocks.

pub mod sink;

use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tracing::warn;

pub use sink::{RetryPolicy, TransitionSink, spawn_sink};

use crate::alerts::AlertTransition;
use crate::error::EngineError;
use crate::market::MarketEvent;
use crate::metrics::Counters;

#[derive(Clone)]
pub struct Publisher {
    transitions: broadcast::Sender<AlertTransition>,
    events: broadcast::Sender<MarketEvent>,
    counters: Counters,
}

impl Publisher {
    pub fn new(buffer: usize, counters: Counters) -> Self {
        let (transitions, _) = broadcast::channel(buffer.max(1));
        let (events, _) = broadcast::channel(buffer.max(1));
        Self {
            transitions,
            events,
            counters,
        }
    }

    /// Fire-and-forget. Having no subscribers is not an error.
    pub fn publish(&self, transition: AlertTransition) {
        let _ = self.transitions.send(transition);
    }

    pub fn publish_event(&self, event: MarketEvent) {
        let _ = self.events.send(event);
    }

    pub fn subscribe_transitions(&self, name: &'static str) -> Subscription<AlertTransition> {
        Subscription::new(name, self.transitions.subscribe(), self.counters.clone())
    }

    pub fn subscribe_events(&self, name: &'static str) -> Subscription<MarketEvent> {
        Subscription::new(name, self.events.subscribe(), self.counters.clone())
    }
}

/// One subscriber's view of a feed.
pub struct Subscription<T> {
    name: &'static str,
    rx: broadcast::Receiver<T>,
    counters: Counters,
}

impl<T: Clone> Subscription<T> {
    fn new(name: &'static str, rx: broadcast::Receiver<T>, counters: Counters) -> Self {
        Self { name, rx, counters }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Next message, skipping over any that were dropped for lag.
    /// `None` once the publisher is gone.
    pub async fn recv(&mut self) -> Option<T> {
        loop {
            match self.rx.recv().await {
                Ok(msg) => return Some(msg),
                Err(RecvError::Lagged(missed)) => self.lagged(missed),
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Like [`Self::recv`] but returns `None` when nothing is buffered.
    pub fn try_recv(&mut self) -> Option<T> {
        loop {
            match self.rx.try_recv() {
                Ok(msg) => return Some(msg),
                Err(TryRecvError::Lagged(missed)) => self.lagged(missed),
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }

    fn lagged(&self, missed: u64) {
        let err = EngineError::SubscriberSlow {
            subscriber: self.name,
            missed,
        };
        warn!(subscriber = self.name, missed, error = %err, "degraded delivery");
        self.counters
            .subscriber_lagged
            .fetch_add(missed, std::sync::atomic::Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::ProtocolUpdateEvent;
    use tracing_test::traced_test;

    fn update(ts_ms: u64) -> MarketEvent {
        MarketEvent::ProtocolUpdate(ProtocolUpdateEvent {
            protocol: "aave".into(),
            description: format!("update {ts_ms}"),
            ts_ms,
        })
    }

    #[tokio::test]
    async fn each_subscriber_gets_every_message() {
        let publisher = Publisher::new(8, Counters::default());
        let mut a = publisher.subscribe_events("a");
        let mut b = publisher.subscribe_events("b");

        publisher.publish_event(update(1));
        publisher.publish_event(update(2));

        for sub in [&mut a, &mut b] {
            assert_eq!(sub.recv().await.map(|e| e.ts_ms()), Some(1));
            assert_eq!(sub.recv().await.map(|e| e.ts_ms()), Some(2));
            assert!(sub.try_recv().is_none());
        }
    }

    #[tokio::test]
    #[traced_test]
    async fn slow_subscriber_drops_oldest_and_is_counted() {
        let counters = Counters::default();
        let publisher = Publisher::new(2, counters.clone());
        let mut slow = publisher.subscribe_events("slow");
        let mut fast = publisher.subscribe_events("fast");

        for ts in 1..=5 {
            publisher.publish_event(update(ts));
            assert_eq!(fast.try_recv().map(|e| e.ts_ms()), Some(ts));
        }

        assert_eq!(slow.recv().await.map(|e| e.ts_ms()), Some(4));
        assert_eq!(slow.recv().await.map(|e| e.ts_ms()), Some(5));
        assert_eq!(counters.snapshot().subscriber_lagged, 3);
        assert!(logs_contain("degraded delivery"));
    }

    #[test]
    fn publishing_without_subscribers_is_fine() {
        let publisher = Publisher::new(1, Counters::default());
        publisher.publish_event(update(1));
    }
}
