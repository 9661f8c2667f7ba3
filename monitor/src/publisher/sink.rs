use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::logger::{task_span, warn_if_slow};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, warn};

use super::Subscription;
use crate::alerts::AlertTransition;
use crate::config::RuntimeConfig;
use crate::metrics::{Counters, bump};

const SLOW_DELIVERY: Duration = Duration::from_millis(250);
const MAX_BACKOFF: Duration = Duration::from_secs(2);

/// A downstream consumer of alert transitions (persistence, notifications).
///
/// Delivery is at-least-once: implementations must treat a repeated
/// [`AlertTransition::idempotency_key`] as a no-op.
#[async_trait]
pub trait TransitionSink: Send + Sync {
    fn name(&self) -> &'static str;

    async fn deliver(&self, transition: &AlertTransition) -> anyhow::Result<()>;
}

/// How hard a sink task tries before it gives up on one transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Wait before the second attempt; doubles per attempt up to two seconds.
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(cfg: &RuntimeConfig) -> Self {
        Self {
            max_attempts: cfg.sink_max_attempts.max(1),
            backoff: Duration::from_millis(cfg.sink_backoff_ms),
        }
    }

    fn delay(&self, failed_attempts: u32) -> Duration {
        let factor = 1u32 << failed_attempts.saturating_sub(1).min(16);
        self.backoff.saturating_mul(factor).min(MAX_BACKOFF)
    }
}

/// Forwards a transition subscription into `sink` until `shutdown` flips,
/// then flushes whatever is still buffered. Resolves to the number of
/// transitions delivered successfully.
pub fn spawn_sink(
    sink: Arc<dyn TransitionSink>,
    mut subscription: Subscription<AlertTransition>,
    retry: RetryPolicy,
    counters: Counters,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<usize> {
    let span = task_span(sink.name());

    tokio::spawn(
        async move {
            let mut delivered = 0usize;

            loop {
                tokio::select! {
                    biased;

                    _ = shutdown.changed() => break,

                    msg = subscription.recv() => match msg {
                        Some(t) => delivered += deliver(sink.as_ref(), &t, retry, &counters).await,
                        None => break,
                    },
                }
            }

            while let Some(t) = subscription.try_recv() {
                delivered += deliver(sink.as_ref(), &t, retry, &counters).await;
            }

            debug!(delivered, "sink flushed");
            delivered
        }
        .instrument(span),
    )
}

async fn deliver(
    sink: &dyn TransitionSink,
    transition: &AlertTransition,
    retry: RetryPolicy,
    counters: &Counters,
) -> usize {
    let mut attempt = 1;
    loop {
        let result =
            warn_if_slow("sink.deliver", sink.name(), SLOW_DELIVERY, sink.deliver(transition)).await;

        let err = match result {
            Ok(()) => return 1,
            Err(e) => e,
        };

        if attempt >= retry.max_attempts {
            bump(&counters.sink_give_ups);
            error!(
                sink = sink.name(),
                alert_id = %transition.alert().id,
                transition = transition.kind().as_str(),
                attempts = attempt,
                error = ?err,
                "sink delivery failed; transition dropped"
            );
            return 0;
        }

        let delay = retry.delay(attempt);
        bump(&counters.sink_retries);
        warn!(
            sink = sink.name(),
            alert_id = %transition.alert().id,
            attempt,
            retry_in_ms = delay.as_millis() as u64,
            error = %err,
            "sink delivery failed; retrying"
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}
