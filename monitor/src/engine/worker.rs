use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{Span, debug, error, info, warn};

use super::EngineContext;
use super::bus::EventBus;
use crate::market::MarketEvent;
use crate::metrics::bump;
use crate::rules::{Finding, SubjectSnapshot};
use crate::state::Subject;

/// Commands delivered to a worker alongside its events.
pub(crate) enum Control {
    Sweep {
        reference_ts: u64,
        done: Option<oneshot::Sender<usize>>,
    },
}

/// Sole writer for one partition of the state store and alert shards.
pub(crate) struct PartitionWorker {
    partition: usize,
    ctx: Arc<EngineContext>,
    bus: EventBus,
}

impl PartitionWorker {
    pub(crate) fn new(partition: usize, ctx: Arc<EngineContext>, bus: EventBus) -> Self {
        Self {
            partition,
            ctx,
            bus,
        }
    }

    /// Runs until shutdown, then drains whatever is still queued.
    /// Returns the number of events processed.
    pub(crate) async fn run(
        self,
        mut events: mpsc::Receiver<MarketEvent>,
        mut control: mpsc::Receiver<Control>,
        mut shutdown: watch::Receiver<bool>,
    ) -> usize {
        info!(component = "worker", event = "startup", "partition worker started");
        let mut processed = 0usize;

        loop {
            tokio::select! {
                biased;

                _ = shutdown.changed() => break,

                Some(cmd) = control.recv() => self.handle_control(cmd),

                ev = events.recv() => match ev {
                    Some(ev) => {
                        self.process(ev);
                        processed += 1;
                    }
                    None => break,
                },
            }
        }

        events.close();
        let mut drained = 0usize;
        while let Some(ev) = events.recv().await {
            self.process(ev);
            drained += 1;
        }

        info!(component = "worker", event = "shutdown", processed, drained, "partition worker stopped");
        processed + drained
    }

    fn handle_control(&self, cmd: Control) {
        match cmd {
            Control::Sweep { reference_ts, done } => {
                let resolved = self.ctx.lifecycle.sweep_shard(self.partition, reference_ts);
                if let Some(done) = done {
                    let _ = done.send(resolved);
                }
            }
        }
    }

    /// Processes one event. A failure is confined to this event.
    fn process(&self, event: MarketEvent) {
        Span::current().record("subject", event.subject_key());

        let outcome = catch_unwind(AssertUnwindSafe(|| self.apply_and_evaluate(&event)));
        if outcome.is_err() {
            bump(&self.ctx.counters.events_malformed);
            error!(
                component = "worker",
                subject = event.subject_key(),
                kind = event.kind(),
                "event processing panicked; event dropped"
            );
        }
    }

    fn apply_and_evaluate(&self, event: &MarketEvent) {
        let applied = match self.ctx.store.apply(event) {
            Ok(applied) => applied,
            Err(e) => {
                bump(&self.ctx.counters.events_malformed);
                warn!(component = "worker", error = %e, "malformed event dropped");
                return;
            }
        };

        self.ctx.advance_watermark(event.ts_ms());

        for tick in applied.derived {
            let asset = tick.asset.clone();
            if let Err(e) = self.bus.route(MarketEvent::PriceTick(tick)) {
                bump(&self.ctx.counters.derived_dropped);
                warn!(component = "worker", asset = %asset, error = %e, "derived price tick dropped");
            }
        }

        if applied.stale {
            bump(&self.ctx.counters.events_stale);
        }

        self.ctx.publisher.publish_event(event.clone());

        for subject in &applied.affected {
            for finding in self.evaluate(subject, event) {
                bump(&self.ctx.counters.findings);
                self.ctx.lifecycle.reconcile(&finding);
            }
        }
    }

    fn evaluate(&self, subject: &Subject, event: &MarketEvent) -> Vec<Finding> {
        let rules = &self.ctx.rules;
        let store = &self.ctx.store;

        let findings = match subject {
            Subject::Asset(key) => {
                store.with_asset(key, |a| rules.evaluate(key, &SubjectSnapshot::Asset(a)))
            }
            Subject::Pool(key) => {
                store.with_pool(key, |p| rules.evaluate(key, &SubjectSnapshot::Pool(p)))
            }
            Subject::Protocol(key) => match event {
                MarketEvent::ProtocolUpdate(ev) => {
                    Some(rules.evaluate(key, &SubjectSnapshot::Protocol(ev)))
                }
                _ => None,
            },
        };

        let findings = findings.unwrap_or_default();
        if !findings.is_empty() {
            debug!(subject = subject.key(), findings = findings.len(), "rules fired");
        }
        findings
    }
}
