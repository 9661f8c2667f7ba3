//! Streaming detection engine.
//!
//! Events enter through the [`EventBus`], are hashed by subject key onto a
//! fixed set of partition workers, and each worker applies them to its
//! partition of the state store, runs the rules for the affected subjects and
//! reconciles the findings into alerts. Everything shared lives in an
//! [`EngineContext`]; there are no globals.

pub mod bus;
mod sweeper;
mod worker;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use common::logger::{partition_span, task_span};
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{Instrument, info, warn};

pub use bus::EventBus;

use crate::alerts::{
    Alert, AlertFilter, AlertId, AlertLifecycleManager, AlertStats, AlertTransition,
    ResolveOutcome,
};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::market::{MarketEvent, SwapEvent};
use crate::metrics::{Counters, CountersSnapshot};
use crate::partition::Partitioner;
use crate::publisher::{Publisher, RetryPolicy, Subscription, TransitionSink, spawn_sink};
use crate::rules::RuleEngine;
use crate::state::{PricePoint, RollingStateStore};
use worker::{Control, PartitionWorker};

const CONTROL_CAPACITY: usize = 16;

/// Shared components, handed explicitly to every task.
pub struct EngineContext {
    pub config: EngineConfig,
    pub store: RollingStateStore,
    pub rules: RuleEngine,
    pub lifecycle: AlertLifecycleManager,
    pub publisher: Publisher,
    pub counters: Counters,
    /// Highest event timestamp processed so far.
    watermark: AtomicU64,
}

impl EngineContext {
    pub fn new(config: EngineConfig) -> Self {
        let partitioner = Partitioner::new(config.runtime.partitions);
        let counters = Counters::default();
        let publisher = Publisher::new(config.runtime.subscriber_buffer, counters.clone());

        Self {
            store: RollingStateStore::new(config.state.clone(), partitioner),
            rules: RuleEngine::new(config.rules.clone()),
            lifecycle: AlertLifecycleManager::new(
                &config.lifecycle,
                partitioner,
                publisher.clone(),
                counters.clone(),
            ),
            publisher,
            counters,
            watermark: AtomicU64::new(0),
            config,
        }
    }

    pub fn watermark(&self) -> u64 {
        self.watermark.load(Ordering::Acquire)
    }

    pub(crate) fn advance_watermark(&self, ts_ms: u64) {
        self.watermark.fetch_max(ts_ms, Ordering::AcqRel);
    }
}

/// What shutdown managed to finish.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    pub events_processed: usize,
    pub sink_deliveries: usize,
    /// Some task did not finish within the shutdown timeout.
    pub timed_out: bool,
}

/// A running engine. Must be started inside a Tokio runtime.
pub struct Engine {
    ctx: Arc<EngineContext>,
    bus: EventBus,
    controls: Vec<mpsc::Sender<Control>>,

    shutdown_tx: watch::Sender<bool>,
    sink_shutdown_tx: watch::Sender<bool>,

    workers: Vec<JoinHandle<usize>>,
    sweeper: JoinHandle<()>,
    sinks: Vec<JoinHandle<usize>>,
}

impl Engine {
    /// Validates the configuration and spawns the workers and the sweeper.
    pub fn start(config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;

        let ctx = Arc::new(EngineContext::new(config));
        let runtime = &ctx.config.runtime;
        let partitioner = Partitioner::new(runtime.partitions);

        let mut event_txs = Vec::with_capacity(partitioner.count());
        let mut event_rxs = Vec::with_capacity(partitioner.count());
        for _ in 0..partitioner.count() {
            let (tx, rx) = mpsc::channel(runtime.queue_capacity);
            event_txs.push(tx);
            event_rxs.push(rx);
        }
        let bus = EventBus::new(partitioner, event_txs, ctx.counters.clone());

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (sink_shutdown_tx, _) = watch::channel(false);

        let mut controls = Vec::with_capacity(partitioner.count());
        let mut workers = Vec::with_capacity(partitioner.count());
        for (partition, events) in event_rxs.into_iter().enumerate() {
            let (control_tx, control_rx) = mpsc::channel(CONTROL_CAPACITY);
            controls.push(control_tx);

            let worker = PartitionWorker::new(partition, ctx.clone(), bus.clone());
            let shutdown = shutdown_rx.clone();
            workers.push(tokio::spawn(
                worker
                    .run(events, control_rx, shutdown)
                    .instrument(partition_span("worker", partition)),
            ));
        }

        let sweeper = tokio::spawn(
            sweeper::run_sweeper(
                ctx.clone(),
                controls.clone(),
                Duration::from_millis(ctx.config.lifecycle.sweep_interval_ms),
                shutdown_rx,
            )
            .instrument(task_span("sweeper")),
        );

        info!(
            component = "engine",
            event = "startup",
            partitions = partitioner.count(),
            queue_capacity = ctx.config.runtime.queue_capacity,
            rules = ?ctx.rules.rules(),
            "engine started"
        );

        Ok(Self {
            ctx,
            bus,
            controls,
            shutdown_tx,
            sink_shutdown_tx,
            workers,
            sweeper,
            sinks: Vec::new(),
        })
    }

    /// A producer handle. Clone freely.
    pub fn bus(&self) -> EventBus {
        self.bus.clone()
    }

    /// Non-blocking enqueue.
    pub fn submit(&self, event: MarketEvent) -> Result<(), EngineError> {
        self.bus.submit(event)
    }

    /// Resolves an alert at the current watermark. Idempotent.
    pub fn resolve_alert(&self, id: AlertId) -> Result<ResolveOutcome, EngineError> {
        self.ctx.lifecycle.resolve(id, self.ctx.watermark())
    }

    pub fn subscribe_transitions(&self, name: &'static str) -> Subscription<AlertTransition> {
        self.ctx.publisher.subscribe_transitions(name)
    }

    pub fn subscribe_events(&self, name: &'static str) -> Subscription<MarketEvent> {
        self.ctx.publisher.subscribe_events(name)
    }

    /// Forwards all future transitions into `sink` until shutdown.
    pub fn attach_sink(&mut self, sink: Arc<dyn TransitionSink>) {
        let subscription = self.ctx.publisher.subscribe_transitions(sink.name());
        let handle = spawn_sink(
            sink,
            subscription,
            RetryPolicy::from_config(&self.ctx.config.runtime),
            self.ctx.counters.clone(),
            self.sink_shutdown_tx.subscribe(),
        );
        self.sinks.push(handle);
    }

    pub fn context(&self) -> Arc<EngineContext> {
        self.ctx.clone()
    }

    pub fn watermark(&self) -> u64 {
        self.ctx.watermark()
    }

    /// Runs a sweep on every worker at the current watermark and waits for
    /// it. Returns the number of alerts resolved.
    pub async fn sweep_now(&self) -> usize {
        let reference_ts = self.ctx.watermark();
        let mut acks = Vec::with_capacity(self.controls.len());

        for tx in &self.controls {
            let (done, ack) = oneshot::channel();
            let cmd = Control::Sweep {
                reference_ts,
                done: Some(done),
            };
            if tx.send(cmd).await.is_ok() {
                acks.push(ack);
            }
        }

        join_all(acks).await.into_iter().flatten().sum()
    }

    // =========================
    // Queries
    // =========================

    pub fn active_alerts(&self, filter: &AlertFilter) -> Vec<Alert> {
        self.ctx.lifecycle.active(filter)
    }

    pub fn alert(&self, id: AlertId) -> Result<Alert, EngineError> {
        self.ctx.lifecycle.get(id).ok_or(EngineError::NotFound(id))
    }

    pub fn alert_stats(&self) -> AlertStats {
        self.ctx.lifecycle.stats()
    }

    pub fn price_history(&self, asset: &str, horizon_ms: u64) -> Vec<PricePoint> {
        self.ctx.store.price_history(asset, horizon_ms)
    }

    pub fn recent_swaps(&self, pool: &str, limit: usize) -> Vec<SwapEvent> {
        self.ctx.store.recent_swaps(pool, limit)
    }

    pub fn counters(&self) -> CountersSnapshot {
        self.ctx.counters.snapshot()
    }

    /// Stops accepting, drains the worker queues, stops the sweeper, then
    /// flushes the sinks. Each stage is bounded by the shutdown timeout.
    pub async fn shutdown(self) -> ShutdownReport {
        let timeout = Duration::from_millis(self.ctx.config.runtime.shutdown_timeout_ms);
        let mut report = ShutdownReport::default();

        info!(component = "engine", event = "shutdown", "engine shutting down");
        self.bus.close();
        self.shutdown_tx.send_replace(true);

        match tokio::time::timeout(timeout, join_all(self.workers)).await {
            Ok(results) => {
                report.events_processed = results.into_iter().flatten().sum();
            }
            Err(_) => {
                warn!(component = "engine", "workers did not drain before the shutdown timeout");
                report.timed_out = true;
            }
        }

        if tokio::time::timeout(timeout, self.sweeper).await.is_err() {
            report.timed_out = true;
        }

        self.sink_shutdown_tx.send_replace(true);
        match tokio::time::timeout(timeout, join_all(self.sinks)).await {
            Ok(results) => {
                report.sink_deliveries = results.into_iter().flatten().sum();
            }
            Err(_) => {
                warn!(component = "engine", "sinks did not flush before the shutdown timeout");
                report.timed_out = true;
            }
        }

        info!(
            component = "engine",
            events_processed = report.events_processed,
            sink_deliveries = report.sink_deliveries,
            timed_out = report.timed_out,
            "engine stopped"
        );
        report
    }
}
