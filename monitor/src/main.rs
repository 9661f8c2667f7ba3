use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use common::logger::{init_tracing, task_span};
use common::time::now_ms;
use monitor::{
    alerts::AlertTransition,
    config::EngineConfig,
    db::{Db, SqlxAlertRepository, spawn_retention},
    engine::{Engine, EngineContext},
    feed::{SimulatedFeed, run_feed},
    publisher::Subscription,
};
use tokio::sync::watch;
use tracing::Instrument;

/// Connects, migrates and wraps the alert store.
async fn init_repository(database_url: &str) -> anyhow::Result<Arc<SqlxAlertRepository>> {
    let db = Db::connect(database_url)
        .await
        .with_context(|| format!("connecting to {database_url}"))?;
    db.migrate().await.context("running migrations")?;

    Ok(Arc::new(SqlxAlertRepository::new(db.pool)))
}

/// Logs every alert transition at info level.
fn start_transition_logger(mut feed: Subscription<AlertTransition>) {
    tokio::spawn(
        async move {
            while let Some(t) = feed.recv().await {
                let alert = t.alert();
                tracing::info!(
                    transition = t.kind().as_str(),
                    alert_id = %alert.id,
                    rule = %alert.kind,
                    subject = %alert.subject_key,
                    severity = %alert.severity,
                    message = %alert.details.message,
                    "alert transition"
                );
            }
        }
        .instrument(task_span("transition_logger")),
    );
}

/// Logs throughput and open alerts once a minute until `stop` flips.
fn start_stats_logger(ctx: Arc<EngineContext>, mut stop: watch::Receiver<bool>) {
    tokio::spawn(
        async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(60));
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = stop.changed() => break,
                    _ = ticker.tick() => {
                        let counters = ctx.counters.snapshot();
                        let alerts = ctx.lifecycle.stats();
                        tracing::info!(
                            uptime_ms = counters.uptime_ms,
                            events = counters.events_accepted,
                            events_per_minute = counters.events_per_minute,
                            open_alerts = alerts.open,
                            sink_give_ups = counters.sink_give_ups,
                            "monitor stats"
                        );
                    }
                }
            }
        }
        .instrument(task_span("stats")),
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    sqlx::any::install_default_drivers();

    let is_production = std::env::var("APP_ENV").unwrap_or_default() == "production";
    init_tracing("monitor", is_production);

    tracing::info!("Starting DEX anomaly monitor...");

    let cfg = EngineConfig::from_env().context("loading configuration")?;
    cfg.validate().context("refusing to start")?;

    let database_url = cfg
        .database_url
        .clone()
        .unwrap_or_else(|| "sqlite://monitor_dev.db?mode=rwc".to_string());

    let lifecycle = cfg.lifecycle.clone();
    let mut engine = Engine::start(cfg)?;

    let (stop_tx, stop_rx) = watch::channel(false);

    let repo = init_repository(&database_url).await?;
    engine.attach_sink(repo.clone());
    let retention = spawn_retention(repo, &lifecycle, stop_rx.clone());
    start_transition_logger(engine.subscribe_transitions("transition_logger"));
    start_stats_logger(engine.context(), stop_rx.clone());

    let simulate = std::env::var("MONITOR_SIMULATE").is_ok_and(|v| v == "1");
    let feed = simulate.then(|| {
        tracing::info!("simulated feed enabled");
        let feed = SimulatedFeed::new(now_ms(), now_ms(), 60_000);
        tokio::spawn(
            run_feed(engine.bus(), feed, Duration::from_millis(200), stop_rx)
                .instrument(task_span("simulated_feed")),
        )
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");

    stop_tx.send_replace(true);
    if let Some(feed) = feed {
        let _ = feed.await;
    }
    let _ = retention.await;

    let report = engine.shutdown().await;
    tracing::info!(?report, "monitor stopped");

    Ok(())
}
