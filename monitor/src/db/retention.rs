use std::sync::Arc;
use std::time::Duration;

use common::logger::task_span;
use common::time::now_ms;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{Instrument, error, info};

use super::SqlxAlertRepository;
use crate::config::LifecycleConfig;

/// Periodically purges resolved alerts older than the retention period
/// until `shutdown` flips.
///
/// The cutoff is wall clock minus `data_retention_ms`; stored resolution
/// times are event time, so this assumes a live feed.
pub fn spawn_retention(
    repo: Arc<SqlxAlertRepository>,
    config: &LifecycleConfig,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    let every = Duration::from_millis(config.cleanup_interval_ms);
    let retention_ms = config.data_retention_ms;

    tokio::spawn(
        async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick fires immediately; start purging one period in.
            ticker.tick().await;

            loop {
                tokio::select! {
                    biased;

                    _ = shutdown.changed() => break,

                    _ = ticker.tick() => {
                        let cutoff = now_ms().saturating_sub(retention_ms);
                        match repo.purge_resolved_before(cutoff).await {
                            Ok(removed) => info!(removed, cutoff, "purged resolved alerts"),
                            Err(e) => error!(error = ?e, "retention purge failed"),
                        }
                    }
                }
            }
        }
        .instrument(task_span("retention")),
    )
}
