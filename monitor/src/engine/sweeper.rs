use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace};

use super::EngineContext;
use super::worker::Control;

/// Periodically asks every worker to resolve its stale alerts.
///
/// The sweep runs on the workers themselves, so it is serialized with the
/// findings for the same keys. The reference time is the watermark, never
/// wall clock.
pub(crate) async fn run_sweeper(
    ctx: Arc<EngineContext>,
    controls: Vec<mpsc::Sender<Control>>,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick completes immediately; there is nothing to sweep yet.
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;

            _ = shutdown.changed() => break,

            _ = ticker.tick() => {
                let reference_ts = ctx.watermark();
                if reference_ts == 0 {
                    trace!("no events yet; sweep skipped");
                    continue;
                }

                for (partition, tx) in controls.iter().enumerate() {
                    let cmd = Control::Sweep { reference_ts, done: None };
                    if tx.try_send(cmd).is_err() {
                        debug!(partition, "control queue busy; sweep deferred to next tick");
                    }
                }
            }
        }
    }

    info!(component = "sweeper", event = "shutdown", "sweeper stopped");
}
