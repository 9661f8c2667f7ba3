use std::time::{Duration, Instant};

/// Awaits `fut` on behalf of `subscriber` and emits a `performance` warning
/// when it takes longer than `max`.
pub async fn warn_if_slow<F, T>(label: &'static str, subscriber: &str, max: Duration, fut: F) -> T
where
    F: std::future::Future<Output = T>,
{
    let start = Instant::now();
    let out = fut.await;
    let elapsed = start.elapsed();
    if elapsed > max {
        tracing::warn!(
            target: "performance",
            label,
            subscriber,
            elapsed_ms = elapsed.as_millis() as u64,
            max_ms = max.as_millis() as u64,
            "slow operation detected"
        );
    }
    out
}
