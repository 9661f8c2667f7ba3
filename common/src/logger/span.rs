use tracing::{Span, field};

/// Span for a long-lived worker that owns one key partition.
pub fn partition_span(name: &'static str, partition: usize) -> Span {
    tracing::info_span!(
        "partition",
        name = %name,
        partition = partition,
        subject = field::Empty
    )
}

/// Span for a background task that is not bound to a partition.
pub fn task_span(name: &'static str) -> Span {
    tracing::info_span!("task", name = %name)
}
