use thiserror::Error;
use uuid::Uuid;

/// Typed failures surfaced by the engine.
///
/// "Insufficient data" is deliberately absent: detectors express it as the
/// absence of a finding.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("event rejected: ingestion queue for partition {partition} is saturated")]
    Rejected { partition: usize },

    #[error("engine is shutting down; event not accepted")]
    ShuttingDown,

    #[error("alert not found: {0}")]
    NotFound(Uuid),

    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("malformed event for {subject}: {reason}")]
    MalformedEvent { subject: String, reason: String },

    #[error("subscriber {subscriber} lagged behind; {missed} messages dropped")]
    SubscriberSlow { subscriber: &'static str, missed: u64 },
}

impl EngineError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Self::ConfigInvalid(msg.into())
    }

    pub(crate) fn malformed(subject: &str, reason: impl Into<String>) -> Self {
        Self::MalformedEvent {
            subject: subject.to_string(),
            reason: reason.into(),
        }
    }
}
