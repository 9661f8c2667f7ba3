pub mod lifecycle;
pub mod model;

pub use lifecycle::AlertLifecycleManager;
pub use model::{
    Alert, AlertDetails, AlertFilter, AlertId, AlertStats, AlertTransition, DedupKey,
    ResolveOutcome, ResolveReason, TransitionKind,
};
