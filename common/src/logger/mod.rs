mod init;
mod span;
mod timing;

pub use init::init_tracing;
pub use span::{partition_span, task_span};
pub use timing::warn_if_slow;
