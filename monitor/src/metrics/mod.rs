pub mod counters;

pub use counters::{Counters, CountersSnapshot};
pub(crate) use counters::bump;
