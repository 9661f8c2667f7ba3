pub mod alerts;
pub mod config;
pub mod db;
pub mod engine;
pub mod feed;
pub mod market;
pub mod metrics;
pub mod partition;
pub mod publisher;
pub mod rules;
pub mod state;

pub mod error;
