//! Counters and snapshots exposed for observability

pub mod metrics;

pub use metrics::{unix_secs, BridgeStats, FrameCounters, OutputStats};
