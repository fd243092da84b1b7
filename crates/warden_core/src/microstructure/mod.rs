//! Streaming order-book statistics.

pub mod rolling;
pub mod trap;

pub use rolling::{RollingWindow, percentile};
pub use trap::{
    TrapReading, TrapWindow, cancel_ratio, replenish_latency_ms, trap_feature_score,
};
