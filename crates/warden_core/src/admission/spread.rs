//! Spread guard: the one unconditional late check.
//!
//! Runs even when the request is already denied. On breach it overwrites
//! both `allow` and `reason`, including over a prior different denial.
//! Downstream audit consumers key on that behavior; see the pipeline fold.

use super::observe::SpreadReport;

/// All fields needed by the spread guard.
#[derive(Debug, Clone, Copy)]
pub struct SpreadInput {
    pub spread_bps: f64,
    pub limit_bps: f64,
}

pub fn evaluate_spread_guard(input: &SpreadInput) -> SpreadReport {
    let within = input.spread_bps <= input.limit_bps;
    SpreadReport {
        spread_bps: input.spread_bps,
        limit_bps: input.limit_bps,
        breached: !within,
    }
}
