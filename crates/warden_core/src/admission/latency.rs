//! Latency cutoff guard: the first, unconditional check.

use super::observe::LatencyReport;

/// All fields needed by the latency cutoff.
#[derive(Debug, Clone, Copy)]
pub struct LatencyInput {
    pub latency_ms: f64,
    pub max_latency_ms: f64,
}

/// Pure threshold check. Inputs are validated at the request boundary,
/// so a non-finite latency never reaches this point; the comparison still
/// fails closed if it does (NaN compares breach-free, so breach is
/// computed as "not within limit").
pub fn evaluate_latency_cutoff(input: &LatencyInput) -> LatencyReport {
    let within = input.latency_ms <= input.max_latency_ms;
    LatencyReport {
        latency_ms: input.latency_ms,
        limit_ms: input.max_latency_ms,
        breached: !within,
    }
}
