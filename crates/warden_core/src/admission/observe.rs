//! Decision result and per-guard observability reports.
//!
//! `reason` is the single authoritative code; `reasons` is the append-only
//! diagnostic list, which keeps entries from guards that did not end up
//! deciding. The `gates` trace records one entry per guard step in the
//! order they were visited, including skips.

use crate::health::HealthState;
use crate::microstructure::trap::TrapReading;
use crate::risk::RiskContext;
use crate::sequential::SprtOutcome;

use super::reason::ReasonCode;

// --- Gate trace ---------------------------------------------------------

/// The nine guard steps in default evaluation order. The expected-return
/// and slippage steps swap places under the `slip_before_er` profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateStep {
    Latency,
    Health,
    Trap,
    ExpectedReturn,
    Slippage,
    Risk,
    Sprt,
    Spread,
    Governance,
}

impl GateStep {
    pub fn as_str(self) -> &'static str {
        match self {
            GateStep::Latency => "latency",
            GateStep::Health => "health",
            GateStep::Trap => "trap",
            GateStep::ExpectedReturn => "expected_return",
            GateStep::Slippage => "slippage",
            GateStep::Risk => "risk",
            GateStep::Sprt => "sprt",
            GateStep::Spread => "spread",
            GateStep::Governance => "governance",
        }
    }
}

/// What one guard step did to the decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateVerdict {
    /// Evaluated and raised no block.
    Passed,
    /// Set `allow = false` while the request was still allowed.
    Blocked,
    /// Spread guard only: replaced the reason of an earlier denial.
    Overwrote,
    /// Would have denied (or was not evaluated at all) but the request was
    /// already denied, so this guard never got to set the reason.
    Skipped,
    /// Switched off or had nothing to work with (feature disabled, optional
    /// feed absent or unusable); raised a diagnostic at most.
    Disengaged,
}

/// One entry in the ordered execution trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateTraceEntry {
    pub gate: GateStep,
    pub verdict: GateVerdict,
}

// --- Per-guard reports ----------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct LatencyReport {
    pub latency_ms: f64,
    pub limit_ms: f64,
    pub breached: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HealthReport {
    pub state: HealthState,
    /// p95 over the retained sample window, absent before the first sample.
    pub p95_ms: Option<f64>,
    pub warn_count: usize,
    /// This call pushed the guard into cooloff or halt.
    pub escalated: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrapReport {
    pub reading: TrapReading,
    pub feature_score: f64,
    pub tripped: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EdgeReport {
    pub e_pi_bps: f64,
    pub min_bps: f64,
    pub would_block: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SlipReport {
    pub slip_bps: f64,
    /// Slippage budget: eta fraction of the positive part of the edge.
    pub allowed_bps: f64,
    pub would_block: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SprtGateReport {
    pub outcome: SprtOutcome,
    pub llr: f64,
    pub samples_used: usize,
    pub deadline_hit: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpreadReport {
    pub spread_bps: f64,
    pub limit_bps: f64,
    pub breached: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GovernanceReport {
    pub allowed: bool,
    pub code: Option<String>,
}

// --- Decision -------------------------------------------------------------

/// Full observability payload returned with every decision.
#[derive(Debug, Clone)]
pub struct DecisionTrace {
    /// Health-guard state at decision time; mirrors the guard even when a
    /// different gate decided.
    pub gate_state: HealthState,
    /// Append-only free-form diagnostics, in evaluation order.
    pub reasons: Vec<String>,
    /// Ordered record of every guard step visited.
    pub gates: Vec<GateTraceEntry>,
    pub latency: Option<LatencyReport>,
    pub health: Option<HealthReport>,
    pub trap: Option<TrapReport>,
    pub expected_return: Option<EdgeReport>,
    pub slippage: Option<SlipReport>,
    pub risk: Option<RiskContext>,
    pub sprt: Option<SprtGateReport>,
    pub spread: Option<SpreadReport>,
    pub governance: Option<GovernanceReport>,
}

impl DecisionTrace {
    pub(crate) fn new() -> Self {
        DecisionTrace {
            gate_state: HealthState::Ok,
            reasons: Vec::new(),
            gates: Vec::new(),
            latency: None,
            health: None,
            trap: None,
            expected_return: None,
            slippage: None,
            risk: None,
            sprt: None,
            spread: None,
            governance: None,
        }
    }

    pub(crate) fn record(&mut self, gate: GateStep, verdict: GateVerdict) {
        self.gates.push(GateTraceEntry { gate, verdict });
    }
}

/// Final decision returned by the pipeline.
#[derive(Debug, Clone)]
pub struct Decision {
    pub allow: bool,
    /// `Ok` iff `allow`; otherwise the last guard that set `allow = false`.
    pub reason: ReasonCode,
    /// Position-size multiplier for the caller, in `[0, 1]`.
    pub risk_scale: f64,
    pub observability: DecisionTrace,
}
