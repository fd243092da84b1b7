//! Reason-code registry for admission decisions.
//!
//! Every deny carries exactly one of these codes; the wire form is the
//! stable snake_case string from `as_str`. Callers parse the string, so
//! codes are append-only: renaming or removing one is a breaking change.

/// Stable token naming why the pipeline allowed or denied a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReasonCode {
    /// Request passed every guard.
    Ok,
    /// Snapshot latency above the configured ceiling.
    LatencyExceeded,
    /// Health guard is inside a cooloff window.
    HealthCooloff,
    /// Health guard escalated to a sticky halt.
    HealthHalted,
    /// Microstructure window flagged a fake-wall pattern.
    TrapSuspected,
    /// Expected net edge below the configured minimum.
    ExpectedReturnLow,
    /// Calibrator returned a non-finite edge estimate.
    CalibratorError,
    /// Estimated slippage eats more than the allowed fraction of edge.
    SlippageExceeded,
    /// Position-size scale is zero or negative.
    RiskScaleZero,
    /// Daily drawdown at or past the cap.
    RiskDrawdown,
    /// Open-position count at or past the cap.
    RiskConcurrency,
    /// Sequential test rejected the edge hypothesis.
    SprtRejected,
    /// Quoted spread above the configured limit.
    SpreadTooWide,
    /// External governance hook vetoed the intent.
    GovernanceVeto,
}

impl ReasonCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ReasonCode::Ok => "ok",
            ReasonCode::LatencyExceeded => "latency_exceeded",
            ReasonCode::HealthCooloff => "health_cooloff",
            ReasonCode::HealthHalted => "health_halted",
            ReasonCode::TrapSuspected => "trap_suspected",
            ReasonCode::ExpectedReturnLow => "expected_return_low",
            ReasonCode::CalibratorError => "calibrator_error",
            ReasonCode::SlippageExceeded => "slippage_exceeded",
            ReasonCode::RiskScaleZero => "risk_scale_zero",
            ReasonCode::RiskDrawdown => "risk_drawdown",
            ReasonCode::RiskConcurrency => "risk_concurrency",
            ReasonCode::SprtRejected => "sprt_rejected",
            ReasonCode::SpreadTooWide => "spread_too_wide",
            ReasonCode::GovernanceVeto => "governance_veto",
        }
    }

    /// Parse a wire string back into a code. `None` for unknown strings.
    pub fn parse(s: &str) -> Option<ReasonCode> {
        REGISTRY.iter().copied().find(|code| code.as_str() == s)
    }

    pub fn is_ok(self) -> bool {
        matches!(self, ReasonCode::Ok)
    }
}

const REGISTRY: &[ReasonCode] = &[
    ReasonCode::Ok,
    ReasonCode::LatencyExceeded,
    ReasonCode::HealthCooloff,
    ReasonCode::HealthHalted,
    ReasonCode::TrapSuspected,
    ReasonCode::ExpectedReturnLow,
    ReasonCode::CalibratorError,
    ReasonCode::SlippageExceeded,
    ReasonCode::RiskScaleZero,
    ReasonCode::RiskDrawdown,
    ReasonCode::RiskConcurrency,
    ReasonCode::SprtRejected,
    ReasonCode::SpreadTooWide,
    ReasonCode::GovernanceVeto,
];

pub fn reason_registry() -> &'static [ReasonCode] {
    REGISTRY
}

pub fn reason_registry_contains(code: ReasonCode) -> bool {
    REGISTRY.contains(&code)
}
