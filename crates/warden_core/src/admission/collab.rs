//! Collaborator seams: calibrator, governance, and the audit emitter.
//!
//! These are the pipeline's external touch points. All three are consumed
//! through trait objects so transport wiring stays outside this crate.

use crate::risk::RiskContext;

use super::reason::ReasonCode;
use super::request::{AccountMode, Side};

// --- Calibrator -----------------------------------------------------------

/// External calibration model mapping a raw composite score to a
/// probability and an expected net edge. Treated as a pure function; a
/// non-finite edge estimate is handled as a gate-level numeric error
/// (conservative deny), never propagated.
pub trait ReturnCalibrator: Send + Sync {
    /// Probability estimate for a composite score.
    fn predict_p(&self, score: f64) -> f64;

    /// Expected net edge in bps after fees and slippage.
    fn expected_edge_bps(
        &self,
        score: f64,
        a_bps: f64,
        b_bps: f64,
        fees_bps: f64,
        slip_bps: f64,
        regime: &str,
    ) -> f64;
}

// --- Governance -----------------------------------------------------------

/// Intent summary handed to the governance hook.
#[derive(Debug, Clone)]
pub struct GovernanceIntent<'a> {
    pub symbol: &'a str,
    pub side: Side,
    pub qty: f64,
    pub mode: AccountMode,
}

/// Governance ruling. `code` is the hook's own machine token; `reasons`
/// are free-form notes folded into the decision diagnostics.
#[derive(Debug, Clone)]
pub struct GovernanceRuling {
    pub allow: bool,
    pub code: Option<String>,
    pub reasons: Vec<String>,
}

impl GovernanceRuling {
    pub fn allow() -> Self {
        GovernanceRuling { allow: true, code: None, reasons: Vec::new() }
    }

    pub fn veto(code: impl Into<String>, reasons: Vec<String>) -> Self {
        GovernanceRuling { allow: false, code: Some(code.into()), reasons }
    }
}

/// External kill-switch with the last word on an otherwise-allowed intent.
pub trait GovernanceHook: Send + Sync {
    fn approve(&self, intent: &GovernanceIntent<'_>, risk: &RiskContext) -> GovernanceRuling;
}

// --- Audit emitter ----------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditKind {
    TrapTrip,
    SpreadTrip,
    HealthEscalation,
}

impl AuditKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditKind::TrapTrip => "trap_trip",
            AuditKind::SpreadTrip => "spread_trip",
            AuditKind::HealthEscalation => "health_escalation",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warn,
    Critical,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warn => "warn",
            Severity::Critical => "critical",
        }
    }
}

/// One fire-and-forget audit record.
#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub kind: AuditKind,
    pub severity: Severity,
    pub code: ReasonCode,
    pub symbol: String,
    pub detail: String,
}

/// Audit sink. The pipeline never inspects the outcome of `emit`, so
/// implementations swallow their own failures and must not panic; an
/// emitter problem can never change a decision.
pub trait AuditEmitter: Send + Sync {
    fn emit(&self, event: AuditEvent);
}

/// Sink that drops every event; the default when callers have no audit bus.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullEmitter;

impl AuditEmitter for NullEmitter {
    fn emit(&self, _event: AuditEvent) {}
}
