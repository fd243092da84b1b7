//! Pre-trade admission control.

pub mod collab;
pub mod edge;
pub mod latency;
pub mod observe;
pub mod pipeline;
pub mod reason;
pub mod request;
pub mod spread;

pub use collab::{
    AuditEmitter, AuditEvent, AuditKind, GovernanceHook, GovernanceIntent, GovernanceRuling,
    NullEmitter, ReturnCalibrator, Severity,
};
pub use edge::{
    EdgeInput, GateFinding, SlipInput, evaluate_expected_return, evaluate_slippage,
};
pub use latency::{LatencyInput, evaluate_latency_cutoff};
pub use observe::{
    Decision, DecisionTrace, EdgeReport, GateStep, GateTraceEntry, GateVerdict, GovernanceReport,
    HealthReport, LatencyReport, SlipReport, SpreadReport, SprtGateReport, TrapReport,
};
pub use pipeline::{
    AdmissionConfig, AdmissionConfigError, AdmissionPipeline, GateOrderProfile, PipelineCounters,
};
pub use reason::{ReasonCode, reason_registry, reason_registry_contains};
pub use request::{AccountCtx, AccountMode, AdmissionError, MarketSnapshot, OrderSpec, Side};
pub use spread::{SpreadInput, evaluate_spread_guard};
