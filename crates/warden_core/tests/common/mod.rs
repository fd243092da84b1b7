//! Shared fixtures for the admission integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use warden_core::admission::{
    AccountCtx, AccountMode, AdmissionConfig, AdmissionPipeline, AuditEmitter, AuditEvent,
    GovernanceHook, GovernanceIntent, GovernanceRuling, MarketSnapshot, OrderSpec,
    ReturnCalibrator, Side,
};
use warden_core::health::{HealthConfig, HealthGuard};
use warden_core::risk::{RiskConfig, RiskContext, RiskManager};

/// Fixture model for every pipeline test: logistic win probability with
/// gain 2 over the signal score, and the usual net-edge identity
/// `p*b - (1-p)*a - fees - slip`.
pub struct LogisticCalibrator;

impl ReturnCalibrator for LogisticCalibrator {
    fn predict_p(&self, score: f64) -> f64 {
        1.0 / (1.0 + (-2.0 * score).exp())
    }

    fn expected_edge_bps(
        &self,
        score: f64,
        a_bps: f64,
        b_bps: f64,
        fees_bps: f64,
        slip_bps: f64,
        _regime: &str,
    ) -> f64 {
        let p = self.predict_p(score);
        p * b_bps - (1.0 - p) * a_bps - fees_bps - slip_bps
    }
}

/// Calibrator that only ever produces NaN.
pub struct BrokenCalibrator;

impl ReturnCalibrator for BrokenCalibrator {
    fn predict_p(&self, _score: f64) -> f64 {
        f64::NAN
    }

    fn expected_edge_bps(
        &self,
        _score: f64,
        _a_bps: f64,
        _b_bps: f64,
        _fees_bps: f64,
        _slip_bps: f64,
        _regime: &str,
    ) -> f64 {
        f64::NAN
    }
}

pub struct AllowAllGovernance;

impl GovernanceHook for AllowAllGovernance {
    fn approve(&self, _intent: &GovernanceIntent<'_>, _risk: &RiskContext) -> GovernanceRuling {
        GovernanceRuling::allow()
    }
}

/// Governance hook that vetoes everything with a fixed code.
pub struct VetoGovernance {
    pub code: String,
    pub notes: Vec<String>,
}

impl GovernanceHook for VetoGovernance {
    fn approve(&self, _intent: &GovernanceIntent<'_>, _risk: &RiskContext) -> GovernanceRuling {
        GovernanceRuling::veto(self.code.clone(), self.notes.clone())
    }
}

/// Audit sink that captures every event for assertions.
#[derive(Default)]
pub struct RecordingEmitter {
    events: Mutex<Vec<AuditEvent>>,
}

impl RecordingEmitter {
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl AuditEmitter for RecordingEmitter {
    fn emit(&self, event: AuditEvent) {
        self.events.lock().unwrap().push(event);
    }
}

pub fn paper_account() -> AccountCtx {
    AccountCtx {
        mode: AccountMode::Paper,
    }
}

pub fn order(symbol: &str) -> OrderSpec {
    OrderSpec {
        symbol: symbol.to_string(),
        side: Side::Buy,
        qty: 1.0,
        notional: Some(10_000.0),
        price: None,
    }
}

/// Market view that clears every guard under the default config.
pub fn calm_market() -> MarketSnapshot {
    MarketSnapshot {
        latency_ms: 10.0,
        slip_bps_est: 1.0,
        a_bps: 5.0,
        b_bps: 12.0,
        score: 0.9,
        mode_regime: "trend".to_string(),
        spread_bps: 5.0,
        trap_cancel_deltas: None,
        trap_add_deltas: None,
        trap_trades_cnt: None,
        trap_obi_sign: None,
        trap_tfi_sign: None,
        sprt_samples: None,
        pnl_today_pct: None,
        open_positions: None,
    }
}

/// Pipeline with default configs and the logistic fixture calibrator.
pub fn pipeline() -> AdmissionPipeline {
    pipeline_with(AdmissionConfig::default())
}

pub fn pipeline_with(config: AdmissionConfig) -> AdmissionPipeline {
    pipeline_full(config, HealthConfig::default(), RiskConfig::default())
}

pub fn pipeline_full(
    config: AdmissionConfig,
    health_config: HealthConfig,
    risk_config: RiskConfig,
) -> AdmissionPipeline {
    let health = HealthGuard::new(health_config).expect("valid health config");
    let risk = RiskManager::new(risk_config).expect("valid risk config");
    AdmissionPipeline::new(config, health, risk, Arc::new(LogisticCalibrator))
        .expect("valid admission config")
}
