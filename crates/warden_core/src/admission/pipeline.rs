//! The admission chokepoint: every candidate order passes through here
//! exactly once before dispatch.
//!
//! Guard order is fixed: latency, health, trap, expected-return and
//! slippage (their relative order is configurable), risk caps, sequential
//! test, spread, governance. The latency cutoff and the spread guard run
//! unconditionally; the spread guard additionally rewrites the reason of
//! an already-denied request, so a wide market always surfaces as
//! `spread_too_wide`. Every guard behind a guard that already denied is
//! recorded in the trace as skipped rather than silently dropped.
//!
//! Numeric trouble inside a guard denies conservatively or disengages the
//! guard with a diagnostic; it never aborts the decision.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::health::{HealthGuard, HealthState, epoch_ms_now};
use crate::microstructure::trap::{
    TrapWindow, cancel_ratio, replenish_latency_ms, trap_feature_score,
};
use crate::risk::{RiskConfig, RiskConfigError, RiskManager};
use crate::sequential::{SequentialTest, SprtError, SprtOutcome, SprtTest};

use super::collab::{
    AuditEmitter, AuditEvent, AuditKind, GovernanceHook, GovernanceIntent, NullEmitter,
    ReturnCalibrator, Severity,
};
use super::edge::{EdgeInput, GateFinding, SlipInput, evaluate_expected_return, evaluate_slippage};
use super::latency::{LatencyInput, evaluate_latency_cutoff};
use super::observe::{
    Decision, DecisionTrace, GateStep, GateVerdict, HealthReport, SprtGateReport, TrapReport,
};
use super::reason::ReasonCode;
use super::request::{AccountCtx, AdmissionError, MarketSnapshot, OrderSpec, validate_request};
use super::spread::{SpreadInput, evaluate_spread_guard};

// --- Gate order ------------------------------------------------------------

/// Relative order of the expected-return and slippage checks. Both are
/// always computed; the profile decides which one gets to set the reason
/// first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateOrderProfile {
    ErBeforeSlip,
    SlipBeforeEr,
}

impl GateOrderProfile {
    pub fn as_str(self) -> &'static str {
        match self {
            GateOrderProfile::ErBeforeSlip => "er_before_slip",
            GateOrderProfile::SlipBeforeEr => "slip_before_er",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "er_before_slip" => Some(GateOrderProfile::ErBeforeSlip),
            "slip_before_er" => Some(GateOrderProfile::SlipBeforeEr),
            _ => None,
        }
    }
}

impl Default for GateOrderProfile {
    fn default() -> Self {
        GateOrderProfile::ErBeforeSlip
    }
}

// --- Config -----------------------------------------------------------------

/// Thresholds and switches for the guard chain.
#[derive(Debug, Clone)]
pub struct AdmissionConfig {
    /// Latency cutoff, in milliseconds.
    pub max_latency_ms: f64,
    /// Expected-return floor, in bps.
    pub min_expected_return_bps: f64,
    /// Fraction of the positive edge that slippage may consume.
    pub slip_eta_fraction: f64,
    /// Spread ceiling, in bps.
    pub spread_limit_bps: f64,
    pub gate_order: GateOrderProfile,
    /// Trap z-score trip level.
    pub trap_z_threshold: f64,
    /// Percentile of the cancel-rate baseline used by the divergence check.
    pub trap_cancel_percentile: f64,
    /// Trip level for the secondary trap feature score, in `[0, 1]`.
    pub trap_score_threshold: f64,
    /// Width of one trap observation window, in seconds.
    pub trap_window_secs: f64,
    /// Book levels folded into the trap rates.
    pub trap_depth_levels: usize,
    /// Master switch for the sequential-test guard.
    pub sprt_enabled: bool,
    pub sprt_mu0: f64,
    pub sprt_mu1: f64,
    pub sprt_sigma: f64,
    pub sprt_alpha: f64,
    pub sprt_beta: f64,
    /// Observation ceiling forcing a terminal outcome.
    pub sprt_max_observations: u32,
    /// Wall-clock budget for one in-decision test run.
    pub sprt_deadline_ms: u64,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        AdmissionConfig {
            max_latency_ms: 100.0,
            min_expected_return_bps: 1.0,
            slip_eta_fraction: 0.33,
            spread_limit_bps: 25.0,
            gate_order: GateOrderProfile::ErBeforeSlip,
            trap_z_threshold: 2.5,
            trap_cancel_percentile: 90.0,
            trap_score_threshold: 0.65,
            trap_window_secs: 2.0,
            trap_depth_levels: 10,
            sprt_enabled: false,
            sprt_mu0: 0.0,
            sprt_mu1: 1.0,
            sprt_sigma: 1.0,
            sprt_alpha: 0.05,
            sprt_beta: 0.10,
            sprt_max_observations: 200,
            sprt_deadline_ms: 50,
        }
    }
}

/// Rejected pipeline configuration.
#[derive(Debug, Clone, PartialEq)]
pub enum AdmissionConfigError {
    BadThreshold { param: &'static str, value: f64 },
    /// The sequential-test parameters failed their own construction check.
    BadSequentialTest(SprtError),
}

impl std::fmt::Display for AdmissionConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdmissionConfigError::BadThreshold { param, value } => {
                write!(f, "invalid admission config: {param} = {value} is out of range")
            }
            AdmissionConfigError::BadSequentialTest(err) => {
                write!(f, "invalid admission config: {err}")
            }
        }
    }
}

impl std::error::Error for AdmissionConfigError {}

impl AdmissionConfig {
    /// Validate thresholds; with the sequential guard enabled, its
    /// parameters are proven constructible here so `decide` never meets a
    /// config-level test failure.
    pub fn validate(&self) -> Result<(), AdmissionConfigError> {
        fn check(
            param: &'static str,
            value: f64,
            ok: bool,
        ) -> Result<(), AdmissionConfigError> {
            if ok {
                Ok(())
            } else {
                Err(AdmissionConfigError::BadThreshold { param, value })
            }
        }

        check(
            "max_latency_ms",
            self.max_latency_ms,
            self.max_latency_ms.is_finite() && self.max_latency_ms > 0.0,
        )?;
        check(
            "min_expected_return_bps",
            self.min_expected_return_bps,
            self.min_expected_return_bps.is_finite(),
        )?;
        check(
            "slip_eta_fraction",
            self.slip_eta_fraction,
            self.slip_eta_fraction.is_finite()
                && (0.0..=1.0).contains(&self.slip_eta_fraction),
        )?;
        check(
            "spread_limit_bps",
            self.spread_limit_bps,
            self.spread_limit_bps.is_finite() && self.spread_limit_bps > 0.0,
        )?;
        check(
            "trap_z_threshold",
            self.trap_z_threshold,
            self.trap_z_threshold.is_finite() && self.trap_z_threshold > 0.0,
        )?;
        check(
            "trap_cancel_percentile",
            self.trap_cancel_percentile,
            self.trap_cancel_percentile.is_finite()
                && self.trap_cancel_percentile > 0.0
                && self.trap_cancel_percentile <= 100.0,
        )?;
        check(
            "trap_score_threshold",
            self.trap_score_threshold,
            self.trap_score_threshold.is_finite()
                && self.trap_score_threshold > 0.0
                && self.trap_score_threshold <= 1.0,
        )?;
        check(
            "trap_window_secs",
            self.trap_window_secs,
            self.trap_window_secs.is_finite() && self.trap_window_secs > 0.0,
        )?;
        check(
            "trap_depth_levels",
            self.trap_depth_levels as f64,
            self.trap_depth_levels >= 1,
        )?;

        if self.sprt_enabled {
            check(
                "sprt_max_observations",
                f64::from(self.sprt_max_observations),
                self.sprt_max_observations >= 1,
            )?;
            SprtTest::from_error_rates(
                self.sprt_mu0,
                self.sprt_mu1,
                self.sprt_sigma,
                self.sprt_alpha,
                self.sprt_beta,
                Some(self.sprt_max_observations),
            )
            .map_err(AdmissionConfigError::BadSequentialTest)?;
        }

        Ok(())
    }
}

// --- Metrics -------------------------------------------------------------

#[derive(Debug, Default)]
struct PipelineMetrics {
    decide_total: AtomicU64,
    allow_total: AtomicU64,
    deny_total: AtomicU64,
    spread_overwrite_total: AtomicU64,
}

impl PipelineMetrics {
    fn bump_decide(&self) {
        self.decide_total.fetch_add(1, Ordering::Relaxed);
    }

    fn bump_allow(&self) {
        self.allow_total.fetch_add(1, Ordering::Relaxed);
    }

    fn bump_deny(&self) {
        self.deny_total.fetch_add(1, Ordering::Relaxed);
    }

    fn bump_spread_overwrite(&self) {
        self.spread_overwrite_total.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> PipelineCounters {
        PipelineCounters {
            decide_total: self.decide_total.load(Ordering::Relaxed),
            allow_total: self.allow_total.load(Ordering::Relaxed),
            deny_total: self.deny_total.load(Ordering::Relaxed),
            spread_overwrite_total: self.spread_overwrite_total.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of the pipeline counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineCounters {
    pub decide_total: u64,
    pub allow_total: u64,
    pub deny_total: u64,
    /// Times the spread guard rewrote the reason of an earlier denial.
    pub spread_overwrite_total: u64,
}

// --- Pipeline ---------------------------------------------------------------

/// Stateful admission chokepoint.
///
/// `decide` takes `&self`: the health guard and the per-symbol trap windows
/// sit behind their own locks, the risk manager is internally synchronized,
/// and collaborators are shared trait objects. No lock is held across a
/// collaborator call.
pub struct AdmissionPipeline {
    config: AdmissionConfig,
    health: Mutex<HealthGuard>,
    traps: Mutex<HashMap<String, TrapWindow>>,
    risk: RiskManager,
    calibrator: Arc<dyn ReturnCalibrator>,
    governance: Option<Arc<dyn GovernanceHook>>,
    emitter: Arc<dyn AuditEmitter>,
    metrics: PipelineMetrics,
}

impl AdmissionPipeline {
    pub fn new(
        config: AdmissionConfig,
        health: HealthGuard,
        risk: RiskManager,
        calibrator: Arc<dyn ReturnCalibrator>,
    ) -> Result<Self, AdmissionConfigError> {
        config.validate()?;
        Ok(AdmissionPipeline {
            config,
            health: Mutex::new(health),
            traps: Mutex::new(HashMap::new()),
            risk,
            calibrator,
            governance: None,
            emitter: Arc::new(NullEmitter),
            metrics: PipelineMetrics::default(),
        })
    }

    /// Install the governance hook. Without one the governance step is
    /// disengaged, never vetoing.
    pub fn with_governance(mut self, hook: Arc<dyn GovernanceHook>) -> Self {
        self.governance = Some(hook);
        self
    }

    /// Replace the default no-op audit sink.
    pub fn with_emitter(mut self, emitter: Arc<dyn AuditEmitter>) -> Self {
        self.emitter = emitter;
        self
    }

    pub fn config(&self) -> &AdmissionConfig {
        &self.config
    }

    pub fn counters(&self) -> PipelineCounters {
        self.metrics.snapshot()
    }

    // --- decide -----------------------------------------------------------

    pub fn decide(
        &self,
        account: &AccountCtx,
        order: &OrderSpec,
        market: &MarketSnapshot,
        fees_bps: f64,
    ) -> Result<Decision, AdmissionError> {
        self.decide_at(epoch_ms_now(), account, order, market, fees_bps)
    }

    /// Run the full guard chain for one candidate order at `now_ms`.
    ///
    /// `Err` means the request itself was malformed and nothing was
    /// evaluated; a denial is an `Ok` decision with `allow = false` and
    /// `reason` naming the last guard that denied.
    pub fn decide_at(
        &self,
        now_ms: u64,
        account: &AccountCtx,
        order: &OrderSpec,
        market: &MarketSnapshot,
        fees_bps: f64,
    ) -> Result<Decision, AdmissionError> {
        validate_request(order, market, fees_bps)?;
        self.metrics.bump_decide();

        let mut allow = true;
        let mut reason = ReasonCode::Ok;
        let mut risk_scale = 1.0_f64;
        let mut trace = DecisionTrace::new();
        let mut audit: Vec<AuditEvent> = Vec::new();

        // 1. Latency cutoff, unconditional.
        let latency_report = evaluate_latency_cutoff(&LatencyInput {
            latency_ms: market.latency_ms,
            max_latency_ms: self.config.max_latency_ms,
        });
        if latency_report.breached {
            allow = false;
            reason = ReasonCode::LatencyExceeded;
            trace.reasons.push(format!(
                "latency: observed_ms={:.1} limit_ms={:.1}",
                latency_report.latency_ms, latency_report.limit_ms
            ));
            trace.record(GateStep::Latency, GateVerdict::Blocked);
        } else {
            trace.record(GateStep::Latency, GateVerdict::Passed);
        }
        trace.latency = Some(latency_report);

        // 2. Health guard. The sample is folded on every call; enforcement
        // applies only while the request is still allowed.
        let (health_state, health_report, health_audit) = {
            let mut guard = self.health.lock().expect("health guard mutex poisoned");
            let record = guard.record_at(now_ms, market.latency_ms);
            let state = guard.enforce_at(now_ms);
            let event = if record.escalated_to_halt || record.entered_cooloff {
                let (severity, code) = if record.escalated_to_halt {
                    (Severity::Critical, ReasonCode::HealthHalted)
                } else {
                    (Severity::Warn, ReasonCode::HealthCooloff)
                };
                Some(AuditEvent {
                    kind: AuditKind::HealthEscalation,
                    severity,
                    code,
                    symbol: order.symbol.clone(),
                    detail: format!(
                        "p95_ms={:?} warn_count={}",
                        record.p95_ms, record.warn_count
                    ),
                })
            } else {
                None
            };
            let report = HealthReport {
                state,
                p95_ms: record.p95_ms,
                warn_count: record.warn_count,
                escalated: record.entered_cooloff || record.escalated_to_halt,
            };
            (state, report, event)
        };
        if let Some(event) = health_audit {
            audit.push(event);
        }
        trace.gate_state = health_state;
        if health_state.denies() {
            trace
                .reasons
                .push(format!("health: state={}", health_state.as_str()));
            if allow {
                allow = false;
                reason = match health_state {
                    HealthState::Halted => ReasonCode::HealthHalted,
                    _ => ReasonCode::HealthCooloff,
                };
                trace.record(GateStep::Health, GateVerdict::Blocked);
            } else {
                trace.record(GateStep::Health, GateVerdict::Skipped);
            }
        } else {
            trace.record(GateStep::Health, GateVerdict::Passed);
        }
        trace.health = Some(health_report);

        // 3. Trap detector, evaluated only while still allowed so a denied
        // request does not feed the per-symbol baselines.
        if !allow {
            trace.record(GateStep::Trap, GateVerdict::Skipped);
        } else {
            match (&market.trap_cancel_deltas, &market.trap_add_deltas) {
                (Some(cancels), Some(adds)) => {
                    let reading = {
                        let mut traps = self.traps.lock().expect("trap window mutex poisoned");
                        let window = traps.entry(order.symbol.clone()).or_insert_with(|| {
                            TrapWindow::new(
                                self.config.trap_window_secs,
                                self.config.trap_depth_levels,
                            )
                        });
                        window.update(
                            cancels,
                            adds,
                            market.trap_trades_cnt.unwrap_or(0),
                            self.config.trap_z_threshold,
                            self.config.trap_cancel_percentile,
                            market.trap_obi_sign,
                            market.trap_tfi_sign,
                        )
                    };
                    let ratio = cancel_ratio(reading.cancel_rate, reading.repl_rate);
                    let repl_latency = replenish_latency_ms(reading.repl_rate);
                    let feature_score = trap_feature_score(ratio, repl_latency);
                    let tripped =
                        reading.flag || feature_score >= self.config.trap_score_threshold;
                    if tripped {
                        allow = false;
                        reason = ReasonCode::TrapSuspected;
                        trace.reasons.push(format!(
                            "trap: z={:.2} feature_score={:.2} cancel_rate={:.2} repl_rate={:.2}",
                            reading.z, feature_score, reading.cancel_rate, reading.repl_rate
                        ));
                        trace.record(GateStep::Trap, GateVerdict::Blocked);
                        audit.push(AuditEvent {
                            kind: AuditKind::TrapTrip,
                            severity: Severity::Warn,
                            code: ReasonCode::TrapSuspected,
                            symbol: order.symbol.clone(),
                            detail: format!(
                                "z={:.2} feature_score={:.2}",
                                reading.z, feature_score
                            ),
                        });
                    } else {
                        trace.record(GateStep::Trap, GateVerdict::Passed);
                    }
                    trace.trap = Some(TrapReport {
                        reading,
                        feature_score,
                        tripped,
                    });
                }
                _ => {
                    trace.record(GateStep::Trap, GateVerdict::Disengaged);
                }
            }
        }

        // 4. Expected return and slippage. Both are computed on every call
        // and always leave a diagnostic; the configured order decides which
        // may set the reason first.
        let edge_input = EdgeInput {
            score: market.score,
            a_bps: market.a_bps,
            b_bps: market.b_bps,
            fees_bps,
            slip_bps: market.slip_bps_est,
            regime: &market.mode_regime,
            min_expected_return_bps: self.config.min_expected_return_bps,
        };
        let (edge_report, edge_finding) =
            evaluate_expected_return(self.calibrator.as_ref(), &edge_input);
        let (slip_report, slip_finding) = evaluate_slippage(&SlipInput {
            slip_bps_est: market.slip_bps_est,
            e_pi_bps: edge_report.e_pi_bps,
            eta_fraction: self.config.slip_eta_fraction,
        });

        let ordered: [(GateStep, &GateFinding); 2] = match self.config.gate_order {
            GateOrderProfile::ErBeforeSlip => [
                (GateStep::ExpectedReturn, &edge_finding),
                (GateStep::Slippage, &slip_finding),
            ],
            GateOrderProfile::SlipBeforeEr => [
                (GateStep::Slippage, &slip_finding),
                (GateStep::ExpectedReturn, &edge_finding),
            ],
        };
        for (step, finding) in ordered {
            trace.reasons.push(finding.diagnostic.clone());
            if !finding.would_block {
                trace.record(step, GateVerdict::Passed);
            } else if allow {
                allow = false;
                reason = finding.reason;
                trace.record(step, GateVerdict::Blocked);
            } else {
                trace.record(step, GateVerdict::Skipped);
            }
        }
        trace.expected_return = Some(edge_report);
        trace.slippage = Some(slip_report);

        // 5. Risk caps.
        if !allow {
            trace.record(GateStep::Risk, GateVerdict::Skipped);
        } else {
            let decision = self.risk.decide(
                order.base_notional(),
                market.pnl_today_pct,
                market.open_positions,
            );
            risk_scale = decision.context.size_scale.clamp(0.0, 1.0);
            if decision.allow {
                trace.record(GateStep::Risk, GateVerdict::Passed);
            } else {
                allow = false;
                if let Some(code) = decision.reason {
                    reason = code;
                }
                let ctx = decision.context;
                trace.reasons.push(match decision.reason {
                    Some(ReasonCode::RiskDrawdown) => format!(
                        "risk: dd_used_pct={:.4} dd_cap_pct={:.4}",
                        ctx.dd_used_pct.unwrap_or(0.0),
                        ctx.dd_cap_pct
                    ),
                    Some(ReasonCode::RiskConcurrency) => format!(
                        "risk: open_positions={} max_concurrent={}",
                        ctx.open_positions.unwrap_or(0),
                        ctx.max_concurrent
                    ),
                    _ => format!("risk: size_scale={:.4}", ctx.size_scale),
                });
                trace.record(GateStep::Risk, GateVerdict::Blocked);
            }
            trace.risk = Some(decision.context);
        }

        // 6. Sequential test. Config was proven constructible in `validate`,
        // so a construction failure here can only follow a config bug;
        // either way the guard disengages instead of crashing the decision.
        if !self.config.sprt_enabled {
            trace.record(GateStep::Sprt, GateVerdict::Disengaged);
        } else if !allow {
            trace.record(GateStep::Sprt, GateVerdict::Skipped);
        } else {
            match &market.sprt_samples {
                Some(samples) if !samples.is_empty() => {
                    self.run_sprt_gate(samples, &mut allow, &mut reason, &mut trace);
                }
                _ => {
                    trace.record(GateStep::Sprt, GateVerdict::Disengaged);
                }
            }
        }

        // 7. Spread guard, unconditional. On breach it sets both the flag
        // and the reason even over an earlier different denial.
        let spread_report = evaluate_spread_guard(&SpreadInput {
            spread_bps: market.spread_bps,
            limit_bps: self.config.spread_limit_bps,
        });
        if spread_report.breached {
            trace.reasons.push(format!(
                "spread: spread_bps={:.2} limit_bps={:.2}",
                spread_report.spread_bps, spread_report.limit_bps
            ));
            if allow {
                trace.record(GateStep::Spread, GateVerdict::Blocked);
            } else {
                self.metrics.bump_spread_overwrite();
                trace.record(GateStep::Spread, GateVerdict::Overwrote);
            }
            allow = false;
            reason = ReasonCode::SpreadTooWide;
            audit.push(AuditEvent {
                kind: AuditKind::SpreadTrip,
                severity: Severity::Warn,
                code: ReasonCode::SpreadTooWide,
                symbol: order.symbol.clone(),
                detail: format!(
                    "spread_bps={:.2} limit_bps={:.2}",
                    spread_report.spread_bps, spread_report.limit_bps
                ),
            });
        } else {
            trace.record(GateStep::Spread, GateVerdict::Passed);
        }
        trace.spread = Some(spread_report);

        // 8. Governance veto, the last word on an otherwise-allowed order.
        match &self.governance {
            None => {
                trace.record(GateStep::Governance, GateVerdict::Disengaged);
            }
            Some(_) if !allow => {
                trace.record(GateStep::Governance, GateVerdict::Skipped);
            }
            Some(hook) => {
                let risk_view = trace
                    .risk
                    .unwrap_or_else(|| self.risk.context_for(order.base_notional()));
                let intent = GovernanceIntent {
                    symbol: &order.symbol,
                    side: order.side,
                    qty: order.qty,
                    mode: account.mode,
                };
                let ruling = hook.approve(&intent, &risk_view);
                if ruling.allow {
                    trace.record(GateStep::Governance, GateVerdict::Passed);
                    trace.governance = Some(super::observe::GovernanceReport {
                        allowed: true,
                        code: ruling.code,
                    });
                } else {
                    allow = false;
                    reason = ReasonCode::GovernanceVeto;
                    let code_note = ruling.code.clone().unwrap_or_else(|| "unspecified".into());
                    trace.reasons.push(format!("governance: veto code={code_note}"));
                    for note in &ruling.reasons {
                        trace.reasons.push(format!("governance: {note}"));
                    }
                    trace.record(GateStep::Governance, GateVerdict::Blocked);
                    trace.governance = Some(super::observe::GovernanceReport {
                        allowed: false,
                        code: ruling.code,
                    });
                }
            }
        }

        // Audit events go out after every lock is released. Emitter errors
        // are the emitter's problem; the decision is already made.
        for event in audit {
            self.emitter.emit(event);
        }

        if allow {
            self.metrics.bump_allow();
        } else {
            self.metrics.bump_deny();
        }
        tracing::debug!(
            "AdmissionDecision symbol={} allow={} reason={} risk_scale={:.2}",
            order.symbol,
            allow,
            reason.as_str(),
            risk_scale
        );

        Ok(Decision {
            allow,
            reason,
            risk_scale,
            observability: trace,
        })
    }

    fn run_sprt_gate(
        &self,
        samples: &[f64],
        allow: &mut bool,
        reason: &mut ReasonCode,
        trace: &mut DecisionTrace,
    ) {
        let test = SprtTest::from_error_rates(
            self.config.sprt_mu0,
            self.config.sprt_mu1,
            self.config.sprt_sigma,
            self.config.sprt_alpha,
            self.config.sprt_beta,
            Some(self.config.sprt_max_observations),
        );
        let mut test = match test {
            Ok(t) => t,
            Err(err) => {
                trace.reasons.push(format!("sprt: disengaged: {err}"));
                trace.record(GateStep::Sprt, GateVerdict::Disengaged);
                return;
            }
        };

        let deadline = Instant::now() + Duration::from_millis(self.config.sprt_deadline_ms);
        match test.run(samples, Some(deadline)) {
            Ok(run) => {
                if run.outcome == SprtOutcome::AcceptH0 {
                    *allow = false;
                    *reason = ReasonCode::SprtRejected;
                    trace.reasons.push(format!(
                        "sprt: outcome={} llr={:.4} samples={}",
                        run.outcome.as_str(),
                        run.llr,
                        run.samples_used
                    ));
                    trace.record(GateStep::Sprt, GateVerdict::Blocked);
                } else {
                    trace.record(GateStep::Sprt, GateVerdict::Passed);
                }
                trace.sprt = Some(SprtGateReport {
                    outcome: run.outcome,
                    llr: run.llr,
                    samples_used: run.samples_used,
                    deadline_hit: run.deadline_hit,
                });
            }
            Err(SprtError::NonFiniteObservation { value, index }) => {
                trace.reasons.push(format!(
                    "sprt: disengaged: non-finite sample {value} at {index:?}"
                ));
                trace.record(GateStep::Sprt, GateVerdict::Disengaged);
            }
            Err(err) => {
                trace.reasons.push(format!("sprt: disengaged: {err}"));
                trace.record(GateStep::Sprt, GateVerdict::Disengaged);
            }
        }
    }

    // --- operator surface --------------------------------------------------

    /// Health-guard state as enforcement would see it now.
    pub fn health_state(&self) -> HealthState {
        self.health_state_at(epoch_ms_now())
    }

    pub fn health_state_at(&self, now_ms: u64) -> HealthState {
        self.health
            .lock()
            .expect("health guard mutex poisoned")
            .enforce_at(now_ms)
    }

    /// Clear warns, cooloff, and halt; arm state is untouched.
    pub fn reset_health(&self) {
        self.health
            .lock()
            .expect("health guard mutex poisoned")
            .reset();
    }

    pub fn arm_health(&self) {
        self.health.lock().expect("health guard mutex poisoned").arm();
    }

    pub fn disarm_health(&self) {
        self.health
            .lock()
            .expect("health guard mutex poisoned")
            .disarm();
    }

    /// Extend the cooloff window; an active deadline never shortens.
    pub fn extend_cooloff(&self, secs: u64) {
        self.extend_cooloff_at(epoch_ms_now(), secs);
    }

    pub fn extend_cooloff_at(&self, now_ms: u64, secs: u64) {
        self.health
            .lock()
            .expect("health guard mutex poisoned")
            .cooloff_at(now_ms, secs);
    }

    /// Swap the risk caps at runtime. Rejected configs leave the previous
    /// caps in force.
    pub fn set_risk_config(&self, config: RiskConfig) -> Result<(), RiskConfigError> {
        self.risk.set_config(config)
    }

    pub fn risk_config(&self) -> RiskConfig {
        self.risk.config()
    }
}
