//! Tunable registry and layered resolution.
//!
//! Every numeric knob the admission layer exposes lives in the [`Tunable`]
//! registry with a dotted parameter name, an environment override, and a
//! shipped default. Resolution is layered: environment beats explicit
//! operator config, which beats legacy config, which beats the default.
//! Malformed values fail resolution instead of silently falling back.

use std::collections::HashMap;
use std::time::Duration;

use warden_core::admission::{AdmissionConfig, GateOrderProfile};
use warden_core::health::HealthConfig;
use warden_core::risk::RiskConfig;

use crate::scanner::ScannerConfig;

/// Environment override for the gate-order profile.
pub const GATE_ORDER_ENV_VAR: &str = "WARDEN_GATE_ORDER";

/// Environment override for the sequential-test feature flag.
pub const SPRT_ENABLED_ENV_VAR: &str = "WARDEN_SPRT_ENABLED";

// --- Registry ----------------------------------------------------------

/// Every numeric tunable, one variant per knob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tunable {
    LatencyMaxMs,
    HealthP95ThresholdMs,
    HealthWindowSecs,
    HealthCooloffSecs,
    HealthHaltRepeatCount,
    TrapZThreshold,
    TrapCancelPercentile,
    TrapScoreThreshold,
    TrapWindowSecs,
    TrapDepthLevels,
    MinExpectedReturnBps,
    SlipEtaFraction,
    SpreadLimitBps,
    SprtMu0,
    SprtMu1,
    SprtSigma,
    SprtAlpha,
    SprtBeta,
    SprtMaxObservations,
    SprtDeadlineMs,
    RiskDdCapPct,
    RiskMaxConcurrent,
    RiskSizeScale,
    ScannerPeriodSecs,
    SnapshotMaxIntervalSecs,
    SnapshotMaxEvents,
}

pub const EXPECTED_TUNABLE_COUNT: usize = 26;

pub const ALL_TUNABLES: &[Tunable] = &[
    Tunable::LatencyMaxMs,
    Tunable::HealthP95ThresholdMs,
    Tunable::HealthWindowSecs,
    Tunable::HealthCooloffSecs,
    Tunable::HealthHaltRepeatCount,
    Tunable::TrapZThreshold,
    Tunable::TrapCancelPercentile,
    Tunable::TrapScoreThreshold,
    Tunable::TrapWindowSecs,
    Tunable::TrapDepthLevels,
    Tunable::MinExpectedReturnBps,
    Tunable::SlipEtaFraction,
    Tunable::SpreadLimitBps,
    Tunable::SprtMu0,
    Tunable::SprtMu1,
    Tunable::SprtSigma,
    Tunable::SprtAlpha,
    Tunable::SprtBeta,
    Tunable::SprtMaxObservations,
    Tunable::SprtDeadlineMs,
    Tunable::RiskDdCapPct,
    Tunable::RiskMaxConcurrent,
    Tunable::RiskSizeScale,
    Tunable::ScannerPeriodSecs,
    Tunable::SnapshotMaxIntervalSecs,
    Tunable::SnapshotMaxEvents,
];

impl Tunable {
    /// Dotted parameter name used in operator config and diagnostics.
    pub fn param_name(self) -> &'static str {
        match self {
            Tunable::LatencyMaxMs => "latency.max_ms",
            Tunable::HealthP95ThresholdMs => "health.p95_threshold_ms",
            Tunable::HealthWindowSecs => "health.window_secs",
            Tunable::HealthCooloffSecs => "health.cooloff_secs",
            Tunable::HealthHaltRepeatCount => "health.halt_repeat_count",
            Tunable::TrapZThreshold => "trap.z_threshold",
            Tunable::TrapCancelPercentile => "trap.cancel_percentile",
            Tunable::TrapScoreThreshold => "trap.score_threshold",
            Tunable::TrapWindowSecs => "trap.window_secs",
            Tunable::TrapDepthLevels => "trap.depth_levels",
            Tunable::MinExpectedReturnBps => "edge.min_expected_return_bps",
            Tunable::SlipEtaFraction => "edge.slip_eta_fraction",
            Tunable::SpreadLimitBps => "spread.limit_bps",
            Tunable::SprtMu0 => "sprt.mu0",
            Tunable::SprtMu1 => "sprt.mu1",
            Tunable::SprtSigma => "sprt.sigma",
            Tunable::SprtAlpha => "sprt.alpha",
            Tunable::SprtBeta => "sprt.beta",
            Tunable::SprtMaxObservations => "sprt.max_observations",
            Tunable::SprtDeadlineMs => "sprt.deadline_ms",
            Tunable::RiskDdCapPct => "risk.dd_cap_pct",
            Tunable::RiskMaxConcurrent => "risk.max_concurrent",
            Tunable::RiskSizeScale => "risk.size_scale",
            Tunable::ScannerPeriodSecs => "scanner.period_secs",
            Tunable::SnapshotMaxIntervalSecs => "scanner.snapshot_max_interval_secs",
            Tunable::SnapshotMaxEvents => "scanner.snapshot_max_events",
        }
    }

    /// Environment variable that overrides every other layer.
    pub fn env_var(self) -> &'static str {
        match self {
            Tunable::LatencyMaxMs => "WARDEN_LATENCY_MAX_MS",
            Tunable::HealthP95ThresholdMs => "WARDEN_HEALTH_P95_THRESHOLD_MS",
            Tunable::HealthWindowSecs => "WARDEN_HEALTH_WINDOW_SECS",
            Tunable::HealthCooloffSecs => "WARDEN_HEALTH_COOLOFF_SECS",
            Tunable::HealthHaltRepeatCount => "WARDEN_HEALTH_HALT_REPEAT_COUNT",
            Tunable::TrapZThreshold => "WARDEN_TRAP_Z_THRESHOLD",
            Tunable::TrapCancelPercentile => "WARDEN_TRAP_CANCEL_PERCENTILE",
            Tunable::TrapScoreThreshold => "WARDEN_TRAP_SCORE_THRESHOLD",
            Tunable::TrapWindowSecs => "WARDEN_TRAP_WINDOW_SECS",
            Tunable::TrapDepthLevels => "WARDEN_TRAP_DEPTH_LEVELS",
            Tunable::MinExpectedReturnBps => "WARDEN_EDGE_MIN_EXPECTED_RETURN_BPS",
            Tunable::SlipEtaFraction => "WARDEN_EDGE_SLIP_ETA_FRACTION",
            Tunable::SpreadLimitBps => "WARDEN_SPREAD_LIMIT_BPS",
            Tunable::SprtMu0 => "WARDEN_SPRT_MU0",
            Tunable::SprtMu1 => "WARDEN_SPRT_MU1",
            Tunable::SprtSigma => "WARDEN_SPRT_SIGMA",
            Tunable::SprtAlpha => "WARDEN_SPRT_ALPHA",
            Tunable::SprtBeta => "WARDEN_SPRT_BETA",
            Tunable::SprtMaxObservations => "WARDEN_SPRT_MAX_OBSERVATIONS",
            Tunable::SprtDeadlineMs => "WARDEN_SPRT_DEADLINE_MS",
            Tunable::RiskDdCapPct => "WARDEN_RISK_DD_CAP_PCT",
            Tunable::RiskMaxConcurrent => "WARDEN_RISK_MAX_CONCURRENT",
            Tunable::RiskSizeScale => "WARDEN_RISK_SIZE_SCALE",
            Tunable::ScannerPeriodSecs => "WARDEN_SCANNER_PERIOD_SECS",
            Tunable::SnapshotMaxIntervalSecs => "WARDEN_SCANNER_SNAPSHOT_MAX_INTERVAL_SECS",
            Tunable::SnapshotMaxEvents => "WARDEN_SCANNER_SNAPSHOT_MAX_EVENTS",
        }
    }

    /// Shipped default. Kept in lockstep with the component `Default`
    /// impls; the registry tests assert the two never drift.
    pub fn default_value(self) -> f64 {
        match self {
            Tunable::LatencyMaxMs => 100.0,
            Tunable::HealthP95ThresholdMs => 150.0,
            Tunable::HealthWindowSecs => 60.0,
            Tunable::HealthCooloffSecs => 120.0,
            Tunable::HealthHaltRepeatCount => 3.0,
            Tunable::TrapZThreshold => 2.5,
            Tunable::TrapCancelPercentile => 90.0,
            Tunable::TrapScoreThreshold => 0.65,
            Tunable::TrapWindowSecs => 2.0,
            Tunable::TrapDepthLevels => 10.0,
            Tunable::MinExpectedReturnBps => 1.0,
            Tunable::SlipEtaFraction => 0.33,
            Tunable::SpreadLimitBps => 25.0,
            Tunable::SprtMu0 => 0.0,
            Tunable::SprtMu1 => 1.0,
            Tunable::SprtSigma => 1.0,
            Tunable::SprtAlpha => 0.05,
            Tunable::SprtBeta => 0.10,
            Tunable::SprtMaxObservations => 200.0,
            Tunable::SprtDeadlineMs => 50.0,
            Tunable::RiskDdCapPct => 0.5,
            Tunable::RiskMaxConcurrent => 5.0,
            Tunable::RiskSizeScale => 1.0,
            Tunable::ScannerPeriodSecs => 1.0,
            Tunable::SnapshotMaxIntervalSecs => 30.0,
            Tunable::SnapshotMaxEvents => 128.0,
        }
    }
}

// --- Layered resolution ----------------------------------------------------

/// Operator-supplied configuration layers, keyed by tunable. The gate-order
/// profile and the sequential-test flag are not numeric, so they ride along
/// as dedicated fields.
#[derive(Debug, Clone, Default)]
pub struct ConfigLayers {
    pub explicit: HashMap<Tunable, f64>,
    pub legacy: HashMap<Tunable, f64>,
    pub explicit_gate_order: Option<String>,
    pub legacy_gate_order: Option<String>,
    pub explicit_sprt_enabled: Option<bool>,
    pub legacy_sprt_enabled: Option<bool>,
}

/// Resolution failures surface instead of defaulting; a typo in an
/// environment override should stop startup, not silently revert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TunableParseError {
    BadEnvValue { var: &'static str, raw: String },
    NonFinite { param: &'static str, value: String },
    BadGateOrder { raw: String },
}

impl std::fmt::Display for TunableParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BadEnvValue { var, raw } => {
                write!(f, "environment override {var} is not usable: '{raw}'")
            }
            Self::NonFinite { param, value } => {
                write!(f, "config value for {param} is not finite: {value}")
            }
            Self::BadGateOrder { raw } => write!(f, "unknown gate order profile '{raw}'"),
        }
    }
}

impl std::error::Error for TunableParseError {}

/// Read a tunable through the layers: env, explicit, legacy, default.
pub fn resolve_tunable(
    tunable: Tunable,
    layers: &ConfigLayers,
    env: &dyn Fn(&str) -> Option<String>,
) -> Result<f64, TunableParseError> {
    let var = tunable.env_var();
    if let Some(raw) = env(var) {
        return match raw.trim().parse::<f64>() {
            Ok(value) if value.is_finite() => Ok(value),
            _ => Err(TunableParseError::BadEnvValue { var, raw }),
        };
    }
    if let Some(&value) = layers.explicit.get(&tunable) {
        return finite_or_err(tunable, value);
    }
    if let Some(&value) = layers.legacy.get(&tunable) {
        return finite_or_err(tunable, value);
    }
    Ok(tunable.default_value())
}

fn finite_or_err(tunable: Tunable, value: f64) -> Result<f64, TunableParseError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(TunableParseError::NonFinite {
            param: tunable.param_name(),
            value: value.to_string(),
        })
    }
}

/// Gate-order profile through the same layers.
pub fn resolve_gate_order(
    layers: &ConfigLayers,
    env: &dyn Fn(&str) -> Option<String>,
) -> Result<GateOrderProfile, TunableParseError> {
    if let Some(raw) = env(GATE_ORDER_ENV_VAR) {
        return GateOrderProfile::from_name(raw.trim())
            .ok_or(TunableParseError::BadGateOrder { raw });
    }
    for raw in [
        layers.explicit_gate_order.as_deref(),
        layers.legacy_gate_order.as_deref(),
    ]
    .into_iter()
    .flatten()
    {
        return GateOrderProfile::from_name(raw.trim()).ok_or_else(|| {
            TunableParseError::BadGateOrder {
                raw: raw.to_string(),
            }
        });
    }
    Ok(GateOrderProfile::default())
}

/// Sequential-test feature flag through the same layers.
pub fn resolve_sprt_enabled(
    layers: &ConfigLayers,
    env: &dyn Fn(&str) -> Option<String>,
) -> Result<bool, TunableParseError> {
    if let Some(raw) = env(SPRT_ENABLED_ENV_VAR) {
        return parse_flag(raw.trim()).ok_or(TunableParseError::BadEnvValue {
            var: SPRT_ENABLED_ENV_VAR,
            raw,
        });
    }
    if let Some(enabled) = layers.explicit_sprt_enabled {
        return Ok(enabled);
    }
    if let Some(enabled) = layers.legacy_sprt_enabled {
        return Ok(enabled);
    }
    Ok(AdmissionConfig::default().sprt_enabled)
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw {
        "1" | "true" | "TRUE" | "True" => Some(true),
        "0" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

/// Process-environment reader for the `env` argument of the resolvers.
pub fn process_env(var: &str) -> Option<String> {
    std::env::var(var).ok()
}

// --- Loaders ---------------------------------------------------------------

/// Resolve the full admission gate config. Range validation stays with
/// `AdmissionConfig::validate`, which the pipeline runs at construction.
pub fn load_admission_config(
    layers: &ConfigLayers,
    env: &dyn Fn(&str) -> Option<String>,
) -> Result<AdmissionConfig, TunableParseError> {
    Ok(AdmissionConfig {
        max_latency_ms: resolve_tunable(Tunable::LatencyMaxMs, layers, env)?,
        min_expected_return_bps: resolve_tunable(Tunable::MinExpectedReturnBps, layers, env)?,
        slip_eta_fraction: resolve_tunable(Tunable::SlipEtaFraction, layers, env)?,
        spread_limit_bps: resolve_tunable(Tunable::SpreadLimitBps, layers, env)?,
        gate_order: resolve_gate_order(layers, env)?,
        trap_z_threshold: resolve_tunable(Tunable::TrapZThreshold, layers, env)?,
        trap_cancel_percentile: resolve_tunable(Tunable::TrapCancelPercentile, layers, env)?,
        trap_score_threshold: resolve_tunable(Tunable::TrapScoreThreshold, layers, env)?,
        trap_window_secs: resolve_tunable(Tunable::TrapWindowSecs, layers, env)?,
        trap_depth_levels: resolve_tunable(Tunable::TrapDepthLevels, layers, env)? as usize,
        sprt_enabled: resolve_sprt_enabled(layers, env)?,
        sprt_mu0: resolve_tunable(Tunable::SprtMu0, layers, env)?,
        sprt_mu1: resolve_tunable(Tunable::SprtMu1, layers, env)?,
        sprt_sigma: resolve_tunable(Tunable::SprtSigma, layers, env)?,
        sprt_alpha: resolve_tunable(Tunable::SprtAlpha, layers, env)?,
        sprt_beta: resolve_tunable(Tunable::SprtBeta, layers, env)?,
        sprt_max_observations: resolve_tunable(Tunable::SprtMaxObservations, layers, env)? as u32,
        sprt_deadline_ms: resolve_tunable(Tunable::SprtDeadlineMs, layers, env)? as u64,
    })
}

pub fn load_health_config(
    layers: &ConfigLayers,
    env: &dyn Fn(&str) -> Option<String>,
) -> Result<HealthConfig, TunableParseError> {
    Ok(HealthConfig {
        p95_threshold_ms: resolve_tunable(Tunable::HealthP95ThresholdMs, layers, env)?,
        window_secs: resolve_tunable(Tunable::HealthWindowSecs, layers, env)? as u64,
        cooloff_secs: resolve_tunable(Tunable::HealthCooloffSecs, layers, env)? as u64,
        halt_repeat_count: resolve_tunable(Tunable::HealthHaltRepeatCount, layers, env)? as usize,
    })
}

pub fn load_risk_config(
    layers: &ConfigLayers,
    env: &dyn Fn(&str) -> Option<String>,
) -> Result<RiskConfig, TunableParseError> {
    Ok(RiskConfig {
        dd_cap_pct: resolve_tunable(Tunable::RiskDdCapPct, layers, env)?,
        max_concurrent: resolve_tunable(Tunable::RiskMaxConcurrent, layers, env)? as u32,
        size_scale: resolve_tunable(Tunable::RiskSizeScale, layers, env)?,
    })
}

pub fn load_scanner_config(
    layers: &ConfigLayers,
    env: &dyn Fn(&str) -> Option<String>,
) -> Result<ScannerConfig, TunableParseError> {
    Ok(ScannerConfig {
        period: secs_to_duration(resolve_tunable(Tunable::ScannerPeriodSecs, layers, env)?),
        snapshot_max_interval: secs_to_duration(resolve_tunable(
            Tunable::SnapshotMaxIntervalSecs,
            layers,
            env,
        )?),
        snapshot_max_events: resolve_tunable(Tunable::SnapshotMaxEvents, layers, env)?.max(0.0)
            as u64,
    })
}

fn secs_to_duration(secs: f64) -> Duration {
    // from_secs_f64 panics outside [0, ~5.8e11]; clamp well inside it.
    Duration::from_secs_f64(secs.clamp(0.0, 1e9))
}

// --- Tests ----------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn registry_lists_every_tunable_once() {
        assert_eq!(ALL_TUNABLES.len(), EXPECTED_TUNABLE_COUNT);
        let mut names: Vec<&str> = ALL_TUNABLES.iter().map(|t| t.param_name()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), EXPECTED_TUNABLE_COUNT);
    }

    #[test]
    fn all_tunables_have_finite_defaults() {
        for tunable in ALL_TUNABLES {
            let value = tunable.default_value();
            assert!(value.is_finite(), "{} -> {value}", tunable.param_name());
        }
    }

    #[test]
    fn env_vars_are_prefixed_and_unique() {
        let mut vars: Vec<&str> = ALL_TUNABLES.iter().map(|t| t.env_var()).collect();
        for var in &vars {
            assert!(var.starts_with("WARDEN_"), "{var}");
        }
        vars.sort_unstable();
        vars.dedup();
        assert_eq!(vars.len(), EXPECTED_TUNABLE_COUNT);
    }

    #[test]
    fn defaults_mirror_component_configs() {
        let admission = AdmissionConfig::default();
        let health = HealthConfig::default();
        let risk = RiskConfig::default();
        let scanner = ScannerConfig::default();

        assert_eq!(
            Tunable::LatencyMaxMs.default_value(),
            admission.max_latency_ms
        );
        assert_eq!(
            Tunable::MinExpectedReturnBps.default_value(),
            admission.min_expected_return_bps
        );
        assert_eq!(
            Tunable::SlipEtaFraction.default_value(),
            admission.slip_eta_fraction
        );
        assert_eq!(
            Tunable::SpreadLimitBps.default_value(),
            admission.spread_limit_bps
        );
        assert_eq!(
            Tunable::TrapZThreshold.default_value(),
            admission.trap_z_threshold
        );
        assert_eq!(
            Tunable::TrapCancelPercentile.default_value(),
            admission.trap_cancel_percentile
        );
        assert_eq!(
            Tunable::TrapScoreThreshold.default_value(),
            admission.trap_score_threshold
        );
        assert_eq!(
            Tunable::TrapWindowSecs.default_value(),
            admission.trap_window_secs
        );
        assert_eq!(
            Tunable::TrapDepthLevels.default_value(),
            admission.trap_depth_levels as f64
        );
        assert_eq!(Tunable::SprtMu0.default_value(), admission.sprt_mu0);
        assert_eq!(Tunable::SprtMu1.default_value(), admission.sprt_mu1);
        assert_eq!(Tunable::SprtSigma.default_value(), admission.sprt_sigma);
        assert_eq!(Tunable::SprtAlpha.default_value(), admission.sprt_alpha);
        assert_eq!(Tunable::SprtBeta.default_value(), admission.sprt_beta);
        assert_eq!(
            Tunable::SprtMaxObservations.default_value(),
            f64::from(admission.sprt_max_observations)
        );
        assert_eq!(
            Tunable::SprtDeadlineMs.default_value(),
            admission.sprt_deadline_ms as f64
        );

        assert_eq!(
            Tunable::HealthP95ThresholdMs.default_value(),
            health.p95_threshold_ms
        );
        assert_eq!(
            Tunable::HealthWindowSecs.default_value(),
            health.window_secs as f64
        );
        assert_eq!(
            Tunable::HealthCooloffSecs.default_value(),
            health.cooloff_secs as f64
        );
        assert_eq!(
            Tunable::HealthHaltRepeatCount.default_value(),
            health.halt_repeat_count as f64
        );

        assert_eq!(Tunable::RiskDdCapPct.default_value(), risk.dd_cap_pct);
        assert_eq!(
            Tunable::RiskMaxConcurrent.default_value(),
            f64::from(risk.max_concurrent)
        );
        assert_eq!(Tunable::RiskSizeScale.default_value(), risk.size_scale);

        assert_eq!(
            Tunable::ScannerPeriodSecs.default_value(),
            scanner.period.as_secs_f64()
        );
        assert_eq!(
            Tunable::SnapshotMaxIntervalSecs.default_value(),
            scanner.snapshot_max_interval.as_secs_f64()
        );
        assert_eq!(
            Tunable::SnapshotMaxEvents.default_value(),
            scanner.snapshot_max_events as f64
        );
    }

    #[test]
    fn resolution_returns_default_when_no_layer_speaks() {
        let layers = ConfigLayers::default();
        let value = resolve_tunable(Tunable::SpreadLimitBps, &layers, &no_env)
            .expect("default resolution");
        assert_eq!(value, Tunable::SpreadLimitBps.default_value());
    }

    #[test]
    fn non_finite_layer_value_is_rejected() {
        let mut layers = ConfigLayers::default();
        layers.explicit.insert(Tunable::SpreadLimitBps, f64::NAN);
        let err = resolve_tunable(Tunable::SpreadLimitBps, &layers, &no_env)
            .expect_err("NaN must not resolve");
        assert!(matches!(err, TunableParseError::NonFinite { .. }));
    }
}
