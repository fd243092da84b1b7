//! Account-level risk caps: drawdown, concurrency, and the size kill switch.
//!
//! The manager scales candidate notional by the configured `size_scale` and
//! denies in a fixed order: kill switch first, then daily drawdown, then
//! concurrent position count. Checks that lack their input (no PnL reading,
//! no position count) are skipped rather than guessed.

use std::sync::Mutex;

use crate::admission::ReasonCode;

// --- Config -----------------------------------------------------------------

/// Risk cap configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskConfig {
    /// Daily drawdown cap as a positive fraction (0.5 = 50% of the daily
    /// loss budget).
    pub dd_cap_pct: f64,
    /// Maximum simultaneously open positions.
    pub max_concurrent: u32,
    /// Multiplier applied to candidate notional. Zero or negative acts as a
    /// kill switch: every candidate is denied.
    pub size_scale: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            dd_cap_pct: 0.5,
            max_concurrent: 5,
            size_scale: 1.0,
        }
    }
}

impl RiskConfig {
    /// Validate field ranges. `size_scale <= 0` is permitted (kill switch);
    /// values above 1 are not, scaling only ever shrinks.
    pub fn validate(&self) -> Result<(), RiskConfigError> {
        if !self.dd_cap_pct.is_finite() || self.dd_cap_pct <= 0.0 {
            return Err(RiskConfigError::BadDrawdownCap {
                value: self.dd_cap_pct,
            });
        }
        if !self.size_scale.is_finite() || self.size_scale > 1.0 {
            return Err(RiskConfigError::BadSizeScale {
                value: self.size_scale,
            });
        }
        Ok(())
    }
}

/// Rejected risk configuration values.
#[derive(Debug, Clone, PartialEq)]
pub enum RiskConfigError {
    /// Drawdown cap must be finite and strictly positive.
    BadDrawdownCap { value: f64 },
    /// Size scale must be finite and at most 1.
    BadSizeScale { value: f64 },
}

impl std::fmt::Display for RiskConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskConfigError::BadDrawdownCap { value } => {
                write!(f, "dd_cap_pct must be finite and positive: {value}")
            }
            RiskConfigError::BadSizeScale { value } => {
                write!(f, "size_scale must be finite and at most 1: {value}")
            }
        }
    }
}

impl std::error::Error for RiskConfigError {}

// --- Decision ---------------------------------------------------------------

/// Inputs and derived numbers behind one risk decision. Shared with the
/// governance hook so external vetoes see the same picture the caps saw.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskContext {
    /// Size multiplier in force when the decision was made.
    pub size_scale: f64,
    /// Candidate notional after scaling.
    pub scaled_notional: f64,
    /// Fraction of the drawdown cap consumed today, when PnL was supplied.
    pub dd_used_pct: Option<f64>,
    /// Drawdown cap in force.
    pub dd_cap_pct: f64,
    /// Open position count, when supplied.
    pub open_positions: Option<u32>,
    /// Concurrency cap in force.
    pub max_concurrent: u32,
}

/// Outcome of the risk caps for one candidate order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskDecision {
    pub allow: bool,
    /// Denial reason when `allow` is false.
    pub reason: Option<ReasonCode>,
    pub scaled_notional: f64,
    pub context: RiskContext,
}

// --- Manager ---------------------------------------------------------------

/// Thread-safe holder for the risk caps.
///
/// Config swaps are atomic with respect to decisions: each decision reads
/// one consistent snapshot of the config under the lock and computes outside
/// it.
#[derive(Debug)]
pub struct RiskManager {
    config: Mutex<RiskConfig>,
}

impl RiskManager {
    /// Build with a validated config.
    pub fn new(config: RiskConfig) -> Result<Self, RiskConfigError> {
        config.validate()?;
        Ok(Self {
            config: Mutex::new(config),
        })
    }

    /// Replace the config. Invalid values are rejected and the previous
    /// config stays in force.
    pub fn set_config(&self, config: RiskConfig) -> Result<(), RiskConfigError> {
        config.validate()?;
        let mut guard = self.config.lock().expect("risk config mutex poisoned");
        *guard = config;
        Ok(())
    }

    /// Snapshot of the config in force.
    pub fn config(&self) -> RiskConfig {
        *self.config.lock().expect("risk config mutex poisoned")
    }

    /// Evaluate the caps for one candidate order.
    ///
    /// `base_notional` is clamped to zero when non-finite so a bad upstream
    /// number cannot poison the scaled output. Check order: kill switch,
    /// drawdown, concurrency.
    pub fn decide(
        &self,
        base_notional: f64,
        pnl_today_pct: Option<f64>,
        open_positions: Option<u32>,
    ) -> RiskDecision {
        let config = self.config();
        let base = if base_notional.is_finite() {
            base_notional
        } else {
            0.0
        };
        let scaled_notional = base * config.size_scale.max(0.0);

        let dd_used_pct = pnl_today_pct
            .filter(|pnl| pnl.is_finite())
            .map(|pnl| (-pnl).max(0.0));

        let context = RiskContext {
            size_scale: config.size_scale,
            scaled_notional,
            dd_used_pct,
            dd_cap_pct: config.dd_cap_pct,
            open_positions,
            max_concurrent: config.max_concurrent,
        };

        if config.size_scale <= 0.0 {
            return Self::deny(ReasonCode::RiskScaleZero, context);
        }

        if let Some(used) = dd_used_pct
            && used >= config.dd_cap_pct
        {
            return Self::deny(ReasonCode::RiskDrawdown, context);
        }

        if let Some(open) = open_positions
            && open >= config.max_concurrent
        {
            return Self::deny(ReasonCode::RiskConcurrency, context);
        }

        RiskDecision {
            allow: true,
            reason: None,
            scaled_notional,
            context,
        }
    }

    /// Context snapshot for callers that need the risk view without running
    /// the caps, such as governance on a request where the caps were skipped.
    pub fn context_for(&self, base_notional: f64) -> RiskContext {
        let config = self.config();
        let base = if base_notional.is_finite() {
            base_notional
        } else {
            0.0
        };
        RiskContext {
            size_scale: config.size_scale,
            scaled_notional: base * config.size_scale.max(0.0),
            dd_used_pct: None,
            dd_cap_pct: config.dd_cap_pct,
            open_positions: None,
            max_concurrent: config.max_concurrent,
        }
    }

    fn deny(reason: ReasonCode, context: RiskContext) -> RiskDecision {
        tracing::debug!(
            "RiskDeny reason={} scaled_notional={:.4} dd_used={:?} open={:?}",
            reason.as_str(),
            context.scaled_notional,
            context.dd_used_pct,
            context.open_positions
        );
        RiskDecision {
            allow: false,
            reason: Some(reason),
            scaled_notional: context.scaled_notional,
            context,
        }
    }
}
