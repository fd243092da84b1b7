//! Decision-request types consumed by the admission pipeline.
//!
//! One request is immutable for the duration of a `decide` call; the
//! pipeline keeps no state tied to it. Required numeric fields are
//! validated up front: a malformed required field rejects the call
//! instead of flowing NaN through the guards.

use std::fmt;

// --- Account ------------------------------------------------------------

/// Trading mode of the calling account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountMode {
    Live,
    Paper,
}

impl AccountMode {
    pub fn as_str(self) -> &'static str {
        match self {
            AccountMode::Live => "live",
            AccountMode::Paper => "paper",
        }
    }
}

/// Caller account context.
#[derive(Debug, Clone)]
pub struct AccountCtx {
    pub mode: AccountMode,
}

// --- Order --------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }
}

/// Order under admission review.
#[derive(Debug, Clone)]
pub struct OrderSpec {
    pub symbol: String,
    pub side: Side,
    /// Order quantity in instrument units; must be finite and positive.
    pub qty: f64,
    /// Notional value if the caller already computed one.
    pub notional: Option<f64>,
    /// Reference price, used to derive notional when `notional` is absent.
    pub price: Option<f64>,
}

impl OrderSpec {
    /// Notional used for risk scaling: explicit `notional`, else
    /// `qty * price`, else `qty` as a unit-notional proxy.
    pub fn base_notional(&self) -> f64 {
        if let Some(n) = self.notional {
            n
        } else if let Some(p) = self.price {
            self.qty * p
        } else {
            self.qty
        }
    }
}

// --- Market snapshot ----------------------------------------------------

/// Point-in-time market view for one decision.
///
/// Optional fields feed optional guards: absence disengages the guard
/// (skip, not deny). Trap delta arrays longer than the configured depth
/// are truncated by the detector; entries are floored at zero.
#[derive(Debug, Clone)]
pub struct MarketSnapshot {
    /// Observed round-trip latency for this venue, in milliseconds.
    pub latency_ms: f64,
    /// Estimated slippage for the order size, in bps.
    pub slip_bps_est: f64,
    /// Adverse edge estimate (loss when wrong), in bps.
    pub a_bps: f64,
    /// Favorable edge estimate (gain when right), in bps.
    pub b_bps: f64,
    /// Composite model score fed to the calibrator.
    pub score: f64,
    /// Regime label forwarded verbatim to the calibrator.
    pub mode_regime: String,
    /// Quoted spread, in bps.
    pub spread_bps: f64,
    /// Per-level cancel volume deltas over the trap window.
    pub trap_cancel_deltas: Option<Vec<f64>>,
    /// Per-level add volume deltas over the trap window.
    pub trap_add_deltas: Option<Vec<f64>>,
    /// Trade prints observed over the trap window.
    pub trap_trades_cnt: Option<u32>,
    /// Order-book imbalance sign for the trap divergence check.
    pub trap_obi_sign: Option<f64>,
    /// Trade-flow imbalance sign for the trap divergence check.
    pub trap_tfi_sign: Option<f64>,
    /// Per-trade return samples for the sequential-test guard.
    pub sprt_samples: Option<Vec<f64>>,
    /// Signed daily pnl in the same percent units as the drawdown cap.
    pub pnl_today_pct: Option<f64>,
    /// Currently open position count.
    pub open_positions: Option<u32>,
}

// --- Boundary error -----------------------------------------------------

/// Rejection of the `decide` call itself. The caller retries with a
/// corrected request; an `Err` never implies approval.
#[derive(Debug, Clone, PartialEq)]
pub enum AdmissionError {
    InvalidRequest { field: &'static str, detail: String },
}

impl fmt::Display for AdmissionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdmissionError::InvalidRequest { field, detail } => {
                write!(f, "invalid request field `{field}`: {detail}")
            }
        }
    }
}

impl std::error::Error for AdmissionError {}

// --- Validation ---------------------------------------------------------

fn require_finite(field: &'static str, value: f64) -> Result<(), AdmissionError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(AdmissionError::InvalidRequest {
            field,
            detail: format!("expected a finite number, got {value}"),
        })
    }
}

/// Reject malformed required fields before any guard runs.
pub(crate) fn validate_request(
    order: &OrderSpec,
    market: &MarketSnapshot,
    fees_bps: f64,
) -> Result<(), AdmissionError> {
    if order.symbol.is_empty() {
        return Err(AdmissionError::InvalidRequest {
            field: "order.symbol",
            detail: "must not be empty".to_string(),
        });
    }
    if !order.qty.is_finite() || order.qty <= 0.0 {
        return Err(AdmissionError::InvalidRequest {
            field: "order.qty",
            detail: format!("expected a finite positive quantity, got {}", order.qty),
        });
    }
    if let Some(n) = order.notional {
        require_finite("order.notional", n)?;
    }
    if let Some(p) = order.price {
        require_finite("order.price", p)?;
    }
    if !market.latency_ms.is_finite() || market.latency_ms < 0.0 {
        return Err(AdmissionError::InvalidRequest {
            field: "market.latency_ms",
            detail: format!("expected finite non-negative ms, got {}", market.latency_ms),
        });
    }
    require_finite("market.slip_bps_est", market.slip_bps_est)?;
    require_finite("market.a_bps", market.a_bps)?;
    require_finite("market.b_bps", market.b_bps)?;
    require_finite("market.score", market.score)?;
    require_finite("market.spread_bps", market.spread_bps)?;
    require_finite("fees_bps", fees_bps)?;
    if let Some(pnl) = market.pnl_today_pct {
        require_finite("market.pnl_today_pct", pnl)?;
    }
    Ok(())
}
