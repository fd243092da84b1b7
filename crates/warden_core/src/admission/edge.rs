//! Expected-return and slippage checks.
//!
//! Both are computed on every call regardless of the current decision;
//! the pipeline's fold step applies the first block raised while the
//! request was still allowed, in the configured order. Each check always
//! contributes a diagnostic line, pass or block.

use super::collab::ReturnCalibrator;
use super::observe::{EdgeReport, SlipReport};
use super::reason::ReasonCode;

/// Tagged outcome of one unconditionally-computed check.
#[derive(Debug, Clone, PartialEq)]
pub struct GateFinding {
    pub would_block: bool,
    pub reason: ReasonCode,
    pub diagnostic: String,
}

// --- Expected return ------------------------------------------------------

/// Inputs to the expected-return check.
#[derive(Debug, Clone)]
pub struct EdgeInput<'a> {
    pub score: f64,
    pub a_bps: f64,
    pub b_bps: f64,
    pub fees_bps: f64,
    pub slip_bps: f64,
    pub regime: &'a str,
    pub min_expected_return_bps: f64,
}

/// Ask the calibrator for the net edge and compare against the floor.
/// A non-finite calibrator answer blocks conservatively with its own
/// reason code instead of approving blind.
pub fn evaluate_expected_return(
    calibrator: &dyn ReturnCalibrator,
    input: &EdgeInput<'_>,
) -> (EdgeReport, GateFinding) {
    let e_pi_bps = calibrator.expected_edge_bps(
        input.score,
        input.a_bps,
        input.b_bps,
        input.fees_bps,
        input.slip_bps,
        input.regime,
    );

    if !e_pi_bps.is_finite() {
        let report = EdgeReport {
            e_pi_bps,
            min_bps: input.min_expected_return_bps,
            would_block: true,
        };
        let finding = GateFinding {
            would_block: true,
            reason: ReasonCode::CalibratorError,
            diagnostic: format!(
                "calibrator_error: non-finite edge estimate ({e_pi_bps}) for score {}",
                input.score
            ),
        };
        return (report, finding);
    }

    let would_block = e_pi_bps < input.min_expected_return_bps;
    let report = EdgeReport {
        e_pi_bps,
        min_bps: input.min_expected_return_bps,
        would_block,
    };
    let finding = GateFinding {
        would_block,
        reason: ReasonCode::ExpectedReturnLow,
        diagnostic: format!(
            "expected_return: e_pi_bps={e_pi_bps:.4} min_bps={:.4} block={would_block}",
            input.min_expected_return_bps
        ),
    };
    (report, finding)
}

// --- Slippage ---------------------------------------------------------------

/// Inputs to the slippage check. `e_pi_bps` comes from the expected-return
/// computation above, which runs on every call.
#[derive(Debug, Clone, Copy)]
pub struct SlipInput {
    pub slip_bps_est: f64,
    pub e_pi_bps: f64,
    pub eta_fraction: f64,
}

/// Slippage may consume at most an eta fraction of the positive edge.
/// With zero or negative edge the budget is zero, so any positive
/// slippage estimate blocks.
pub fn evaluate_slippage(input: &SlipInput) -> (SlipReport, GateFinding) {
    let edge_floor = input.e_pi_bps.max(0.0);
    let allowed_bps = input.eta_fraction * edge_floor;
    let would_block = input.slip_bps_est > allowed_bps;
    let report = SlipReport {
        slip_bps: input.slip_bps_est,
        allowed_bps,
        would_block,
    };
    let finding = GateFinding {
        would_block,
        reason: ReasonCode::SlippageExceeded,
        diagnostic: format!(
            "slippage: slip_bps={:.4} allowed_bps={allowed_bps:.4} block={would_block}",
            input.slip_bps_est
        ),
    };
    (report, finding)
}
