//! Fake-wall detector over a sliding cancel/add window.
//!
//! Consumes per-level cancel and add volume deltas plus a trade count per
//! window, and standardizes the cancel-replenish imbalance against its own
//! rolling history. Baselines are read BEFORE the current observation is
//! folded in, so a burst cannot inflate the baseline it is judged against.

use super::rolling::RollingWindow;

/// z-scores are clipped to this magnitude.
pub const Z_CLIP: f64 = 4.0;
/// Floor for the p90-p10 span so a flat baseline cannot divide by zero.
pub const SPAN_EPSILON: f64 = 1e-9;
/// Retained observations per baseline buffer.
pub const BASELINE_CAPACITY: usize = 256;

// Shape constants of the secondary feature score: a logistic gate on the
// cancel share centered at RATIO_MID, times a logistic gate on replenish
// latency centered at LATENCY_MID_MS. Calibrated so an idle window lands
// near zero and a rapid-cancel/fast-replenish burst lands well above 0.65.
const RATIO_GAIN: f64 = 6.0;
const RATIO_MID: f64 = 0.6;
const LATENCY_GAIN_PER_MS: f64 = 0.02;
const LATENCY_MID_MS: f64 = 250.0;
/// Replenish latency is capped here; idle windows report the cap.
pub const REPLENISH_LATENCY_CEILING_MS: f64 = 10_000.0;

/// One window observation.
#[derive(Debug, Clone, PartialEq)]
pub struct TrapReading {
    /// Add volume per second over the window.
    pub repl_rate: f64,
    /// Cancel volume per second over the window.
    pub cancel_rate: f64,
    /// Per-trade cancel-replenish imbalance.
    pub raw_score: f64,
    /// Standardized imbalance against the rolling baseline, clipped.
    pub z: f64,
    pub n_trades: u32,
    /// Anomaly flag: z breach, or sign divergence with elevated cancels.
    pub flag: bool,
}

/// Sliding-window detector state. One instance per market scope; the
/// instance is a plain mutable object, so concurrent callers must wrap it
/// in their own lock.
#[derive(Debug, Clone)]
pub struct TrapWindow {
    window_secs: f64,
    depth_levels: usize,
    raw_scores: RollingWindow,
    cancel_rates: RollingWindow,
}

impl TrapWindow {
    /// `window_secs` is the wall-clock span the delta arrays cover;
    /// `depth_levels` bounds how many book levels are summed.
    pub fn new(window_secs: f64, depth_levels: usize) -> Self {
        let window_secs = if window_secs.is_finite() && window_secs > 0.0 {
            window_secs
        } else {
            1.0
        };
        TrapWindow {
            window_secs,
            depth_levels: depth_levels.max(1),
            raw_scores: RollingWindow::new(BASELINE_CAPACITY),
            cancel_rates: RollingWindow::new(BASELINE_CAPACITY),
        }
    }

    pub fn window_secs(&self) -> f64 {
        self.window_secs
    }

    pub fn baseline_len(&self) -> usize {
        self.raw_scores.len()
    }

    /// Fold one window of activity and score it against the baseline.
    ///
    /// Negative deltas are floored at zero (they carry no cancel/add
    /// signal of their own); NaN entries contribute nothing. The sign
    /// divergence branch engages only when both signs are present and
    /// finite and a cancel-rate baseline exists.
    #[allow(clippy::too_many_arguments)]
    pub fn update(
        &mut self,
        cancel_deltas: &[f64],
        add_deltas: &[f64],
        trade_count: u32,
        z_threshold: f64,
        cancel_percentile: f64,
        obi_sign: Option<f64>,
        tfi_sign: Option<f64>,
    ) -> TrapReading {
        let cancel_rate = self.level_sum(cancel_deltas) / self.window_secs;
        let repl_rate = self.level_sum(add_deltas) / self.window_secs;
        let raw_score = (cancel_rate - repl_rate) / f64::max(1.0, trade_count as f64);

        // Baseline reads happen before this observation is pushed.
        let z = match (
            self.raw_scores.percentile(50.0),
            self.raw_scores.percentile(90.0),
            self.raw_scores.percentile(10.0),
        ) {
            (Some(p50), Some(p90), Some(p10)) => {
                let span = f64::max(SPAN_EPSILON, p90 - p10);
                ((raw_score - p50) / span).clamp(-Z_CLIP, Z_CLIP)
            }
            // No baseline yet: nothing to standardize against.
            _ => 0.0,
        };

        let obi = obi_sign.filter(|v| v.is_finite());
        let tfi = tfi_sign.filter(|v| v.is_finite());
        let divergence = match (obi, tfi, self.cancel_rates.percentile(cancel_percentile)) {
            (Some(o), Some(t), Some(cancel_hi)) => {
                o.signum() != t.signum() && cancel_rate >= cancel_hi
            }
            _ => false,
        };

        let flag = z >= z_threshold || divergence;

        self.raw_scores.push(raw_score);
        self.cancel_rates.push(cancel_rate);

        if flag {
            tracing::debug!(
                z,
                raw_score,
                cancel_rate,
                repl_rate,
                divergence,
                "trap window flagged"
            );
        }

        TrapReading {
            repl_rate,
            cancel_rate,
            raw_score,
            z,
            n_trades: trade_count,
            flag,
        }
    }

    fn level_sum(&self, deltas: &[f64]) -> f64 {
        deltas
            .iter()
            .take(self.depth_levels)
            .map(|d| d.max(0.0))
            .sum()
    }
}

// --- Secondary feature score -----------------------------------------------

/// Bounded nonlinear breaker on `(cancel_ratio, replenish_latency_ms)`.
///
/// Returns a score in `[0, 1]`. High cancel share combined with fast
/// replenishment (the wall re-forms as fast as it vanishes) drives the
/// score toward one; an idle window maps near zero but never exactly
/// zero, so downstream consumers can distinguish "quiet" from "unscored".
pub fn trap_feature_score(cancel_ratio: f64, replenish_latency_ms: f64) -> f64 {
    let ratio = if cancel_ratio.is_finite() {
        cancel_ratio.clamp(0.0, 1.0)
    } else {
        0.0
    };
    let latency = if replenish_latency_ms.is_finite() {
        replenish_latency_ms.clamp(0.0, REPLENISH_LATENCY_CEILING_MS)
    } else {
        REPLENISH_LATENCY_CEILING_MS
    };
    let ratio_gate = sigmoid(RATIO_GAIN * (ratio - RATIO_MID));
    let latency_gate = sigmoid(LATENCY_GAIN_PER_MS * (LATENCY_MID_MS - latency));
    ratio_gate * latency_gate
}

/// Replenish latency proxy: time to restore one unit of depth at the
/// observed add rate, capped for idle windows.
pub fn replenish_latency_ms(repl_rate: f64) -> f64 {
    if repl_rate.is_finite() && repl_rate > 0.0 {
        (1_000.0 / repl_rate).min(REPLENISH_LATENCY_CEILING_MS)
    } else {
        REPLENISH_LATENCY_CEILING_MS
    }
}

/// Cancel share of total flow in the window.
pub fn cancel_ratio(cancel_rate: f64, repl_rate: f64) -> f64 {
    let total = cancel_rate + repl_rate;
    if total > 0.0 { cancel_rate / total } else { 0.0 }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}
