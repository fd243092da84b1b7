//! Known-variance sequential probability ratio test.
//!
//! Wald boundaries derived from target error rates:
//! `A = ln((1 - beta) / alpha)`, `B = ln(beta / (1 - alpha))`.
//! The statistic accepts H1 at or above `A` and H0 at or below `B`;
//! in between the test keeps sampling.

use super::{SequentialTest, SprtError, SprtOutcome};

/// SPRT for a Gaussian mean with known standard deviation.
///
/// Per-observation increment of the log-likelihood ratio:
/// `S += ((x - mu0)^2 - (x - mu1)^2) / (2 * sigma^2)`
///
/// An optional observation ceiling forces a terminal outcome from the sign
/// of `S` when the boundaries were never crossed.
#[derive(Debug, Clone)]
pub struct SprtTest {
    mu0: f64,
    mu1: f64,
    sigma: f64,
    /// Upper boundary: accept H1 at or above.
    a: f64,
    /// Lower boundary: accept H0 at or below.
    b: f64,
    s: f64,
    n: u32,
    max_observations: Option<u32>,
    decided: Option<SprtOutcome>,
}

impl SprtTest {
    /// Build from target error rates, deriving the Wald boundaries.
    pub fn from_error_rates(
        mu0: f64,
        mu1: f64,
        sigma: f64,
        alpha: f64,
        beta: f64,
        max_observations: Option<u32>,
    ) -> Result<Self, SprtError> {
        if !alpha.is_finite()
            || !beta.is_finite()
            || !(0.0 < alpha && alpha < 1.0)
            || !(0.0 < beta && beta < 1.0)
        {
            return Err(SprtError::InvalidErrorRates { alpha, beta });
        }
        let a = ((1.0 - beta) / alpha).ln();
        let b = (beta / (1.0 - alpha)).ln();
        Self::with_thresholds(mu0, mu1, sigma, a, b, max_observations)
    }

    /// Build from explicit log-thresholds.
    pub fn with_thresholds(
        mu0: f64,
        mu1: f64,
        sigma: f64,
        a: f64,
        b: f64,
        max_observations: Option<u32>,
    ) -> Result<Self, SprtError> {
        if !sigma.is_finite() || sigma <= 0.0 {
            return Err(SprtError::InvalidSigma { sigma });
        }
        if !mu0.is_finite() || !mu1.is_finite() || mu0 == mu1 {
            return Err(SprtError::DegenerateHypotheses { mu0, mu1 });
        }
        if !a.is_finite() || !b.is_finite() || a <= b {
            return Err(SprtError::InvalidThresholds { a, b });
        }
        Ok(Self {
            mu0,
            mu1,
            sigma,
            a,
            b,
            s: 0.0,
            n: 0,
            max_observations,
            decided: None,
        })
    }

    /// Upper (accept-H1) boundary.
    pub fn threshold_a(&self) -> f64 {
        self.a
    }

    /// Lower (accept-H0) boundary.
    pub fn threshold_b(&self) -> f64 {
        self.b
    }
}

impl SequentialTest for SprtTest {
    fn update(&mut self, x: f64) -> Result<SprtOutcome, SprtError> {
        if let Some(done) = self.decided {
            return Ok(done);
        }
        if !x.is_finite() {
            return Err(SprtError::NonFiniteObservation {
                value: x,
                index: None,
            });
        }

        let d0 = x - self.mu0;
        let d1 = x - self.mu1;
        self.s += (d0 * d0 - d1 * d1) / (2.0 * self.sigma * self.sigma);
        self.n += 1;

        let outcome = if self.s >= self.a {
            SprtOutcome::AcceptH1
        } else if self.s <= self.b {
            SprtOutcome::AcceptH0
        } else if let Some(cap) = self.max_observations
            && self.n >= cap
        {
            // Forced decision at the ceiling: whichever side of zero the
            // statistic sits on wins.
            if self.s > 0.0 {
                SprtOutcome::AcceptH1
            } else {
                SprtOutcome::AcceptH0
            }
        } else {
            SprtOutcome::Continue
        };

        if outcome.is_terminal() {
            self.decided = Some(outcome);
            tracing::debug!(
                "SprtDecision outcome={} llr={:.4} samples={}",
                outcome.as_str(),
                self.s,
                self.n
            );
        }
        Ok(outcome)
    }

    fn llr(&self) -> f64 {
        self.s
    }

    fn samples_seen(&self) -> u32 {
        self.n
    }

    fn outcome(&self) -> SprtOutcome {
        self.decided.unwrap_or(SprtOutcome::Continue)
    }
}
