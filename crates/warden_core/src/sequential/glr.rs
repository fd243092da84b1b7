//! Generalized likelihood ratio test for unknown variance.
//!
//! Keeps running moments (count, sum, sum of squares) and plugs the sample
//! variance into the Gaussian log-likelihood ratio:
//! `llr = n / (2 * s2) * ((mean - mu0)^2 - (mean - mu1)^2)`
//!
//! No decision is made before `min_samples` observations; at `max_samples`
//! an inconclusive run is closed as AcceptH0.

use super::{SequentialTest, SprtError, SprtOutcome};

/// Floor applied to the sample variance so a degenerate early window cannot
/// blow the statistic up to infinity.
pub const GLR_VARIANCE_FLOOR: f64 = 1e-12;

/// GLR tester over a Gaussian mean with variance estimated from the data.
#[derive(Debug, Clone)]
pub struct GlrTest {
    mu0: f64,
    mu1: f64,
    /// Upper boundary: accept H1 at or above.
    a: f64,
    /// Lower boundary: accept H0 at or below.
    b: f64,
    n: u32,
    sum: f64,
    sum_sq: f64,
    llr: f64,
    min_samples: u32,
    max_samples: u32,
    decided: Option<SprtOutcome>,
}

impl GlrTest {
    /// Build from target error rates and sample bounds.
    pub fn from_error_rates(
        mu0: f64,
        mu1: f64,
        alpha: f64,
        beta: f64,
        min_samples: u32,
        max_samples: u32,
    ) -> Result<Self, SprtError> {
        if !alpha.is_finite()
            || !beta.is_finite()
            || !(0.0 < alpha && alpha < 1.0)
            || !(0.0 < beta && beta < 1.0)
        {
            return Err(SprtError::InvalidErrorRates { alpha, beta });
        }
        if !mu0.is_finite() || !mu1.is_finite() || mu0 == mu1 {
            return Err(SprtError::DegenerateHypotheses { mu0, mu1 });
        }
        if min_samples == 0 || min_samples > max_samples {
            return Err(SprtError::InvalidSampleBounds {
                min_samples,
                max_samples,
            });
        }
        let a = ((1.0 - beta) / alpha).ln();
        let b = (beta / (1.0 - alpha)).ln();
        Ok(Self {
            mu0,
            mu1,
            a,
            b,
            n: 0,
            sum: 0.0,
            sum_sq: 0.0,
            llr: 0.0,
            min_samples,
            max_samples,
            decided: None,
        })
    }

    /// Sample mean over the observations folded so far, if any.
    pub fn mean(&self) -> Option<f64> {
        if self.n == 0 {
            None
        } else {
            Some(self.sum / f64::from(self.n))
        }
    }
}

impl SequentialTest for GlrTest {
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

        self.n += 1;
        self.sum += x;
        self.sum_sq += x * x;

        let n = f64::from(self.n);
        let mean = self.sum / n;
        let mut var = self.sum_sq / n - mean * mean;
        if !var.is_finite() || var <= 0.0 {
            var = GLR_VARIANCE_FLOOR;
        }
        let d0 = mean - self.mu0;
        let d1 = mean - self.mu1;
        self.llr = n / (2.0 * var) * (d0 * d0 - d1 * d1);

        let outcome = if self.n < self.min_samples {
            SprtOutcome::Continue
        } else if self.llr >= self.a {
            SprtOutcome::AcceptH1
        } else if self.llr <= self.b {
            SprtOutcome::AcceptH0
        } else if self.n >= self.max_samples {
            // Ceiling: an inconclusive run ends on the null side.
            SprtOutcome::AcceptH0
        } else {
            SprtOutcome::Continue
        };

        if outcome.is_terminal() {
            self.decided = Some(outcome);
            tracing::debug!(
                "GlrDecision outcome={} llr={:.4} samples={}",
                outcome.as_str(),
                self.llr,
                self.n
            );
        }
        Ok(outcome)
    }

    fn llr(&self) -> f64 {
        self.llr
    }

    fn samples_seen(&self) -> u32 {
        self.n
    }

    fn outcome(&self) -> SprtOutcome {
        self.decided.unwrap_or(SprtOutcome::Continue)
    }
}
