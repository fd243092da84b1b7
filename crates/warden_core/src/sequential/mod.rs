//! Sequential hypothesis tests for live edge evaluation.
//!
//! Two testers share one trait: [`SprtTest`] for a Gaussian mean with known
//! variance, and [`GlrTest`] when the variance must be estimated on the fly.
//! Both are pure state machines. Feed observations one at a time; once a
//! terminal outcome is reached it is sticky and further updates change
//! nothing.
//!
//! Batch evaluation over buffered samples goes through
//! [`SequentialTest::run`], which checks a cooperative wall-clock deadline
//! between samples so a slow test degrades to `Continue` instead of stalling
//! its caller.

pub mod glr;
pub mod sprt;

pub use glr::{GLR_VARIANCE_FLOOR, GlrTest};
pub use sprt::SprtTest;

use std::time::Instant;

// --- Outcome --------------------------------------------------------------

/// Outcome of a sequential test after folding an observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SprtOutcome {
    /// Evidence is inconclusive; keep sampling.
    Continue,
    /// Null hypothesis accepted (no edge).
    AcceptH0,
    /// Alternative hypothesis accepted (edge present).
    AcceptH1,
}

impl SprtOutcome {
    /// Whether this outcome ends the test.
    pub fn is_terminal(self) -> bool {
        matches!(self, SprtOutcome::AcceptH0 | SprtOutcome::AcceptH1)
    }

    /// Stable wire string for logs and diagnostics.
    pub fn as_str(self) -> &'static str {
        match self {
            SprtOutcome::Continue => "continue",
            SprtOutcome::AcceptH0 => "accept_h0",
            SprtOutcome::AcceptH1 => "accept_h1",
        }
    }
}

// --- Errors ----------------------------------------------------------------

/// Construction and update failures for sequential tests.
#[derive(Debug, Clone, PartialEq)]
pub enum SprtError {
    /// `alpha` or `beta` outside the open interval (0, 1).
    InvalidErrorRates { alpha: f64, beta: f64 },
    /// Standard deviation must be finite and strictly positive.
    InvalidSigma { sigma: f64 },
    /// Hypothesis means must be finite and distinct.
    DegenerateHypotheses { mu0: f64, mu1: f64 },
    /// Log-thresholds must be finite with `a > b`.
    InvalidThresholds { a: f64, b: f64 },
    /// Sample bounds must satisfy `1 <= min <= max`.
    InvalidSampleBounds { min_samples: u32, max_samples: u32 },
    /// Observation was NaN or infinite. Accumulators are left untouched.
    NonFiniteObservation { value: f64, index: Option<usize> },
}

impl std::fmt::Display for SprtError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SprtError::InvalidErrorRates { alpha, beta } => {
                write!(f, "error rates must lie in (0, 1): alpha={alpha} beta={beta}")
            }
            SprtError::InvalidSigma { sigma } => {
                write!(f, "sigma must be finite and positive: sigma={sigma}")
            }
            SprtError::DegenerateHypotheses { mu0, mu1 } => {
                write!(f, "hypothesis means must be finite and distinct: mu0={mu0} mu1={mu1}")
            }
            SprtError::InvalidThresholds { a, b } => {
                write!(f, "log thresholds must be finite with a > b: a={a} b={b}")
            }
            SprtError::InvalidSampleBounds {
                min_samples,
                max_samples,
            } => {
                write!(
                    f,
                    "sample bounds must satisfy 1 <= min <= max: min={min_samples} max={max_samples}"
                )
            }
            SprtError::NonFiniteObservation { value, index } => match index {
                Some(i) => write!(f, "non-finite observation at index {i}: value={value}"),
                None => write!(f, "non-finite observation: value={value}"),
            },
        }
    }
}

impl std::error::Error for SprtError {}

// --- Batch run -------------------------------------------------------------

/// Summary of one bounded batch run over buffered observations.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SprtRun {
    /// Outcome when the run stopped.
    pub outcome: SprtOutcome,
    /// Test statistic when the run stopped.
    pub llr: f64,
    /// Observations consumed from the batch.
    pub samples_used: usize,
    /// Whether the deadline cut the run short.
    pub deadline_hit: bool,
}

// --- Trait -------------------------------------------------------------------

/// Common surface of the sequential testers.
pub trait SequentialTest {
    /// Fold one observation into the test statistic.
    ///
    /// Sticky once terminal: a decided test returns its outcome and mutates
    /// nothing. A non-finite observation is rejected without touching the
    /// accumulators.
    fn update(&mut self, x: f64) -> Result<SprtOutcome, SprtError>;

    /// Current log-likelihood ratio statistic.
    fn llr(&self) -> f64;

    /// Observations folded so far.
    fn samples_seen(&self) -> u32;

    /// Current outcome without folding anything new.
    fn outcome(&self) -> SprtOutcome;

    /// Drive the test over a buffered batch under a cooperative deadline.
    ///
    /// The deadline is checked between samples, never mid-update. When it
    /// passes, the run stops with `Continue` and `deadline_hit` set; evidence
    /// folded so far is kept. A batch fed to an already-terminal test
    /// consumes nothing.
    fn run(&mut self, samples: &[f64], deadline: Option<Instant>) -> Result<SprtRun, SprtError> {
        if self.outcome().is_terminal() {
            return Ok(SprtRun {
                outcome: self.outcome(),
                llr: self.llr(),
                samples_used: 0,
                deadline_hit: false,
            });
        }

        let mut used = 0usize;
        for (idx, &x) in samples.iter().enumerate() {
            if let Some(at) = deadline
                && Instant::now() >= at
            {
                return Ok(SprtRun {
                    outcome: SprtOutcome::Continue,
                    llr: self.llr(),
                    samples_used: used,
                    deadline_hit: true,
                });
            }

            let outcome = match self.update(x) {
                Ok(o) => o,
                Err(SprtError::NonFiniteObservation { value, .. }) => {
                    return Err(SprtError::NonFiniteObservation {
                        value,
                        index: Some(idx),
                    });
                }
                Err(other) => return Err(other),
            };
            used += 1;

            if outcome.is_terminal() {
                return Ok(SprtRun {
                    outcome,
                    llr: self.llr(),
                    samples_used: used,
                    deadline_hit: false,
                });
            }
        }

        Ok(SprtRun {
            outcome: self.outcome(),
            llr: self.llr(),
            samples_used: used,
            deadline_hit: false,
        })
    }
}
