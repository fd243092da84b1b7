//! Latency health guard: WARN -> COOLOFF -> HALT escalation.
//!
//! The guard folds latency samples into a time-bounded window and watches
//! the p95. A p95 breach registers a WARN; a breach while a cooloff is
//! already running escalates to a sticky halt, as does a burst of WARNs
//! inside the trailing five minutes. Halt survives until an explicit
//! `reset`. Disarming suspends enforcement without clearing pending
//! cooloff or halt state, so re-arming resumes where the guard left off.
//!
//! All time-dependent entry points have `_at(now_ms, ...)` variants for
//! deterministic tests; the plain forms read the system clock.

use std::collections::VecDeque;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::microstructure::rolling::percentile;

/// WARN timestamps older than this are forgotten.
pub const WARN_TRAIL_MS: u64 = 300_000;

/// Milliseconds since the Unix epoch, saturating at zero on clock skew.
pub fn epoch_ms_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// --- Config ----------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// p95 latency above this registers a WARN.
    pub p95_threshold_ms: f64,
    /// Retention span of the latency sample window, in seconds.
    pub window_secs: u64,
    /// Cooloff duration entered on a fresh WARN, in seconds.
    pub cooloff_secs: u64,
    /// WARNs inside the trailing five minutes that force a halt.
    pub halt_repeat_count: usize,
}

impl Default for HealthConfig {
    fn default() -> Self {
        HealthConfig {
            p95_threshold_ms: 150.0,
            window_secs: 60,
            cooloff_secs: 120,
            halt_repeat_count: 3,
        }
    }
}

/// Malformed guard threshold, rejected at construction.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthConfigError {
    pub param: &'static str,
    pub value: f64,
}

impl fmt::Display for HealthConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid health guard config: {} = {} is out of range",
            self.param, self.value
        )
    }
}

impl std::error::Error for HealthConfigError {}

impl HealthConfig {
    pub fn validate(&self) -> Result<(), HealthConfigError> {
        if !self.p95_threshold_ms.is_finite() || self.p95_threshold_ms <= 0.0 {
            return Err(HealthConfigError {
                param: "p95_threshold_ms",
                value: self.p95_threshold_ms,
            });
        }
        if self.window_secs == 0 {
            return Err(HealthConfigError { param: "window_secs", value: 0.0 });
        }
        if self.cooloff_secs == 0 {
            return Err(HealthConfigError { param: "cooloff_secs", value: 0.0 });
        }
        if self.halt_repeat_count == 0 {
            return Err(HealthConfigError { param: "halt_repeat_count", value: 0.0 });
        }
        Ok(())
    }
}

// --- State -------------------------------------------------------------------

/// Enforcement verdict, strongest first: DISARMED > HALTED > COOLOFF > OK.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Ok,
    Cooloff,
    Halted,
    Disarmed,
}

impl HealthState {
    pub fn as_str(self) -> &'static str {
        match self {
            HealthState::Ok => "ok",
            HealthState::Cooloff => "cooloff",
            HealthState::Halted => "halted",
            HealthState::Disarmed => "disarmed",
        }
    }

    /// Whether this state blocks admission.
    pub fn denies(self) -> bool {
        matches!(self, HealthState::Cooloff | HealthState::Halted)
    }
}

/// Outcome of folding one latency sample.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthRecord {
    /// p95 over the retained window after this sample.
    pub p95_ms: Option<f64>,
    pub warn_registered: bool,
    pub entered_cooloff: bool,
    pub escalated_to_halt: bool,
    /// WARNs currently inside the trailing window, this one included.
    pub warn_count: usize,
}

/// Escalating latency watchdog. Plain mutable object: callers sharing one
/// instance across threads add their own lock.
#[derive(Debug, Clone)]
pub struct HealthGuard {
    config: HealthConfig,
    armed: bool,
    halted: bool,
    cooloff_until_ms: Option<u64>,
    samples: VecDeque<(u64, f64)>,
    warns: VecDeque<u64>,
}

impl HealthGuard {
    pub fn new(config: HealthConfig) -> Result<Self, HealthConfigError> {
        config.validate()?;
        Ok(HealthGuard {
            config,
            armed: true,
            halted: false,
            cooloff_until_ms: None,
            samples: VecDeque::new(),
            warns: VecDeque::new(),
        })
    }

    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    // --- record -----------------------------------------------------------

    pub fn record(&mut self, latency_ms: f64) -> HealthRecord {
        self.record_at(epoch_ms_now(), latency_ms)
    }

    /// Fold one latency sample at `now_ms` and run the escalation rules.
    /// Non-finite or negative samples are ignored (the window keeps only
    /// real observations); the escalation rules still re-evaluate.
    pub fn record_at(&mut self, now_ms: u64, latency_ms: f64) -> HealthRecord {
        if latency_ms.is_finite() && latency_ms >= 0.0 {
            self.samples.push_back((now_ms, latency_ms));
        }
        self.prune_samples(now_ms);
        self.prune_warns(now_ms);

        let p95_ms = self.p95();
        let mut record = HealthRecord {
            p95_ms,
            warn_registered: false,
            entered_cooloff: false,
            escalated_to_halt: false,
            warn_count: self.warns.len(),
        };

        let Some(p95) = p95_ms else {
            return record;
        };
        if p95 <= self.config.p95_threshold_ms {
            return record;
        }

        // p95 breach: WARN, then cooloff or escalation.
        self.warns.push_back(now_ms);
        record.warn_registered = true;
        record.warn_count = self.warns.len();

        if self.in_cooloff(now_ms) {
            if !self.halted {
                record.escalated_to_halt = true;
            }
            self.halted = true;
        } else {
            self.cooloff_until_ms = Some(now_ms + self.config.cooloff_secs * 1_000);
            record.entered_cooloff = true;
        }

        // Repeated WARNs inside the trailing window force a halt outright.
        if self.warns.len() >= self.config.halt_repeat_count && !self.halted {
            self.halted = true;
            record.escalated_to_halt = true;
        }

        if record.escalated_to_halt {
            tracing::warn!(
                p95_ms = p95,
                threshold_ms = self.config.p95_threshold_ms,
                warn_count = record.warn_count,
                "health guard escalated to halt"
            );
        } else {
            tracing::warn!(
                p95_ms = p95,
                threshold_ms = self.config.p95_threshold_ms,
                "health guard latency warn"
            );
        }

        record
    }

    // --- enforce ------------------------------------------------------------

    pub fn enforce(&self) -> HealthState {
        self.enforce_at(epoch_ms_now())
    }

    pub fn enforce_at(&self, now_ms: u64) -> HealthState {
        if !self.armed {
            HealthState::Disarmed
        } else if self.halted {
            HealthState::Halted
        } else if self.in_cooloff(now_ms) {
            HealthState::Cooloff
        } else {
            HealthState::Ok
        }
    }

    // --- operator surface ------------------------------------------------------

    pub fn cooloff(&mut self, secs: u64) {
        self.cooloff_at(epoch_ms_now(), secs);
    }

    /// Extend or set the cooloff deadline; never shortens an active one.
    pub fn cooloff_at(&mut self, now_ms: u64, secs: u64) {
        let proposed = now_ms + secs * 1_000;
        self.cooloff_until_ms = Some(match self.cooloff_until_ms {
            Some(current) => current.max(proposed),
            None => proposed,
        });
    }

    /// Clear warns, cooloff, and halt. Arm state is untouched.
    pub fn reset(&mut self) {
        self.warns.clear();
        self.cooloff_until_ms = None;
        self.halted = false;
    }

    pub fn arm(&mut self) {
        self.armed = true;
    }

    pub fn disarm(&mut self) {
        self.armed = false;
    }

    // --- accessors -----------------------------------------------------------

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn cooloff_until_ms(&self) -> Option<u64> {
        self.cooloff_until_ms
    }

    pub fn warn_count(&self) -> usize {
        self.warns.len()
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    // --- internals ------------------------------------------------------------

    fn in_cooloff(&self, now_ms: u64) -> bool {
        self.cooloff_until_ms.is_some_and(|until| now_ms < until)
    }

    fn prune_samples(&mut self, now_ms: u64) {
        let horizon = now_ms.saturating_sub(self.config.window_secs * 1_000);
        while let Some(&(ts, _)) = self.samples.front() {
            if ts < horizon {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    fn prune_warns(&mut self, now_ms: u64) {
        let horizon = now_ms.saturating_sub(WARN_TRAIL_MS);
        while let Some(&ts) = self.warns.front() {
            if ts < horizon {
                self.warns.pop_front();
            } else {
                break;
            }
        }
    }

    fn p95(&self) -> Option<f64> {
        let mut values: Vec<f64> = self.samples.iter().map(|&(_, v)| v).collect();
        values.sort_by(f64::total_cmp);
        percentile(&values, 95.0)
    }
}
