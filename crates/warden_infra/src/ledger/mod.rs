//! Alpha-budget ledger for sequential experiments.
//!
//! Every experiment opens one allocation and receives an opaque token; all
//! further operations use the token, so two runs of the same experiment can
//! never cross wires. Spending draws the allocation down monotonically and
//! is capped at `alpha0`: drift within [`ALPHA_SPEND_EPSILON`] clamps to the
//! budget line, anything beyond is rejected with the allocation untouched.
//! Closing is terminal and frees the experiment id for a fresh open with a
//! new token.
//!
//! One mutex guards the whole state. Accessors hand out deep copies and
//! nothing external is called while the lock is held.

pub mod snapshot;

pub use snapshot::{SNAPSHOT_VERSION, SnapshotError};

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use xxhash_rust::xxh64::xxh64;

use warden_core::health::epoch_ms_now;

/// Spends overshooting `alpha0` by at most this much clamp to `alpha0`
/// instead of rejecting; covers float drift from repeated tiny spends.
pub const ALPHA_SPEND_EPSILON: f64 = 1e-9;

/// Spend-history entries retained per allocation.
pub const DEFAULT_HISTORY_CAP: usize = 64;

// --- Outcome -------------------------------------------------------------

/// Terminal outcome of one experiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestOutcome {
    Accept,
    Reject,
    Abandon,
}

impl TestOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            TestOutcome::Accept => "accept",
            TestOutcome::Reject => "reject",
            TestOutcome::Abandon => "abandon",
        }
    }
}

// --- Transaction ----------------------------------------------------------

/// One spend against an allocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpendRecord {
    pub at_ms: u64,
    pub amount: f64,
    /// Running total after this spend.
    pub spent_after: f64,
}

/// One alpha allocation, open or closed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlphaTransaction {
    pub test_id: String,
    pub token: String,
    /// Error budget granted at open, in (0, 1].
    pub alpha0: f64,
    /// Authoritative running spend; the history ring may have evicted
    /// early entries.
    pub spent: f64,
    /// `None` while the allocation is open.
    pub outcome: Option<TestOutcome>,
    pub opened_at_ms: u64,
    pub closed_at_ms: Option<u64>,
    pub history: VecDeque<SpendRecord>,
}

impl AlphaTransaction {
    pub fn is_open(&self) -> bool {
        self.outcome.is_none()
    }

    /// Budget still spendable.
    pub fn remaining(&self) -> f64 {
        (self.alpha0 - self.spent).max(0.0)
    }
}

// --- Errors ----------------------------------------------------------------

/// Ledger operation failures.
#[derive(Debug, Clone, PartialEq)]
pub enum AlphaLedgerError {
    /// `alpha0` must be finite and in (0, 1].
    InvalidAlpha { alpha0: f64 },
    /// The experiment already holds an open allocation.
    TestAlreadyOpen { test_id: String },
    /// No allocation under this token.
    UnknownToken { token: String },
    /// The allocation is already closed.
    NotOpen { token: String },
    /// Spend amount must be finite and strictly positive.
    InvalidSpend { amount: f64 },
    /// Spend would overdraw the budget; nothing was recorded.
    BudgetExceeded { remaining: f64, requested: f64 },
}

impl std::fmt::Display for AlphaLedgerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidAlpha { alpha0 } => {
                write!(f, "alpha0 must be finite and in (0, 1]: {alpha0}")
            }
            Self::TestAlreadyOpen { test_id } => {
                write!(f, "test '{test_id}' already holds an open allocation")
            }
            Self::UnknownToken { token } => write!(f, "unknown allocation token '{token}'"),
            Self::NotOpen { token } => write!(f, "allocation '{token}' is already closed"),
            Self::InvalidSpend { amount } => {
                write!(f, "spend amount must be finite and positive: {amount}")
            }
            Self::BudgetExceeded {
                remaining,
                requested,
            } => {
                write!(
                    f,
                    "alpha budget exceeded: remaining={remaining} requested={requested}"
                )
            }
        }
    }
}

impl std::error::Error for AlphaLedgerError {}

// --- Summary ----------------------------------------------------------------

/// Per-allocation line in the summary.
#[derive(Debug, Clone, PartialEq)]
pub struct TestSummary {
    pub test_id: String,
    pub token: String,
    pub alpha0: f64,
    pub spent: f64,
    pub outcome: Option<TestOutcome>,
    pub opened_at_ms: u64,
}

/// Deterministic rollup of the whole ledger. Two ledgers with the same
/// allocations produce equal summaries regardless of operation interleaving,
/// so a snapshot round-trip can be checked with `==`.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerSummary {
    pub open_count: usize,
    pub closed_count: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub abandoned: usize,
    pub alpha_allocated: f64,
    pub alpha_spent: f64,
    /// Sorted by (test_id, opened_at_ms, token).
    pub tests: Vec<TestSummary>,
}

// --- Metrics ------------------------------------------------------------

/// Observability counters for the ledger.
#[derive(Debug, Default)]
pub struct LedgerMetrics {
    opens_total: AtomicU64,
    spends_total: AtomicU64,
    clamps_total: AtomicU64,
    budget_rejects_total: AtomicU64,
    closes_total: AtomicU64,
    snapshots_total: AtomicU64,
}

impl LedgerMetrics {
    fn record_open(&self) {
        self.opens_total.fetch_add(1, Ordering::Relaxed);
    }

    fn record_spend(&self) {
        self.spends_total.fetch_add(1, Ordering::Relaxed);
    }

    fn record_clamp(&self) {
        self.clamps_total.fetch_add(1, Ordering::Relaxed);
    }

    fn record_budget_reject(&self) {
        self.budget_rejects_total.fetch_add(1, Ordering::Relaxed);
    }

    fn record_close(&self) {
        self.closes_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_snapshot(&self) {
        self.snapshots_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn opens_total(&self) -> u64 {
        self.opens_total.load(Ordering::Relaxed)
    }

    pub fn spends_total(&self) -> u64 {
        self.spends_total.load(Ordering::Relaxed)
    }

    pub fn clamps_total(&self) -> u64 {
        self.clamps_total.load(Ordering::Relaxed)
    }

    pub fn budget_rejects_total(&self) -> u64 {
        self.budget_rejects_total.load(Ordering::Relaxed)
    }

    pub fn closes_total(&self) -> u64 {
        self.closes_total.load(Ordering::Relaxed)
    }

    pub fn snapshots_total(&self) -> u64 {
        self.snapshots_total.load(Ordering::Relaxed)
    }
}

// --- Ledger -----------------------------------------------------------------

#[derive(Debug)]
pub(crate) struct LedgerState {
    /// token -> allocation, open and closed alike.
    pub(crate) txns: HashMap<String, AlphaTransaction>,
    /// test_id -> token of its open allocation.
    pub(crate) open_by_test: HashMap<String, String>,
    /// Mint counter feeding token hashes.
    pub(crate) seq: u64,
    pub(crate) events_since_snapshot: u64,
    /// Interval anchor: construction or last completed snapshot.
    pub(crate) last_snapshot_ms: u64,
    pub(crate) history_cap: usize,
}

/// Thread-safe alpha-budget ledger.
#[derive(Debug)]
pub struct AlphaLedger {
    state: Mutex<LedgerState>,
    metrics: LedgerMetrics,
}

impl AlphaLedger {
    pub fn new() -> Self {
        Self::new_at(epoch_ms_now())
    }

    pub fn new_at(now_ms: u64) -> Self {
        Self::with_history_cap_at(DEFAULT_HISTORY_CAP, now_ms)
    }

    pub fn with_history_cap(history_cap: usize) -> Self {
        Self::with_history_cap_at(history_cap, epoch_ms_now())
    }

    pub fn with_history_cap_at(history_cap: usize, now_ms: u64) -> Self {
        Self::from_state(LedgerState {
            txns: HashMap::new(),
            open_by_test: HashMap::new(),
            seq: 0,
            events_since_snapshot: 0,
            last_snapshot_ms: now_ms,
            history_cap: history_cap.max(1),
        })
    }

    pub(crate) fn from_state(state: LedgerState) -> Self {
        AlphaLedger {
            state: Mutex::new(state),
            metrics: LedgerMetrics::default(),
        }
    }

    // --- open ---------------------------------------------------------------

    /// Open an allocation for `test_id` and return its token.
    pub fn open(&self, test_id: &str, alpha0: f64) -> Result<String, AlphaLedgerError> {
        self.open_at(epoch_ms_now(), test_id, alpha0)
    }

    pub fn open_at(
        &self,
        now_ms: u64,
        test_id: &str,
        alpha0: f64,
    ) -> Result<String, AlphaLedgerError> {
        if !alpha0.is_finite() || alpha0 <= 0.0 || alpha0 > 1.0 {
            return Err(AlphaLedgerError::InvalidAlpha { alpha0 });
        }

        let token = {
            let mut state = self.state.lock().expect("alpha ledger mutex poisoned");
            if state.open_by_test.contains_key(test_id) {
                return Err(AlphaLedgerError::TestAlreadyOpen {
                    test_id: test_id.to_string(),
                });
            }

            state.seq += 1;
            let mut token = mint_token(test_id, now_ms, state.seq);
            while state.txns.contains_key(&token) {
                state.seq += 1;
                token = mint_token(test_id, now_ms, state.seq);
            }

            let txn = AlphaTransaction {
                test_id: test_id.to_string(),
                token: token.clone(),
                alpha0,
                spent: 0.0,
                outcome: None,
                opened_at_ms: now_ms,
                closed_at_ms: None,
                history: VecDeque::new(),
            };
            state.txns.insert(token.clone(), txn);
            state.open_by_test.insert(test_id.to_string(), token.clone());
            state.events_since_snapshot += 1;
            token
        };

        self.metrics.record_open();
        tracing::debug!("AlphaOpen test_id={test_id} alpha0={alpha0} token={token}");
        Ok(token)
    }

    // --- spend --------------------------------------------------------------

    /// Draw `amount` from the allocation; returns the new running spend.
    pub fn spend(&self, token: &str, amount: f64) -> Result<f64, AlphaLedgerError> {
        self.spend_at(epoch_ms_now(), token, amount)
    }

    pub fn spend_at(
        &self,
        now_ms: u64,
        token: &str,
        amount: f64,
    ) -> Result<f64, AlphaLedgerError> {
        if !amount.is_finite() || amount <= 0.0 {
            return Err(AlphaLedgerError::InvalidSpend { amount });
        }

        let mut clamped = false;
        let spent_after = {
            let mut state = self.state.lock().expect("alpha ledger mutex poisoned");
            let history_cap = state.history_cap;
            let txn = state
                .txns
                .get_mut(token)
                .ok_or_else(|| AlphaLedgerError::UnknownToken {
                    token: token.to_string(),
                })?;
            if txn.outcome.is_some() {
                return Err(AlphaLedgerError::NotOpen {
                    token: token.to_string(),
                });
            }

            let proposed = txn.spent + amount;
            let spent_after = if proposed <= txn.alpha0 {
                proposed
            } else if proposed <= txn.alpha0 + ALPHA_SPEND_EPSILON {
                clamped = true;
                txn.alpha0
            } else {
                let remaining = txn.remaining();
                self.metrics.record_budget_reject();
                return Err(AlphaLedgerError::BudgetExceeded {
                    remaining,
                    requested: amount,
                });
            };

            txn.spent = spent_after;
            txn.history.push_back(SpendRecord {
                at_ms: now_ms,
                amount,
                spent_after,
            });
            while txn.history.len() > history_cap {
                txn.history.pop_front();
            }
            state.events_since_snapshot += 1;
            spent_after
        };

        self.metrics.record_spend();
        if clamped {
            self.metrics.record_clamp();
            tracing::debug!("AlphaSpendClamped token={token} spent_after={spent_after}");
        }
        Ok(spent_after)
    }

    // --- close --------------------------------------------------------------

    /// Close the allocation with a terminal outcome, freeing its test id.
    pub fn close(&self, token: &str, outcome: TestOutcome) -> Result<(), AlphaLedgerError> {
        self.close_at(epoch_ms_now(), token, outcome)
    }

    pub fn close_at(
        &self,
        now_ms: u64,
        token: &str,
        outcome: TestOutcome,
    ) -> Result<(), AlphaLedgerError> {
        {
            let mut state = self.state.lock().expect("alpha ledger mutex poisoned");
            let txn = state
                .txns
                .get_mut(token)
                .ok_or_else(|| AlphaLedgerError::UnknownToken {
                    token: token.to_string(),
                })?;
            if txn.outcome.is_some() {
                return Err(AlphaLedgerError::NotOpen {
                    token: token.to_string(),
                });
            }
            txn.outcome = Some(outcome);
            txn.closed_at_ms = Some(now_ms);
            let test_id = txn.test_id.clone();
            state.open_by_test.remove(&test_id);
            state.events_since_snapshot += 1;
        }

        self.metrics.record_close();
        tracing::debug!("AlphaClose token={token} outcome={}", outcome.as_str());
        Ok(())
    }

    // --- accessors -----------------------------------------------------------

    /// Deep copy of one allocation.
    pub fn transaction(&self, token: &str) -> Option<AlphaTransaction> {
        self.state
            .lock()
            .expect("alpha ledger mutex poisoned")
            .txns
            .get(token)
            .cloned()
    }

    /// Deep copies of every allocation, sorted like the summary.
    pub fn transactions(&self) -> Vec<AlphaTransaction> {
        let mut txns: Vec<AlphaTransaction> = self
            .state
            .lock()
            .expect("alpha ledger mutex poisoned")
            .txns
            .values()
            .cloned()
            .collect();
        txns.sort_by(|a, b| {
            (a.test_id.as_str(), a.opened_at_ms, a.token.as_str()).cmp(&(
                b.test_id.as_str(),
                b.opened_at_ms,
                b.token.as_str(),
            ))
        });
        txns
    }

    /// Token of the open allocation for `test_id`, if any.
    pub fn open_token(&self, test_id: &str) -> Option<String> {
        self.state
            .lock()
            .expect("alpha ledger mutex poisoned")
            .open_by_test
            .get(test_id)
            .cloned()
    }

    pub fn open_count(&self) -> usize {
        self.state
            .lock()
            .expect("alpha ledger mutex poisoned")
            .open_by_test
            .len()
    }

    /// Total allocations, open and closed.
    pub fn len(&self) -> usize {
        self.state
            .lock()
            .expect("alpha ledger mutex poisoned")
            .txns
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn metrics(&self) -> &LedgerMetrics {
        &self.metrics
    }

    /// Deterministic rollup; see [`LedgerSummary`].
    pub fn summary(&self) -> LedgerSummary {
        let mut tests: Vec<TestSummary> = {
            let state = self.state.lock().expect("alpha ledger mutex poisoned");
            state
                .txns
                .values()
                .map(|t| TestSummary {
                    test_id: t.test_id.clone(),
                    token: t.token.clone(),
                    alpha0: t.alpha0,
                    spent: t.spent,
                    outcome: t.outcome,
                    opened_at_ms: t.opened_at_ms,
                })
                .collect()
        };
        tests.sort_by(|a, b| {
            (a.test_id.as_str(), a.opened_at_ms, a.token.as_str()).cmp(&(
                b.test_id.as_str(),
                b.opened_at_ms,
                b.token.as_str(),
            ))
        });

        let mut summary = LedgerSummary {
            open_count: 0,
            closed_count: 0,
            accepted: 0,
            rejected: 0,
            abandoned: 0,
            alpha_allocated: 0.0,
            alpha_spent: 0.0,
            tests,
        };
        for t in &summary.tests {
            summary.alpha_allocated += t.alpha0;
            summary.alpha_spent += t.spent;
            match t.outcome {
                None => summary.open_count += 1,
                Some(TestOutcome::Accept) => {
                    summary.closed_count += 1;
                    summary.accepted += 1;
                }
                Some(TestOutcome::Reject) => {
                    summary.closed_count += 1;
                    summary.rejected += 1;
                }
                Some(TestOutcome::Abandon) => {
                    summary.closed_count += 1;
                    summary.abandoned += 1;
                }
            }
        }
        summary
    }

    pub(crate) fn lock_state(&self) -> std::sync::MutexGuard<'_, LedgerState> {
        self.state.lock().expect("alpha ledger mutex poisoned")
    }
}

impl Default for AlphaLedger {
    fn default() -> Self {
        Self::new()
    }
}

/// Opaque allocation token: a hash over the experiment id, the open
/// timestamp, and the mint counter, formatted as 16 hex chars.
fn mint_token(test_id: &str, now_ms: u64, seq: u64) -> String {
    let mut buf = Vec::with_capacity(test_id.len() + 18);
    buf.extend_from_slice(test_id.as_bytes());
    buf.push(0xFF);
    buf.extend_from_slice(&now_ms.to_le_bytes());
    buf.push(0xFF);
    buf.extend_from_slice(&seq.to_le_bytes());
    let hash = xxh64(&buf, 0);
    format!("{hash:016x}")
}
