//! Ledger persistence: versioned JSON snapshots with atomic replacement.
//!
//! Snapshots write to `<path>.tmp` and rename over the target, so a crash
//! mid-write leaves the previous snapshot intact. Restore never raises: a
//! missing file yields an empty ledger, a legacy v1 document is upgraded in
//! place (minting fresh tokens), and anything unreadable is moved aside to
//! `<path>.corrupt.<epoch_ms>` before starting empty.

use std::collections::{HashMap, VecDeque};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{
    ALPHA_SPEND_EPSILON, AlphaLedger, AlphaTransaction, DEFAULT_HISTORY_CAP, LedgerState,
    TestOutcome, mint_token,
};
use warden_core::health::epoch_ms_now;

/// Current snapshot document version.
pub const SNAPSHOT_VERSION: u32 = 2;

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotDoc {
    version: u32,
    history_cap: usize,
    transactions: Vec<AlphaTransaction>,
}

/// Pre-versioning layout: a bare map of experiment id to allocation, no
/// tokens, no spend history.
#[derive(Debug, Deserialize)]
struct LegacyDocV1 {
    tests: HashMap<String, LegacyTestV1>,
}

#[derive(Debug, Deserialize)]
struct LegacyTestV1 {
    alpha0: f64,
    #[serde(default)]
    spent: f64,
    #[serde(default)]
    outcome: Option<TestOutcome>,
    #[serde(default)]
    opened_at_ms: u64,
}

/// Snapshot write failures. Restore failures never surface as errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotError {
    EncodeFailed { reason: String },
    WriteFailed { path: String, reason: String },
}

impl std::fmt::Display for SnapshotError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EncodeFailed { reason } => write!(f, "snapshot encode failed: {reason}"),
            Self::WriteFailed { path, reason } => {
                write!(f, "snapshot write failed at {path}: {reason}")
            }
        }
    }
}

impl std::error::Error for SnapshotError {}

impl AlphaLedger {
    /// Write the full ledger state to `path` via tmp file and rename.
    pub fn snapshot(&self, path: impl AsRef<Path>) -> Result<(), SnapshotError> {
        self.snapshot_at(epoch_ms_now(), path)
    }

    pub fn snapshot_at(&self, now_ms: u64, path: impl AsRef<Path>) -> Result<(), SnapshotError> {
        let path = path.as_ref();

        // Deep copy under the lock; encoding and I/O happen outside it.
        let (transactions, history_cap, events_at_copy) = {
            let state = self.lock_state();
            let mut txns: Vec<AlphaTransaction> = state.txns.values().cloned().collect();
            txns.sort_by(|a, b| a.token.cmp(&b.token));
            (txns, state.history_cap, state.events_since_snapshot)
        };

        let doc = SnapshotDoc {
            version: SNAPSHOT_VERSION,
            history_cap,
            transactions,
        };
        let encoded =
            serde_json::to_string_pretty(&doc).map_err(|err| SnapshotError::EncodeFailed {
                reason: err.to_string(),
            })?;

        write_atomically(path, encoded.as_bytes()).map_err(|err| SnapshotError::WriteFailed {
            path: path.display().to_string(),
            reason: err.to_string(),
        })?;

        {
            let mut state = self.lock_state();
            // Events recorded while the write was in flight stay pending.
            state.events_since_snapshot =
                state.events_since_snapshot.saturating_sub(events_at_copy);
            state.last_snapshot_ms = now_ms;
        }
        self.metrics().record_snapshot();
        tracing::debug!(
            "AlphaSnapshot path={} txns={}",
            path.display(),
            doc.transactions.len()
        );
        Ok(())
    }

    /// Snapshot only when work has accumulated: at least one event since the
    /// last snapshot, and either `max_interval` elapsed or `max_events`
    /// reached. Returns whether a snapshot was written.
    pub fn maybe_snapshot(
        &self,
        path: impl AsRef<Path>,
        max_interval: Duration,
        max_events: u64,
    ) -> Result<bool, SnapshotError> {
        self.maybe_snapshot_at(epoch_ms_now(), path, max_interval, max_events)
    }

    pub fn maybe_snapshot_at(
        &self,
        now_ms: u64,
        path: impl AsRef<Path>,
        max_interval: Duration,
        max_events: u64,
    ) -> Result<bool, SnapshotError> {
        let interval_ms = u64::try_from(max_interval.as_millis()).unwrap_or(u64::MAX);
        let due = {
            let state = self.lock_state();
            state.events_since_snapshot > 0
                && (now_ms.saturating_sub(state.last_snapshot_ms) >= interval_ms
                    || state.events_since_snapshot >= max_events)
        };
        if !due {
            return Ok(false);
        }
        self.snapshot_at(now_ms, path)?;
        Ok(true)
    }

    /// Rebuild a ledger from `path`. Never raises; see the module docs for
    /// the missing/legacy/corrupt handling.
    pub fn restore(path: impl AsRef<Path>) -> Self {
        Self::restore_at(epoch_ms_now(), path)
    }

    pub fn restore_at(now_ms: u64, path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Self::new_at(now_ms);
            }
            Err(err) => {
                tracing::warn!("alpha snapshot unreadable at {}: {err}", path.display());
                return Self::new_at(now_ms);
            }
        };

        if let Ok(doc) = serde_json::from_str::<SnapshotDoc>(&raw) {
            if doc.version == SNAPSHOT_VERSION
                && let Some(ledger) = from_snapshot_doc(doc, now_ms)
            {
                return ledger;
            }
            return quarantine(path, now_ms);
        }

        if let Ok(doc) = serde_json::from_str::<LegacyDocV1>(&raw) {
            if let Some(ledger) = from_legacy_doc(doc, now_ms) {
                tracing::info!("upgraded legacy alpha snapshot at {}", path.display());
                return ledger;
            }
            return quarantine(path, now_ms);
        }

        quarantine(path, now_ms)
    }
}

/// Write to `<path>.tmp`, fsync, then rename over `path`.
fn write_atomically(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    let tmp = PathBuf::from(format!("{}.tmp", path.display()));
    match write_synced(&tmp, bytes).and_then(|_| fs::rename(&tmp, path)) {
        Ok(()) => Ok(()),
        Err(err) => {
            let _ = fs::remove_file(&tmp);
            Err(err)
        }
    }
}

fn write_synced(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

fn from_snapshot_doc(doc: SnapshotDoc, now_ms: u64) -> Option<AlphaLedger> {
    let mut txns: HashMap<String, AlphaTransaction> =
        HashMap::with_capacity(doc.transactions.len());
    let mut open_by_test: HashMap<String, String> = HashMap::new();
    for txn in doc.transactions {
        if !valid_transaction(&txn) {
            return None;
        }
        if txn.outcome.is_none()
            && open_by_test
                .insert(txn.test_id.clone(), txn.token.clone())
                .is_some()
        {
            // Two open allocations for one experiment.
            return None;
        }
        if txns.insert(txn.token.clone(), txn).is_some() {
            // Duplicate token.
            return None;
        }
    }
    let seq = txns.len() as u64;
    Some(AlphaLedger::from_state(LedgerState {
        txns,
        open_by_test,
        seq,
        events_since_snapshot: 0,
        last_snapshot_ms: now_ms,
        history_cap: doc.history_cap.max(1),
    }))
}

fn from_legacy_doc(doc: LegacyDocV1, now_ms: u64) -> Option<AlphaLedger> {
    let mut entries: Vec<(String, LegacyTestV1)> = doc.tests.into_iter().collect();
    // Deterministic token minting regardless of map iteration order.
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    let mut txns: HashMap<String, AlphaTransaction> = HashMap::with_capacity(entries.len());
    let mut open_by_test: HashMap<String, String> = HashMap::new();
    let mut seq = 0u64;
    for (test_id, legacy) in entries {
        if !legacy.alpha0.is_finite()
            || legacy.alpha0 <= 0.0
            || legacy.alpha0 > 1.0
            || !legacy.spent.is_finite()
            || legacy.spent < 0.0
        {
            return None;
        }
        seq += 1;
        let mut token = mint_token(&test_id, now_ms, seq);
        while txns.contains_key(&token) {
            seq += 1;
            token = mint_token(&test_id, now_ms, seq);
        }
        let txn = AlphaTransaction {
            test_id: test_id.clone(),
            token: token.clone(),
            alpha0: legacy.alpha0,
            spent: legacy.spent.min(legacy.alpha0),
            outcome: legacy.outcome,
            opened_at_ms: legacy.opened_at_ms,
            // v1 never recorded close times or spend history.
            closed_at_ms: None,
            history: VecDeque::new(),
        };
        if txn.outcome.is_none() {
            open_by_test.insert(test_id, token.clone());
        }
        txns.insert(token, txn);
    }
    Some(AlphaLedger::from_state(LedgerState {
        txns,
        open_by_test,
        seq,
        events_since_snapshot: 0,
        last_snapshot_ms: now_ms,
        history_cap: DEFAULT_HISTORY_CAP,
    }))
}

fn valid_transaction(txn: &AlphaTransaction) -> bool {
    txn.alpha0.is_finite()
        && txn.alpha0 > 0.0
        && txn.alpha0 <= 1.0
        && txn.spent.is_finite()
        && txn.spent >= 0.0
        && txn.spent <= txn.alpha0 + ALPHA_SPEND_EPSILON
        && !txn.token.is_empty()
}

/// Move an unusable snapshot aside and start empty.
fn quarantine(path: &Path, now_ms: u64) -> AlphaLedger {
    let target = PathBuf::from(format!("{}.corrupt.{now_ms}", path.display()));
    match fs::rename(path, &target) {
        Ok(()) => tracing::warn!(
            "corrupt alpha snapshot quarantined: {} -> {}",
            path.display(),
            target.display()
        ),
        Err(err) => tracing::warn!(
            "corrupt alpha snapshot at {} could not be quarantined: {err}",
            path.display()
        ),
    }
    AlphaLedger::new_at(now_ms)
}
