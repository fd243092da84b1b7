//! Snapshot persistence for the alpha ledger: round-trip fidelity, atomic
//! writes, quarantine of unreadable or inconsistent documents, legacy v1
//! upgrade, and the work-based snapshot cadence.

use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use warden_infra::ledger::{AlphaLedger, AlphaLedgerError, TestOutcome};

const T0: u64 = 1_700_000_000_000;

fn temp_snapshot_path(tag: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock before unix epoch")
        .as_nanos();
    std::env::temp_dir().join(format!(
        "warden_alpha_snapshot_{tag}_{}_{}.json",
        std::process::id(),
        nanos
    ))
}

fn remove_if_exists(path: &std::path::Path) {
    let _ = std::fs::remove_file(path);
}

fn is_token(s: &str) -> bool {
    s.len() == 16 && u64::from_str_radix(s, 16).is_ok()
}

// --- Round trip ----------------------------------------------------------

#[test]
fn test_round_trip_preserves_allocations_and_history() {
    let path = temp_snapshot_path("round_trip");
    remove_if_exists(&path);

    let ledger = AlphaLedger::with_history_cap_at(8, T0);
    let tok_a = ledger.open_at(T0, "exp-a", 0.2).unwrap();
    ledger.spend_at(T0 + 1, &tok_a, 0.05).unwrap();
    ledger.spend_at(T0 + 2, &tok_a, 0.02).unwrap();
    let tok_b = ledger.open_at(T0 + 3, "exp-b", 0.1).unwrap();
    ledger.close_at(T0 + 4, &tok_b, TestOutcome::Accept).unwrap();

    ledger.snapshot_at(T0 + 10, &path).unwrap();
    let restored = AlphaLedger::restore_at(T0 + 20, &path);

    assert_eq!(restored.summary(), ledger.summary());
    assert_eq!(restored.len(), 2);
    assert_eq!(restored.open_count(), 1);

    let txn = restored.transaction(&tok_a).expect("exp-a survives");
    assert!((txn.spent - 0.07).abs() < 1e-9);
    assert_eq!(txn.history.len(), 2);
    assert_eq!(txn.history.back().unwrap().at_ms, T0 + 2);

    let closed = restored.transaction(&tok_b).expect("exp-b survives");
    assert_eq!(closed.outcome, Some(TestOutcome::Accept));
    assert_eq!(closed.closed_at_ms, Some(T0 + 4));

    remove_if_exists(&path);
}

#[test]
fn test_restored_tokens_stay_spendable() {
    let path = temp_snapshot_path("spendable");
    remove_if_exists(&path);

    let ledger = AlphaLedger::new_at(T0);
    let token = ledger.open_at(T0, "exp-live", 0.1).unwrap();
    ledger.spend_at(T0 + 1, &token, 0.01).unwrap();
    ledger.snapshot_at(T0 + 2, &path).unwrap();

    let restored = AlphaLedger::restore_at(T0 + 3, &path);
    assert_eq!(
        restored.open_token("exp-live").as_deref(),
        Some(token.as_str())
    );
    let after = restored.spend_at(T0 + 4, &token, 0.02).unwrap();
    assert!((after - 0.03).abs() < 1e-9);

    match restored.open_at(T0 + 5, "exp-live", 0.05) {
        Err(AlphaLedgerError::TestAlreadyOpen { test_id }) => assert_eq!(test_id, "exp-live"),
        other => panic!("expected TestAlreadyOpen, got {other:?}"),
    }

    remove_if_exists(&path);
}

// --- Missing files and atomic writes --------------------------------------

#[test]
fn test_missing_file_starts_empty() {
    let path = temp_snapshot_path("missing");
    remove_if_exists(&path);

    let restored = AlphaLedger::restore_at(T0, &path);
    assert!(restored.is_empty());
    assert_eq!(restored.open_count(), 0);
    assert!(!path.exists(), "restore must not create {path:?}");
}

#[test]
fn test_snapshot_renames_over_the_target() {
    let path = temp_snapshot_path("atomic");
    remove_if_exists(&path);

    let ledger = AlphaLedger::new_at(T0);
    ledger.open_at(T0, "exp-a", 0.05).unwrap();
    ledger.snapshot_at(T0 + 1, &path).unwrap();

    let tmp = PathBuf::from(format!("{}.tmp", path.display()));
    assert!(!tmp.exists(), "tmp file {tmp:?} must not survive the rename");

    let raw = std::fs::read_to_string(&path).unwrap();
    let doc: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(doc["version"], 2);
    assert_eq!(doc["transactions"].as_array().unwrap().len(), 1);
    assert_eq!(ledger.metrics().snapshots_total(), 1);

    remove_if_exists(&path);
}

// --- Quarantine ------------------------------------------------------------

#[test]
fn test_garbage_is_quarantined_with_bytes_preserved() {
    let path = temp_snapshot_path("garbage");
    remove_if_exists(&path);
    std::fs::write(&path, "not-json{{{").unwrap();

    let restored = AlphaLedger::restore_at(T0 + 5, &path);
    assert!(restored.is_empty());
    assert!(!path.exists(), "corrupt file must be moved aside");

    let quarantined = PathBuf::from(format!("{}.corrupt.{}", path.display(), T0 + 5));
    assert!(quarantined.exists(), "missing quarantine file {quarantined:?}");
    assert_eq!(std::fs::read_to_string(&quarantined).unwrap(), "not-json{{{");

    remove_if_exists(&quarantined);
}

#[test]
fn test_unknown_version_is_quarantined() {
    let path = temp_snapshot_path("version");
    remove_if_exists(&path);
    std::fs::write(&path, r#"{"version":99,"history_cap":64,"transactions":[]}"#).unwrap();

    let restored = AlphaLedger::restore_at(T0, &path);
    assert!(restored.is_empty());
    assert!(!path.exists());

    let quarantined = PathBuf::from(format!("{}.corrupt.{T0}", path.display()));
    assert!(quarantined.exists());
    remove_if_exists(&quarantined);
}

#[test]
fn test_two_open_allocations_for_one_test_are_quarantined() {
    let path = temp_snapshot_path("dup_open");
    remove_if_exists(&path);
    let doc = r#"{
      "version": 2,
      "history_cap": 64,
      "transactions": [
        {"test_id": "exp-a", "token": "00000000000000aa", "alpha0": 0.1, "spent": 0.0,
         "outcome": null, "opened_at_ms": 1, "closed_at_ms": null, "history": []},
        {"test_id": "exp-a", "token": "00000000000000ab", "alpha0": 0.1, "spent": 0.0,
         "outcome": null, "opened_at_ms": 2, "closed_at_ms": null, "history": []}
      ]
    }"#;
    std::fs::write(&path, doc).unwrap();

    let restored = AlphaLedger::restore_at(T0, &path);
    assert!(restored.is_empty());

    let quarantined = PathBuf::from(format!("{}.corrupt.{T0}", path.display()));
    assert!(quarantined.exists());
    remove_if_exists(&quarantined);
}

#[test]
fn test_out_of_range_allocation_is_quarantined() {
    let path = temp_snapshot_path("bad_alpha");
    remove_if_exists(&path);
    let doc = r#"{
      "version": 2,
      "history_cap": 64,
      "transactions": [
        {"test_id": "exp-a", "token": "00000000000000aa", "alpha0": 1.5, "spent": 0.0,
         "outcome": null, "opened_at_ms": 1, "closed_at_ms": null, "history": []}
      ]
    }"#;
    std::fs::write(&path, doc).unwrap();

    let restored = AlphaLedger::restore_at(T0, &path);
    assert!(restored.is_empty());

    let quarantined = PathBuf::from(format!("{}.corrupt.{T0}", path.display()));
    assert!(quarantined.exists());
    remove_if_exists(&quarantined);
}

// --- Legacy upgrade --------------------------------------------------------

#[test]
fn test_legacy_v1_documents_are_upgraded() {
    let path = temp_snapshot_path("legacy");
    remove_if_exists(&path);
    let doc = r#"{
      "tests": {
        "exp-a": {"alpha0": 0.05, "spent": 0.01, "outcome": null, "opened_at_ms": 123},
        "exp-b": {"alpha0": 0.1, "spent": 0.1, "outcome": "accept", "opened_at_ms": 456},
        "exp-c": {"alpha0": 0.1, "spent": 0.15, "outcome": "reject", "opened_at_ms": 789}
      }
    }"#;
    std::fs::write(&path, doc).unwrap();

    let restored = AlphaLedger::restore_at(T0, &path);
    assert_eq!(restored.len(), 3);
    assert_eq!(restored.open_count(), 1);
    assert!(path.exists(), "successful upgrade leaves the source in place");

    let txns = restored.transactions();
    let mut tokens: Vec<&str> = txns.iter().map(|t| t.token.as_str()).collect();
    tokens.sort_unstable();
    tokens.dedup();
    assert_eq!(tokens.len(), 3, "minted tokens must be distinct");
    assert!(tokens.iter().all(|t| is_token(t)));

    let token = restored.open_token("exp-a").expect("exp-a stays open");
    let txn = restored.transaction(&token).unwrap();
    assert!((txn.spent - 0.01).abs() < 1e-12);
    assert_eq!(txn.opened_at_ms, 123);
    assert!(txn.history.is_empty(), "v1 carried no spend history");
    let after = restored.spend_at(T0 + 1, &token, 0.02).unwrap();
    assert!((after - 0.03).abs() < 1e-9);

    let b = txns.iter().find(|t| t.test_id == "exp-b").unwrap();
    assert_eq!(b.outcome, Some(TestOutcome::Accept));
    assert_eq!(b.closed_at_ms, None, "v1 never recorded close times");

    let c = txns.iter().find(|t| t.test_id == "exp-c").unwrap();
    assert_eq!(c.outcome, Some(TestOutcome::Reject));
    assert!(
        (c.spent - 0.1).abs() < 1e-12,
        "overspend clamps to the allocation"
    );

    remove_if_exists(&path);
}

#[test]
fn test_legacy_entry_with_bad_allocation_is_quarantined() {
    let path = temp_snapshot_path("legacy_bad");
    remove_if_exists(&path);
    let doc = r#"{
      "tests": {
        "exp-a": {"alpha0": 0.0, "spent": 0.0, "outcome": null, "opened_at_ms": 1}
      }
    }"#;
    std::fs::write(&path, doc).unwrap();

    let restored = AlphaLedger::restore_at(T0, &path);
    assert!(restored.is_empty());

    let quarantined = PathBuf::from(format!("{}.corrupt.{T0}", path.display()));
    assert!(quarantined.exists());
    remove_if_exists(&quarantined);
}

// --- Snapshot cadence --------------------------------------------------------

#[test]
fn test_cadence_snapshots_on_interval_or_event_pressure() {
    let path = temp_snapshot_path("cadence");
    remove_if_exists(&path);
    let interval = Duration::from_secs(30);

    let ledger = AlphaLedger::new_at(T0);
    // Nothing happened: never due, no matter how stale.
    let wrote = ledger
        .maybe_snapshot_at(T0 + 3_600_000, &path, interval, 100)
        .unwrap();
    assert!(!wrote);
    assert!(!path.exists());

    ledger.open_at(T0 + 1, "exp-a", 0.05).unwrap();
    // One pending event, interval not yet elapsed.
    let wrote = ledger
        .maybe_snapshot_at(T0 + 1_000, &path, interval, 100)
        .unwrap();
    assert!(!wrote);

    // Interval elapsed with work pending.
    let wrote = ledger
        .maybe_snapshot_at(T0 + 31_000, &path, interval, 100)
        .unwrap();
    assert!(wrote);
    assert!(path.exists());
    assert_eq!(ledger.metrics().snapshots_total(), 1);

    // The write consumed the pending events.
    let wrote = ledger
        .maybe_snapshot_at(T0 + 31_500, &path, interval, 100)
        .unwrap();
    assert!(!wrote);

    // Event pressure triggers before the interval does.
    let token = ledger.open_at(T0 + 32_000, "exp-b", 0.05).unwrap();
    let wrote = ledger
        .maybe_snapshot_at(T0 + 32_001, &path, interval, 2)
        .unwrap();
    assert!(!wrote, "one event is below the burst threshold");
    ledger.spend_at(T0 + 32_001, &token, 0.01).unwrap();
    let wrote = ledger
        .maybe_snapshot_at(T0 + 32_002, &path, interval, 2)
        .unwrap();
    assert!(wrote);
    assert_eq!(ledger.metrics().snapshots_total(), 2);

    remove_if_exists(&path);
}
