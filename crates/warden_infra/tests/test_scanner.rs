//! Snapshot scanner behavior: pending work reaches disk, shutdown wakes a
//! sleeping worker instead of waiting out its period, idle ledgers are never
//! flushed, and write failures are counted rather than fatal.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use warden_infra::ledger::AlphaLedger;
use warden_infra::scanner::{ScannerConfig, spawn_snapshot_scanner};

fn temp_scan_path(tag: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock before unix epoch")
        .as_nanos();
    std::env::temp_dir().join(format!(
        "warden_alpha_scan_{tag}_{}_{}.json",
        std::process::id(),
        nanos
    ))
}

fn remove_if_exists(path: &std::path::Path) {
    let _ = std::fs::remove_file(path);
}

/// Poll `probe` every few milliseconds until it holds or the deadline hits.
fn wait_until(probe: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if probe() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    probe()
}

// --- Flush and shutdown ------------------------------------------------------

#[test]
fn test_scanner_flushes_pending_work() {
    let path = temp_scan_path("flush");
    remove_if_exists(&path);

    let ledger = Arc::new(AlphaLedger::new());
    let token = ledger.open("exp-a", 0.05).unwrap();
    ledger.spend(&token, 0.01).unwrap();

    let config = ScannerConfig {
        period: Duration::from_millis(10),
        snapshot_max_interval: Duration::ZERO,
        snapshot_max_events: 1_000_000,
    };
    let handle = spawn_snapshot_scanner(Arc::clone(&ledger), path.clone(), config).unwrap();

    assert!(
        wait_until(|| path.exists()),
        "scanner never wrote a snapshot"
    );
    assert!(handle.passes_total() >= 1);
    assert!(handle.snapshots_total() >= 1);
    assert_eq!(handle.failures_total(), 0);
    assert!(handle.shutdown(Duration::from_secs(5)));

    let restored = AlphaLedger::restore(&path);
    assert_eq!(restored.summary(), ledger.summary());

    remove_if_exists(&path);
}

#[test]
fn test_shutdown_wakes_a_sleeping_worker() {
    let path = temp_scan_path("sleepy");
    remove_if_exists(&path);

    let ledger = Arc::new(AlphaLedger::new());
    let config = ScannerConfig {
        period: Duration::from_secs(3600),
        snapshot_max_interval: Duration::from_secs(30),
        snapshot_max_events: 128,
    };
    let handle = spawn_snapshot_scanner(ledger, path.clone(), config).unwrap();

    assert!(wait_until(|| handle.passes_total() >= 1));
    assert_eq!(handle.snapshots_total(), 0);
    // A worker mid-period only finishes inside the grace window if the
    // stop signal actually wakes it.
    assert!(handle.shutdown(Duration::from_secs(5)));
    assert!(!path.exists(), "idle ledger must not be flushed");
}

#[test]
fn test_dropping_the_handle_does_not_block() {
    let path = temp_scan_path("dropped");
    remove_if_exists(&path);

    let ledger = Arc::new(AlphaLedger::new());
    let config = ScannerConfig {
        period: Duration::from_secs(3600),
        snapshot_max_interval: Duration::from_secs(30),
        snapshot_max_events: 128,
    };
    let handle = spawn_snapshot_scanner(ledger, path.clone(), config).unwrap();

    let start = Instant::now();
    drop(handle);
    assert!(
        start.elapsed() < Duration::from_secs(5),
        "drop must signal stop without joining"
    );
}

// --- Idle and failure passes --------------------------------------------------

#[test]
fn test_idle_ledger_is_never_flushed() {
    let path = temp_scan_path("idle");
    remove_if_exists(&path);

    let ledger = Arc::new(AlphaLedger::new());
    let config = ScannerConfig {
        period: Duration::from_millis(5),
        snapshot_max_interval: Duration::ZERO,
        snapshot_max_events: 1,
    };
    let handle = spawn_snapshot_scanner(ledger, path.clone(), config).unwrap();

    assert!(wait_until(|| handle.passes_total() >= 3));
    assert_eq!(handle.snapshots_total(), 0);
    assert!(!path.exists());
    assert!(handle.shutdown(Duration::from_secs(5)));
}

#[test]
fn test_write_failures_are_counted_not_fatal() {
    // A directory at the snapshot path makes every rename fail.
    let dir = temp_scan_path("failpath");
    std::fs::create_dir(&dir).unwrap();

    let ledger = Arc::new(AlphaLedger::new());
    ledger.open("exp-a", 0.05).unwrap();

    let config = ScannerConfig {
        period: Duration::from_millis(5),
        snapshot_max_interval: Duration::ZERO,
        snapshot_max_events: 1,
    };
    let handle = spawn_snapshot_scanner(Arc::clone(&ledger), dir.clone(), config).unwrap();

    assert!(wait_until(|| handle.failures_total() >= 1));
    assert_eq!(handle.snapshots_total(), 0);
    assert!(handle.shutdown(Duration::from_secs(5)));

    // The failed write cleans up its own tmp file.
    let tmp = PathBuf::from(format!("{}.tmp", dir.display()));
    assert!(!tmp.exists());
    std::fs::remove_dir(&dir).unwrap();
}
