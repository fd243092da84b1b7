//! Background thread that flushes the alpha ledger to disk.
//!
//! The worker wakes every `period`, asks the ledger whether a snapshot is
//! due, and goes back to sleep. Shutdown is condvar-driven: the handle
//! signals stop, the worker wakes immediately, and the caller waits a
//! bounded grace period for it to finish rather than blocking forever.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::ledger::AlphaLedger;

/// Scanner cadence and snapshot triggers.
#[derive(Debug, Clone)]
pub struct ScannerConfig {
    /// Pause between scan passes.
    pub period: Duration,
    /// Snapshot once this much time has passed since the last one.
    pub snapshot_max_interval: Duration,
    /// Snapshot once this many ledger events have accumulated.
    pub snapshot_max_events: u64,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        ScannerConfig {
            period: Duration::from_secs(1),
            snapshot_max_interval: Duration::from_secs(30),
            snapshot_max_events: 128,
        }
    }
}

#[derive(Debug, Default)]
struct ScannerFlags {
    stop: bool,
    done: bool,
}

#[derive(Debug, Default)]
struct ScannerShared {
    flags: Mutex<ScannerFlags>,
    wake: Condvar,
    passes_total: AtomicU64,
    snapshots_total: AtomicU64,
    failures_total: AtomicU64,
}

/// Handle to a running scanner thread.
pub struct ScannerHandle {
    shared: Arc<ScannerShared>,
    worker: Option<JoinHandle<()>>,
}

/// Start the scanner thread. The ledger keeps serving requests while the
/// scanner snapshots it from the side.
pub fn spawn_snapshot_scanner(
    ledger: Arc<AlphaLedger>,
    path: PathBuf,
    config: ScannerConfig,
) -> io::Result<ScannerHandle> {
    let shared = Arc::new(ScannerShared::default());
    let worker_shared = Arc::clone(&shared);
    let worker = thread::Builder::new()
        .name("alpha-snapshot-scanner".to_string())
        .spawn(move || scanner_loop(&ledger, &path, &config, &worker_shared))?;
    Ok(ScannerHandle {
        shared,
        worker: Some(worker),
    })
}

impl ScannerHandle {
    /// Signal stop and wait up to `grace` for the worker to finish. Returns
    /// whether it finished inside the window; if not, the thread is left to
    /// exit on its own and its handle is dropped.
    pub fn shutdown(mut self, grace: Duration) -> bool {
        self.signal_stop();
        let finished = {
            let flags = self
                .shared
                .flags
                .lock()
                .expect("scanner flags mutex poisoned");
            let (flags, _timeout) = self
                .shared
                .wake
                .wait_timeout_while(flags, grace, |f| !f.done)
                .expect("scanner flags mutex poisoned");
            flags.done
        };
        if finished && let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        finished
    }

    pub fn passes_total(&self) -> u64 {
        self.shared.passes_total.load(Ordering::Relaxed)
    }

    pub fn snapshots_total(&self) -> u64 {
        self.shared.snapshots_total.load(Ordering::Relaxed)
    }

    pub fn failures_total(&self) -> u64 {
        self.shared.failures_total.load(Ordering::Relaxed)
    }

    fn signal_stop(&self) {
        let mut flags = self
            .shared
            .flags
            .lock()
            .expect("scanner flags mutex poisoned");
        flags.stop = true;
        drop(flags);
        self.shared.wake.notify_all();
    }
}

impl Drop for ScannerHandle {
    fn drop(&mut self) {
        // Signal but never block in drop; shutdown() is the blocking path.
        if self.worker.is_some() {
            self.signal_stop();
        }
    }
}

fn scanner_loop(
    ledger: &AlphaLedger,
    path: &Path,
    config: &ScannerConfig,
    shared: &ScannerShared,
) {
    loop {
        {
            let flags = shared.flags.lock().expect("scanner flags mutex poisoned");
            if flags.stop {
                break;
            }
        }

        scan_once(ledger, path, config, shared);

        let flags = shared.flags.lock().expect("scanner flags mutex poisoned");
        if flags.stop {
            break;
        }
        // Spurious wakeups only cost an extra pass; the stop check at the
        // top of the loop keeps shutdown correct.
        let (flags, _timeout) = shared
            .wake
            .wait_timeout(flags, config.period)
            .expect("scanner flags mutex poisoned");
        if flags.stop {
            break;
        }
    }

    let mut flags = shared.flags.lock().expect("scanner flags mutex poisoned");
    flags.done = true;
    drop(flags);
    shared.wake.notify_all();
}

fn scan_once(ledger: &AlphaLedger, path: &Path, config: &ScannerConfig, shared: &ScannerShared) {
    shared.passes_total.fetch_add(1, Ordering::Relaxed);
    match ledger.maybe_snapshot(path, config.snapshot_max_interval, config.snapshot_max_events) {
        Ok(true) => {
            shared.snapshots_total.fetch_add(1, Ordering::Relaxed);
        }
        Ok(false) => {}
        Err(err) => {
            shared.failures_total.fetch_add(1, Ordering::Relaxed);
            tracing::warn!("snapshot scanner pass failed: {err}");
        }
    }
}
