//! Deferred, retrying deletion of on-disk batch artifacts.

use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, warn};

use crate::realtime::timing::run_at_interval;
use crate::telemetry;

/// Pending file deletions, drained on a fixed interval.
///
/// Duplicates are permitted; deletion is idempotent because a path that is
/// already gone counts as success. Failed deletions are re-enqueued with no
/// retry bound.
#[derive(Default)]
pub struct CleanupQueue {
    pending: Mutex<Vec<PathBuf>>,
}

/// Counts from one drain pass.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct DrainOutcome {
    pub removed: usize,
    pub requeued: usize,
}

impl CleanupQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a path for deferred deletion. Never blocks on I/O, never fails.
    pub fn enqueue(&self, path: impl Into<PathBuf>) {
        self.lock_pending().push(path.into());
    }

    pub fn pending_count(&self) -> usize {
        self.lock_pending().len()
    }

    /// Snapshot-and-empty the pending set, then attempt every deletion.
    /// "Already absent" is success; any other failure re-enqueues the path
    /// for the next pass.
    pub fn drain_once(&self) -> DrainOutcome {
        let drained = std::mem::take(&mut *self.lock_pending());

        let mut outcome = DrainOutcome::default();
        let mut retries = Vec::new();
        for path in drained {
            match fs::remove_file(&path) {
                Ok(()) => outcome.removed += 1,
                Err(err) if err.kind() == ErrorKind::NotFound => outcome.removed += 1,
                Err(err) => {
                    warn!(path = %path.display(), "artifact deletion failed, will retry: {err}");
                    retries.push(path);
                }
            }
        }

        outcome.requeued = retries.len();
        if !retries.is_empty() {
            self.lock_pending().extend(retries);
        }

        metrics::counter!("cleanup_removed_total").increment(outcome.removed as u64);
        metrics::counter!("cleanup_requeued_total").increment(outcome.requeued as u64);
        outcome
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, Vec<PathBuf>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle to the periodic cleanup thread.
pub struct CleanupWorker {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl CleanupWorker {
    pub fn stop(mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Spawn the worker that drains `queue` every `interval`.
pub fn spawn_cleanup_worker(queue: Arc<CleanupQueue>, interval: Duration) -> CleanupWorker {
    let running = Arc::new(AtomicBool::new(true));
    let worker_running = running.clone();

    let handle = telemetry::spawn_thread("artifact-cleanup", move || {
        run_at_interval(&worker_running, interval, || {
            let outcome = queue.drain_once();
            if outcome.removed > 0 || outcome.requeued > 0 {
                debug!(
                    removed = outcome.removed,
                    requeued = outcome.requeued,
                    "cleanup pass finished"
                );
            }
        });
    })
    .expect("failed to spawn cleanup worker");

    CleanupWorker {
        running,
        handle: Some(handle),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;

    #[test]
    fn duplicate_enqueues_drain_without_error() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("result.1.mp4");
        File::create(&artifact).unwrap();

        let queue = CleanupQueue::new();
        queue.enqueue(&artifact);
        queue.enqueue(&artifact);

        let outcome = queue.drain_once();
        assert_eq!(
            outcome,
            DrainOutcome {
                removed: 2,
                requeued: 0
            }
        );
        assert!(!artifact.exists());
        assert_eq!(queue.pending_count(), 0);
    }

    #[test]
    fn externally_removed_files_count_as_success() {
        let dir = tempfile::tempdir().unwrap();
        let queue = CleanupQueue::new();
        queue.enqueue(dir.path().join("never-existed.jpg"));

        let outcome = queue.drain_once();
        assert_eq!(outcome.removed, 1);
        assert_eq!(outcome.requeued, 0);
    }

    #[test]
    fn undeletable_paths_are_requeued_for_the_next_pass() {
        let dir = tempfile::tempdir().unwrap();
        let stubborn = dir.path().join("still-a-directory");
        fs::create_dir(&stubborn).unwrap();

        let queue = CleanupQueue::new();
        queue.enqueue(&stubborn);

        let outcome = queue.drain_once();
        assert_eq!(outcome.removed, 0);
        assert_eq!(outcome.requeued, 1);
        assert_eq!(queue.pending_count(), 1);

        // Once the obstruction clears, the retry succeeds.
        fs::remove_dir(&stubborn).unwrap();
        let outcome = queue.drain_once();
        assert_eq!(outcome.removed, 1);
        assert_eq!(queue.pending_count(), 0);
    }

    #[test]
    fn worker_drains_on_its_interval_and_stops_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("cover.jpg");
        File::create(&artifact).unwrap();

        let queue = Arc::new(CleanupQueue::new());
        queue.enqueue(&artifact);

        let worker = spawn_cleanup_worker(queue.clone(), Duration::from_millis(10));
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while artifact.exists() && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        worker.stop();

        assert!(!artifact.exists());
        assert_eq!(queue.pending_count(), 0);
    }
}
