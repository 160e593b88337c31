use chrono::{DateTime, Utc};
use crossbeam_channel::{Sender, bounded, select, tick};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::engine::{PruneReport, SnapshotEngine, SnapshotReport};
use crate::cancel::CancellationToken;
use crate::error::Result;
use crate::progress::ProgressSink;

/// Outcome of one scheduled snapshot.
#[derive(Debug)]
pub struct ScheduledRun {
    pub folder: PathBuf,
    pub snapshot: Result<SnapshotReport>,
    pub prune: Option<Result<PruneReport>>,
}

/// Snapshots every watched folder whose interval has elapsed at `now`, then
/// prunes it down to its retention count.
///
/// A failing folder does not stop the others.
pub fn run_due(
    engine: &SnapshotEngine,
    now: DateTime<Utc>,
    cancel: &CancellationToken,
) -> Result<Vec<ScheduledRun>> {
    let mut runs = Vec::new();
    for watched in engine.watched_folders()? {
        if cancel.is_cancelled() {
            break;
        }
        if !watched.is_due(now) {
            continue;
        }

        debug!("Scheduled snapshot of {}", watched.folder.display());
        let snapshot = engine.snapshot(&watched.folder, cancel, &ProgressSink::silent());
        let prune = match &snapshot {
            Ok(report) if report.snapshot.is_sealed() => {
                Some(engine.prune(&watched.folder, watched.retain as usize))
            }
            Ok(_) => None,
            Err(e) => {
                warn!("Scheduled snapshot of {} failed: {}", watched.folder.display(), e);
                None
            }
        };
        if let Some(Err(e)) = &prune {
            warn!("Pruning {} failed: {}", watched.folder.display(), e);
        }
        runs.push(ScheduledRun {
            folder: watched.folder,
            snapshot,
            prune,
        });
    }
    Ok(runs)
}

/// Background thread that calls [`run_due`] on every tick.
pub struct SnapshotScheduler {
    shutdown: Option<Sender<()>>,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl SnapshotScheduler {
    pub fn start(engine: Arc<SnapshotEngine>, interval: Duration) -> io::Result<Self> {
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        let cancel = CancellationToken::new();
        let worker_cancel = cancel.clone();

        let handle = thread::Builder::new()
            .name("tidydesk-scheduler".to_string())
            .spawn(move || {
                let ticker = tick(interval);
                info!("Snapshot scheduler started, checking every {:?}", interval);
                loop {
                    match run_due(&engine, Utc::now(), &worker_cancel) {
                        Ok(runs) if !runs.is_empty() => {
                            debug!("Scheduler pass took {} snapshot(s)", runs.len())
                        }
                        Ok(_) => {}
                        Err(e) => error!("Scheduler pass failed: {}", e),
                    }
                    select! {
                        recv(shutdown_rx) -> _ => break,
                        recv(ticker) -> _ => {}
                    }
                }
                info!("Snapshot scheduler stopped");
            })?;

        Ok(Self {
            shutdown: Some(shutdown_tx),
            cancel,
            handle: Some(handle),
        })
    }

    /// Cancels any capture in progress and waits for the thread to exit.
    pub fn stop(mut self) {
        self.shutdown_now();
    }

    fn shutdown_now(&mut self) {
        self.cancel.cancel();
        // Dropping the sender wakes the select even if the channel is full.
        drop(self.shutdown.take());
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            error!("Snapshot scheduler thread panicked");
        }
    }
}

impl Drop for SnapshotScheduler {
    fn drop(&mut self) {
        self.shutdown_now();
    }
}
