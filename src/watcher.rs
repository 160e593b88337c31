//! Entry point for file-created notifications.
//!
//! Whatever produces the events (an OS notification backend, a polling loop, a
//! test) sends [`WatchEvent`]s over a channel; each accepted file is organized
//! as its own single-file session.

use chrono::{DateTime, Utc};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::cancel::CancellationToken;
use crate::error::{ItemError, Result};
use crate::organizer::{OrganizeOptions, OrganizeReport, Organizer};
use crate::progress::ProgressSink;

const POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchEventKind {
    Created,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WatchEvent {
    pub path: PathBuf,
    pub kind: WatchEventKind,
    pub timestamp: DateTime<Utc>,
}

impl WatchEvent {
    pub fn created(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            kind: WatchEventKind::Created,
            timestamp: Utc::now(),
        }
    }
}

/// Totals for one [`WatchDispatcher::run`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct WatchSummary {
    pub sessions: Vec<i64>,
    pub ignored: usize,
    pub failed: Vec<ItemError>,
}

/// Turns watch events for one folder into organize sessions.
pub struct WatchDispatcher {
    organizer: Arc<Organizer>,
    root: PathBuf,
    options: OrganizeOptions,
}

impl WatchDispatcher {
    /// `options` normally come from [`OrganizeOptions::from_config`], so the
    /// destination mode follows the current configuration.
    pub fn new(organizer: Arc<Organizer>, root: impl Into<PathBuf>, options: OrganizeOptions) -> Self {
        Self {
            organizer,
            root: root.into(),
            options,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Organizes the file named by `event`.
    ///
    /// Returns `Ok(None)` when the event is ignored: the path is gone, is not a
    /// regular file, is filtered out, or already lies under a destination root.
    pub fn handle(&self, event: &WatchEvent, progress: &ProgressSink) -> Result<Option<OrganizeReport>> {
        let path = &event.path;
        let is_file = path.symlink_metadata().is_ok_and(|meta| meta.is_file());
        if !is_file || !self.organizer.accepts(&self.root, path) {
            debug!("Ignoring watch event for {}", path.display());
            return Ok(None);
        }
        let report = self
            .organizer
            .organize_file(&self.root, path, &self.options, progress)?;
        debug!(
            "Watch event for {} handled in session {}",
            path.display(),
            report.session.id
        );
        Ok(Some(report))
    }

    /// Handles events until the channel disconnects or `cancel` fires.
    pub fn run(
        &self,
        events: &Receiver<WatchEvent>,
        cancel: &CancellationToken,
        progress: &ProgressSink,
    ) -> WatchSummary {
        let mut summary = WatchSummary::default();
        info!("Dispatching watch events for {}", self.root.display());
        while !cancel.is_cancelled() {
            let event = match events.recv_timeout(POLL_INTERVAL) {
                Ok(event) => event,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            };
            match self.handle(&event, progress) {
                Ok(Some(report)) => summary.sessions.push(report.session.id),
                Ok(None) => summary.ignored += 1,
                Err(e) => {
                    warn!("Watch event for {} failed: {}", event.path.display(), e);
                    summary.failed.push(ItemError::from(&e));
                }
            }
        }
        info!(
            "Watch dispatch for {} stopped: {} session(s), {} ignored, {} failed",
            self.root.display(),
            summary.sessions.len(),
            summary.ignored,
            summary.failed.len()
        );
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AppConfig, DestinationMode};
    use crate::indexer::Indexer;
    use crate::store::Store;
    use std::fs;
    use tempfile::TempDir;

    fn dispatcher(root: &Path, destination: DestinationMode) -> WatchDispatcher {
        let config = AppConfig::default();
        let store = Arc::new(Store::open_in_memory().unwrap());
        let indexer = Indexer::from_config(&config).unwrap();
        let organizer = Arc::new(Organizer::new(store, indexer, &config).with_gateway(None));
        let options = OrganizeOptions {
            destination,
            ..Default::default()
        };
        WatchDispatcher::new(organizer, root, options)
    }

    #[test]
    fn test_created_file_gets_its_own_session() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let root = temp_dir.path();
        fs::write(root.join("notes.txt"), "n").unwrap();

        let dispatcher = dispatcher(root, DestinationMode::DesktopSubfolder);
        let report = dispatcher
            .handle(&WatchEvent::created(root.join("notes.txt")), &ProgressSink::silent())
            .expect("Dispatch failed")
            .expect("Event was ignored");

        // Verify a single-file session named after the file
        assert_eq!(report.session.total, 1);
        assert_eq!(report.session.name, "watch: notes.txt");
        assert!(root.join("TidyDesk/Documents/notes.txt").exists());
    }

    #[test]
    fn test_ignores_missing_and_organized_files() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let root = temp_dir.path();
        fs::create_dir_all(root.join("TidyDesk/Images")).unwrap();
        fs::write(root.join("TidyDesk/Images/x.jpg"), "x").unwrap();
        fs::write(root.join(".hidden"), "h").unwrap();

        let dispatcher = dispatcher(root, DestinationMode::DesktopSubfolder);
        let progress = ProgressSink::silent();
        for path in [
            root.join("gone.txt"),
            root.join("TidyDesk/Images/x.jpg"),
            root.join(".hidden"),
        ] {
            let handled = dispatcher.handle(&WatchEvent::created(path), &progress).unwrap();
            assert!(handled.is_none());
        }
    }

    #[test]
    fn test_run_stops_when_channel_closes() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let root = temp_dir.path();
        fs::write(root.join("a.pdf"), "a").unwrap();

        let dispatcher = dispatcher(root, DestinationMode::IndexOnly);
        let (tx, rx) = crossbeam_channel::unbounded();
        tx.send(WatchEvent::created(root.join("a.pdf"))).unwrap();
        tx.send(WatchEvent::created(root.join("missing.pdf"))).unwrap();
        drop(tx);

        let summary = dispatcher.run(&rx, &CancellationToken::new(), &ProgressSink::silent());
        assert_eq!(summary.sessions.len(), 1);
        assert_eq!(summary.ignored, 1);
        assert!(summary.failed.is_empty());
        // Verify index-only leaves the file in place
        assert!(root.join("a.pdf").exists());
    }
}
