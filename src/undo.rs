/// Undo functionality for reverting organize sessions.
///
/// This module moves files back to their original locations based on the
/// actions recorded for a session in the store.
use serde::Serialize;
use std::fs;
use std::io;
use std::path::PathBuf;
use tracing::{debug, error, info, warn};

use crate::error::{Error, ErrorKind, ItemError, Result};
use crate::organizer::move_file;
use crate::progress::{ProgressEvent, ProgressSink};
use crate::session::{MoveAction, SessionStatus};
use crate::store::Store;

/// Represents the result of an undo operation.
#[derive(Debug, Clone, Serialize)]
pub struct UndoReport {
    pub session_id: i64,
    /// Files moved back in this run.
    pub restored: Vec<PathBuf>,
    /// Actions reversed by an earlier undo.
    pub already_undone: usize,
    /// Actions whose file is no longer at its destination.
    pub skipped: Vec<ItemError>,
    /// Actions that could not be reversed (occupied original path, I/O failure).
    pub failed: Vec<ItemError>,
    /// The session recorded no moves at all, e.g. an index-only run.
    pub nothing_to_undo: bool,
    /// Session status after the undo.
    pub status: SessionStatus,
}

impl UndoReport {
    fn new(session_id: i64, status: SessionStatus) -> Self {
        Self {
            session_id,
            restored: Vec::new(),
            already_undone: 0,
            skipped: Vec::new(),
            failed: Vec::new(),
            nothing_to_undo: false,
            status,
        }
    }

    /// Returns the total number of actions looked at.
    pub fn total_processed(&self) -> usize {
        self.restored.len() + self.already_undone + self.skipped.len() + self.failed.len()
    }

    /// Returns true if every moved file is back in place.
    pub fn is_complete_success(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty()
    }
}

/// Manages undo operations for organize sessions.
pub struct UndoManager<'a> {
    store: &'a Store,
}

impl<'a> UndoManager<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    /// Undoes every move of a session, newest first.
    ///
    /// Safe to repeat: actions already undone are counted and left alone, so a
    /// partial undo can simply be run again once the blocking problem is fixed.
    ///
    /// # Returns
    ///
    /// Returns an `UndoReport` describing what was restored, what failed and
    /// what was skipped. The session ends `undone` when every moved file is
    /// back and stays `active` otherwise. Returns an error if the session does
    /// not exist or the store fails.
    ///
    /// # Edge Cases Handled
    ///
    /// * **No moves recorded**: `nothing_to_undo` is set and the status is untouched
    /// * **File missing at destination**: Skipped with a consistency error
    /// * **Original path occupied**: Recorded as a failure; nothing is overwritten
    /// * **Original folder deleted**: Recreated before moving the file back
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use tidydesk::{ProgressSink, Store};
    /// use tidydesk::undo::UndoManager;
    /// use std::path::Path;
    ///
    /// let store = Store::open(Path::new("/tmp/tidydesk.db")).unwrap();
    /// match UndoManager::new(&store).undo(7, &ProgressSink::silent()) {
    ///     Ok(report) => println!("Restored {} files", report.restored.len()),
    ///     Err(e) => eprintln!("Undo failed: {}", e),
    /// }
    /// ```
    pub fn undo(&self, session_id: i64, progress: &ProgressSink) -> Result<UndoReport> {
        let session = self.store.session(session_id)?;
        let lock = self.store.session_lock(session_id);
        let _guard = lock.lock();

        let mut report = UndoReport::new(session_id, session.status);
        let actions = self.store.moved_actions_newest_first(session_id)?;
        if actions.is_empty() {
            debug!("Session {} recorded no moves, nothing to undo", session_id);
            report.nothing_to_undo = true;
            return Ok(report);
        }

        for action in &actions {
            if action.is_undone() {
                report.already_undone += 1;
                continue;
            }
            match self.restore(action) {
                Ok(()) => {}
                Err(item) if item.kind == ErrorKind::NotFound => {
                    warn!("Skipping undo of {}: {}", item.path.display(), item.message);
                    report.skipped.push(ItemError {
                        kind: ErrorKind::Consistency,
                        ..item
                    });
                    continue;
                }
                Err(item) => {
                    warn!("Failed to undo {}: {}", item.path.display(), item.message);
                    report.failed.push(item);
                    continue;
                }
            }

            if let Err(err) = self.record_restored(action) {
                if let Err(e) = move_file(&action.original_path, &action.destination_path) {
                    error!(
                        "Could not roll back unrecorded undo of {}: {}",
                        action.original_path.display(),
                        e
                    );
                }
                return Err(Error::Interrupted {
                    session_id,
                    recorded: report.restored.len(),
                    source: Box::new(err),
                });
            }
            progress.emit(ProgressEvent::FileRestored {
                session_id,
                path: action.original_path.clone(),
            });
            report.restored.push(action.original_path.clone());
        }

        report.status = if report.is_complete_success() {
            SessionStatus::Undone
        } else {
            SessionStatus::Active
        };
        self.store.set_session_status(session_id, report.status)?;
        info!(
            "Undo of session {}: {} restored, {} already undone, {} skipped, {} failed",
            session_id,
            report.restored.len(),
            report.already_undone,
            report.skipped.len(),
            report.failed.len()
        );
        Ok(report)
    }

    /// Moves one file back. `NotFound` means the destination is gone.
    fn restore(&self, action: &MoveAction) -> std::result::Result<(), ItemError> {
        let destination = &action.destination_path;
        let original = &action.original_path;

        match fs::symlink_metadata(destination) {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => {
                return Err(ItemError::new(
                    destination,
                    ErrorKind::NotFound,
                    "destination is no longer a regular file",
                ));
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(ItemError::new(
                    destination,
                    ErrorKind::NotFound,
                    "file no longer at its organized location",
                ));
            }
            Err(e) => return Err(ItemError::new(destination, ErrorKind::Io, e.to_string())),
        }

        if fs::symlink_metadata(original).is_ok() {
            return Err(ItemError::new(
                original,
                ErrorKind::Consistency,
                "original path is occupied",
            ));
        }

        if let Some(parent) = original.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| ItemError::new(parent, ErrorKind::Io, e.to_string()))?;
        }
        move_file(destination, original).map_err(|e| match e.kind() {
            io::ErrorKind::AlreadyExists => {
                ItemError::new(original, ErrorKind::Consistency, "original path is occupied")
            }
            _ => ItemError::new(destination, ErrorKind::Io, e.to_string()),
        })
    }

    fn record_restored(&self, action: &MoveAction) -> Result<()> {
        self.store.record_undo(action)?;
        debug!("Restored {}", action.original_path.display());
        Ok(())
    }
}
