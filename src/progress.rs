//! Progress events emitted by long-running operations.
//!
//! The core pushes events into a channel and never waits on whoever consumes
//! them: a full or disconnected channel just drops the event.

use crossbeam_channel::{Receiver, Sender, TrySendError};
use std::path::PathBuf;

use crate::error::ItemError;
use crate::session::SessionStatus;

#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    ScanStarted { root: PathBuf },
    ScanFinished { files: usize, errors: usize },
    SessionOpened { session_id: i64, total: usize },
    FileMoved { session_id: i64, from: PathBuf, to: PathBuf },
    FileIndexed { session_id: i64, path: PathBuf },
    FileSkipped { session_id: i64, path: PathBuf, reason: String },
    FileFailed { session_id: i64, error: ItemError },
    GatewayFallback { files: usize, reason: String },
    SessionFinished { session_id: i64, status: SessionStatus },
    FileRestored { session_id: i64, path: PathBuf },
    SnapshotStarted { folder: PathBuf, total: usize },
    SnapshotFileCaptured { relative_path: String },
    SnapshotSealed { snapshot_id: i64, file_count: usize },
    RestoreStarted { snapshot_id: i64, total: usize },
    SnapshotFileRestored { snapshot_id: i64, path: PathBuf },
}

/// Sending half handed to operations. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct ProgressSink {
    sender: Option<Sender<ProgressEvent>>,
}

impl ProgressSink {
    /// A sink that discards everything.
    pub fn silent() -> Self {
        Self { sender: None }
    }

    /// Bounded channel; events are dropped once `capacity` are pending.
    pub fn bounded(capacity: usize) -> (Self, Receiver<ProgressEvent>) {
        let (sender, receiver) = crossbeam_channel::bounded(capacity);
        (
            Self {
                sender: Some(sender),
            },
            receiver,
        )
    }

    pub fn unbounded() -> (Self, Receiver<ProgressEvent>) {
        let (sender, receiver) = crossbeam_channel::unbounded();
        (
            Self {
                sender: Some(sender),
            },
            receiver,
        )
    }

    pub fn emit(&self, event: ProgressEvent) {
        let Some(sender) = &self.sender else {
            return;
        };
        match sender.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => tracing::trace!("progress channel full, event dropped"),
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}
