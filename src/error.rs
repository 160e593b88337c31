//! Error taxonomy shared by every tidydesk operation.
//!
//! Per-file problems never abort a batch: they are collected as [`ItemError`]
//! records inside the operation's report. Only store failures (and invalid
//! input detected before any work starts) surface as an [`Error`] from the
//! top-level call.

use serde::Serialize;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::config::ConfigError;

/// Machine-readable classification of an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Stat, read, copy or move failure on a single path.
    Io,
    /// Destination collision. Normally resolved by renaming.
    Conflict,
    /// Classifier unavailable, timed out or returned garbage.
    Gateway,
    /// Recorded state no longer matches the filesystem.
    Consistency,
    /// The persistence layer failed; durability cannot be guaranteed.
    Store,
    /// Invalid configuration.
    Config,
    /// Unknown session or snapshot id.
    NotFound,
    /// The operation was cancelled before it could run.
    Cancelled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Io => "io",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Gateway => "gateway",
            ErrorKind::Consistency => "consistency",
            ErrorKind::Store => "store",
            ErrorKind::Config => "config",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Failure talking to the classifier gateway.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("classifier did not answer within {0:?}")]
    Timeout(Duration),

    #[error("classifier transport error: {0}")]
    Transport(String),

    #[error("malformed classifier response: {0}")]
    Malformed(String),

    #[error("classifier worker disconnected")]
    Disconnected,
}

/// Top-level error returned by tidydesk operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("destination already exists: {}", path.display())]
    Conflict { path: PathBuf },

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("{reason}: {}", path.display())]
    Consistency { path: PathBuf, reason: String },

    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error(
        "session {session_id} interrupted after {recorded} durably recorded action(s): {source}"
    )]
    Interrupted {
        session_id: i64,
        recorded: usize,
        #[source]
        source: Box<Error>,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("session {0} not found")]
    SessionNotFound(i64),

    #[error("snapshot {0} not found")]
    SnapshotNotFound(i64),

    #[error("operation cancelled")]
    Cancelled,

    #[error("failed to start worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}

impl Error {
    /// Wraps an I/O error with the path it happened on.
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    pub fn consistency(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::Consistency {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Io { .. } => ErrorKind::Io,
            Error::Conflict { .. } => ErrorKind::Conflict,
            Error::Gateway(_) => ErrorKind::Gateway,
            Error::Consistency { .. } => ErrorKind::Consistency,
            Error::Store(_) => ErrorKind::Store,
            Error::Interrupted { .. } => ErrorKind::Store,
            Error::Config(_) => ErrorKind::Config,
            Error::SessionNotFound(_) | Error::SnapshotNotFound(_) => ErrorKind::NotFound,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::WorkerPool(_) => ErrorKind::Io,
        }
    }

    /// The path the error is about, if it concerns a single path.
    pub fn path(&self) -> Option<&Path> {
        match self {
            Error::Io { path, .. } | Error::Conflict { path } | Error::Consistency { path, .. } => {
                Some(path)
            }
            Error::Interrupted { source, .. } => source.path(),
            _ => None,
        }
    }
}

/// Result type for tidydesk operations.
pub type Result<T> = std::result::Result<T, Error>;

/// A per-item failure recorded in a batch report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemError {
    pub path: PathBuf,
    pub kind: ErrorKind,
    pub message: String,
}

impl ItemError {
    pub fn new(path: impl Into<PathBuf>, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind,
            message: message.into(),
        }
    }
}

impl From<&Error> for ItemError {
    fn from(err: &Error) -> Self {
        ItemError {
            path: err.path().map(Path::to_path_buf).unwrap_or_default(),
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl fmt::Display for ItemError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.kind, self.path.display(), self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_and_path_for_io_error() {
        let err = Error::io(
            "/tmp/a.txt",
            io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        );
        assert_eq!(err.kind(), ErrorKind::Io);
        assert_eq!(err.path(), Some(Path::new("/tmp/a.txt")));
    }

    #[test]
    fn test_interrupted_reports_store_kind_and_inner_path() {
        let inner = Error::consistency("/x/y", "gone");
        let err = Error::Interrupted {
            session_id: 3,
            recorded: 2,
            source: Box::new(inner),
        };
        assert_eq!(err.kind(), ErrorKind::Store);
        assert_eq!(err.path(), Some(Path::new("/x/y")));
        assert!(err.to_string().contains("2 durably recorded"));
    }

    #[test]
    fn test_item_error_from_error() {
        let err = Error::consistency("/dest/file.txt", "destination missing");
        let item = ItemError::from(&err);
        assert_eq!(item.kind, ErrorKind::Consistency);
        assert_eq!(item.path, PathBuf::from("/dest/file.txt"));
        assert!(item.to_string().starts_with("[consistency]"));
    }
}
