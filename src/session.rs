//! Sessions and move actions: the undoable ledger of an organize run.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::config::DestinationMode;

/// Lifecycle of an organize run.
///
/// `Active` while files are being processed (and after a partial undo, so the
/// undo can be retried), `Completed` once every file was attempted, `Failed`
/// when the run aborted before any file was attempted, `Undone` once every
/// moved file is back where it came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Completed,
    Failed,
    Undone,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
            SessionStatus::Undone => "undone",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(SessionStatus::Active),
            "completed" => Ok(SessionStatus::Completed),
            "failed" => Ok(SessionStatus::Failed),
            "undone" => Ok(SessionStatus::Undone),
            other => Err(format!("unknown session status '{}'", other)),
        }
    }
}

/// One organize run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Session {
    pub id: i64,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: SessionStatus,
    pub destination_mode: DestinationMode,
    pub total: u64,
    /// Files moved. Each counter mirrors one [`ActionOutcome`].
    pub processed: u64,
    pub skipped: u64,
    pub errors: u64,
}

impl Session {
    /// Number of actions durably recorded so far.
    pub fn recorded(&self) -> u64 {
        self.processed + self.skipped + self.errors
    }

    pub fn is_index_only(&self) -> bool {
        self.destination_mode == DestinationMode::IndexOnly
    }
}

/// What happened to a single file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionOutcome {
    Moved,
    /// Not moved on purpose: shortcuts, index-only runs.
    Skipped,
    Error,
}

impl ActionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionOutcome::Moved => "moved",
            ActionOutcome::Skipped => "skipped",
            ActionOutcome::Error => "error",
        }
    }
}

impl fmt::Display for ActionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "moved" => Ok(ActionOutcome::Moved),
            "skipped" => Ok(ActionOutcome::Skipped),
            "error" => Ok(ActionOutcome::Error),
            other => Err(format!("unknown action outcome '{}'", other)),
        }
    }
}

/// Append-only record of one file in a session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MoveAction {
    pub id: i64,
    pub session_id: i64,
    pub original_path: PathBuf,
    pub destination_path: PathBuf,
    pub tags: Vec<String>,
    pub timestamp: DateTime<Utc>,
    pub outcome: ActionOutcome,
    /// Reason for a skip or error.
    pub message: Option<String>,
    /// Set once the move has been reversed.
    pub undone_at: Option<DateTime<Utc>>,
}

impl MoveAction {
    pub fn is_undone(&self) -> bool {
        self.undone_at.is_some()
    }
}

/// Action as produced by the organizer, before the store assigns an id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAction {
    pub original_path: PathBuf,
    pub destination_path: PathBuf,
    pub tags: Vec<String>,
    pub outcome: ActionOutcome,
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            SessionStatus::Active,
            SessionStatus::Completed,
            SessionStatus::Failed,
            SessionStatus::Undone,
        ] {
            assert_eq!(status.as_str().parse::<SessionStatus>().unwrap(), status);
        }
        assert!("paused".parse::<SessionStatus>().is_err());
    }

    #[test]
    fn test_outcome_parse() {
        assert_eq!("moved".parse::<ActionOutcome>().unwrap(), ActionOutcome::Moved);
        assert!("teleported".parse::<ActionOutcome>().is_err());
    }
}
