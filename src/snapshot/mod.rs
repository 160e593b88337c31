//! Point-in-time copies of watched folders.
//!
//! A snapshot records every file of a folder as a path, size, mtime and
//! content hash; the content itself lives once per hash in a
//! [`ContentStore`]. Snapshots move `capturing -> sealed -> pruned` and never
//! change after sealing. A capture that never sealed goes straight to
//! `pruned` once a newer snapshot of its folder has sealed.

mod content_store;
mod diff;
mod engine;
mod scheduler;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub use content_store::ContentStore;
pub use diff::{SnapshotDiff, diff_entries};
pub use engine::{
    PruneReport, RestoreReport, SnapshotEngine, SnapshotReport, SnapshotStatistics,
    default_restore_destination,
};
pub use scheduler::{ScheduledRun, SnapshotScheduler, run_due};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotState {
    /// Entries are still being written. Never diffed or restored.
    Capturing,
    Sealed,
    /// Tombstone: entries dropped, metadata kept.
    Pruned,
}

impl SnapshotState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SnapshotState::Capturing => "capturing",
            SnapshotState::Sealed => "sealed",
            SnapshotState::Pruned => "pruned",
        }
    }
}

impl fmt::Display for SnapshotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SnapshotState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "capturing" => Ok(SnapshotState::Capturing),
            "sealed" => Ok(SnapshotState::Sealed),
            "pruned" => Ok(SnapshotState::Pruned),
            other => Err(format!("unknown snapshot state '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub id: i64,
    pub folder: PathBuf,
    pub created_at: DateTime<Utc>,
    pub sealed_at: Option<DateTime<Utc>>,
    pub pruned_at: Option<DateTime<Utc>>,
    pub state: SnapshotState,
    pub file_count: u64,
    pub total_size: u64,
    /// BLAKE3 over the sorted (path, hash) pairs; equal signatures mean equal trees.
    pub signature: Option<String>,
}

impl Snapshot {
    pub fn is_sealed(&self) -> bool {
        self.state == SnapshotState::Sealed
    }
}

/// One file inside a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct SnapshotEntry {
    /// Path relative to the snapshotted folder, always `/`-separated.
    pub relative_path: String,
    pub size: u64,
    pub mtime_ns: i64,
    pub hash: String,
}

/// A folder snapshotted on a schedule.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WatchedFolder {
    pub folder: PathBuf,
    pub interval_secs: u64,
    pub retain: u32,
    pub added_at: DateTime<Utc>,
    pub last_snapshot_at: Option<DateTime<Utc>>,
    pub active: bool,
}

impl WatchedFolder {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// True when no snapshot was taken yet or the interval has elapsed.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.last_snapshot_at {
            None => true,
            Some(last) => {
                let elapsed = now.signed_duration_since(last);
                elapsed.num_seconds() >= self.interval_secs as i64
            }
        }
    }
}
