use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Row, params};
use serde::Serialize;
use std::path::Path;
use tracing::debug;

use super::sqlite::{Store, now_rfc3339, parse_optional_timestamp, parse_text, parse_timestamp, path_from_row, path_value};
use crate::error::{Error, Result};
use crate::snapshot::{Snapshot, SnapshotEntry, SnapshotState, WatchedFolder};

const SNAPSHOT_COLUMNS: &str =
    "id, folder, created_at, sealed_at, pruned_at, state, file_count, total_size, signature";

/// Row counts across the whole database.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStatistics {
    pub sessions: u64,
    pub moved_actions: u64,
    pub indexed_files: u64,
    pub sealed_snapshots: u64,
    pub pruned_snapshots: u64,
    pub snapshot_entries: u64,
    pub distinct_blobs: u64,
    pub watched_folders: u64,
}

fn snapshot_from_row(row: &Row<'_>) -> rusqlite::Result<Snapshot> {
    let created_at: String = row.get(2)?;
    let state: String = row.get(5)?;
    Ok(Snapshot {
        id: row.get(0)?,
        folder: path_from_row(row, 1)?,
        created_at: parse_timestamp(2, &created_at)?,
        sealed_at: parse_optional_timestamp(3, row.get(3)?)?,
        pruned_at: parse_optional_timestamp(4, row.get(4)?)?,
        state: parse_text::<SnapshotState>(5, &state)?,
        file_count: row.get::<_, i64>(6)? as u64,
        total_size: row.get::<_, i64>(7)? as u64,
        signature: row.get(8)?,
    })
}

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<SnapshotEntry> {
    Ok(SnapshotEntry {
        relative_path: row.get(0)?,
        size: row.get::<_, i64>(1)? as u64,
        mtime_ns: row.get(2)?,
        hash: row.get(3)?,
    })
}

fn watched_from_row(row: &Row<'_>) -> rusqlite::Result<WatchedFolder> {
    let added_at: String = row.get(3)?;
    Ok(WatchedFolder {
        folder: path_from_row(row, 0)?,
        interval_secs: row.get::<_, i64>(1)? as u64,
        retain: row.get::<_, i64>(2)? as u32,
        added_at: parse_timestamp(3, &added_at)?,
        last_snapshot_at: parse_optional_timestamp(4, row.get(4)?)?,
        active: row.get(5)?,
    })
}

impl Store {
    // ── Snapshots ────────────────────────────────────────────────

    /// Opens a snapshot in the `capturing` state.
    pub fn begin_snapshot(&self, folder: &Path) -> Result<Snapshot> {
        let id = {
            let conn = self.connection();
            conn.execute(
                "INSERT INTO snapshots (folder, created_at, state) VALUES (?1, ?2, ?3)",
                params![
                    path_value(folder),
                    now_rfc3339(),
                    SnapshotState::Capturing.as_str()
                ],
            )?;
            conn.last_insert_rowid()
        };
        debug!("Snapshot {} capturing {}", id, folder.display());
        self.snapshot(id)
    }

    pub fn insert_snapshot_entries(&self, snapshot_id: i64, entries: &[SnapshotEntry]) -> Result<()> {
        let mut conn = self.connection();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO snapshot_entries \
                 (snapshot_id, relative_path, size, mtime_ns, hash) VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for entry in entries {
                stmt.execute(params![
                    snapshot_id,
                    entry.relative_path,
                    entry.size as i64,
                    entry.mtime_ns,
                    entry.hash
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Transitions `capturing` to `sealed`. Sealed snapshots are immutable.
    pub fn seal_snapshot(
        &self,
        snapshot_id: i64,
        file_count: u64,
        total_size: u64,
        signature: &str,
    ) -> Result<Snapshot> {
        let changed = self.connection().execute(
            "UPDATE snapshots SET state = ?1, sealed_at = ?2, file_count = ?3, \
             total_size = ?4, signature = ?5 WHERE id = ?6 AND state = ?7",
            params![
                SnapshotState::Sealed.as_str(),
                now_rfc3339(),
                file_count as i64,
                total_size as i64,
                signature,
                snapshot_id,
                SnapshotState::Capturing.as_str()
            ],
        )?;
        if changed == 0 {
            let snapshot = self.snapshot(snapshot_id)?;
            return Err(Error::consistency(
                &snapshot.folder,
                format!("snapshot {} is {}, not capturing", snapshot_id, snapshot.state),
            ));
        }
        self.snapshot(snapshot_id)
    }

    pub fn get_snapshot(&self, snapshot_id: i64) -> Result<Option<Snapshot>> {
        let sql = format!("SELECT {} FROM snapshots WHERE id = ?1", SNAPSHOT_COLUMNS);
        let snapshot = self
            .connection()
            .query_row(&sql, params![snapshot_id], snapshot_from_row)
            .optional()?;
        Ok(snapshot)
    }

    pub fn snapshot(&self, snapshot_id: i64) -> Result<Snapshot> {
        self.get_snapshot(snapshot_id)?
            .ok_or(Error::SnapshotNotFound(snapshot_id))
    }

    /// Snapshots newest first, optionally for one folder only.
    pub fn list_snapshots(&self, folder: Option<&Path>) -> Result<Vec<Snapshot>> {
        let conn = self.connection();
        let snapshots = match folder {
            Some(folder) => {
                let sql = format!(
                    "SELECT {} FROM snapshots WHERE folder = ?1 ORDER BY id DESC",
                    SNAPSHOT_COLUMNS
                );
                let mut stmt = conn.prepare(&sql)?;
                stmt.query_map(params![path_value(folder)], snapshot_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?
            }
            None => {
                let sql = format!("SELECT {} FROM snapshots ORDER BY id DESC", SNAPSHOT_COLUMNS);
                let mut stmt = conn.prepare(&sql)?;
                stmt.query_map([], snapshot_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?
            }
        };
        Ok(snapshots)
    }

    pub fn sealed_snapshots_oldest_first(&self, folder: &Path) -> Result<Vec<Snapshot>> {
        let sql = format!(
            "SELECT {} FROM snapshots WHERE folder = ?1 AND state = 'sealed' ORDER BY id ASC",
            SNAPSHOT_COLUMNS
        );
        let conn = self.connection();
        let mut stmt = conn.prepare(&sql)?;
        let snapshots = stmt
            .query_map(params![path_value(folder)], snapshot_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(snapshots)
    }

    pub fn latest_sealed_snapshot(&self, folder: &Path) -> Result<Option<Snapshot>> {
        let sql = format!(
            "SELECT {} FROM snapshots WHERE folder = ?1 AND state = 'sealed' \
             ORDER BY id DESC LIMIT 1",
            SNAPSHOT_COLUMNS
        );
        let snapshot = self
            .connection()
            .query_row(&sql, params![path_value(folder)], snapshot_from_row)
            .optional()?;
        Ok(snapshot)
    }

    /// Snapshots of `folder` still `capturing` that were opened before `before_id`.
    ///
    /// A newer snapshot has finished since, so these captures were abandoned.
    pub fn stale_capturing_snapshots(&self, folder: &Path, before_id: i64) -> Result<Vec<Snapshot>> {
        let sql = format!(
            "SELECT {} FROM snapshots WHERE folder = ?1 AND state = 'capturing' AND id < ?2 \
             ORDER BY id ASC",
            SNAPSHOT_COLUMNS
        );
        let conn = self.connection();
        let mut stmt = conn.prepare(&sql)?;
        let snapshots = stmt
            .query_map(params![path_value(folder), before_id], snapshot_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(snapshots)
    }

    /// Entries ordered by relative path.
    pub fn snapshot_entries(&self, snapshot_id: i64) -> Result<Vec<SnapshotEntry>> {
        let conn = self.connection();
        let mut stmt = conn.prepare(
            "SELECT relative_path, size, mtime_ns, hash FROM snapshot_entries \
             WHERE snapshot_id = ?1 ORDER BY relative_path",
        )?;
        let entries = stmt
            .query_map(params![snapshot_id], entry_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    /// Tombstones a snapshot and drops its entries.
    ///
    /// Returns the content hashes no longer referenced by any snapshot; their
    /// blobs can be deleted.
    pub fn prune_snapshot(&self, snapshot_id: i64) -> Result<Vec<String>> {
        let mut conn = self.connection();
        let tx = conn.transaction()?;
        let hashes = {
            let mut stmt = tx.prepare(
                "SELECT DISTINCT hash FROM snapshot_entries WHERE snapshot_id = ?1",
            )?;
            stmt.query_map(params![snapshot_id], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?
        };
        tx.execute(
            "DELETE FROM snapshot_entries WHERE snapshot_id = ?1",
            params![snapshot_id],
        )?;
        tx.execute(
            "UPDATE snapshots SET state = ?1, pruned_at = ?2 WHERE id = ?3",
            params![SnapshotState::Pruned.as_str(), now_rfc3339(), snapshot_id],
        )?;
        let mut orphaned = Vec::new();
        {
            let mut stmt =
                tx.prepare("SELECT COUNT(*) FROM snapshot_entries WHERE hash = ?1")?;
            for hash in hashes {
                let refs: i64 = stmt.query_row(params![hash], |row| row.get(0))?;
                if refs == 0 {
                    orphaned.push(hash);
                }
            }
        }
        tx.commit()?;
        debug!(
            "Snapshot {} pruned, {} blob(s) unreferenced",
            snapshot_id,
            orphaned.len()
        );
        Ok(orphaned)
    }

    /// Number of snapshot entries pointing at a blob.
    pub fn blob_ref_count(&self, hash: &str) -> Result<u64> {
        let count: i64 = self.connection().query_row(
            "SELECT COUNT(*) FROM snapshot_entries WHERE hash = ?1",
            params![hash],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    // ── Watched folders ──────────────────────────────────────────

    /// Adds a folder to the schedule, or reactivates and updates it.
    pub fn add_watched_folder(&self, folder: &Path, interval_secs: u64, retain: u32) -> Result<()> {
        self.connection().execute(
            "INSERT INTO watched_folders (folder, interval_secs, retain, added_at, active) \
             VALUES (?1, ?2, ?3, ?4, 1) \
             ON CONFLICT(folder) DO UPDATE SET interval_secs = excluded.interval_secs, \
             retain = excluded.retain, active = 1",
            params![path_value(folder), interval_secs as i64, retain as i64, now_rfc3339()],
        )?;
        Ok(())
    }

    /// Deactivates a watched folder. Returns false if it was not watched.
    pub fn remove_watched_folder(&self, folder: &Path) -> Result<bool> {
        let changed = self.connection().execute(
            "UPDATE watched_folders SET active = 0 WHERE folder = ?1 AND active = 1",
            params![path_value(folder)],
        )?;
        Ok(changed > 0)
    }

    pub fn watched_folders(&self) -> Result<Vec<WatchedFolder>> {
        let conn = self.connection();
        let mut stmt = conn.prepare(
            "SELECT folder, interval_secs, retain, added_at, last_snapshot_at, active \
             FROM watched_folders WHERE active = 1 ORDER BY folder",
        )?;
        let folders = stmt
            .query_map([], watched_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(folders)
    }

    pub fn record_watched_snapshot(&self, folder: &Path, at: DateTime<Utc>) -> Result<()> {
        self.connection().execute(
            "UPDATE watched_folders SET last_snapshot_at = ?1 WHERE folder = ?2",
            params![at.to_rfc3339(), path_value(folder)],
        )?;
        Ok(())
    }

    // ── Statistics ───────────────────────────────────────────────

    pub fn statistics(&self) -> Result<StoreStatistics> {
        let conn = self.connection();
        let count = |sql: &str| -> rusqlite::Result<u64> {
            conn.query_row(sql, [], |row| row.get::<_, i64>(0))
                .map(|n| n as u64)
        };
        Ok(StoreStatistics {
            sessions: count("SELECT COUNT(*) FROM sessions")?,
            moved_actions: count("SELECT COUNT(*) FROM actions WHERE outcome = 'moved'")?,
            indexed_files: count("SELECT COUNT(*) FROM files")?,
            sealed_snapshots: count("SELECT COUNT(*) FROM snapshots WHERE state = 'sealed'")?,
            pruned_snapshots: count("SELECT COUNT(*) FROM snapshots WHERE state = 'pruned'")?,
            snapshot_entries: count("SELECT COUNT(*) FROM snapshot_entries")?,
            distinct_blobs: count("SELECT COUNT(DISTINCT hash) FROM snapshot_entries")?,
            watched_folders: count("SELECT COUNT(*) FROM watched_folders WHERE active = 1")?,
        })
    }
}
