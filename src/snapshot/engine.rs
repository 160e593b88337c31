use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

use super::content_store::ContentStore;
use super::diff::{SnapshotDiff, diff_entries};
use super::{Snapshot, SnapshotEntry, WatchedFolder};
use crate::cancel::CancellationToken;
use crate::config::{ConfigError, MIN_SNAPSHOT_INTERVAL_SECS, SnapshotSettings, WatchedFolderConfig};
use crate::error::{Error, ErrorKind, ItemError, Result};
use crate::hashing::copy_hashed;
use crate::indexer::{FileRecord, Indexer};
use crate::progress::{ProgressEvent, ProgressSink};
use crate::store::{Store, StoreStatistics};

#[derive(Debug, Clone, Serialize)]
pub struct SnapshotReport {
    pub snapshot: Snapshot,
    /// Files whose content was read and stored.
    pub hashed: usize,
    /// Files whose hash was carried over from the previous snapshot.
    pub reused: usize,
    pub errors: Vec<ItemError>,
    /// The snapshot was left `capturing`.
    pub cancelled: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RestoreReport {
    pub snapshot_id: i64,
    pub destination: PathBuf,
    pub restored: usize,
    pub failed: Vec<ItemError>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PruneReport {
    pub folder: PathBuf,
    pub pruned: Vec<i64>,
    /// Captures left `capturing` behind a newer sealed snapshot.
    pub discarded: Vec<i64>,
    pub blobs_removed: usize,
    pub bytes_freed: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SnapshotStatistics {
    pub store: StoreStatistics,
    /// Sum of file sizes across sealed snapshots, before deduplication.
    pub logical_bytes: u64,
    pub storage_dir: PathBuf,
    /// Bytes actually held by the content store.
    pub storage_bytes: u64,
}

/// Captures, compares, restores and prunes folder snapshots.
pub struct SnapshotEngine {
    store: Arc<Store>,
    indexer: Indexer,
    content: ContentStore,
    default_interval_secs: u64,
    default_retain: u32,
    /// Captures share it, prunes take it exclusively, so a blob deduplicated by
    /// an in-flight capture is never deleted underneath it.
    maintenance: RwLock<()>,
}

impl SnapshotEngine {
    pub fn new(
        store: Arc<Store>,
        indexer: Indexer,
        content: ContentStore,
        settings: &SnapshotSettings,
    ) -> Self {
        Self {
            store,
            indexer: indexer
                .with_recursive(true)
                .exclude_dir(folder_key(content.root())),
            content,
            default_interval_secs: settings.default_interval_secs,
            default_retain: settings.default_retain,
            maintenance: RwLock::new(()),
        }
    }

    /// Opens the content store under `settings.storage_dir`.
    pub fn open(store: Arc<Store>, indexer: Indexer, settings: &SnapshotSettings) -> Result<Self> {
        let content = ContentStore::open(&settings.storage_dir)
            .map_err(|e| Error::io(&settings.storage_dir, e))?;
        Ok(Self::new(store, indexer, content, settings))
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn content(&self) -> &ContentStore {
        &self.content
    }

    pub fn default_retain(&self) -> u32 {
        self.default_retain
    }

    /// Captures the current state of `folder`.
    ///
    /// Files whose size and mtime match the latest sealed snapshot reuse its
    /// hash; everything else is copied into the content store while being
    /// hashed. Unreadable files are reported and left out. On cancellation the
    /// snapshot keeps what was captured and stays `capturing`.
    pub fn snapshot(
        &self,
        folder: &Path,
        cancel: &CancellationToken,
        progress: &ProgressSink,
    ) -> Result<SnapshotReport> {
        let folder = fs::canonicalize(folder).map_err(|e| Error::io(folder, e))?;
        let _shared = self
            .maintenance
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let scan = self.indexer.scan(&folder, cancel, &ProgressSink::silent())?;
        let previous: HashMap<String, SnapshotEntry> = match self.store.latest_sealed_snapshot(&folder)? {
            Some(prev) => self
                .store
                .snapshot_entries(prev.id)?
                .into_iter()
                .map(|entry| (entry.relative_path.clone(), entry))
                .collect(),
            None => HashMap::new(),
        };

        let snapshot = self.store.begin_snapshot(&folder)?;
        progress.emit(ProgressEvent::SnapshotStarted {
            folder: folder.clone(),
            total: scan.records.len(),
        });

        let captured: Vec<Option<std::result::Result<(SnapshotEntry, bool), ItemError>>> =
            self.indexer.pool().install(|| {
                scan.records
                    .par_iter()
                    .map(|record| {
                        if cancel.is_cancelled() {
                            return None;
                        }
                        let result = self.capture(&folder, record, &previous);
                        if let Ok((entry, _)) = &result {
                            progress.emit(ProgressEvent::SnapshotFileCaptured {
                                relative_path: entry.relative_path.clone(),
                            });
                        }
                        Some(result)
                    })
                    .collect()
            });

        let mut entries = Vec::with_capacity(captured.len());
        let mut errors = scan.errors;
        let (mut hashed, mut reused) = (0, 0);
        for result in captured.into_iter().flatten() {
            match result {
                Ok((entry, was_reused)) => {
                    if was_reused {
                        reused += 1;
                    } else {
                        hashed += 1;
                    }
                    entries.push(entry);
                }
                Err(error) => {
                    warn!("Snapshot {} skipped a file: {}", snapshot.id, error);
                    errors.push(error);
                }
            }
        }
        self.store.insert_snapshot_entries(snapshot.id, &entries)?;

        if cancel.is_cancelled() || scan.cancelled {
            warn!(
                "Snapshot {} of {} cancelled with {} file(s) captured",
                snapshot.id,
                folder.display(),
                entries.len()
            );
            return Ok(SnapshotReport {
                snapshot: self.store.snapshot(snapshot.id)?,
                hashed,
                reused,
                errors,
                cancelled: true,
            });
        }

        let total_size = entries.iter().map(|e| e.size).sum();
        let signature = folder_signature(&entries);
        let sealed = self
            .store
            .seal_snapshot(snapshot.id, entries.len() as u64, total_size, &signature)?;
        self.store.record_watched_snapshot(&folder, Utc::now())?;
        progress.emit(ProgressEvent::SnapshotSealed {
            snapshot_id: sealed.id,
            file_count: entries.len(),
        });
        info!(
            "Snapshot {} of {} sealed: {} file(s), {} hashed, {} reused, {} error(s)",
            sealed.id,
            folder.display(),
            entries.len(),
            hashed,
            reused,
            errors.len()
        );
        Ok(SnapshotReport {
            snapshot: sealed,
            hashed,
            reused,
            errors,
            cancelled: false,
        })
    }

    fn capture(
        &self,
        folder: &Path,
        record: &FileRecord,
        previous: &HashMap<String, SnapshotEntry>,
    ) -> std::result::Result<(SnapshotEntry, bool), ItemError> {
        let relative_path = relative_key(folder, &record.path).ok_or_else(|| {
            ItemError::new(
                &record.path,
                ErrorKind::Io,
                "name is not valid UTF-8; left out of the snapshot",
            )
        })?;
        if let Some(prev) = previous.get(&relative_path)
            && prev.size == record.size
            && prev.mtime_ns == record.mtime_ns()
            && self.content.contains(&prev.hash)
        {
            return Ok((prev.clone(), true));
        }
        let (hash, size) = self
            .content
            .ingest(&record.path)
            .map_err(|e| ItemError::new(&record.path, ErrorKind::Io, e.to_string()))?;
        Ok((
            SnapshotEntry {
                relative_path,
                size,
                mtime_ns: record.mtime_ns(),
                hash,
            },
            false,
        ))
    }

    /// Compares two sealed snapshots by content hash.
    pub fn diff(&self, old_id: i64, new_id: i64) -> Result<SnapshotDiff> {
        let old_snapshot = self.sealed(old_id)?;
        let new_snapshot = self.sealed(new_id)?;
        if old_snapshot.signature.is_some() && old_snapshot.signature == new_snapshot.signature {
            return Ok(SnapshotDiff::default());
        }
        let old = self.store.snapshot_entries(old_id)?;
        let new = self.store.snapshot_entries(new_id)?;
        Ok(diff_entries(&old, &new))
    }

    /// Recreates a sealed snapshot's tree under `destination`, defaulting to a
    /// sibling `<folder>_restored_<timestamp>` folder.
    ///
    /// Every restored file is checked against its recorded hash before it is
    /// moved into place; a mismatch is reported and leaves nothing behind.
    pub fn restore(
        &self,
        snapshot_id: i64,
        destination: Option<&Path>,
        progress: &ProgressSink,
    ) -> Result<RestoreReport> {
        let snapshot = self.sealed(snapshot_id)?;
        let destination = destination
            .map(Path::to_path_buf)
            .unwrap_or_else(|| default_restore_destination(&snapshot.folder, Utc::now()));
        fs::create_dir_all(&destination).map_err(|e| Error::io(&destination, e))?;

        let mut report = RestoreReport {
            snapshot_id,
            destination: destination.clone(),
            restored: 0,
            failed: Vec::new(),
        };
        let entries = self.store.snapshot_entries(snapshot_id)?;
        progress.emit(ProgressEvent::RestoreStarted {
            snapshot_id,
            total: entries.len(),
        });
        for entry in &entries {
            match self.restore_entry(&destination, entry) {
                Ok(path) => {
                    report.restored += 1;
                    progress.emit(ProgressEvent::SnapshotFileRestored { snapshot_id, path });
                }
                Err(error) => {
                    warn!("Restore of snapshot {}: {}", snapshot_id, error);
                    report.failed.push(error);
                }
            }
        }
        info!(
            "Restored snapshot {} into {}: {} file(s), {} failure(s)",
            snapshot_id,
            destination.display(),
            report.restored,
            report.failed.len()
        );
        Ok(report)
    }

    fn restore_entry(
        &self,
        destination: &Path,
        entry: &SnapshotEntry,
    ) -> std::result::Result<PathBuf, ItemError> {
        let target = restore_target(destination, &entry.relative_path).ok_or_else(|| {
            ItemError::new(
                &entry.relative_path,
                ErrorKind::Consistency,
                "entry path escapes the restore folder",
            )
        })?;
        let io_error = |e: io::Error| ItemError::new(&target, ErrorKind::Io, e.to_string());

        let parent = target.parent().unwrap_or(destination);
        fs::create_dir_all(parent).map_err(io_error)?;
        let file_name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let temp = parent.join(format!(".{}.tidydesk-restore", file_name));

        let hash = match self.copy_blob(entry, &temp) {
            Ok(hash) => hash,
            Err(e) => {
                let _ = fs::remove_file(&temp);
                return Err(io_error(e));
            }
        };
        if hash != entry.hash {
            let _ = fs::remove_file(&temp);
            return Err(ItemError::new(
                &target,
                ErrorKind::Consistency,
                format!("stored content hash {} does not match {}", hash, entry.hash),
            ));
        }
        fs::rename(&temp, &target).map_err(io_error)?;
        Ok(target)
    }

    /// Writes a blob to `temp` with the entry's mtime, returning the hash of
    /// what was written.
    fn copy_blob(&self, entry: &SnapshotEntry, temp: &Path) -> io::Result<String> {
        let mut blob = self.content.open_blob(&entry.hash)?;
        let mut writer = BufWriter::new(File::create(temp)?);
        let (hash, _) = copy_hashed(&mut blob, &mut writer)?;
        writer.flush()?;
        let file = writer.get_ref();
        file.set_modified(mtime_from_ns(entry.mtime_ns))?;
        file.sync_all()?;
        Ok(hash)
    }

    /// Prunes all but the newest `retain` sealed snapshots of `folder`.
    ///
    /// At least one sealed snapshot is always kept. Pruned snapshots become
    /// tombstones and blobs no snapshot references any more are deleted.
    /// Captures still `capturing` behind the newest sealed snapshot were
    /// abandoned and are discarded the same way.
    pub fn prune(&self, folder: &Path, retain: usize) -> Result<PruneReport> {
        let folder = folder_key(folder);
        let _exclusive = self
            .maintenance
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let sealed = self.store.sealed_snapshots_oldest_first(&folder)?;
        let keep = retain.max(1);
        let mut report = PruneReport {
            folder: folder.clone(),
            ..Default::default()
        };

        if let Some(newest) = sealed.last() {
            for stale in self.store.stale_capturing_snapshots(&folder, newest.id)? {
                warn!(
                    "Discarding abandoned capture {} of {}",
                    stale.id,
                    folder.display()
                );
                self.drop_snapshot(stale.id, &mut report)?;
                report.discarded.push(stale.id);
            }
        }
        if sealed.len() > keep {
            for snapshot in &sealed[..sealed.len() - keep] {
                self.drop_snapshot(snapshot.id, &mut report)?;
                report.pruned.push(snapshot.id);
            }
        }

        info!(
            "Pruned {} snapshot(s) and {} abandoned capture(s) of {}, freed {} bytes",
            report.pruned.len(),
            report.discarded.len(),
            folder.display(),
            report.bytes_freed
        );
        Ok(report)
    }

    /// Tombstones one snapshot and deletes the blobs it alone referenced.
    fn drop_snapshot(&self, snapshot_id: i64, report: &mut PruneReport) -> Result<()> {
        for hash in self.store.prune_snapshot(snapshot_id)? {
            match self.content.remove(&hash) {
                Ok(bytes) => {
                    report.blobs_removed += 1;
                    report.bytes_freed += bytes;
                }
                Err(e) => warn!("Could not delete blob {}: {}", hash, e),
            }
        }
        Ok(())
    }

    pub fn statistics(&self) -> Result<SnapshotStatistics> {
        let logical_bytes = self
            .store
            .list_snapshots(None)?
            .iter()
            .filter(|s| s.is_sealed())
            .map(|s| s.total_size)
            .sum();
        Ok(SnapshotStatistics {
            store: self.store.statistics()?,
            logical_bytes,
            storage_dir: self.content.root().to_path_buf(),
            storage_bytes: self.content.disk_usage(),
        })
    }

    /// Puts `folder` on the snapshot schedule.
    pub fn watch_folder(
        &self,
        folder: &Path,
        interval_secs: Option<u64>,
        retain: Option<u32>,
    ) -> Result<()> {
        let interval_secs = interval_secs.unwrap_or(self.default_interval_secs);
        if interval_secs < MIN_SNAPSHOT_INTERVAL_SECS {
            return Err(ConfigError::OutOfRange {
                field: "interval_secs",
                reason: format!("must be at least {} seconds", MIN_SNAPSHOT_INTERVAL_SECS),
            }
            .into());
        }
        let folder = fs::canonicalize(folder).map_err(|e| Error::io(folder, e))?;
        self.store.add_watched_folder(
            &folder,
            interval_secs,
            retain.unwrap_or(self.default_retain),
        )?;
        debug!("Watching {} every {}s", folder.display(), interval_secs);
        Ok(())
    }

    pub fn unwatch_folder(&self, folder: &Path) -> Result<bool> {
        self.store.remove_watched_folder(&folder_key(folder))
    }

    pub fn watched_folders(&self) -> Result<Vec<WatchedFolder>> {
        self.store.watched_folders()
    }

    /// Registers folders listed in the configuration file. Missing folders are
    /// logged and skipped.
    pub fn sync_watched(&self, configured: &[WatchedFolderConfig]) -> Result<()> {
        for watched in configured {
            match self.watch_folder(&watched.folder, watched.interval_secs, watched.retain) {
                Ok(()) => {}
                Err(Error::Io { path, source }) => {
                    warn!("Configured watched folder {} unavailable: {}", path.display(), source)
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn sealed(&self, snapshot_id: i64) -> Result<Snapshot> {
        let snapshot = self.store.snapshot(snapshot_id)?;
        if !snapshot.is_sealed() {
            return Err(Error::consistency(
                &snapshot.folder,
                format!("snapshot {} is {}", snapshot_id, snapshot.state),
            ));
        }
        Ok(snapshot)
    }
}

/// `<parent>/<name>_restored_<YYYYmmdd_HHMMSS>` next to the original folder.
pub fn default_restore_destination(folder: &Path, at: DateTime<Utc>) -> PathBuf {
    let name = folder
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "snapshot".to_string());
    folder.with_file_name(format!("{}_restored_{}", name, at.format("%Y%m%d_%H%M%S")))
}

/// Canonical path when the folder still exists, the given path otherwise.
fn folder_key(folder: &Path) -> PathBuf {
    fs::canonicalize(folder).unwrap_or_else(|_| folder.to_path_buf())
}

/// `/`-joined path below `folder`, or `None` if a component is not UTF-8.
fn relative_key(folder: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(folder).unwrap_or(path);
    let parts = relative
        .components()
        .map(|c| c.as_os_str().to_str())
        .collect::<Option<Vec<_>>>()?;
    Some(parts.join("/"))
}

/// Maps a stored relative key under `destination`, rejecting anything that
/// would land outside it.
fn restore_target(destination: &Path, relative_path: &str) -> Option<PathBuf> {
    let relative = Path::new(relative_path);
    let safe = relative
        .components()
        .all(|c| matches!(c, Component::Normal(_)));
    if !safe || relative_path.is_empty() {
        return None;
    }
    Some(destination.join(relative))
}

fn mtime_from_ns(mtime_ns: i64) -> SystemTime {
    if mtime_ns >= 0 {
        UNIX_EPOCH + Duration::from_nanos(mtime_ns as u64)
    } else {
        UNIX_EPOCH - Duration::from_nanos(mtime_ns.unsigned_abs())
    }
}

/// BLAKE3 over sorted `path:hash` lines.
fn folder_signature(entries: &[SnapshotEntry]) -> String {
    let mut pairs: Vec<(&str, &str)> = entries
        .iter()
        .map(|e| (e.relative_path.as_str(), e.hash.as_str()))
        .collect();
    pairs.sort_unstable();
    let mut hasher = blake3::Hasher::new();
    for (path, hash) in pairs {
        hasher.update(format!("{}:{}\n", path, hash).as_bytes());
    }
    hasher.finalize().to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FilterRules;
    use crate::snapshot::SnapshotState;
    use tempfile::TempDir;

    struct Fixture {
        _temp: TempDir,
        folder: PathBuf,
        engine: SnapshotEngine,
    }

    fn fixture() -> Fixture {
        let temp = TempDir::new().expect("Failed to create temp directory");
        let folder = temp.path().join("docs");
        fs::create_dir_all(&folder).unwrap();
        let settings = SnapshotSettings {
            storage_dir: temp.path().join("storage"),
            ..Default::default()
        };
        let indexer = Indexer::new(FilterRules::default().compile().unwrap(), 2).unwrap();
        let store = Arc::new(Store::open_in_memory().unwrap());
        let engine = SnapshotEngine::open(store, indexer, &settings).unwrap();
        Fixture {
            _temp: temp,
            folder,
            engine,
        }
    }

    fn take(f: &Fixture) -> SnapshotReport {
        f.engine
            .snapshot(&f.folder, &CancellationToken::new(), &ProgressSink::silent())
            .expect("Snapshot failed")
    }

    #[test]
    fn test_empty_folder_snapshot_is_sealed() {
        let f = fixture();
        let report = take(&f);
        assert_eq!(report.snapshot.state, SnapshotState::Sealed);
        assert_eq!(report.snapshot.file_count, 0);
    }

    #[test]
    fn test_unchanged_files_reuse_hashes() {
        let f = fixture();
        fs::write(f.folder.join("a.txt"), "alpha").unwrap();
        fs::create_dir_all(f.folder.join("sub")).unwrap();
        fs::write(f.folder.join("sub/b.txt"), "beta").unwrap();

        let first = take(&f);
        assert_eq!(first.hashed, 2);
        let second = take(&f);
        assert_eq!(second.reused, 2);
        assert_eq!(second.hashed, 0);
        assert_eq!(first.snapshot.signature, second.snapshot.signature);

        let entries = f.engine.store().snapshot_entries(second.snapshot.id).unwrap();
        assert_eq!(entries[1].relative_path, "sub/b.txt");
    }

    #[test]
    fn test_identical_trees_diff_empty_and_dedupe() {
        let f = fixture();
        fs::write(f.folder.join("a.txt"), "same").unwrap();
        fs::write(f.folder.join("b.txt"), "same").unwrap();
        let first = take(&f);
        let second = take(&f);
        assert!(f.engine.diff(first.snapshot.id, second.snapshot.id).unwrap().is_empty());

        let stats = f.engine.statistics().unwrap();
        assert_eq!(stats.logical_bytes, 16);
        // Verify identical content is stored once
        assert_eq!(stats.storage_bytes, 4);
        assert_eq!(stats.store.distinct_blobs, 1);
    }

    #[test]
    fn test_diff_requires_sealed_snapshots() {
        let f = fixture();
        let sealed = take(&f);
        let capturing = f.engine.store().begin_snapshot(&f.folder).unwrap();
        let err = f.engine.diff(sealed.snapshot.id, capturing.id).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Consistency);
        assert!(matches!(f.engine.diff(sealed.snapshot.id, 999), Err(Error::SnapshotNotFound(999))));
    }

    #[test]
    fn test_restore_detects_corrupted_blob() {
        let f = fixture();
        fs::write(f.folder.join("a.txt"), "original").unwrap();
        let report = take(&f);
        let entry = &f.engine.store().snapshot_entries(report.snapshot.id).unwrap()[0];
        fs::write(f.engine.content().blob_path(&entry.hash), "tampered").unwrap();

        let out = f.folder.with_file_name("out");
        let restored = f
            .engine
            .restore(report.snapshot.id, Some(&out), &ProgressSink::silent())
            .unwrap();
        assert_eq!(restored.restored, 0);
        assert_eq!(restored.failed[0].kind, ErrorKind::Consistency);
        assert!(!out.join("a.txt").exists());
    }

    #[test]
    fn test_prune_keeps_newest_and_frees_orphans() {
        let f = fixture();
        let mut ids = Vec::new();
        // Distinct sizes make each version a fresh capture
        for content in ["v1", "v22", "v333"] {
            fs::write(f.folder.join("a.txt"), content).unwrap();
            ids.push(take(&f).snapshot.id);
        }

        let report = f.engine.prune(&f.folder, 0).unwrap();
        assert_eq!(report.pruned, vec![ids[0], ids[1]]);
        assert_eq!(report.blobs_removed, 2);
        assert_eq!(report.bytes_freed, 5);

        let store = f.engine.store();
        assert_eq!(store.snapshot(ids[0]).unwrap().state, SnapshotState::Pruned);
        assert_eq!(store.snapshot(ids[2]).unwrap().state, SnapshotState::Sealed);
        for entry in store.snapshot_entries(ids[2]).unwrap() {
            assert!(f.engine.content().contains(&entry.hash));
        }
    }

    #[test]
    fn test_prune_discards_abandoned_captures() {
        let f = fixture();
        let store = f.engine.store();
        let draft = f._temp.path().join("draft.txt");
        fs::write(&draft, "draft").expect("Failed to write draft");
        let (hash, size) = f.engine.content().ingest(&draft).expect("Failed to ingest draft");
        let folder = fs::canonicalize(&f.folder).expect("Failed to canonicalize folder");
        let abandoned = store.begin_snapshot(&folder).expect("Failed to begin snapshot");
        store
            .insert_snapshot_entries(
                abandoned.id,
                &[SnapshotEntry {
                    relative_path: "draft.txt".to_string(),
                    size,
                    mtime_ns: 0,
                    hash: hash.clone(),
                }],
            )
            .expect("Failed to insert entry");
        fs::write(f.folder.join("a.txt"), "final").expect("Failed to write file");
        let sealed = take(&f).snapshot;

        let report = f.engine.prune(&f.folder, 5).expect("Failed to prune");

        // Verify the abandoned capture is tombstoned and its blob freed
        assert_eq!(report.discarded, vec![abandoned.id]);
        assert!(report.pruned.is_empty());
        assert_eq!(report.blobs_removed, 1);
        assert_eq!(report.bytes_freed, 5);
        assert!(!f.engine.content().contains(&hash));
        assert_eq!(
            store.snapshot(abandoned.id).expect("Failed to load snapshot").state,
            SnapshotState::Pruned
        );
        // Verify the sealed snapshot is untouched
        assert_eq!(
            store.snapshot(sealed.id).expect("Failed to load snapshot").state,
            SnapshotState::Sealed
        );
    }

    #[test]
    fn test_capture_in_progress_is_not_discarded() {
        let f = fixture();
        fs::write(f.folder.join("a.txt"), "final").expect("Failed to write file");
        take(&f);
        let folder = fs::canonicalize(&f.folder).expect("Failed to canonicalize folder");
        let running = f
            .engine
            .store()
            .begin_snapshot(&folder)
            .expect("Failed to begin snapshot");

        let report = f.engine.prune(&f.folder, 1).expect("Failed to prune");

        // Verify a capture newer than every sealed snapshot is left alone
        assert!(report.discarded.is_empty());
        assert_eq!(
            f.engine.store().snapshot(running.id).expect("Failed to load snapshot").state,
            SnapshotState::Capturing
        );
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_non_utf8_names_are_reported_not_merged() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let f = fixture();
        // Both names decode lossily to the same text
        fs::write(f.folder.join(OsStr::from_bytes(b"a\xe9")), "first").expect("Failed to write file");
        fs::write(f.folder.join(OsStr::from_bytes(b"a\xe8")), "second").expect("Failed to write file");
        fs::write(f.folder.join("b.txt"), "plain").expect("Failed to write file");

        let report = take(&f);

        // Verify both undecodable names are reported and the rest is sealed
        assert_eq!(report.snapshot.state, SnapshotState::Sealed);
        assert_eq!(report.snapshot.file_count, 1);
        assert_eq!(report.errors.len(), 2);
        let entries = f
            .engine
            .store()
            .snapshot_entries(report.snapshot.id)
            .expect("Failed to read entries");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].relative_path, "b.txt");
    }

    #[test]
    fn test_watch_interval_floor() {
        let f = fixture();
        let err = f.engine.watch_folder(&f.folder, Some(10), None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
        f.engine.watch_folder(&f.folder, Some(60), Some(3)).unwrap();
        assert_eq!(f.engine.watched_folders().unwrap()[0].retain, 3);
        assert!(f.engine.unwatch_folder(&f.folder).unwrap());
    }

    #[test]
    fn test_default_restore_destination() {
        let at = DateTime::parse_from_rfc3339("2024-05-01T10:20:30Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(
            default_restore_destination(Path::new("/data/docs"), at),
            PathBuf::from("/data/docs_restored_20240501_102030")
        );
    }

    #[test]
    fn test_restore_target_rejects_traversal() {
        let dest = Path::new("/restore");
        assert_eq!(restore_target(dest, "a/b.txt"), Some(PathBuf::from("/restore/a/b.txt")));
        assert!(restore_target(dest, "../escape").is_none());
        assert!(restore_target(dest, "/abs").is_none());
    }
}
