//! Filesystem discovery.
//!
//! The indexer walks a root folder and stats every regular file it keeps.
//! Top-level entries are partitioned across a bounded rayon pool: each file is
//! one unit of work and each subfolder is walked by a single worker. Symlinks
//! are never followed, so a link pointing back up the tree cannot loop.

use chrono::{DateTime, Utc};
use rayon::ThreadPool;
use rayon::prelude::*;
use serde::Serialize;
use std::fs::{self, Metadata};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use crate::cancel::CancellationToken;
use crate::config::{AppConfig, CompiledFilters};
use crate::error::{Error, ErrorKind, ItemError, Result};
use crate::progress::{ProgressEvent, ProgressSink};

/// Tool and cache folders skipped at any depth.
const SKIPPED_DIRS: &[&str] = &[
    "node_modules",
    ".git",
    ".svn",
    ".hg",
    "__pycache__",
    ".venv",
    "venv",
    ".cache",
    ".idea",
    ".vscode",
    ".Trash",
    ".Trashes",
    ".Spotlight-V100",
    ".fseventsd",
    "$RECYCLE.BIN",
    "System Volume Information",
];

/// Operating system folders skipped when they sit directly under a filesystem root.
#[cfg(target_os = "linux")]
const SYSTEM_ROOT_DIRS: &[&str] = &[
    "proc", "sys", "dev", "run", "boot", "lost+found", "snap", "bin", "sbin", "lib", "lib64",
    "usr", "etc", "var", "tmp", "opt",
];

#[cfg(target_os = "macos")]
const SYSTEM_ROOT_DIRS: &[&str] = &[
    "System", "Library", "private", "Volumes", "cores", "dev", "bin", "sbin", "usr", "etc",
    "var", "tmp", "opt",
];

#[cfg(windows)]
const SYSTEM_ROOT_DIRS: &[&str] = &[
    "Windows",
    "Program Files",
    "Program Files (x86)",
    "ProgramData",
    "$Recycle.Bin",
    "Recovery",
    "PerfLogs",
];

#[cfg(not(any(target_os = "linux", target_os = "macos", windows)))]
const SYSTEM_ROOT_DIRS: &[&str] = &[];

/// Partial downloads and editor swap files.
const TEMP_EXTENSIONS: &[&str] = &[
    "tmp",
    "temp",
    "part",
    "partial",
    "crdownload",
    "download",
    "swp",
    "swo",
];

/// A regular file as seen during a scan.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileRecord {
    pub path: PathBuf,
    pub size: u64,
    pub modified: DateTime<Utc>,
    pub hash: Option<String>,
    pub discovered_at: DateTime<Utc>,
}

impl FileRecord {
    /// Stats a single path without following symlinks.
    pub fn from_path(path: &Path) -> io::Result<Self> {
        let meta = fs::symlink_metadata(path)?;
        if !meta.file_type().is_file() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "not a regular file",
            ));
        }
        Self::from_metadata(path.to_path_buf(), &meta)
    }

    fn from_metadata(path: PathBuf, meta: &Metadata) -> io::Result<Self> {
        Ok(FileRecord {
            path,
            size: meta.len(),
            modified: DateTime::<Utc>::from(meta.modified()?),
            hash: None,
            discovered_at: Utc::now(),
        })
    }

    /// Modification time as nanoseconds since the epoch.
    pub fn mtime_ns(&self) -> i64 {
        self.modified.timestamp_nanos_opt().unwrap_or(i64::MAX)
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Everything one scan found.
#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    pub root: PathBuf,
    /// Sorted by path.
    pub records: Vec<FileRecord>,
    pub errors: Vec<ItemError>,
    /// Files above the configured size limit.
    pub oversized: usize,
    pub cancelled: bool,
}

impl ScanReport {
    pub fn error_count(&self) -> usize {
        self.errors.len()
    }
}

enum Partition {
    File(PathBuf),
    Tree(PathBuf),
}

enum Visit {
    Record(FileRecord),
    Oversized,
    Failed(ItemError),
}

#[derive(Clone)]
pub struct Indexer {
    filters: CompiledFilters,
    pool: Arc<ThreadPool>,
    recursive: bool,
    excluded_dirs: Vec<PathBuf>,
}

impl Indexer {
    pub fn new(filters: CompiledFilters, workers: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers.max(1))
            .thread_name(|i| format!("tidydesk-worker-{}", i))
            .build()?;
        Ok(Self {
            filters,
            pool: Arc::new(pool),
            recursive: true,
            excluded_dirs: Vec::new(),
        })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let filters = config.filters.clone().compile()?;
        Ok(Self::new(filters, config.workers.pool_size())?.with_recursive(config.organize.recursive))
    }

    pub fn with_recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    /// Never descend into `dir`. Used to keep organizer destinations out of a scan.
    pub fn exclude_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.excluded_dirs.push(dir.into());
        self
    }

    pub fn pool(&self) -> &ThreadPool {
        &self.pool
    }

    pub fn workers(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Lazily yields the files under `root` in file-name order.
    ///
    /// Restartable: every call starts a fresh traversal.
    pub fn walk<'a>(
        &'a self,
        root: &'a Path,
    ) -> impl Iterator<Item = std::result::Result<PathBuf, ItemError>> + 'a {
        let max_depth = if self.recursive { usize::MAX } else { 1 };
        self.walker(root, root, max_depth)
            .filter_map(|entry| match entry {
                Ok(entry) if entry.file_type().is_file() => Some(Ok(entry.into_path())),
                Ok(_) => None,
                Err(err) => Some(Err(walk_error(err))),
            })
    }

    /// Stats every file under `root` on the worker pool.
    ///
    /// Per-file failures land in [`ScanReport::errors`]; only an unreadable root
    /// is returned as an error.
    pub fn scan(
        &self,
        root: &Path,
        cancel: &CancellationToken,
        progress: &ProgressSink,
    ) -> Result<ScanReport> {
        let meta = fs::metadata(root).map_err(|e| Error::io(root, e))?;
        if !meta.is_dir() {
            return Err(Error::io(
                root,
                io::Error::new(io::ErrorKind::InvalidInput, "not a directory"),
            ));
        }
        fs::read_dir(root).map_err(|e| Error::io(root, e))?;

        progress.emit(ProgressEvent::ScanStarted {
            root: root.to_path_buf(),
        });

        let mut report = ScanReport {
            root: root.to_path_buf(),
            ..Default::default()
        };

        let mut partitions = Vec::new();
        for entry in self.walker(root, root, 1) {
            match entry {
                Ok(entry) if entry.file_type().is_file() => {
                    partitions.push(Partition::File(entry.into_path()))
                }
                Ok(entry) if entry.file_type().is_dir() && self.recursive => {
                    partitions.push(Partition::Tree(entry.into_path()))
                }
                Ok(_) => {}
                Err(err) => report.errors.push(walk_error(err)),
            }
        }

        let visits: Vec<Vec<Visit>> = self.pool.install(|| {
            partitions
                .par_iter()
                .map(|partition| self.visit_partition(root, partition, cancel))
                .collect()
        });

        for visit in visits.into_iter().flatten() {
            match visit {
                Visit::Record(record) => report.records.push(record),
                Visit::Oversized => report.oversized += 1,
                Visit::Failed(error) => {
                    warn!("Scan error: {}", error);
                    report.errors.push(error);
                }
            }
        }
        report.records.sort_by(|a, b| a.path.cmp(&b.path));
        report.cancelled = cancel.is_cancelled();

        debug!(
            "Scanned {}: {} file(s), {} error(s), {} oversized on {} worker(s)",
            root.display(),
            report.records.len(),
            report.errors.len(),
            report.oversized,
            self.workers()
        );
        progress.emit(ProgressEvent::ScanFinished {
            files: report.records.len(),
            errors: report.errors.len(),
        });
        Ok(report)
    }

    /// Whether a single file under `root` would be picked up by a scan.
    pub fn accepts(&self, root: &Path, path: &Path) -> bool {
        let Ok(relative) = path.strip_prefix(root) else {
            return false;
        };
        if !self.recursive && relative.components().count() > 1 {
            return false;
        }
        let mut dir = path.parent();
        while let Some(current) = dir {
            if current == root {
                break;
            }
            if !self.keep_dir(current) {
                return false;
            }
            dir = current.parent();
        }
        self.keep_file(root, path)
    }

    fn visit_partition(
        &self,
        root: &Path,
        partition: &Partition,
        cancel: &CancellationToken,
    ) -> Vec<Visit> {
        if cancel.is_cancelled() {
            return Vec::new();
        }
        match partition {
            Partition::File(path) => vec![self.visit_file(path, fs::symlink_metadata(path))],
            Partition::Tree(dir) => {
                let mut visits = Vec::new();
                for entry in self.walker(root, dir, usize::MAX) {
                    if cancel.is_cancelled() {
                        break;
                    }
                    match entry {
                        Ok(entry) if entry.file_type().is_file() => {
                            let meta = entry.metadata().map_err(|e| {
                                e.into_io_error().unwrap_or_else(|| {
                                    io::Error::other("metadata unavailable")
                                })
                            });
                            visits.push(self.visit_file(entry.path(), meta));
                        }
                        Ok(_) => {}
                        Err(err) => visits.push(Visit::Failed(walk_error(err))),
                    }
                }
                visits
            }
        }
    }

    fn visit_file(&self, path: &Path, meta: io::Result<Metadata>) -> Visit {
        let record = meta.and_then(|meta| {
            if meta.len() > self.filters.max_file_size() {
                return Ok(None);
            }
            FileRecord::from_metadata(path.to_path_buf(), &meta).map(Some)
        });
        match record {
            Ok(Some(record)) => Visit::Record(record),
            Ok(None) => {
                debug!("Skipping oversized file {}", path.display());
                Visit::Oversized
            }
            Err(e) => Visit::Failed(ItemError::new(path, ErrorKind::Io, e.to_string())),
        }
    }

    fn walker<'a>(
        &'a self,
        root: &'a Path,
        start: &Path,
        max_depth: usize,
    ) -> impl Iterator<Item = walkdir::Result<DirEntry>> + 'a {
        WalkDir::new(start)
            .min_depth(0)
            .max_depth(max_depth)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(move |entry| entry.depth() == 0 || self.keep_entry(root, entry))
            .filter(|entry| !matches!(entry, Ok(e) if e.depth() == 0))
    }

    fn keep_entry(&self, root: &Path, entry: &DirEntry) -> bool {
        let file_type = entry.file_type();
        if file_type.is_symlink() {
            return false;
        }
        if file_type.is_dir() {
            return self.keep_dir(entry.path());
        }
        self.keep_file(root, entry.path())
    }

    fn keep_dir(&self, dir: &Path) -> bool {
        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_default();
        if !self.filters.hidden_files_enabled() && name.starts_with('.') {
            return false;
        }
        if SKIPPED_DIRS.contains(&name.as_ref()) {
            return false;
        }
        let under_fs_root = dir.parent().is_some_and(|p| p.parent().is_none());
        if under_fs_root && SYSTEM_ROOT_DIRS.contains(&name.as_ref()) {
            return false;
        }
        !self.excluded_dirs.iter().any(|excluded| dir == excluded)
    }

    fn keep_file(&self, root: &Path, path: &Path) -> bool {
        if let Some(ext) = path.extension() {
            let ext = ext.to_string_lossy().to_lowercase();
            if TEMP_EXTENSIONS.contains(&ext.as_str()) {
                return false;
            }
        }
        let relative = path.strip_prefix(root).unwrap_or(path);
        self.filters.should_include(relative)
    }
}

fn walk_error(err: walkdir::Error) -> ItemError {
    let path = err.path().map(Path::to_path_buf).unwrap_or_default();
    ItemError::new(path, ErrorKind::Io, err.to_string())
}
