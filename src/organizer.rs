//! Organize runs: categorize, tag, move, record.
//!
//! A run works in three phases. Categorization runs on the worker pool and
//! tagging goes through the classifier gateway in batches; both are pure with
//! respect to the filesystem. Moves then happen one at a time in input order,
//! and each move is durably recorded in the store before it is reported.

use chrono::Utc;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::ffi::OsStr;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::cancel::CancellationToken;
use crate::classifier::{BatchFailure, ClassifierGateway, ClassifyRequest};
use crate::config::{AppConfig, DestinationMode, OrganizationMode, OrganizeSettings};
use crate::error::{Error, ErrorKind, ItemError, Result};
use crate::file_category::{Category, FileMapper};
use crate::indexer::{FileRecord, Indexer, ScanReport};
use crate::progress::{ProgressEvent, ProgressSink};
use crate::session::{ActionOutcome, MoveAction, NewAction, Session, SessionStatus};
use crate::store::Store;
use crate::undo::{UndoManager, UndoReport};

/// Folder holding tag-based groups under the destination root.
pub const TAG_GROUP_DIR: &str = "GroupedByTag";

/// Per-run choices. Defaults come from [`OrganizeSettings`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrganizeOptions {
    pub mode: OrganizationMode,
    pub destination: DestinationMode,
    /// Ask the classifier for tags.
    pub tagging: bool,
    pub session_name: Option<String>,
}

impl OrganizeOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            mode: config.organize.mode,
            destination: config.organize.destination,
            tagging: config.classifier.enabled,
            session_name: None,
        }
    }
}

/// What a run would do with one file, without doing it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlannedMove {
    pub source: PathBuf,
    /// Target folder, or `None` when the file stays where it is.
    pub destination_dir: Option<PathBuf>,
    pub category: Category,
    pub skip_reason: Option<String>,
}

/// Result of an organize run.
#[derive(Debug, Clone)]
pub struct OrganizeReport {
    /// Session as stored after the run.
    pub session: Session,
    pub moved: Vec<MoveAction>,
    pub skipped: Vec<MoveAction>,
    pub errors: Vec<ItemError>,
    /// Files found by the scan that could not even be stat'ed.
    pub scan_errors: Vec<ItemError>,
    pub gateway_failures: Vec<BatchFailure>,
    /// Destination folder name to number of files moved there.
    pub folder_counts: BTreeMap<String, usize>,
    pub cancelled: bool,
}

enum Decision {
    Skip(String),
    IndexInPlace,
    Move { dir: PathBuf, folder: String },
}

pub struct Organizer {
    store: Arc<Store>,
    indexer: Indexer,
    mapper: FileMapper,
    gateway: Option<ClassifierGateway>,
    settings: OrganizeSettings,
    skip_extensions: HashSet<String>,
}

impl Organizer {
    /// Builds an organizer from configuration. The classifier gateway is
    /// created only when the classifier is enabled and has an endpoint.
    pub fn new(store: Arc<Store>, indexer: Indexer, config: &AppConfig) -> Self {
        Self {
            store,
            indexer,
            mapper: FileMapper::with_overrides(&config.organize.extensions),
            gateway: ClassifierGateway::from_settings(&config.classifier),
            settings: config.organize.clone(),
            skip_extensions: config.skip_extensions(),
        }
    }

    pub fn with_gateway(mut self, gateway: Option<ClassifierGateway>) -> Self {
        self.gateway = gateway;
        self
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Root that organized files land under, or `None` for index-only runs.
    pub fn destination_root(&self, source_root: &Path, mode: DestinationMode) -> Option<PathBuf> {
        match mode {
            DestinationMode::DesktopSubfolder => {
                Some(source_root.join(&self.settings.desktop_subfolder))
            }
            DestinationMode::OrganizedFolder => Some(self.settings.organized_dir.clone()),
            DestinationMode::IndexOnly => None,
        }
    }

    /// Whether a file appearing under `root` should be organized: it passes the
    /// scan filters and does not already sit under a destination root.
    pub fn accepts(&self, root: &Path, path: &Path) -> bool {
        let organized = [
            DestinationMode::DesktopSubfolder,
            DestinationMode::OrganizedFolder,
        ]
        .into_iter()
        .filter_map(|mode| self.destination_root(root, mode))
        .any(|dest_root| path.starts_with(dest_root));
        !organized && self.indexer.accepts(root, path)
    }

    /// Scans `root` and organizes everything found.
    ///
    /// Destination roots are excluded from the scan so organized files are
    /// never picked up again.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use std::path::Path;
    /// use std::sync::Arc;
    /// use tidydesk::{AppConfig, CancellationToken, Indexer, OrganizeOptions, Organizer, ProgressSink, Store};
    ///
    /// let config = AppConfig::default();
    /// let store = Arc::new(Store::open(&config.database).unwrap());
    /// let organizer = Organizer::new(store, Indexer::from_config(&config).unwrap(), &config);
    /// let report = organizer
    ///     .organize_folder(
    ///         Path::new("/home/me/Desktop"),
    ///         &OrganizeOptions::from_config(&config),
    ///         &CancellationToken::new(),
    ///         &ProgressSink::silent(),
    ///     )
    ///     .unwrap();
    /// println!("session {} moved {} file(s)", report.session.id, report.moved.len());
    /// ```
    pub fn organize_folder(
        &self,
        root: &Path,
        options: &OrganizeOptions,
        cancel: &CancellationToken,
        progress: &ProgressSink,
    ) -> Result<OrganizeReport> {
        let scan = self.scan(root, cancel, progress)?;
        let mut report = self.organize(root, scan.records, options, cancel, progress)?;
        report.scan_errors = scan.errors;
        Ok(report)
    }

    /// Enumerates `root` the way [`Organizer::organize_folder`] does, skipping
    /// every destination root.
    pub fn scan(
        &self,
        root: &Path,
        cancel: &CancellationToken,
        progress: &ProgressSink,
    ) -> Result<ScanReport> {
        let mut indexer = self.indexer.clone();
        for mode in [
            DestinationMode::DesktopSubfolder,
            DestinationMode::OrganizedFolder,
        ] {
            if let Some(dest_root) = self.destination_root(root, mode) {
                indexer = indexer.exclude_dir(dest_root);
            }
        }
        indexer.scan(root, cancel, progress)
    }

    /// Organizes a single file that appeared under `root`, as its own session.
    pub fn organize_file(
        &self,
        root: &Path,
        path: &Path,
        options: &OrganizeOptions,
        progress: &ProgressSink,
    ) -> Result<OrganizeReport> {
        let record = FileRecord::from_path(path).map_err(|e| Error::io(path, e))?;
        let mut options = options.clone();
        if options.session_name.is_none() {
            options.session_name = Some(format!("watch: {}", record.file_name()));
        }
        self.organize(root, vec![record], &options, &CancellationToken::new(), progress)
    }

    /// Dry run: where each file would go. Never touches the filesystem or
    /// the classifier, so tag mode plans by rule.
    pub fn plan(
        &self,
        root: &Path,
        files: &[FileRecord],
        options: &OrganizeOptions,
    ) -> Vec<PlannedMove> {
        let categories = self.categorize(files);
        files
            .iter()
            .zip(categories)
            .map(|(record, category)| {
                let (destination_dir, skip_reason) =
                    match self.decide(root, record, category, None, options) {
                        Decision::Skip(reason) => (None, Some(reason)),
                        Decision::IndexInPlace => (None, None),
                        Decision::Move { dir, .. } => (Some(dir), None),
                    };
                PlannedMove {
                    source: record.path.clone(),
                    destination_dir,
                    category,
                    skip_reason,
                }
            })
            .collect()
    }

    /// Organizes `files` in order as one session.
    ///
    /// Every file ends up as exactly one recorded action: moved, skipped or
    /// error. A per-file failure never stops the run. A store failure does:
    /// the move that could not be recorded is rolled back and
    /// [`Error::Interrupted`] reports how many actions were recorded.
    ///
    /// # Arguments
    ///
    /// * `root` - Folder the files were found in; anchors the desktop subfolder
    /// * `files` - Files to organize, processed in this order
    /// * `options` - Mode, destination and tagging for this run
    /// * `cancel` - Stops the run between files; the session stays active
    /// * `progress` - Receives one event per file
    pub fn organize(
        &self,
        root: &Path,
        files: Vec<FileRecord>,
        options: &OrganizeOptions,
        cancel: &CancellationToken,
        progress: &ProgressSink,
    ) -> Result<OrganizeReport> {
        let name = options
            .session_name
            .clone()
            .unwrap_or_else(|| default_session_name(root));
        let session = self
            .store
            .create_session(&name, files.len(), options.destination)?;
        let lock = self.store.session_lock(session.id);
        let _guard = lock.lock();

        info!(
            "Session {} '{}': organizing {} file(s) from {}",
            session.id,
            name,
            files.len(),
            root.display()
        );
        progress.emit(ProgressEvent::SessionOpened {
            session_id: session.id,
            total: files.len(),
        });

        let mut report = OrganizeReport {
            session: session.clone(),
            moved: Vec::new(),
            skipped: Vec::new(),
            errors: Vec::new(),
            scan_errors: Vec::new(),
            gateway_failures: Vec::new(),
            folder_counts: BTreeMap::new(),
            cancelled: false,
        };

        if cancel.is_cancelled() {
            report.cancelled = true;
            report.session = self.store.finish_session(session.id, SessionStatus::Failed)?;
            progress.emit(ProgressEvent::SessionFinished {
                session_id: session.id,
                status: SessionStatus::Failed,
            });
            return Ok(report);
        }

        let categories = self.categorize(&files);
        let file_tags = self.tag(&files, options, cancel, progress, &mut report);

        let mut recorded = 0usize;
        for ((record, category), tags) in files.iter().zip(categories).zip(file_tags) {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            let tags = tags.unwrap_or_default();
            let decision = self.decide(root, record, category, Some(&tags), options);
            let (action, folder) = self.apply(record, decision, &tags);

            let stored = match self.store.append_action(session.id, &action) {
                Ok(stored) => stored,
                Err(err) => {
                    if action.outcome == ActionOutcome::Moved {
                        rollback_move(&action);
                    }
                    error!("Session {} interrupted: {}", session.id, err);
                    return Err(Error::Interrupted {
                        session_id: session.id,
                        recorded,
                        source: Box::new(err),
                    });
                }
            };
            recorded += 1;

            if stored.outcome != ActionOutcome::Error {
                let mut indexed = record.clone();
                indexed.path = stored.destination_path.clone();
                if let Err(err) = self.store.upsert_file(&indexed, Some(category), &tags) {
                    error!("Session {} interrupted while indexing: {}", session.id, err);
                    return Err(Error::Interrupted {
                        session_id: session.id,
                        recorded,
                        source: Box::new(err),
                    });
                }
            }

            self.report_action(stored, folder, options, progress, &mut report);
        }

        let status = if report.cancelled && recorded == 0 {
            Some(SessionStatus::Failed)
        } else if report.cancelled {
            None
        } else {
            Some(SessionStatus::Completed)
        };
        report.session = match status {
            Some(status) => self.store.finish_session(session.id, status)?,
            None => {
                warn!(
                    "Session {} cancelled after {} of {} file(s); left active",
                    session.id,
                    recorded,
                    files.len()
                );
                self.store.session(session.id)?
            }
        };
        progress.emit(ProgressEvent::SessionFinished {
            session_id: session.id,
            status: report.session.status,
        });
        info!(
            "Session {} {}: {} moved, {} skipped, {} error(s)",
            session.id,
            report.session.status,
            report.session.processed,
            report.session.skipped,
            report.session.errors
        );
        Ok(report)
    }

    /// Reverses the moves of a session. See [`UndoManager::undo`].
    pub fn undo(&self, session_id: i64, progress: &ProgressSink) -> Result<UndoReport> {
        UndoManager::new(&self.store).undo(session_id, progress)
    }

    fn categorize(&self, files: &[FileRecord]) -> Vec<Category> {
        self.indexer.pool().install(|| {
            files
                .par_iter()
                .map(|record| self.mapper.categorize_path(&record.path))
                .collect()
        })
    }

    fn tag(
        &self,
        files: &[FileRecord],
        options: &OrganizeOptions,
        cancel: &CancellationToken,
        progress: &ProgressSink,
        report: &mut OrganizeReport,
    ) -> Vec<Option<Vec<String>>> {
        let untagged = || vec![None; files.len()];
        if !options.tagging {
            return untagged();
        }
        let Some(gateway) = &self.gateway else {
            if options.mode == OrganizationMode::Tag {
                warn!("Tag mode requested but no classifier is configured; using rules");
            }
            return untagged();
        };

        let requests: Vec<ClassifyRequest> = files
            .iter()
            .map(|record| ClassifyRequest {
                filename: record.file_name(),
                path: Some(record.path.clone()),
            })
            .collect();
        let outcome = gateway.tag_all(&requests, cancel);
        for failure in &outcome.failures {
            progress.emit(ProgressEvent::GatewayFallback {
                files: failure.files,
                reason: failure.error.to_string(),
            });
        }
        report.gateway_failures = outcome.failures;
        outcome.tags
    }

    fn decide(
        &self,
        root: &Path,
        record: &FileRecord,
        category: Category,
        tags: Option<&[String]>,
        options: &OrganizeOptions,
    ) -> Decision {
        if let Some(ext) = record.path.extension() {
            let ext = ext.to_string_lossy().to_lowercase();
            if self.skip_extensions.contains(&ext) {
                return Decision::Skip(format!(".{} files are never moved", ext));
            }
        }
        let Some(dest_root) = self.destination_root(root, options.destination) else {
            return Decision::IndexInPlace;
        };
        if record.path.starts_with(&dest_root) {
            return Decision::Skip("already organized".to_string());
        }

        let tag_folder = match options.mode {
            OrganizationMode::Tag => tags
                .and_then(|tags| tags.first())
                .and_then(|tag| sanitize_folder_name(tag)),
            OrganizationMode::Rule => None,
        };
        let folder = match tag_folder {
            Some(tag) => Path::new(TAG_GROUP_DIR).join(tag),
            None => category.dir_name(),
        };
        Decision::Move {
            dir: dest_root.join(&folder),
            folder: folder.to_string_lossy().into_owned(),
        }
    }

    fn apply(
        &self,
        record: &FileRecord,
        decision: Decision,
        tags: &[String],
    ) -> (NewAction, Option<String>) {
        let action = |destination: PathBuf, outcome, message: Option<String>| NewAction {
            original_path: record.path.clone(),
            destination_path: destination,
            tags: tags.to_vec(),
            outcome,
            message,
        };
        match decision {
            Decision::Skip(reason) => (
                action(record.path.clone(), ActionOutcome::Skipped, Some(reason)),
                None,
            ),
            Decision::IndexInPlace => (
                action(
                    record.path.clone(),
                    ActionOutcome::Skipped,
                    Some("indexed in place".to_string()),
                ),
                None,
            ),
            Decision::Move { dir, folder } => match move_into(&record.path, &dir) {
                Ok(destination) => (action(destination, ActionOutcome::Moved, None), Some(folder)),
                Err(err) => {
                    warn!("Failed to move {}: {}", record.path.display(), err);
                    (
                        action(record.path.clone(), ActionOutcome::Error, Some(err.to_string())),
                        None,
                    )
                }
            },
        }
    }

    fn report_action(
        &self,
        stored: MoveAction,
        folder: Option<String>,
        options: &OrganizeOptions,
        progress: &ProgressSink,
        report: &mut OrganizeReport,
    ) {
        let session_id = stored.session_id;
        match stored.outcome {
            ActionOutcome::Moved => {
                debug!(
                    "Moved {} -> {}",
                    stored.original_path.display(),
                    stored.destination_path.display()
                );
                progress.emit(ProgressEvent::FileMoved {
                    session_id,
                    from: stored.original_path.clone(),
                    to: stored.destination_path.clone(),
                });
                if let Some(folder) = folder {
                    *report.folder_counts.entry(folder).or_insert(0) += 1;
                }
                report.moved.push(stored);
            }
            ActionOutcome::Skipped => {
                if options.destination == DestinationMode::IndexOnly {
                    progress.emit(ProgressEvent::FileIndexed {
                        session_id,
                        path: stored.original_path.clone(),
                    });
                } else {
                    progress.emit(ProgressEvent::FileSkipped {
                        session_id,
                        path: stored.original_path.clone(),
                        reason: stored.message.clone().unwrap_or_default(),
                    });
                }
                report.skipped.push(stored);
            }
            ActionOutcome::Error => {
                let error = ItemError::new(
                    &stored.original_path,
                    ErrorKind::Io,
                    stored.message.clone().unwrap_or_default(),
                );
                progress.emit(ProgressEvent::FileFailed {
                    session_id,
                    error: error.clone(),
                });
                report.errors.push(error);
            }
        }
    }
}

fn default_session_name(root: &Path) -> String {
    let folder = root
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| root.display().to_string());
    format!("{} {}", folder, Utc::now().format("%Y-%m-%d %H:%M:%S"))
}

/// Makes a tag usable as a single path component.
fn sanitize_folder_name(tag: &str) -> Option<String> {
    let cleaned: String = tag
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim().trim_matches('.').trim();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned.to_string())
    }
}

/// Renames tried when another writer claims a picked destination first.
const MAX_NAME_ATTEMPTS: u32 = 16;

/// First free name in `dir`: `name.ext`, then `name (1).ext`, `name (2).ext`...
pub(crate) fn unique_destination(dir: &Path, file_name: &OsStr) -> PathBuf {
    let candidate = dir.join(file_name);
    if fs::symlink_metadata(&candidate).is_err() {
        return candidate;
    }
    let name = Path::new(file_name);
    let stem = name.file_stem().unwrap_or(file_name);
    let extension = name.extension();
    let mut n = 1u32;
    loop {
        let mut numbered = stem.to_os_string();
        numbered.push(format!(" ({})", n));
        if let Some(ext) = extension {
            numbered.push(".");
            numbered.push(ext);
        }
        let candidate = dir.join(numbered);
        if fs::symlink_metadata(&candidate).is_err() {
            return candidate;
        }
        n += 1;
    }
}

/// Moves `source` into `dir` under a non-conflicting name.
fn move_into(source: &Path, dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;
    let file_name = source.file_name().ok_or_else(|| {
        Error::io(
            source,
            io::Error::new(io::ErrorKind::InvalidInput, "file has no name component"),
        )
    })?;
    let mut attempts = 1;
    loop {
        let destination = unique_destination(dir, file_name);
        match move_file(source, &destination) {
            Ok(()) => return Ok(destination),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists && attempts < MAX_NAME_ATTEMPTS => {
                debug!("{} was taken, picking another name", destination.display());
                attempts += 1;
            }
            Err(e) => return Err(Error::io(source, e)),
        }
    }
}

/// Moves a file without ever replacing an existing `to`.
///
/// The new name is linked before the old one is removed, so an occupied
/// target fails with `AlreadyExists`. Where hard links are unavailable
/// (another filesystem, or one without links) the content is copied into a
/// newly created file instead.
pub(crate) fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    match fs::hard_link(from, to) {
        Ok(()) => remove_source(from, to),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Err(e),
        Err(e) => {
            debug!("Linking {} failed ({}), copying instead", to.display(), e);
            copy_no_clobber(from, to)?;
            remove_source(from, to)
        }
    }
}

fn remove_source(from: &Path, to: &Path) -> io::Result<()> {
    if let Err(e) = fs::remove_file(from) {
        let _ = fs::remove_file(to);
        return Err(e);
    }
    Ok(())
}

fn copy_no_clobber(from: &Path, to: &Path) -> io::Result<()> {
    let mut source = File::open(from)?;
    let metadata = source.metadata()?;
    let mut target = OpenOptions::new().write(true).create_new(true).open(to)?;
    let copied = io::copy(&mut source, &mut target)
        .and_then(|_| target.set_permissions(metadata.permissions()))
        .and_then(|_| metadata.modified())
        .and_then(|modified| target.set_modified(modified))
        .and_then(|_| target.sync_all());
    if let Err(e) = copied {
        drop(target);
        let _ = fs::remove_file(to);
        return Err(e);
    }
    Ok(())
}

fn rollback_move(action: &NewAction) {
    if let Err(e) = move_file(&action.destination_path, &action.original_path) {
        error!(
            "Could not roll back unrecorded move {} -> {}: {}",
            action.original_path.display(),
            action.destination_path.display(),
            e
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::tests::FixedClassifier;
    use crate::config::ClassifierSettings;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;

    fn organizer(organized_dir: &Path) -> Organizer {
        let mut config = AppConfig::default();
        config.organize.organized_dir = organized_dir.to_path_buf();
        let store = Arc::new(Store::open_in_memory().expect("Failed to open store"));
        let indexer = Indexer::from_config(&config).expect("Failed to build indexer");
        Organizer::new(store, indexer, &config)
    }

    fn write(dir: &Path, name: &str) -> FileRecord {
        let path = dir.join(name);
        fs::write(&path, name).expect("Failed to write test file");
        FileRecord::from_path(&path).expect("Failed to stat test file")
    }

    #[test]
    fn test_unique_destination_numbers_collisions() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let dir = temp_dir.path();
        assert_eq!(
            unique_destination(dir, OsStr::new("report.pdf")),
            dir.join("report.pdf")
        );

        fs::write(dir.join("report.pdf"), "x").unwrap();
        fs::write(dir.join("report (1).pdf"), "x").unwrap();
        assert_eq!(
            unique_destination(dir, OsStr::new("report.pdf")),
            dir.join("report (2).pdf")
        );

        fs::write(dir.join("Makefile"), "x").unwrap();
        assert_eq!(
            unique_destination(dir, OsStr::new("Makefile")),
            dir.join("Makefile (1)")
        );
    }

    #[test]
    fn test_sanitize_folder_name() {
        assert_eq!(sanitize_folder_name("tax/2024"), Some("tax_2024".to_string()));
        assert_eq!(sanitize_folder_name(" .. "), None);
        assert_eq!(sanitize_folder_name("travel"), Some("travel".to_string()));
    }

    #[test]
    fn test_plan_does_not_touch_files() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let root = temp_dir.path();
        let organizer = organizer(&root.join("Organized"));
        let files = vec![write(root, "photo.jpg"), write(root, "Shortcut.lnk")];

        let plan = organizer.plan(root, &files, &OrganizeOptions::default());

        assert_eq!(plan[0].destination_dir, Some(root.join("TidyDesk").join("Images")));
        assert_eq!(plan[0].category, Category::Image);
        assert!(plan[1].destination_dir.is_none());
        assert!(plan[1].skip_reason.is_some());
        assert!(root.join("photo.jpg").exists());
        assert!(!root.join("TidyDesk").exists());
    }

    #[test]
    fn test_organize_moves_and_records_in_order() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let root = temp_dir.path();
        let organizer = organizer(&root.join("Organized"));
        let files = vec![write(root, "a.txt"), write(root, "b.lnk"), write(root, "c.pdf")];

        let report = organizer
            .organize(
                root,
                files,
                &OrganizeOptions::default(),
                &CancellationToken::new(),
                &ProgressSink::silent(),
            )
            .expect("Organize failed");

        // Verify the session counters mirror the outcomes
        assert_eq!(report.session.status, SessionStatus::Completed);
        assert_eq!(report.session.processed, 2);
        assert_eq!(report.session.skipped, 1);
        assert_eq!(report.session.errors, 0);
        assert!(report.session.finished_at.is_some());

        // Verify the files landed in their category folders
        assert!(root.join("TidyDesk/Documents/a.txt").exists());
        assert!(root.join("TidyDesk/Documents/c.pdf").exists());
        assert!(root.join("b.lnk").exists());

        let actions = organizer.store().actions_for_session(report.session.id).unwrap();
        let names: Vec<_> = actions
            .iter()
            .map(|a| a.original_path.file_name().unwrap().to_owned())
            .collect();
        assert_eq!(names, vec!["a.txt", "b.lnk", "c.pdf"]);
        assert_eq!(report.folder_counts.get("Documents"), Some(&2));
    }

    #[test]
    fn test_vanished_file_is_recorded_as_error() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let root = temp_dir.path();
        let organizer = organizer(&root.join("Organized"));
        let gone = write(root, "gone.txt");
        fs::remove_file(&gone.path).unwrap();
        let kept = write(root, "kept.txt");

        let report = organizer
            .organize(
                root,
                vec![gone, kept],
                &OrganizeOptions::default(),
                &CancellationToken::new(),
                &ProgressSink::silent(),
            )
            .expect("Organize failed");

        assert_eq!(report.session.errors, 1);
        assert_eq!(report.session.processed, 1);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.session.status, SessionStatus::Completed);
    }

    #[test]
    fn test_cancel_before_first_file_fails_session() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let root = temp_dir.path();
        let organizer = organizer(&root.join("Organized"));
        let files = vec![write(root, "a.txt")];
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = organizer
            .organize(root, files, &OrganizeOptions::default(), &cancel, &ProgressSink::silent())
            .expect("Organize failed");

        assert!(report.cancelled);
        assert_eq!(report.session.status, SessionStatus::Failed);
        assert!(root.join("a.txt").exists());
    }

    #[test]
    fn test_tag_mode_groups_by_first_tag() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let root = temp_dir.path();
        let classifier = Arc::new(FixedClassifier {
            tags: vec!["Invoice".to_string(), "tax".to_string()],
            calls: AtomicUsize::new(0),
        });
        let gateway = ClassifierGateway::new(classifier, &ClassifierSettings::default());
        let organizer = organizer(&root.join("Organized")).with_gateway(Some(gateway));
        let options = OrganizeOptions {
            mode: OrganizationMode::Tag,
            tagging: true,
            ..Default::default()
        };

        let report = organizer
            .organize(
                root,
                vec![write(root, "scan.pdf")],
                &options,
                &CancellationToken::new(),
                &ProgressSink::silent(),
            )
            .expect("Organize failed");

        let moved = root.join("TidyDesk/GroupedByTag/invoice/scan.pdf");
        assert!(moved.exists());
        assert_eq!(report.moved[0].tags, vec!["invoice", "tax"]);
        assert_eq!(
            organizer.store().files_with_tag("tax").unwrap(),
            vec![moved]
        );
    }

    #[test]
    fn test_index_only_records_without_moving() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let root = temp_dir.path();
        let organizer = organizer(&root.join("Organized"));
        let options = OrganizeOptions {
            destination: DestinationMode::IndexOnly,
            ..Default::default()
        };

        let report = organizer
            .organize(
                root,
                vec![write(root, "notes.md")],
                &options,
                &CancellationToken::new(),
                &ProgressSink::silent(),
            )
            .expect("Organize failed");

        assert!(root.join("notes.md").exists());
        // Verify index-only files count as skipped, never as processed
        assert_eq!(report.session.skipped, 1);
        assert_eq!(report.session.processed, 0);
        assert!(report.moved.is_empty());
        assert_eq!(report.skipped[0].outcome, ActionOutcome::Skipped);
        assert_eq!(report.skipped[0].message.as_deref(), Some("indexed in place"));
        assert_eq!(report.skipped[0].destination_path, root.join("notes.md"));
        assert_eq!(organizer.store().indexed_file_count().unwrap(), 1);

        // Verify nothing from the session is offered for undo
        assert!(organizer
            .store()
            .latest_undoable_session()
            .expect("Failed to query sessions")
            .is_none());
    }

    #[test]
    fn test_move_file_never_replaces_existing_target() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let root = temp_dir.path();
        fs::write(root.join("incoming.txt"), "incoming").expect("Failed to write source");
        fs::write(root.join("taken.txt"), "already here").expect("Failed to write target");

        let err = move_file(&root.join("incoming.txt"), &root.join("taken.txt"))
            .expect_err("Move onto an existing file should fail");

        // Verify both files are intact
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
        assert_eq!(
            fs::read_to_string(root.join("taken.txt")).expect("Failed to read target"),
            "already here"
        );
        assert_eq!(
            fs::read_to_string(root.join("incoming.txt")).expect("Failed to read source"),
            "incoming"
        );
    }

    #[test]
    fn test_copy_fallback_refuses_existing_target() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let root = temp_dir.path();
        fs::write(root.join("incoming.txt"), "incoming").expect("Failed to write source");
        fs::write(root.join("taken.txt"), "already here").expect("Failed to write target");

        let err = copy_no_clobber(&root.join("incoming.txt"), &root.join("taken.txt"))
            .expect_err("Copy onto an existing file should fail");

        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
        assert_eq!(
            fs::read_to_string(root.join("taken.txt")).expect("Failed to read target"),
            "already here"
        );

        copy_no_clobber(&root.join("incoming.txt"), &root.join("fresh.txt"))
            .expect("Failed to copy into a new file");
        // Verify the copy keeps content and mtime
        assert_eq!(
            fs::read_to_string(root.join("fresh.txt")).expect("Failed to read copy"),
            "incoming"
        );
        let source_mtime = fs::metadata(root.join("incoming.txt"))
            .and_then(|m| m.modified())
            .expect("Failed to stat source");
        let copy_mtime = fs::metadata(root.join("fresh.txt"))
            .and_then(|m| m.modified())
            .expect("Failed to stat copy");
        assert_eq!(source_mtime, copy_mtime);
    }

    #[test]
    fn test_move_file_moves_into_free_name() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let root = temp_dir.path();
        fs::write(root.join("a.txt"), "alpha").expect("Failed to write source");

        move_file(&root.join("a.txt"), &root.join("b.txt")).expect("Failed to move file");

        assert!(!root.join("a.txt").exists());
        assert_eq!(
            fs::read_to_string(root.join("b.txt")).expect("Failed to read moved file"),
            "alpha"
        );
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_unique_destination_keeps_non_utf8_names() {
        use std::os::unix::ffi::OsStrExt;

        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let dir = temp_dir.path();
        let name = OsStr::from_bytes(b"caf\xe9.txt");
        fs::write(dir.join(name), "x").expect("Failed to write file");

        // Verify the numbered name keeps the raw stem bytes
        assert_eq!(
            unique_destination(dir, name),
            dir.join(OsStr::from_bytes(b"caf\xe9 (1).txt"))
        );
    }

    #[test]
    fn test_organize_folder_ignores_existing_destination() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let root = temp_dir.path();
        let organizer = organizer(&root.join("Organized")).into_recursive();
        fs::create_dir_all(root.join("TidyDesk/Documents")).unwrap();
        fs::write(root.join("TidyDesk/Documents/old.txt"), "x").unwrap();
        fs::write(root.join("new.txt"), "x").unwrap();

        let report = organizer
            .organize_folder(
                root,
                &OrganizeOptions::default(),
                &CancellationToken::new(),
                &ProgressSink::silent(),
            )
            .expect("Organize failed");

        assert_eq!(report.session.total, 1);
        assert!(root.join("TidyDesk/Documents/new.txt").exists());
        assert!(root.join("TidyDesk/Documents/old.txt").exists());
    }

    impl Organizer {
        fn into_recursive(mut self) -> Self {
            self.indexer = self.indexer.clone().with_recursive(true);
            self
        }
    }
}
