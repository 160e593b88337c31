//! Command-line interface module for tidydesk.
//!
//! This module handles all CLI-related functionality including:
//! - Command parsing and validation
//! - Wiring configuration, store and engines together
//! - Organize, undo and session inspection
//! - Snapshot capture, diff, restore, pruning and scheduling
//! - Searching the file index

use clap::{Args, Parser, Subcommand};
use regex::{Regex, RegexBuilder};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

use crate::cancel::CancellationToken;
use crate::classifier::BatchFailure;
use crate::config::{AppConfig, ConfigError, DestinationMode, OrganizationMode};
use crate::error::Result;
use crate::indexer::Indexer;
use crate::organizer::{OrganizeOptions, Organizer};
use crate::output::{OutputFormatter, ProgressRenderer, format_bytes};
use crate::progress::ProgressSink;
use crate::snapshot::{SnapshotEngine, SnapshotScheduler};
use crate::store::{DEFAULT_SEARCH_LIMIT, SearchQuery, Store};
use crate::undo::UndoReport;

const PROGRESS_CAPACITY: usize = 1024;

#[derive(Debug, Parser)]
#[command(name = "tidydesk", version, about = "Organize cluttered folders and keep versioned snapshots")]
pub struct Cli {
    /// Configuration file (default: .tidydeskrc.toml, then ~/.config/tidydesk/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Override the database path from the configuration
    #[arg(long, global = true)]
    pub database: Option<PathBuf>,

    /// Also write logs to this file
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    pub fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Organize the files of a folder into categorized destinations
    Organize(OrganizeArgs),
    /// Move the files of a session back (default: latest undoable session)
    Undo { session: Option<i64> },
    /// List recent sessions
    Sessions {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Show the recorded actions of a session
    Actions { session: i64 },
    /// Capture a snapshot of a folder
    Snapshot { folder: PathBuf },
    /// List snapshots, optionally for one folder
    Snapshots { folder: Option<PathBuf> },
    /// Compare two sealed snapshots
    Diff { old: i64, new: i64 },
    /// Recreate a snapshot's files
    Restore {
        id: i64,
        /// Target folder (default: <folder>_restored_<timestamp> next to the original)
        #[arg(long)]
        to: Option<PathBuf>,
    },
    /// Delete all but the newest snapshots of a folder
    Prune {
        folder: PathBuf,
        /// Snapshots to keep (default: snapshots.default_retain)
        #[arg(long)]
        keep: Option<usize>,
    },
    /// Manage folders snapshotted on a schedule
    Watch {
        #[command(subcommand)]
        action: WatchCommand,
    },
    /// Run scheduled snapshots until interrupted
    Schedule {
        /// Seconds between checks for due folders
        #[arg(long, default_value_t = 60)]
        tick: u64,
    },
    /// Search the file index by name, tag, type or date
    Search(SearchArgs),
    /// Show database and snapshot storage totals
    Stats,
}

#[derive(Debug, Args)]
pub struct SearchArgs {
    /// Text contained in the file name
    pub name: Option<String>,
    /// Text contained in one of the file's tags
    #[arg(long)]
    pub tag: Option<String>,
    /// File type, e.g. document or image
    #[arg(long = "type")]
    pub category: Option<String>,
    /// Only files indexed within this many days
    #[arg(long)]
    pub days: Option<i64>,
    /// Match the whole name or tag instead of a part of it
    #[arg(long)]
    pub exact: bool,
    #[arg(long)]
    pub case_sensitive: bool,
    /// Treat the name and tag as regular expressions
    #[arg(long, conflicts_with = "exact")]
    pub regex: bool,
    #[arg(long, default_value_t = DEFAULT_SEARCH_LIMIT)]
    pub limit: usize,
    /// Show index totals, known types and tags instead of searching
    #[arg(long)]
    pub summary: bool,
}

impl SearchArgs {
    pub fn to_query(&self) -> Result<SearchQuery> {
        let mut query = SearchQuery::new().limit(self.limit);
        query.category = self.category.clone();
        query.exact = self.exact;
        query.case_sensitive = self.case_sensitive;
        if let Some(days) = self.days {
            query = query.last_days(days);
        }
        if self.regex {
            query.name_regex = self
                .name
                .as_deref()
                .map(|p| compile_regex(p, self.case_sensitive))
                .transpose()?;
            query.tag_regex = self
                .tag
                .as_deref()
                .map(|p| compile_regex(p, false))
                .transpose()?;
        } else {
            query.name = self.name.clone();
            query.tag = self.tag.clone();
        }
        Ok(query)
    }
}

fn compile_regex(pattern: &str, case_sensitive: bool) -> Result<Regex> {
    RegexBuilder::new(pattern)
        .case_insensitive(!case_sensitive)
        .build()
        .map_err(|e| {
            ConfigError::InvalidRegex {
                pattern: pattern.to_string(),
                reason: e.to_string(),
            }
            .into()
        })
}

#[derive(Debug, Args)]
pub struct OrganizeArgs {
    pub dir: PathBuf,
    #[arg(long, value_enum)]
    pub mode: Option<OrganizationMode>,
    #[arg(long, value_enum)]
    pub destination: Option<DestinationMode>,
    /// Tag files with the configured classifier
    #[arg(long)]
    pub ai: bool,
    /// Descend into subfolders
    #[arg(long)]
    pub recursive: bool,
    /// Show where files would go without moving anything
    #[arg(long)]
    pub dry_run: bool,
    /// Session name
    #[arg(long)]
    pub name: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum WatchCommand {
    Add {
        folder: PathBuf,
        #[arg(long)]
        interval: Option<u64>,
        #[arg(long)]
        retain: Option<u32>,
    },
    Remove { folder: PathBuf },
    List,
}

/// Loaded configuration plus the shared store.
struct Context {
    config: AppConfig,
    store: Arc<Store>,
    cancel: CancellationToken,
}

impl Context {
    fn load(cli: &Cli) -> Result<Self> {
        let mut config = AppConfig::load(cli.config.as_deref())?;
        if let Some(database) = &cli.database {
            config.database = database.clone();
        }
        let store = Arc::new(Store::open(&config.database)?);
        debug!("Using database {}", config.database.display());
        Ok(Self {
            config,
            store,
            cancel: interrupt_token(),
        })
    }

    fn organizer(&self) -> Result<Organizer> {
        let indexer = Indexer::from_config(&self.config)?;
        Ok(Organizer::new(self.store.clone(), indexer, &self.config))
    }

    fn snapshot_engine(&self) -> Result<SnapshotEngine> {
        let indexer = Indexer::from_config(&self.config)?;
        SnapshotEngine::open(self.store.clone(), indexer, &self.config.snapshots)
    }
}

/// Runs the CLI application with parsed arguments.
///
/// # Examples
///
/// ```no_run
/// use clap::Parser;
/// use tidydesk::cli::{Cli, run_cli};
///
/// let cli = Cli::parse_from(["tidydesk", "sessions", "--limit", "5"]);
/// if let Err(e) = run_cli(&cli) {
///     eprintln!("Error: {}", e);
/// }
/// ```
pub fn run_cli(cli: &Cli) -> Result<()> {
    let ctx = Context::load(cli)?;
    match &cli.command {
        Command::Organize(args) => organize(&ctx, args),
        Command::Undo { session } => undo(&ctx, *session),
        Command::Sessions { limit } => {
            OutputFormatter::sessions_table(&ctx.store.list_sessions(*limit)?);
            Ok(())
        }
        Command::Actions { session } => {
            let session = ctx.store.session(*session)?;
            OutputFormatter::header(&format!("Session {} '{}' ({})", session.id, session.name, session.status));
            OutputFormatter::actions_table(&ctx.store.actions_for_session(session.id)?);
            Ok(())
        }
        Command::Snapshot { folder } => snapshot(&ctx, folder),
        Command::Snapshots { folder } => {
            OutputFormatter::snapshots_table(&ctx.store.list_snapshots(folder.as_deref())?);
            Ok(())
        }
        Command::Diff { old, new } => {
            let diff = ctx.snapshot_engine()?.diff(*old, *new)?;
            OutputFormatter::diff(&diff);
            Ok(())
        }
        Command::Restore { id, to } => restore(&ctx, *id, to.as_deref()),
        Command::Prune { folder, keep } => {
            let engine = ctx.snapshot_engine()?;
            let keep = keep.unwrap_or(engine.default_retain() as usize);
            let report = engine.prune(folder, keep)?;
            OutputFormatter::success(&format!(
                "Pruned {} snapshot(s), removed {} blob(s), freed {}",
                report.pruned.len(),
                report.blobs_removed,
                format_bytes(report.bytes_freed)
            ));
            if !report.discarded.is_empty() {
                OutputFormatter::plain(&format!(
                    "Discarded {} abandoned capture(s)",
                    report.discarded.len()
                ));
            }
            Ok(())
        }
        Command::Watch { action } => watch(&ctx, action),
        Command::Schedule { tick } => schedule(&ctx, *tick),
        Command::Search(args) => search(&ctx, args),
        Command::Stats => stats(&ctx),
    }
}

fn organize(ctx: &Context, args: &OrganizeArgs) -> Result<()> {
    let mut config = ctx.config.clone();
    if args.recursive {
        config.organize.recursive = true;
    }
    let indexer = Indexer::from_config(&config)?;
    let organizer = Organizer::new(ctx.store.clone(), indexer, &config);

    let mut options = OrganizeOptions::from_config(&config);
    if let Some(mode) = args.mode {
        options.mode = mode;
    }
    if let Some(destination) = args.destination {
        options.destination = destination;
    }
    if args.ai {
        options.tagging = true;
        if config.classifier.endpoint.is_none() {
            OutputFormatter::warning("No classifier endpoint configured; files are organized by rule");
        }
    }
    options.session_name = args.name.clone();

    if args.dry_run {
        return dry_run(ctx, &organizer, &args.dir, &options);
    }

    OutputFormatter::info(&format!("Organizing contents of: {}", args.dir.display()));
    let (sink, events) = ProgressSink::bounded(PROGRESS_CAPACITY);
    let renderer = ProgressRenderer::start(events);
    let result = organizer.organize_folder(&args.dir, &options, &ctx.cancel, &sink);
    drop(sink);
    renderer.finish();
    let report = result?;

    OutputFormatter::item_errors("Unreadable files", &report.scan_errors);
    OutputFormatter::item_errors("Failed", &report.errors);
    for failure in &report.gateway_failures {
        OutputFormatter::warning(&gateway_failure_message(failure));
    }
    if !report.folder_counts.is_empty() {
        OutputFormatter::summary_table(&report.folder_counts, report.moved.len());
    }

    let session = &report.session;
    let summary = format!(
        "Session {} {}: {} moved, {} skipped, {} error(s)",
        session.id, session.status, session.processed, session.skipped, session.errors
    );
    if report.cancelled {
        OutputFormatter::warning(&format!("Interrupted. {}", summary));
    } else {
        OutputFormatter::success(&summary);
    }
    if session.processed > 0 {
        OutputFormatter::plain(&format!("Use 'tidydesk undo {}' to revert changes.", session.id));
    }
    Ok(())
}

fn gateway_failure_message(failure: &BatchFailure) -> String {
    format!(
        "Classifier failed for {} file(s) after {} attempt(s): {}",
        failure.files, failure.attempts, failure.error
    )
}

fn dry_run(ctx: &Context, organizer: &Organizer, dir: &Path, options: &OrganizeOptions) -> Result<()> {
    OutputFormatter::dry_run_notice(&format!("Analyzing contents of: {}", dir.display()));
    let scan = organizer.scan(dir, &ctx.cancel, &ProgressSink::silent())?;
    if scan.records.is_empty() {
        OutputFormatter::plain("No files found to organize.");
        return Ok(());
    }

    let plan = organizer.plan(dir, &scan.records, options);
    let mut counts = std::collections::BTreeMap::new();
    for planned in &plan {
        let name = planned
            .source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        match (&planned.destination_dir, &planned.skip_reason) {
            (Some(dest), _) => {
                OutputFormatter::plain(&format!(" - {} → {}", name, dest.display()));
                let folder = dest
                    .strip_prefix(organizer.destination_root(dir, options.destination).unwrap_or_default())
                    .unwrap_or(dest)
                    .display()
                    .to_string();
                *counts.entry(folder).or_insert(0) += 1;
            }
            (None, Some(reason)) => OutputFormatter::plain(&format!(" - {} (skipped: {})", name, reason)),
            (None, None) => OutputFormatter::plain(&format!(" - {} (indexed in place)", name)),
        }
    }
    let moving = counts.values().sum();
    OutputFormatter::summary_table(&counts, moving);
    OutputFormatter::dry_run_notice("No files were modified.");
    Ok(())
}

fn undo(ctx: &Context, session: Option<i64>) -> Result<()> {
    let session_id = match session {
        Some(id) => id,
        None => match ctx.store.latest_undoable_session()? {
            Some(session) => session.id,
            None => {
                OutputFormatter::plain("Nothing to undo.");
                return Ok(());
            }
        },
    };
    OutputFormatter::info(&format!("Undoing session {}...", session_id));
    let (sink, events) = ProgressSink::bounded(PROGRESS_CAPACITY);
    let renderer = ProgressRenderer::start(events);
    let result = ctx.organizer()?.undo(session_id, &sink);
    drop(sink);
    renderer.finish();
    print_undo(&result?);
    Ok(())
}

fn print_undo(report: &UndoReport) {
    if report.nothing_to_undo {
        OutputFormatter::plain(&format!("Session {} moved no files; nothing to undo.", report.session_id));
        return;
    }
    OutputFormatter::plain(&format!("  Restored: {}", report.restored.len()));
    if report.already_undone > 0 {
        OutputFormatter::plain(&format!("  Already undone: {}", report.already_undone));
    }
    OutputFormatter::item_errors("Skipped", &report.skipped);
    OutputFormatter::item_errors("Failed", &report.failed);
    if report.is_complete_success() {
        OutputFormatter::success(&format!("Session {} undone", report.session_id));
    } else {
        OutputFormatter::warning("Some files were not restored. Fix the issues above and run undo again.");
    }
}

fn snapshot(ctx: &Context, folder: &Path) -> Result<()> {
    let engine = ctx.snapshot_engine()?;
    let (sink, events) = ProgressSink::bounded(PROGRESS_CAPACITY);
    let renderer = ProgressRenderer::start(events);
    let result = engine.snapshot(folder, &ctx.cancel, &sink);
    drop(sink);
    renderer.finish();
    let report = result?;

    OutputFormatter::item_errors("Unreadable files", &report.errors);
    let snapshot = &report.snapshot;
    if report.cancelled {
        OutputFormatter::warning(&format!(
            "Snapshot {} interrupted; it stays incomplete and is ignored by diff and restore",
            snapshot.id
        ));
    } else {
        OutputFormatter::success(&format!(
            "Snapshot {} sealed: {} file(s), {} ({} hashed, {} unchanged)",
            snapshot.id,
            snapshot.file_count,
            format_bytes(snapshot.total_size),
            report.hashed,
            report.reused
        ));
    }
    Ok(())
}

fn restore(ctx: &Context, id: i64, to: Option<&Path>) -> Result<()> {
    let engine = ctx.snapshot_engine()?;
    let (sink, events) = ProgressSink::bounded(PROGRESS_CAPACITY);
    let renderer = ProgressRenderer::start(events);
    let result = engine.restore(id, to, &sink);
    drop(sink);
    renderer.finish();
    let report = result?;

    OutputFormatter::item_errors("Failed", &report.failed);
    OutputFormatter::success(&format!(
        "Restored {} file(s) into {}",
        report.restored,
        report.destination.display()
    ));
    Ok(())
}

fn watch(ctx: &Context, action: &WatchCommand) -> Result<()> {
    let engine = ctx.snapshot_engine()?;
    match action {
        WatchCommand::Add { folder, interval, retain } => {
            engine.watch_folder(folder, *interval, *retain)?;
            OutputFormatter::success(&format!("Watching {}", folder.display()));
        }
        WatchCommand::Remove { folder } => {
            if engine.unwatch_folder(folder)? {
                OutputFormatter::success(&format!("Stopped watching {}", folder.display()));
            } else {
                OutputFormatter::warning(&format!("{} was not watched", folder.display()));
            }
        }
        WatchCommand::List => {
            let folders = engine.watched_folders()?;
            if folders.is_empty() {
                OutputFormatter::plain("No watched folders.");
            }
            for watched in folders {
                let last = watched
                    .last_snapshot_at
                    .map(|at| at.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_else(|| "never".to_string());
                OutputFormatter::plain(&format!(
                    "{}  every {}s, keep {}, last snapshot {}",
                    watched.folder.display(),
                    watched.interval_secs,
                    watched.retain,
                    last
                ));
            }
        }
    }
    Ok(())
}

fn schedule(ctx: &Context, tick: u64) -> Result<()> {
    let engine = Arc::new(ctx.snapshot_engine()?);
    engine.sync_watched(&ctx.config.snapshots.watched)?;
    let scheduler = SnapshotScheduler::start(engine, Duration::from_secs(tick.max(1)))
        .map_err(|e| crate::error::Error::io("tidydesk-scheduler", e))?;
    OutputFormatter::info("Snapshot scheduler running. Press Ctrl-C to stop.");
    while !ctx.cancel.is_cancelled() {
        thread::sleep(Duration::from_millis(250));
    }
    scheduler.stop();
    OutputFormatter::success("Scheduler stopped");
    Ok(())
}

fn search(ctx: &Context, args: &SearchArgs) -> Result<()> {
    if args.summary {
        OutputFormatter::search_summary(
            &ctx.store.search_statistics()?,
            &ctx.store.all_categories()?,
            &ctx.store.all_tags()?,
        );
        return Ok(());
    }
    let query = args.to_query()?;
    OutputFormatter::search_results(&ctx.store.search_files(&query)?);
    Ok(())
}

fn stats(ctx: &Context) -> Result<()> {
    let stats = ctx.snapshot_engine()?.statistics()?;
    let store = &stats.store;
    OutputFormatter::header("SESSIONS");
    OutputFormatter::plain(&format!("  Sessions:        {}", store.sessions));
    OutputFormatter::plain(&format!("  Files moved:     {}", store.moved_actions));
    OutputFormatter::plain(&format!("  Indexed files:   {}", store.indexed_files));
    OutputFormatter::header("SNAPSHOTS");
    OutputFormatter::plain(&format!("  Sealed:          {}", store.sealed_snapshots));
    OutputFormatter::plain(&format!("  Pruned:          {}", store.pruned_snapshots));
    OutputFormatter::plain(&format!("  Entries:         {}", store.snapshot_entries));
    OutputFormatter::plain(&format!("  Watched folders: {}", store.watched_folders));
    OutputFormatter::plain(&format!("  Logical size:    {}", format_bytes(stats.logical_bytes)));
    OutputFormatter::plain(&format!(
        "  Stored size:     {} in {} blob(s) at {}",
        format_bytes(stats.storage_bytes),
        store.distinct_blobs,
        stats.storage_dir.display()
    ));
    Ok(())
}

/// Token cancelled by Ctrl-C. The first interrupt stops work between files.
fn interrupt_token() -> CancellationToken {
    let cancel = CancellationToken::new();
    let handler_token = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || handler_token.cancel()) {
        warn!("Could not install Ctrl-C handler: {}", e);
    }
    cancel
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GatewayError;
    use clap::CommandFactory;

    #[test]
    fn test_gateway_failure_message_counts_files() {
        let failure = BatchFailure {
            files: 7,
            attempts: 3,
            error: GatewayError::Transport("connection refused".to_string()),
        };

        let message = gateway_failure_message(&failure);

        // Verify the batch size and attempt count both reach the warning
        assert!(message.contains("7 file(s)"), "message was {}", message);
        assert!(message.contains("3 attempt(s)"), "message was {}", message);
        assert!(message.contains("connection refused"));
    }

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_organize_flags() {
        let cli = Cli::parse_from([
            "tidydesk",
            "organize",
            "/tmp/desk",
            "--destination",
            "index-only",
            "--mode",
            "tag",
            "--dry-run",
            "-vv",
        ]);
        assert_eq!(cli.log_level(), "debug");
        match cli.command {
            Command::Organize(args) => {
                assert_eq!(args.dir, PathBuf::from("/tmp/desk"));
                assert_eq!(args.destination, Some(DestinationMode::IndexOnly));
                assert_eq!(args.mode, Some(OrganizationMode::Tag));
                assert!(args.dry_run);
                assert!(!args.ai);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_watch_add() {
        let cli = Cli::parse_from(["tidydesk", "watch", "add", "/data", "--interval", "120"]);
        match cli.command {
            Command::Watch {
                action: WatchCommand::Add { folder, interval, retain },
            } => {
                assert_eq!(folder, PathBuf::from("/data"));
                assert_eq!(interval, Some(120));
                assert_eq!(retain, None);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_search_flags() {
        let cli = Cli::parse_from([
            "tidydesk", "search", "invoice", "--tag", "tax", "--type", "document", "--days", "30",
            "--exact", "--limit", "5",
        ]);
        let Command::Search(args) = cli.command else {
            panic!("expected the search command");
        };
        let query = args.to_query().expect("Failed to build query");

        // Verify plain patterns become substring filters
        assert_eq!(query.name.as_deref(), Some("invoice"));
        assert_eq!(query.tag.as_deref(), Some("tax"));
        assert_eq!(query.category.as_deref(), Some("document"));
        assert!(query.exact);
        assert!(query.since.is_some());
        assert!(query.name_regex.is_none());
        assert_eq!(query.limit, 5);
    }

    #[test]
    fn test_search_regex_flag_compiles_patterns() {
        let cli = Cli::parse_from(["tidydesk", "search", "^INV", "--regex"]);
        let Command::Search(args) = cli.command else {
            panic!("expected the search command");
        };
        let query = args.to_query().expect("Failed to build query");
        let regex = query.name_regex.expect("Regex should be compiled");
        // Verify regex search ignores case unless asked not to
        assert!(regex.is_match("invoice.pdf"));
        assert!(query.name.is_none());

        let cli = Cli::parse_from(["tidydesk", "search", "([", "--regex"]);
        let Command::Search(args) = cli.command else {
            panic!("expected the search command");
        };
        let err = args.to_query().expect_err("Invalid regex should be rejected");
        assert_eq!(err.kind(), crate::error::ErrorKind::Config);
    }
}
