//! Output formatting and styling module.
//!
//! Provides a centralized interface for all CLI output, including colored output,
//! progress tracking, and formatted tables. Library code never prints; everything
//! a user sees goes through here.

use colored::*;
use crossbeam_channel::Receiver;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::BTreeMap;
use std::thread::{self, JoinHandle};

use crate::error::ItemError;
use crate::progress::ProgressEvent;
use crate::session::{ActionOutcome, MoveAction, Session};
use crate::snapshot::{Snapshot, SnapshotDiff};
use crate::store::{IndexedFile, SearchStatistics};

/// Manages all CLI output with consistent styling and formatting.
///
/// This struct provides methods for:
/// - Success messages (green with ✓)
/// - Error messages (red with ✗)
/// - Warning messages (yellow with ⚠)
/// - Info messages (cyan)
/// - Progress bars fed from the progress channel
/// - Summary tables for sessions, actions and snapshots
pub struct OutputFormatter;

impl OutputFormatter {
    /// Prints a success message in green with a checkmark.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use tidydesk::output::OutputFormatter;
    /// OutputFormatter::success("Session 3 completed");
    /// ```
    pub fn success(message: &str) {
        println!("{} {}", "✓".green(), message);
    }

    /// Prints an error message in red with an X mark.
    pub fn error(message: &str) {
        eprintln!("{} {}", "✗".red(), message);
    }

    /// Prints a warning message in yellow with a warning symbol.
    pub fn warning(message: &str) {
        println!("{} {}", "⚠".yellow(), message);
    }

    /// Prints an info message in cyan.
    pub fn info(message: &str) {
        println!("{}", message.cyan());
    }

    pub fn plain(message: &str) {
        println!("{}", message);
    }

    /// Prints a section header.
    pub fn header(header: &str) {
        println!("\n{}", header.bold());
    }

    /// Prints a dry-run notice message.
    pub fn dry_run_notice(message: &str) {
        println!("{}", format!("[DRY RUN] {}", message).yellow());
    }

    /// Lists per-file failures under a heading, one per line.
    pub fn item_errors(heading: &str, errors: &[ItemError]) {
        if errors.is_empty() {
            return;
        }
        Self::warning(&format!("{}: {}", heading, errors.len()));
        for error in errors {
            eprintln!("    - {}", error);
        }
    }

    /// Creates and returns a progress bar for file operations.
    ///
    /// # Arguments
    ///
    /// * `total` - Total number of items to process
    ///
    /// # Example
    ///
    /// ```no_run
    /// use tidydesk::output::OutputFormatter;
    /// let pb = OutputFormatter::create_progress_bar(100);
    /// pb.inc(1);
    /// pb.finish_with_message("Completed!");
    /// ```
    pub fn create_progress_bar(total: u64) -> ProgressBar {
        let pb = ProgressBar::new(total);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.cyan} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▓░");
        pb.set_style(style);
        pb
    }

    /// Prints a summary table with file counts by destination folder.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use tidydesk::output::OutputFormatter;
    /// use std::collections::BTreeMap;
    ///
    /// let mut counts = BTreeMap::new();
    /// counts.insert("Documents".to_string(), 15);
    /// counts.insert("Images".to_string(), 8);
    /// OutputFormatter::summary_table(&counts, 23);
    /// ```
    pub fn summary_table(folder_counts: &BTreeMap<String, usize>, total_files: usize) {
        Self::header("SUMMARY");

        let width = folder_counts
            .keys()
            .map(|name| name.len())
            .max()
            .unwrap_or(0)
            .max(8);

        println!("{:<width$} | {}", "Folder".bold(), "Files".bold(), width = width);
        println!("{}", "-".repeat(width + 10));
        for (folder, count) in folder_counts {
            println!(
                "{:<width$} | {} {}",
                folder,
                count.to_string().green(),
                plural(*count, "file"),
                width = width
            );
        }
        println!("{}", "-".repeat(width + 10));
        println!(
            "{:<width$} | {} {}",
            "Total".bold(),
            total_files.to_string().green().bold(),
            plural(total_files, "file"),
            width = width
        );
    }

    pub fn sessions_table(sessions: &[Session]) {
        if sessions.is_empty() {
            Self::plain("No sessions recorded.");
            return;
        }
        println!(
            "{:>5}  {:<10} {:<18} {:>6} {:>6} {:>6} {:>6}  {}",
            "ID".bold(),
            "Status".bold(),
            "Destination".bold(),
            "Total".bold(),
            "Moved".bold(),
            "Skip".bold(),
            "Err".bold(),
            "Name".bold()
        );
        for session in sessions {
            println!(
                "{:>5}  {:<10} {:<18} {:>6} {:>6} {:>6} {:>6}  {}",
                session.id,
                session.status.to_string(),
                session.destination_mode.as_str(),
                session.total,
                session.processed,
                session.skipped,
                session.errors,
                session.name
            );
        }
    }

    pub fn actions_table(actions: &[MoveAction]) {
        if actions.is_empty() {
            Self::plain("No actions recorded.");
            return;
        }
        for action in actions {
            let marker = match action.outcome {
                ActionOutcome::Moved if action.is_undone() => "↺".cyan(),
                ActionOutcome::Moved => "→".green(),
                ActionOutcome::Skipped => "-".yellow(),
                ActionOutcome::Error => "✗".red(),
            };
            let mut line = format!(
                "{:>5} {} {}",
                action.id,
                marker,
                action.original_path.display()
            );
            if action.outcome == ActionOutcome::Moved {
                line.push_str(&format!(" => {}", action.destination_path.display()));
            }
            if let Some(message) = &action.message {
                line.push_str(&format!(" ({})", message));
            }
            if !action.tags.is_empty() {
                line.push_str(&format!(" [{}]", action.tags.join(", ")));
            }
            println!("{}", line);
        }
    }

    pub fn snapshots_table(snapshots: &[Snapshot]) {
        if snapshots.is_empty() {
            Self::plain("No snapshots recorded.");
            return;
        }
        println!(
            "{:>5}  {:<9} {:<20} {:>7} {:>10}  {}",
            "ID".bold(),
            "State".bold(),
            "Created".bold(),
            "Files".bold(),
            "Size".bold(),
            "Folder".bold()
        );
        for snapshot in snapshots {
            println!(
                "{:>5}  {:<9} {:<20} {:>7} {:>10}  {}",
                snapshot.id,
                snapshot.state.to_string(),
                snapshot.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                snapshot.file_count,
                format_bytes(snapshot.total_size),
                snapshot.folder.display()
            );
        }
    }

    pub fn search_results(files: &[IndexedFile]) {
        if files.is_empty() {
            Self::plain("No matching files.");
            return;
        }
        println!(
            "{:<20} {:<12} {:>10}  {}",
            "Indexed".bold(),
            "Type".bold(),
            "Size".bold(),
            "Path".bold()
        );
        for file in files {
            let mut line = format!(
                "{:<20} {:<12} {:>10}  {}",
                file.discovered_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                file.category.as_deref().unwrap_or("-"),
                format_bytes(file.size),
                file.path.display()
            );
            if !file.tags.is_empty() {
                line.push_str(&format!(" [{}]", file.tags.join(", ")));
            }
            println!("{}", line);
        }
        Self::plain(&format!("{} {} found", files.len(), plural(files.len(), "file")));
    }

    pub fn search_summary(stats: &SearchStatistics, categories: &[String], tags: &[String]) {
        Self::header("INDEX");
        Self::plain(&format!("  Files:    {}", stats.total_files));
        Self::plain(&format!("  Tagged:   {}", stats.tagged_files));
        Self::plain(&format!("  Untagged: {}", stats.untagged_files));
        if let (Some(first), Some(last)) = (stats.first_indexed, stats.last_indexed) {
            Self::plain(&format!(
                "  Indexed:  {} to {}",
                first.format("%Y-%m-%d"),
                last.format("%Y-%m-%d")
            ));
        }
        for (category, count) in &stats.top_categories {
            Self::plain(&format!("    {:<14} {}", category, count));
        }
        Self::header("TYPES");
        Self::plain(&format!("  {}", categories.join(", ")));
        Self::header("TAGS");
        Self::plain(&format!("  {}", tags.join(", ")));
    }

    pub fn diff(diff: &SnapshotDiff) {
        if diff.is_empty() {
            Self::success("No changes");
            return;
        }
        for path in &diff.added {
            println!("{} {}", "+".green(), path);
        }
        for path in &diff.removed {
            println!("{} {}", "-".red(), path);
        }
        for path in diff.modified.keys() {
            println!("{} {}", "~".yellow(), path);
        }
        Self::plain(&format!(
            "{} added, {} removed, {} modified",
            diff.added.len(),
            diff.removed.len(),
            diff.modified.len()
        ));
    }
}

/// Drives a progress bar from the progress channel on its own thread.
///
/// The thread ends when every sender is dropped.
pub struct ProgressRenderer {
    handle: Option<JoinHandle<()>>,
}

impl ProgressRenderer {
    pub fn start(events: Receiver<ProgressEvent>) -> Self {
        let handle = thread::spawn(move || {
            let pb = OutputFormatter::create_progress_bar(0);
            for event in events {
                match event {
                    ProgressEvent::ScanStarted { root } => {
                        pb.set_message(format!("scanning {}", root.display()))
                    }
                    ProgressEvent::SessionOpened { total, .. } => {
                        pb.set_length(total as u64);
                        pb.set_position(0);
                    }
                    ProgressEvent::SnapshotStarted { total, .. } => {
                        pb.set_length(total as u64);
                        pb.set_position(0);
                        pb.set_message("capturing");
                    }
                    ProgressEvent::RestoreStarted { total, .. } => {
                        pb.set_length(total as u64);
                        pb.set_position(0);
                    }
                    ProgressEvent::FileMoved { from, .. } => {
                        pb.set_message(file_label(&from));
                        pb.inc(1);
                    }
                    ProgressEvent::FileIndexed { path, .. }
                    | ProgressEvent::FileSkipped { path, .. }
                    | ProgressEvent::FileRestored { path, .. }
                    | ProgressEvent::SnapshotFileRestored { path, .. } => {
                        pb.set_message(file_label(&path));
                        pb.inc(1);
                    }
                    ProgressEvent::FileFailed { .. } | ProgressEvent::SnapshotFileCaptured { .. } => {
                        pb.inc(1)
                    }
                    ProgressEvent::GatewayFallback { files, .. } => {
                        pb.println(format!(
                            "{} classifier unavailable for {} file(s), using rules",
                            "⚠".yellow(),
                            files
                        ));
                    }
                    ProgressEvent::ScanFinished { .. }
                    | ProgressEvent::SessionFinished { .. }
                    | ProgressEvent::SnapshotSealed { .. } => {}
                }
            }
            pb.finish_and_clear();
        });
        Self {
            handle: Some(handle),
        }
    }

    /// Waits for the bar to be cleared. Drop every sink first.
    pub fn finish(mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn file_label(path: &std::path::Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn plural(count: usize, word: &str) -> String {
    if count == 1 {
        word.to_string()
    } else {
        format!("{}s", word)
    }
}

/// Human-readable size with binary units.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
