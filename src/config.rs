//! Configuration loading, validation and file filtering.
//!
//! All recognized options live in [`AppConfig`], loaded from a TOML file and
//! validated before anything else runs. Filtering rules are compiled once into
//! [`CompiledFilters`] and shared by the indexer.
//!
//! # Configuration File Format
//!
//! ```toml
//! database = "/home/me/.local/share/tidydesk/tidydesk.db"
//!
//! [filters]
//! enable_hidden_files = false
//! max_file_size = 2147483648
//!
//! [filters.exclude]
//! filenames = [".DS_Store", "Thumbs.db"]
//! patterns = ["*.tmp", "node_modules/**"]
//! extensions = ["bak"]
//! regex = []
//!
//! [organize]
//! mode = "rule"                     # rule | tag
//! destination = "desktop-subfolder" # desktop-subfolder | organized-folder | index-only
//! skip_extensions = ["lnk"]
//!
//! [organize.extensions]
//! heic = "image"
//!
//! [classifier]
//! enabled = true
//! endpoint = "http://localhost:8088/tags"
//! batch_size = 50
//! timeout_secs = 30
//!
//! [workers]
//! max = 8
//!
//! [snapshots]
//! default_interval_secs = 3600
//! default_retain = 100
//!
//! [[snapshots.watched]]
//! folder = "/home/me/Documents"
//! retain = 20
//! ```

use clap::ValueEnum;
use glob::Pattern;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::file_category::Category;

/// Largest number of files sent to the classifier in one request.
pub const MAX_CLASSIFIER_BATCH: usize = 50;

/// Shortest allowed interval between scheduled snapshots.
pub const MIN_SNAPSHOT_INTERVAL_SECS: u64 = 60;

/// Errors that can occur during configuration loading and validation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Configuration file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Invalid glob pattern '{0}': expected *.ext or dir/**")]
    InvalidGlob(String),

    #[error("Invalid regex pattern '{pattern}': {reason}")]
    InvalidRegex { pattern: String, reason: String },

    #[error("IO error reading configuration: {0}")]
    Io(String),

    #[error("Invalid value for '{field}': {reason}")]
    OutOfRange { field: &'static str, reason: String },
}

/// How destinations are chosen for organized files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OrganizationMode {
    /// Category derived from the file extension (and content sniffing).
    #[default]
    Rule,
    /// Folder named after the first classifier tag, falling back to the rule category.
    Tag,
}

/// Where organized files end up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum DestinationMode {
    /// A subfolder inside the folder being organized.
    #[default]
    DesktopSubfolder,
    /// A dedicated organized folder, usually `~/Organized`.
    OrganizedFolder,
    /// Nothing moves; files are recorded and tagged in place.
    IndexOnly,
}

impl DestinationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DestinationMode::DesktopSubfolder => "desktop-subfolder",
            DestinationMode::OrganizedFolder => "organized-folder",
            DestinationMode::IndexOnly => "index-only",
        }
    }
}

impl std::str::FromStr for DestinationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "desktop-subfolder" => Ok(DestinationMode::DesktopSubfolder),
            "organized-folder" => Ok(DestinationMode::OrganizedFolder),
            "index-only" => Ok(DestinationMode::IndexOnly),
            other => Err(format!("unknown destination mode '{}'", other)),
        }
    }
}

/// Every recognized option, with defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// SQLite database holding sessions, actions and snapshot metadata.
    #[serde(default = "default_database")]
    pub database: PathBuf,

    #[serde(default)]
    pub filters: FilterRules,

    #[serde(default)]
    pub organize: OrganizeSettings,

    #[serde(default)]
    pub classifier: ClassifierSettings,

    #[serde(default)]
    pub workers: WorkerSettings,

    #[serde(default)]
    pub snapshots: SnapshotSettings,
}

/// Root-level filter rules configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterRules {
    /// Whether to include hidden files (starting with "."). Defaults to false.
    #[serde(default)]
    pub enable_hidden_files: bool,

    /// Files larger than this many bytes are skipped.
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    /// Rules for excluding files.
    #[serde(default)]
    pub exclude: ExcludeRules,

    /// Rules for including files (whitelist, overrides exclude rules).
    #[serde(default)]
    pub include: IncludeRules,
}

/// Rules for excluding files from indexing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExcludeRules {
    /// Exact filenames to exclude (e.g., ".DS_Store", "Thumbs.db").
    #[serde(default)]
    pub filenames: Vec<String>,

    /// Glob patterns to exclude (e.g., "*.tmp", "node_modules/**").
    #[serde(default)]
    pub patterns: Vec<String>,

    /// File extensions to exclude (e.g., "bak", "log").
    #[serde(default)]
    pub extensions: Vec<String>,

    /// Regex patterns matched against the file name.
    #[serde(default)]
    pub regex: Vec<String>,
}

/// Rules for including files, overriding exclude rules.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IncludeRules {
    #[serde(default)]
    pub patterns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrganizeSettings {
    #[serde(default)]
    pub mode: OrganizationMode,

    #[serde(default)]
    pub destination: DestinationMode,

    /// Name of the subfolder used by [`DestinationMode::DesktopSubfolder`].
    #[serde(default = "default_desktop_subfolder")]
    pub desktop_subfolder: String,

    /// Root used by [`DestinationMode::OrganizedFolder`].
    #[serde(default = "default_organized_dir")]
    pub organized_dir: PathBuf,

    /// Extensions that are recorded as skipped instead of moved (shortcuts).
    #[serde(default = "default_skip_extensions")]
    pub skip_extensions: Vec<String>,

    /// Walk into subfolders of the folder being organized.
    #[serde(default)]
    pub recursive: bool,

    /// Extra extension to category mappings.
    #[serde(default)]
    pub extensions: HashMap<String, Category>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierSettings {
    #[serde(default)]
    pub enabled: bool,

    /// HTTP endpoint of the tagging service. Tagging is a no-op without one.
    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Additional attempts after a failed batch.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

impl ClassifierSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkerSettings {
    /// Upper bound on the worker pool. The pool never exceeds the core count.
    #[serde(default)]
    pub max: Option<usize>,
}

impl WorkerSettings {
    /// min(available cores, configured max).
    pub fn pool_size(&self) -> usize {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        match self.max {
            Some(max) => cores.min(max).max(1),
            None => cores,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotSettings {
    /// Where copies of snapshotted file content are kept.
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    #[serde(default = "default_interval_secs")]
    pub default_interval_secs: u64,

    #[serde(default = "default_retain")]
    pub default_retain: u32,

    #[serde(default)]
    pub watched: Vec<WatchedFolderConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchedFolderConfig {
    pub folder: PathBuf,
    #[serde(default)]
    pub interval_secs: Option<u64>,
    #[serde(default)]
    pub retain: Option<u32>,
}

fn home_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

fn data_dir() -> PathBuf {
    home_dir().join(".local").join("share").join("tidydesk")
}

fn default_database() -> PathBuf {
    data_dir().join("tidydesk.db")
}

fn default_storage_dir() -> PathBuf {
    data_dir().join("snapshots")
}

fn default_max_file_size() -> u64 {
    2 * 1024 * 1024 * 1024
}

fn default_desktop_subfolder() -> String {
    "TidyDesk".to_string()
}

fn default_organized_dir() -> PathBuf {
    home_dir().join("Organized")
}

fn default_skip_extensions() -> Vec<String> {
    vec!["lnk".to_string()]
}

fn default_batch_size() -> usize {
    MAX_CLASSIFIER_BATCH
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    1
}

fn default_retry_backoff_ms() -> u64 {
    250
}

fn default_interval_secs() -> u64 {
    3600
}

fn default_retain() -> u32 {
    100
}

impl Default for FilterRules {
    fn default() -> Self {
        Self {
            enable_hidden_files: false,
            max_file_size: default_max_file_size(),
            exclude: ExcludeRules::default(),
            include: IncludeRules::default(),
        }
    }
}

impl Default for OrganizeSettings {
    fn default() -> Self {
        Self {
            mode: OrganizationMode::default(),
            destination: DestinationMode::default(),
            desktop_subfolder: default_desktop_subfolder(),
            organized_dir: default_organized_dir(),
            skip_extensions: default_skip_extensions(),
            recursive: false,
            extensions: HashMap::new(),
        }
    }
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: None,
            batch_size: default_batch_size(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl Default for SnapshotSettings {
    fn default() -> Self {
        Self {
            storage_dir: default_storage_dir(),
            default_interval_secs: default_interval_secs(),
            default_retain: default_retain(),
            watched: Vec::new(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: default_database(),
            filters: FilterRules::default(),
            organize: OrganizeSettings::default(),
            classifier: ClassifierSettings::default(),
            workers: WorkerSettings::default(),
            snapshots: SnapshotSettings::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a file, with fallback to defaults.
    ///
    /// Attempts to load configuration in the following order:
    /// 1. If `config_path` is provided, load from that file
    /// 2. Look for `.tidydeskrc.toml` in the current directory
    /// 3. Look for `~/.config/tidydesk/config.toml` in home directory
    /// 4. Fall back to default configuration
    ///
    /// The result is validated before it is returned.
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = if let Some(path) = config_path {
            Self::load_from_file(path)?
        } else {
            let local_config = PathBuf::from(".tidydeskrc.toml");
            let home_config = home_dir()
                .join(".config")
                .join("tidydesk")
                .join("config.toml");
            if local_config.exists() {
                Self::load_from_file(&local_config)?
            } else if home_config.exists() {
                Self::load_from_file(&home_config)?
            } else {
                Self::default()
            }
        };

        config.validate()?;
        Ok(config)
    }

    fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let content = fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        Self::from_toml(&content)
    }

    /// Parses and validates a TOML document.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(content).map_err(|e| ConfigError::Invalid(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks ranges and compiles the filters once to surface bad patterns early.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let classifier = &self.classifier;
        if classifier.batch_size == 0 || classifier.batch_size > MAX_CLASSIFIER_BATCH {
            return Err(ConfigError::OutOfRange {
                field: "classifier.batch_size",
                reason: format!(
                    "must be between 1 and {}, got {}",
                    MAX_CLASSIFIER_BATCH, classifier.batch_size
                ),
            });
        }
        if classifier.timeout_secs == 0 {
            return Err(ConfigError::OutOfRange {
                field: "classifier.timeout_secs",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.workers.max == Some(0) {
            return Err(ConfigError::OutOfRange {
                field: "workers.max",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.filters.max_file_size == 0 {
            return Err(ConfigError::OutOfRange {
                field: "filters.max_file_size",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.organize.desktop_subfolder.trim().is_empty() {
            return Err(ConfigError::OutOfRange {
                field: "organize.desktop_subfolder",
                reason: "must not be empty".to_string(),
            });
        }
        if self.snapshots.default_interval_secs < MIN_SNAPSHOT_INTERVAL_SECS {
            return Err(ConfigError::OutOfRange {
                field: "snapshots.default_interval_secs",
                reason: format!("must be at least {} seconds", MIN_SNAPSHOT_INTERVAL_SECS),
            });
        }
        for watched in &self.snapshots.watched {
            if let Some(interval) = watched.interval_secs
                && interval < MIN_SNAPSHOT_INTERVAL_SECS
            {
                return Err(ConfigError::OutOfRange {
                    field: "snapshots.watched.interval_secs",
                    reason: format!(
                        "{}: must be at least {} seconds",
                        watched.folder.display(),
                        MIN_SNAPSHOT_INTERVAL_SECS
                    ),
                });
            }
        }
        self.filters.clone().compile().map(|_| ())
    }

    /// Extensions recorded as skipped by the organizer, lowercased.
    pub fn skip_extensions(&self) -> HashSet<String> {
        self.organize
            .skip_extensions
            .iter()
            .map(|ext| ext.trim_start_matches('.').to_lowercase())
            .collect()
    }
}

impl FilterRules {
    /// Compile rules into optimized filter structures for matching.
    pub fn compile(self) -> Result<CompiledFilters, ConfigError> {
        CompiledFilters::new(self)
    }
}

/// Compiled filter structures for efficient file matching.
#[derive(Debug, Clone)]
pub struct CompiledFilters {
    enable_hidden_files: bool,
    max_file_size: u64,
    exclude_filenames: HashSet<String>,
    exclude_extensions: HashSet<String>,
    exclude_patterns: Vec<Pattern>,
    exclude_regexes: Vec<Regex>,
    include_patterns: Vec<Pattern>,
}

impl Default for CompiledFilters {
    fn default() -> Self {
        Self {
            enable_hidden_files: false,
            max_file_size: default_max_file_size(),
            exclude_filenames: HashSet::new(),
            exclude_extensions: HashSet::new(),
            exclude_patterns: Vec::new(),
            exclude_regexes: Vec::new(),
            include_patterns: Vec::new(),
        }
    }
}

fn compile_globs(patterns: &[String]) -> Result<Vec<Pattern>, ConfigError> {
    patterns
        .iter()
        .map(|pattern| Pattern::new(pattern).map_err(|_| ConfigError::InvalidGlob(pattern.clone())))
        .collect()
}

impl CompiledFilters {
    fn new(rules: FilterRules) -> Result<Self, ConfigError> {
        let exclude_patterns = compile_globs(&rules.exclude.patterns)?;
        let include_patterns = compile_globs(&rules.include.patterns)?;

        let exclude_regexes = rules
            .exclude
            .regex
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|e| ConfigError::InvalidRegex {
                    pattern: pattern.clone(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            enable_hidden_files: rules.enable_hidden_files,
            max_file_size: rules.max_file_size,
            exclude_filenames: rules.exclude.filenames.into_iter().collect(),
            exclude_extensions: rules
                .exclude
                .extensions
                .iter()
                .map(|ext| ext.to_lowercase())
                .collect(),
            exclude_patterns,
            exclude_regexes,
            include_patterns,
        })
    }

    pub fn hidden_files_enabled(&self) -> bool {
        self.enable_hidden_files
    }

    pub fn max_file_size(&self) -> u64 {
        self.max_file_size
    }

    /// Check if a file should be indexed (not excluded).
    ///
    /// Checks are performed in this order, with early termination:
    /// 1. Include patterns (whitelist) - if matched, always include
    /// 2. Hidden file filter - if hidden and disabled, exclude
    /// 3. Exact filename match - if matched, exclude
    /// 4. File extension match - if matched, exclude
    /// 5. Glob pattern match - if matched, exclude
    /// 6. Regex pattern match - if matched, exclude
    /// 7. Default: include
    pub fn should_include(&self, file_path: &Path) -> bool {
        let file_name = file_path
            .file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_default();

        if self.matches_any(&self.include_patterns, file_path) {
            return true;
        }

        if !self.enable_hidden_files && file_name.starts_with('.') {
            return false;
        }

        if self.exclude_filenames.contains(file_name.as_ref()) {
            return false;
        }

        if let Some(ext) = file_path.extension() {
            let ext_lower = ext.to_string_lossy().to_lowercase();
            if self.exclude_extensions.contains(&ext_lower) {
                return false;
            }
        }

        if self.matches_any(&self.exclude_patterns, file_path) {
            return false;
        }

        !self
            .exclude_regexes
            .iter()
            .any(|regex| regex.is_match(&file_name))
    }

    fn matches_any(&self, patterns: &[Pattern], file_path: &Path) -> bool {
        patterns.iter().any(|pattern| pattern.matches_path(file_path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules_with_exclude(exclude: ExcludeRules) -> FilterRules {
        FilterRules {
            enable_hidden_files: true,
            exclude,
            ..Default::default()
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.classifier.batch_size, 50);
        assert_eq!(config.organize.destination, DestinationMode::DesktopSubfolder);
        assert!(!config.classifier.enabled);
    }

    #[test]
    fn test_parse_full_document() {
        let config = AppConfig::from_toml(
            r#"
            database = "/tmp/t.db"

            [organize]
            mode = "tag"
            destination = "index-only"

            [organize.extensions]
            heic = "image"

            [classifier]
            enabled = true
            batch_size = 10
            timeout_secs = 5

            [workers]
            max = 2

            [[snapshots.watched]]
            folder = "/data/docs"
            retain = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.database, PathBuf::from("/tmp/t.db"));
        assert_eq!(config.organize.mode, OrganizationMode::Tag);
        assert_eq!(config.organize.destination, DestinationMode::IndexOnly);
        assert_eq!(config.organize.extensions.get("heic"), Some(&Category::Image));
        assert_eq!(config.classifier.timeout(), Duration::from_secs(5));
        assert_eq!(config.snapshots.watched[0].retain, Some(3));
        assert!(config.workers.pool_size() <= 2);
    }

    #[test]
    fn test_batch_size_out_of_range() {
        let err = AppConfig::from_toml("[classifier]\nbatch_size = 51\n").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::OutOfRange {
                field: "classifier.batch_size",
                ..
            }
        ));
    }

    #[test]
    fn test_zero_workers_rejected() {
        let err = AppConfig::from_toml("[workers]\nmax = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::OutOfRange { field: "workers.max", .. }));
    }

    #[test]
    fn test_short_snapshot_interval_rejected() {
        let err =
            AppConfig::from_toml("[snapshots]\ndefault_interval_secs = 10\n").unwrap_err();
        assert!(matches!(err, ConfigError::OutOfRange { .. }));
    }

    #[test]
    fn test_unknown_destination_is_invalid() {
        let err = AppConfig::from_toml("[organize]\ndestination = \"trash\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_missing_explicit_file() {
        let err = AppConfig::load(Some(Path::new("/definitely/not/here.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn test_hidden_file_excluded_by_default() {
        let compiled = FilterRules::default().compile().unwrap();
        assert!(!compiled.should_include(Path::new(".DS_Store")));
        assert!(compiled.should_include(Path::new("notes.txt")));
    }

    #[test]
    fn test_exclude_extensions_case_insensitive() {
        let compiled = rules_with_exclude(ExcludeRules {
            extensions: vec!["bak".to_string()],
            ..Default::default()
        })
        .compile()
        .unwrap();

        assert!(!compiled.should_include(Path::new("file.bak")));
        assert!(!compiled.should_include(Path::new("file.BAK")));
        assert!(compiled.should_include(Path::new("file.txt")));
    }

    #[test]
    fn test_glob_pattern_directory_boundary_semantics() {
        let compiled = rules_with_exclude(ExcludeRules {
            patterns: vec!["**/logs/**".to_string()],
            ..Default::default()
        })
        .compile()
        .unwrap();

        assert!(!compiled.should_include(Path::new("app/logs/file.txt")));
        assert!(compiled.should_include(Path::new("app/my_logs/file.txt")));
    }

    #[test]
    fn test_include_overrides_hidden_rule() {
        let compiled = FilterRules {
            include: IncludeRules {
                patterns: vec![".important".to_string()],
            },
            ..Default::default()
        }
        .compile()
        .unwrap();

        assert!(compiled.should_include(Path::new(".important")));
        assert!(!compiled.should_include(Path::new(".other")));
    }

    #[test]
    fn test_exclude_regex_on_file_name() {
        let compiled = rules_with_exclude(ExcludeRules {
            regex: vec![r"^~\$.*".to_string()],
            ..Default::default()
        })
        .compile()
        .unwrap();

        assert!(!compiled.should_include(Path::new("docs/~$report.docx")));
        assert!(compiled.should_include(Path::new("docs/report.docx")));
    }

    #[test]
    fn test_invalid_patterns_return_error() {
        let bad_glob = rules_with_exclude(ExcludeRules {
            patterns: vec!["[invalid".to_string()],
            ..Default::default()
        });
        assert!(matches!(bad_glob.compile(), Err(ConfigError::InvalidGlob(_))));

        let bad_regex = rules_with_exclude(ExcludeRules {
            regex: vec!["[invalid(".to_string()],
            ..Default::default()
        });
        assert!(matches!(
            bad_regex.compile(),
            Err(ConfigError::InvalidRegex { .. })
        ));
    }

    #[test]
    fn test_skip_extensions_normalized() {
        let mut config = AppConfig::default();
        config.organize.skip_extensions = vec![".LNK".to_string(), "url".to_string()];
        let skip = config.skip_extensions();
        assert!(skip.contains("lnk"));
        assert!(skip.contains("url"));
    }
}
