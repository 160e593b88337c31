/// Rule-based categorization of files by extension, with content sniffing as fallback.
///
/// This is what the organizer uses when tagging is disabled and when the
/// classifier gateway fails for a batch.
///
/// # Examples
///
/// ```
/// use tidydesk::file_category::{Category, FileMapper};
///
/// let mapper = FileMapper::default();
/// assert_eq!(mapper.extension_to_category("pdf"), Some(Category::Document));
/// assert_eq!(mapper.mime_to_category("audio/mpeg"), Some(Category::Audio));
/// ```
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Bytes read from the head of a file for MIME sniffing.
const SNIFF_LEN: usize = 8192;

/// Represents a broad file category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Image,
    Audio,
    Video,
    Document,
    Archive,
    Code,
    Spreadsheet,
    Presentation,
    Font,
    Installer,
    /// Unknown or uncategorized files
    Other,
}

const ALL_CATEGORIES: [Category; 11] = [
    Category::Image,
    Category::Audio,
    Category::Video,
    Category::Document,
    Category::Archive,
    Category::Code,
    Category::Spreadsheet,
    Category::Presentation,
    Category::Font,
    Category::Installer,
    Category::Other,
];

impl Category {
    /// Returns the destination folder, relative to the organize root.
    ///
    /// ```
    /// use tidydesk::file_category::Category;
    ///
    /// assert_eq!(Category::Document.dir_name(), std::path::PathBuf::from("Documents"));
    /// assert_eq!(Category::Other.dir_name(), std::path::PathBuf::from("Misc/Other"));
    /// ```
    pub fn dir_name(&self) -> PathBuf {
        match self {
            Category::Image => PathBuf::from("Images"),
            Category::Audio => PathBuf::from("Audio"),
            Category::Video => PathBuf::from("Videos"),
            Category::Document => PathBuf::from("Documents"),
            Category::Archive => PathBuf::from("Archives"),
            Category::Code => PathBuf::from("Code"),
            Category::Spreadsheet => PathBuf::from("Spreadsheets"),
            Category::Presentation => PathBuf::from("Presentations"),
            Category::Font => PathBuf::from("Fonts"),
            Category::Installer => PathBuf::from("Installers"),
            Category::Other => Path::new("Misc").join("Other"),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Category::Image => "image",
            Category::Audio => "audio",
            Category::Video => "video",
            Category::Document => "document",
            Category::Archive => "archive",
            Category::Code => "code",
            Category::Spreadsheet => "spreadsheet",
            Category::Presentation => "presentation",
            Category::Font => "font",
            Category::Installer => "installer",
            Category::Other => "other",
        }
    }

    pub fn all() -> &'static [Category] {
        &ALL_CATEGORIES
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        ALL_CATEGORIES
            .iter()
            .copied()
            .find(|c| c.name() == wanted)
            .ok_or_else(|| format!("unknown category '{}'", s))
    }
}

const EXTENSIONS: &[(Category, &[&str])] = &[
    (
        Category::Image,
        &["png", "jpg", "jpeg", "gif", "webp", "svg", "bmp", "tiff", "ico", "heic"],
    ),
    (
        Category::Audio,
        &["mp3", "wav", "ogg", "flac", "aac", "m4a", "wma"],
    ),
    (
        Category::Video,
        &["mp4", "mkv", "avi", "mov", "flv", "wmv", "webm", "3gp"],
    ),
    (
        Category::Document,
        &["pdf", "txt", "doc", "docx", "md", "rtf", "odt", "epub"],
    ),
    (
        Category::Archive,
        &["zip", "rar", "7z", "tar", "gz", "bz2", "xz"],
    ),
    (
        Category::Code,
        &[
            "py", "java", "c", "cpp", "h", "hpp", "js", "ts", "rs", "go", "sh", "json", "xml",
            "yaml", "yml", "toml", "html", "css",
        ],
    ),
    (Category::Spreadsheet, &["csv", "xls", "xlsx", "ods"]),
    (Category::Presentation, &["ppt", "pptx", "odp", "key"]),
    (Category::Font, &["ttf", "otf", "woff", "woff2"]),
    (
        Category::Installer,
        &["exe", "msi", "dmg", "pkg", "deb", "rpm", "appimage"],
    ),
];

/// Maps extensions and sniffed MIME types to categories.
#[derive(Debug, Clone)]
pub struct FileMapper {
    extension_map: HashMap<String, Category>,
}

impl FileMapper {
    /// Creates a mapper with the built-in extension table.
    pub fn new() -> Self {
        let mut mapper = Self {
            extension_map: HashMap::new(),
        };
        for (category, extensions) in EXTENSIONS {
            for ext in extensions.iter() {
                mapper.add_extension_mapping(ext, *category);
            }
        }
        mapper
    }

    /// Built-in table plus user overrides from configuration.
    pub fn with_overrides(overrides: &HashMap<String, Category>) -> Self {
        let mut mapper = Self::new();
        for (ext, category) in overrides {
            mapper.add_extension_mapping(ext, *category);
        }
        mapper
    }

    pub fn add_extension_mapping(&mut self, ext: &str, category: Category) {
        self.extension_map
            .insert(ext.trim_start_matches('.').to_lowercase(), category);
    }

    /// Maps a file extension to a category (case-insensitive).
    pub fn extension_to_category(&self, ext: &str) -> Option<Category> {
        self.extension_map.get(&ext.to_lowercase()).copied()
    }

    /// Maps a MIME type to a category by its top-level type and a few well-known subtypes.
    pub fn mime_to_category(&self, mime_type: &str) -> Option<Category> {
        let mime = mime_type.to_lowercase();
        let (top, sub) = mime.split_once('/')?;
        match top {
            "image" => Some(Category::Image),
            "audio" => Some(Category::Audio),
            "video" => Some(Category::Video),
            "font" => Some(Category::Font),
            "text" => Some(Category::Document),
            "application" => match sub {
                "pdf" | "msword" | "rtf" | "epub+zip" => Some(Category::Document),
                "zip" | "gzip" | "x-tar" | "x-7z-compressed" | "vnd.rar" | "x-bzip2" | "x-xz" => {
                    Some(Category::Archive)
                }
                "vnd.ms-excel" | "vnd.openxmlformats-officedocument.spreadsheetml.sheet" => {
                    Some(Category::Spreadsheet)
                }
                "vnd.ms-powerpoint"
                | "vnd.openxmlformats-officedocument.presentationml.presentation" => {
                    Some(Category::Presentation)
                }
                "x-msdownload" | "vnd.microsoft.portable-executable" | "x-apple-diskimage"
                | "vnd.debian.binary-package" | "x-rpm" => Some(Category::Installer),
                _ => None,
            },
            _ => None,
        }
    }

    /// Determines the category for a file on disk.
    ///
    /// The extension decides when it is known; otherwise the file head is
    /// sniffed with `infer`; anything left over is [`Category::Other`].
    pub fn categorize_path(&self, path: &Path) -> Category {
        if let Some(ext) = path.extension()
            && let Some(category) = self.extension_to_category(&ext.to_string_lossy())
        {
            return category;
        }

        sniff_mime(path)
            .and_then(|mime| self.mime_to_category(&mime))
            .unwrap_or(Category::Other)
    }
}

impl Default for FileMapper {
    fn default() -> Self {
        Self::new()
    }
}

fn sniff_mime(path: &Path) -> Option<String> {
    let mut file = File::open(path).ok()?;
    let mut head = vec![0u8; SNIFF_LEN];
    let read = file.read(&mut head).ok()?;
    head.truncate(read);
    infer::get(&head).map(|kind| kind.mime_type().to_string())
}
