//! SQLite persistence.
//!
//! Queries are grouped by concern: [`sessions`] (the undo ledger), [`files`]
//! (index and tags), [`search`] (queries over the index) and [`snapshots`]
//! (snapshot metadata and watched folders).
//!
//! Paths are stored as text when they are valid UTF-8 and as raw bytes
//! otherwise, so a file is always found again under its exact name.

mod files;
mod search;
mod sessions;
mod snapshots;
mod sqlite;

pub use search::{DEFAULT_SEARCH_LIMIT, IndexedFile, SearchQuery, SearchStatistics};
pub use snapshots::StoreStatistics;
pub use sqlite::{SessionLock, Store};
