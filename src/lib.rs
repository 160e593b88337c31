//! tidydesk - organize cluttered folders and keep versioned snapshots
//!
//! This library moves files out of a cluttered folder into categorized
//! destinations, records every move in an undoable session, and captures,
//! diffs, restores and prunes point-in-time snapshots of watched folders.
//! Sessions, actions and snapshot metadata live in a SQLite database; snapshot
//! content lives in a deduplicating content store.

pub mod cancel;
pub mod classifier;
pub mod cli;
pub mod config;
pub mod error;
pub mod file_category;
pub mod hashing;
pub mod indexer;
pub mod logging;
pub mod organizer;
pub mod output;
pub mod progress;
pub mod session;
pub mod snapshot;
pub mod store;
pub mod undo;
pub mod watcher;

pub use cancel::CancellationToken;
pub use classifier::{Classifier, ClassifierGateway, ClassifyRequest, ClassifyResponse, HttpClassifier};
pub use config::{AppConfig, CompiledFilters, ConfigError, DestinationMode, FilterRules, OrganizationMode};
pub use error::{Error, ErrorKind, GatewayError, ItemError, Result};
pub use file_category::{Category, FileMapper};
pub use indexer::{FileRecord, Indexer, ScanReport};
pub use organizer::{OrganizeOptions, OrganizeReport, Organizer, PlannedMove};
pub use progress::{ProgressEvent, ProgressSink};
pub use session::{ActionOutcome, MoveAction, Session, SessionStatus};
pub use snapshot::{
    ContentStore, PruneReport, RestoreReport, Snapshot, SnapshotDiff, SnapshotEngine, SnapshotEntry,
    SnapshotReport, SnapshotScheduler, SnapshotState, WatchedFolder,
};
pub use store::{IndexedFile, SearchQuery, Store};
pub use undo::{UndoManager, UndoReport};
pub use watcher::{WatchDispatcher, WatchEvent, WatchEventKind};
