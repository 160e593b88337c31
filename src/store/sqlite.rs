use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{Connection, Row};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

use crate::error::{Error, Result};

/// Durable store for sessions, actions, the file index and snapshot metadata.
///
/// Every write runs in its own transaction and the database is opened with
/// `synchronous = FULL`, so a write that returned `Ok` survives a crash.
pub struct Store {
    conn: Mutex<Connection>,
    session_locks: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let store = Store {
            conn: Mutex::new(conn),
            session_locks: Mutex::new(HashMap::new()),
        };
        store.configure_pragmas()?;
        store.migrate_schema()?;
        Ok(store)
    }

    fn configure_pragmas(&self) -> Result<()> {
        self.connection().execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = FULL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )?;
        debug!("SQLite pragmas configured (WAL mode, synchronous FULL)");
        Ok(())
    }

    fn migrate_schema(&self) -> Result<()> {
        self.connection()
            .execute_batch(include_str!("schema.sql"))?;
        debug!("SQLite schema initialized (version 1)");
        Ok(())
    }

    /// Exclusive access to the underlying connection.
    pub(crate) fn connection(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Lock serializing every writer of one session.
    ///
    /// Hold the guard from [`SessionLock::lock`] for the whole organize or
    /// undo run so two writers never interleave actions of the same session.
    /// The entry is dropped from the registry once its last handle goes away.
    pub fn session_lock(&self, session_id: i64) -> SessionLock<'_> {
        let mut locks = self.lock_registry();
        let lock = locks
            .entry(session_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        SessionLock {
            store: self,
            session_id,
            lock,
        }
    }

    fn lock_registry(&self) -> MutexGuard<'_, HashMap<i64, Arc<Mutex<()>>>> {
        self.session_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    #[cfg(test)]
    pub(crate) fn tracked_session_locks(&self) -> usize {
        self.lock_registry().len()
    }
}

/// Handle on one session's writer lock, see [`Store::session_lock`].
pub struct SessionLock<'a> {
    store: &'a Store,
    session_id: i64,
    lock: Arc<Mutex<()>>,
}

impl SessionLock<'_> {
    pub fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for SessionLock<'_> {
    fn drop(&mut self) {
        let mut locks = self.store.lock_registry();
        // One count is ours, one is the registry's.
        if Arc::strong_count(&self.lock) <= 2 {
            locks.remove(&self.session_id);
        }
    }
}

pub(crate) fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

pub(crate) fn parse_timestamp(column: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                column,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })
}

pub(crate) fn parse_optional_timestamp(
    column: usize,
    value: Option<String>,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    value.map(|v| parse_timestamp(column, &v)).transpose()
}

/// Parses an enum stored as text, mapping failures to a conversion error.
pub(crate) fn parse_text<T>(column: usize, value: &str) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    value.parse::<T>().map_err(|reason| {
        rusqlite::Error::FromSqlConversionFailure(
            column,
            rusqlite::types::Type::Text,
            reason.into(),
        )
    })
}

/// SQL value for a path: text when it is valid UTF-8, raw bytes otherwise.
pub(crate) fn path_value(path: &Path) -> Value {
    match path.to_str() {
        Some(text) => Value::Text(text.to_string()),
        None => Value::Blob(path_bytes(path)),
    }
}

/// Reads a path written with [`path_value`].
pub(crate) fn path_from_row(row: &Row<'_>, column: usize) -> rusqlite::Result<PathBuf> {
    match row.get::<_, Value>(column)? {
        Value::Text(text) => Ok(PathBuf::from(text)),
        Value::Blob(bytes) => Ok(path_from_bytes(bytes)),
        other => Err(rusqlite::Error::InvalidColumnType(
            column,
            "path".to_string(),
            other.data_type(),
        )),
    }
}

#[cfg(unix)]
fn path_bytes(path: &Path) -> Vec<u8> {
    use std::os::unix::ffi::OsStrExt;
    path.as_os_str().as_bytes().to_vec()
}

#[cfg(not(unix))]
fn path_bytes(path: &Path) -> Vec<u8> {
    path.to_string_lossy().into_owned().into_bytes()
}

#[cfg(unix)]
fn path_from_bytes(bytes: Vec<u8>) -> PathBuf {
    use std::os::unix::ffi::OsStringExt;
    PathBuf::from(std::ffi::OsString::from_vec(bytes))
}

#[cfg(not(unix))]
fn path_from_bytes(bytes: Vec<u8>) -> PathBuf {
    PathBuf::from(String::from_utf8_lossy(&bytes).into_owned())
}
