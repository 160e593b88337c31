use rusqlite::{OptionalExtension, Transaction, params};
use std::path::{Path, PathBuf};

use super::sqlite::{Store, path_from_row, path_value};
use crate::error::Result;
use crate::file_category::Category;
use crate::indexer::FileRecord;

impl Store {
    // ── File index ───────────────────────────────────────────────

    /// Inserts or refreshes a file and replaces its tags.
    pub fn upsert_file(
        &self,
        record: &FileRecord,
        category: Option<Category>,
        tags: &[String],
    ) -> Result<()> {
        let path = path_value(&record.path);
        let mut conn = self.connection();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO files (path, size, mtime_ns, hash, category, discovered_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
             ON CONFLICT(path) DO UPDATE SET size = excluded.size, \
             mtime_ns = excluded.mtime_ns, hash = COALESCE(excluded.hash, files.hash), \
             category = excluded.category",
            params![
                path,
                record.size as i64,
                record.mtime_ns(),
                record.hash,
                category.map(|c| c.name()),
                record.discovered_at.to_rfc3339(),
            ],
        )?;
        tx.execute("DELETE FROM tags WHERE file_path = ?1", params![path])?;
        for tag in tags {
            tx.execute(
                "INSERT OR IGNORE INTO tags (file_path, tag) VALUES (?1, ?2)",
                params![path, tag],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn tags_for(&self, path: &Path) -> Result<Vec<String>> {
        let conn = self.connection();
        let mut stmt = conn.prepare("SELECT tag FROM tags WHERE file_path = ?1 ORDER BY tag")?;
        let tags = stmt
            .query_map(params![path_value(path)], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(tags)
    }

    /// Current paths of every indexed file carrying `tag`.
    pub fn files_with_tag(&self, tag: &str) -> Result<Vec<PathBuf>> {
        let conn = self.connection();
        let mut stmt =
            conn.prepare("SELECT file_path FROM tags WHERE tag = ?1 ORDER BY file_path")?;
        let paths = stmt
            .query_map(params![tag.to_lowercase()], |row| path_from_row(row, 0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(paths)
    }

    pub fn indexed_category(&self, path: &Path) -> Result<Option<String>> {
        let category = self
            .connection()
            .query_row(
                "SELECT category FROM files WHERE path = ?1",
                params![path_value(path)],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?;
        Ok(category.flatten())
    }

    pub fn indexed_file_count(&self) -> Result<u64> {
        let count: i64 = self
            .connection()
            .query_row("SELECT COUNT(*) FROM files", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

/// Moves an index row inside an open transaction, replacing any row already at `to`.
pub(super) fn relocate_in(tx: &Transaction<'_>, from: &Path, to: &Path) -> rusqlite::Result<()> {
    tx.execute("DELETE FROM files WHERE path = ?1", params![path_value(to)])?;
    tx.execute(
        "UPDATE files SET path = ?1 WHERE path = ?2",
        params![path_value(to), path_value(from)],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(path: &str) -> FileRecord {
        FileRecord {
            path: PathBuf::from(path),
            size: 10,
            modified: Utc::now(),
            hash: None,
            discovered_at: Utc::now(),
        }
    }

    #[test]
    fn test_upsert_replaces_tags() {
        let store = Store::open_in_memory().unwrap();
        let file = record("/desk/invoice.pdf");
        store
            .upsert_file(&file, Some(Category::Document), &["tax".into(), "invoice".into()])
            .unwrap();
        assert_eq!(
            store.tags_for(&file.path).unwrap(),
            vec!["invoice".to_string(), "tax".to_string()]
        );

        store
            .upsert_file(&file, Some(Category::Document), &["receipt".into()])
            .unwrap();
        assert_eq!(store.tags_for(&file.path).unwrap(), vec!["receipt".to_string()]);
        assert_eq!(store.indexed_file_count().unwrap(), 1);
        assert_eq!(
            store.indexed_category(&file.path).unwrap().as_deref(),
            Some("document")
        );
    }

    #[test]
    fn test_relocate_keeps_tags() {
        let store = Store::open_in_memory().unwrap();
        let file = record("/desk/invoice.pdf");
        store.upsert_file(&file, None, &["tax".into()]).unwrap();

        let moved = Path::new("/desk/TidyDesk/Documents/invoice.pdf");
        {
            let mut conn = store.connection();
            let tx = conn.transaction().unwrap();
            relocate_in(&tx, &file.path, moved).unwrap();
            tx.commit().unwrap();
        }

        assert!(store.tags_for(&file.path).unwrap().is_empty());
        assert_eq!(store.files_with_tag("tax").unwrap(), vec![moved.to_path_buf()]);
    }

    #[cfg(unix)]
    #[test]
    fn test_non_utf8_file_keeps_its_exact_path() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let store = Store::open_in_memory().expect("Failed to open store");
        let latin1 = PathBuf::from(OsStr::from_bytes(b"/desk/caf\xe9.txt"));
        let utf8 = PathBuf::from("/desk/caf\u{fffd}.txt");
        let mut file = record("/unused");
        file.path = latin1.clone();
        store
            .upsert_file(&file, None, &["menu".into()])
            .expect("Failed to index file");
        file.path = utf8.clone();
        store
            .upsert_file(&file, None, &["other".into()])
            .expect("Failed to index file");

        // Verify the raw name and its lossy spelling stay distinct rows
        assert_eq!(store.indexed_file_count().expect("Failed to count"), 2);
        assert_eq!(
            store.files_with_tag("menu").expect("Failed to query tag"),
            vec![latin1.clone()]
        );
        assert_eq!(
            store.tags_for(&latin1).expect("Failed to read tags"),
            vec!["menu".to_string()]
        );
    }
}
