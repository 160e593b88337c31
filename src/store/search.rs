use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use rusqlite::types::Value;
use rusqlite::{Row, params, params_from_iter};
use serde::Serialize;
use std::path::PathBuf;

use super::sqlite::{Store, parse_optional_timestamp, parse_timestamp, path_from_row, path_value};
use crate::error::Result;

pub const DEFAULT_SEARCH_LIMIT: usize = 1000;

/// Filters over the file index. Every filter that is set must match.
///
/// Tags are stored lowercase, so tag patterns always match case-insensitively.
/// The date range applies to when a file was first indexed.
#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub name: Option<String>,
    pub tag: Option<String>,
    /// Category name such as `document`, matched exactly.
    pub category: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub name_regex: Option<Regex>,
    /// Must match at least one tag.
    pub tag_regex: Option<Regex>,
    /// Name and tag must equal the pattern instead of containing it.
    pub exact: bool,
    pub case_sensitive: bool,
    pub limit: usize,
}

impl Default for SearchQuery {
    fn default() -> Self {
        Self {
            name: None,
            tag: None,
            category: None,
            since: None,
            until: None,
            name_regex: None,
            tag_regex: None,
            exact: false,
            case_sensitive: false,
            limit: DEFAULT_SEARCH_LIMIT,
        }
    }
}

impl SearchQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, pattern: impl Into<String>) -> Self {
        self.name = Some(pattern.into());
        self
    }

    pub fn tag(mut self, pattern: impl Into<String>) -> Self {
        self.tag = Some(pattern.into());
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Only files indexed within the last `days` days.
    pub fn last_days(mut self, days: i64) -> Self {
        self.since = Some(Utc::now() - Duration::days(days));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    fn matches_name(&self, name: &str) -> bool {
        let Some(pattern) = &self.name else {
            return true;
        };
        let (name, pattern) = if self.case_sensitive {
            (name.to_string(), pattern.clone())
        } else {
            (name.to_lowercase(), pattern.to_lowercase())
        };
        if self.exact {
            name == pattern
        } else {
            name.contains(&pattern)
        }
    }

    fn matches(&self, file: &IndexedFile) -> bool {
        let name = file.name();
        self.matches_name(&name)
            && self.since.is_none_or(|since| file.discovered_at >= since)
            && self.until.is_none_or(|until| file.discovered_at <= until)
            && self.name_regex.as_ref().is_none_or(|re| re.is_match(&name))
            && self
                .tag_regex
                .as_ref()
                .is_none_or(|re| file.tags.iter().any(|tag| re.is_match(tag)))
    }
}

/// One row of the file index with its tags.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexedFile {
    pub path: PathBuf,
    pub size: u64,
    pub category: Option<String>,
    pub tags: Vec<String>,
    pub discovered_at: DateTime<Utc>,
}

impl IndexedFile {
    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SearchStatistics {
    pub total_files: u64,
    pub tagged_files: u64,
    pub untagged_files: u64,
    pub first_indexed: Option<DateTime<Utc>>,
    pub last_indexed: Option<DateTime<Utc>>,
    /// Most common categories, largest first.
    pub top_categories: Vec<(String, u64)>,
}

fn indexed_from_row(row: &Row<'_>) -> rusqlite::Result<IndexedFile> {
    let discovered_at: String = row.get(3)?;
    Ok(IndexedFile {
        path: path_from_row(row, 0)?,
        size: row.get::<_, i64>(1)? as u64,
        category: row.get(2)?,
        tags: Vec::new(),
        discovered_at: parse_timestamp(3, &discovered_at)?,
    })
}

impl Store {
    // ── Search ───────────────────────────────────────────────────

    /// Indexed files matching `query`, most recently indexed first.
    pub fn search_files(&self, query: &SearchQuery) -> Result<Vec<IndexedFile>> {
        let mut sql =
            String::from("SELECT f.path, f.size, f.category, f.discovered_at FROM files f WHERE 1 = 1");
        let mut args: Vec<Value> = Vec::new();
        if let Some(category) = &query.category {
            sql.push_str(" AND lower(f.category) = ?");
            args.push(Value::Text(category.trim().to_lowercase()));
        }
        if let Some(tag) = &query.tag {
            sql.push_str(if query.exact {
                " AND EXISTS (SELECT 1 FROM tags t WHERE t.file_path = f.path AND t.tag = ?)"
            } else {
                " AND EXISTS (SELECT 1 FROM tags t WHERE t.file_path = f.path AND instr(t.tag, ?) > 0)"
            });
            args.push(Value::Text(tag.trim().to_lowercase()));
        }
        sql.push_str(" ORDER BY f.discovered_at DESC, f.path");

        let conn = self.connection();
        let mut stmt = conn.prepare(&sql)?;
        let mut tag_stmt = conn.prepare("SELECT tag FROM tags WHERE file_path = ?1 ORDER BY tag")?;
        let rows = stmt.query_map(params_from_iter(args.iter()), indexed_from_row)?;

        let mut results = Vec::new();
        for row in rows {
            if results.len() >= query.limit {
                break;
            }
            let mut file = row?;
            file.tags = tag_stmt
                .query_map(params![path_value(&file.path)], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?;
            if query.matches(&file) {
                results.push(file);
            }
        }
        Ok(results)
    }

    /// Every tag in the index, sorted.
    pub fn all_tags(&self) -> Result<Vec<String>> {
        let conn = self.connection();
        let mut stmt = conn.prepare("SELECT DISTINCT tag FROM tags ORDER BY tag")?;
        let tags = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(tags)
    }

    /// Every category in the index, sorted.
    pub fn all_categories(&self) -> Result<Vec<String>> {
        let conn = self.connection();
        let mut stmt = conn.prepare(
            "SELECT DISTINCT category FROM files WHERE category IS NOT NULL ORDER BY category",
        )?;
        let categories = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(categories)
    }

    pub fn search_statistics(&self) -> Result<SearchStatistics> {
        let conn = self.connection();
        let (total, tagged, first, last) = conn.query_row(
            "SELECT COUNT(*), \
             (SELECT COUNT(DISTINCT file_path) FROM tags), \
             MIN(discovered_at), MAX(discovered_at) FROM files",
            [],
            |row| {
                Ok((
                    row.get::<_, i64>(0)? as u64,
                    row.get::<_, i64>(1)? as u64,
                    parse_optional_timestamp(2, row.get(2)?)?,
                    parse_optional_timestamp(3, row.get(3)?)?,
                ))
            },
        )?;
        let mut stmt = conn.prepare(
            "SELECT category, COUNT(*) AS n FROM files WHERE category IS NOT NULL \
             GROUP BY category ORDER BY n DESC, category LIMIT 5",
        )?;
        let top_categories = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get::<_, i64>(1)? as u64)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(SearchStatistics {
            total_files: total,
            tagged_files: tagged,
            untagged_files: total.saturating_sub(tagged),
            first_indexed: first,
            last_indexed: last,
            top_categories,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file_category::Category;
    use crate::indexer::FileRecord;
    use regex::RegexBuilder;

    fn index(store: &Store, path: &str, category: Category, tags: &[&str], days_ago: i64) {
        let record = FileRecord {
            path: PathBuf::from(path),
            size: 10,
            modified: Utc::now(),
            hash: None,
            discovered_at: Utc::now() - Duration::days(days_ago),
        };
        let tags: Vec<String> = tags.iter().map(|t| t.to_string()).collect();
        store
            .upsert_file(&record, Some(category), &tags)
            .expect("Failed to index file");
    }

    fn store() -> Store {
        let store = Store::open_in_memory().expect("Failed to open store");
        index(&store, "/d/Invoice_March.pdf", Category::Document, &["invoice", "tax"], 1);
        index(&store, "/d/holiday.jpg", Category::Image, &["beach"], 40);
        index(&store, "/d/notes.txt", Category::Document, &[], 3);
        store
    }

    fn names(files: &[IndexedFile]) -> Vec<String> {
        files.iter().map(IndexedFile::name).collect()
    }

    #[test]
    fn test_name_search_is_case_insensitive_by_default() {
        let store = store();

        let found = store
            .search_files(&SearchQuery::new().name("invoice"))
            .expect("Failed to search");
        assert_eq!(names(&found), vec!["Invoice_March.pdf"]);
        assert_eq!(found[0].tags, vec!["invoice".to_string(), "tax".to_string()]);

        let mut strict = SearchQuery::new().name("invoice");
        strict.case_sensitive = true;
        // Verify case-sensitive search respects capitalization
        assert!(store.search_files(&strict).expect("Failed to search").is_empty());
    }

    #[test]
    fn test_exact_name_and_tag() {
        let store = store();

        let mut exact = SearchQuery::new().name("notes");
        exact.exact = true;
        assert!(store.search_files(&exact).expect("Failed to search").is_empty());
        exact.name = Some("NOTES.TXT".to_string());
        assert_eq!(names(&store.search_files(&exact).expect("Failed to search")), vec!["notes.txt"]);

        let mut tag = SearchQuery::new().tag("inv");
        assert_eq!(store.search_files(&tag).expect("Failed to search").len(), 1);
        tag.exact = true;
        // Verify exact tag matching needs the whole tag
        assert!(store.search_files(&tag).expect("Failed to search").is_empty());
    }

    #[test]
    fn test_category_date_and_limit_filters() {
        let store = store();

        let documents = store
            .search_files(&SearchQuery::new().category("Document"))
            .expect("Failed to search");
        // Verify newest first
        assert_eq!(names(&documents), vec!["Invoice_March.pdf", "notes.txt"]);

        let recent = store
            .search_files(&SearchQuery::new().last_days(7))
            .expect("Failed to search");
        assert_eq!(recent.len(), 2);
        assert!(recent.iter().all(|f| f.name() != "holiday.jpg"));

        let limited = store
            .search_files(&SearchQuery::new().limit(1))
            .expect("Failed to search");
        assert_eq!(names(&limited), vec!["Invoice_March.pdf"]);
    }

    #[test]
    fn test_regex_search() {
        let store = store();
        let mut query = SearchQuery::new();
        query.name_regex = Some(
            RegexBuilder::new(r"\.(pdf|jpg)$")
                .case_insensitive(true)
                .build()
                .expect("Failed to compile regex"),
        );
        assert_eq!(store.search_files(&query).expect("Failed to search").len(), 2);

        query.tag_regex = Some(Regex::new("^bea").expect("Failed to compile regex"));
        // Verify both expressions must match
        assert_eq!(names(&store.search_files(&query).expect("Failed to search")), vec!["holiday.jpg"]);
    }

    #[test]
    fn test_tags_categories_and_statistics() {
        let store = store();

        assert_eq!(
            store.all_tags().expect("Failed to list tags"),
            vec!["beach".to_string(), "invoice".to_string(), "tax".to_string()]
        );
        assert_eq!(
            store.all_categories().expect("Failed to list categories"),
            vec!["document".to_string(), "image".to_string()]
        );

        let stats = store.search_statistics().expect("Failed to compute statistics");
        assert_eq!(stats.total_files, 3);
        assert_eq!(stats.tagged_files, 2);
        assert_eq!(stats.untagged_files, 1);
        assert_eq!(stats.top_categories[0], ("document".to_string(), 2));
        assert!(stats.first_indexed < stats.last_indexed);
    }

    #[test]
    fn test_statistics_of_empty_index() {
        let store = Store::open_in_memory().expect("Failed to open store");
        let stats = store.search_statistics().expect("Failed to compute statistics");
        assert_eq!(stats, SearchStatistics::default());
    }
}
