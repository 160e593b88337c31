use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use super::SnapshotEntry;

/// Difference between two snapshots, keyed by relative path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SnapshotDiff {
    pub added: BTreeSet<String>,
    pub removed: BTreeSet<String>,
    /// Path to (old hash, new hash).
    pub modified: BTreeMap<String, (String, String)>,
}

impl SnapshotDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }

    pub fn change_count(&self) -> usize {
        self.added.len() + self.removed.len() + self.modified.len()
    }

    /// The same diff seen from the other side.
    pub fn reversed(&self) -> Self {
        SnapshotDiff {
            added: self.removed.clone(),
            removed: self.added.clone(),
            modified: self
                .modified
                .iter()
                .map(|(path, (old, new))| (path.clone(), (new.clone(), old.clone())))
                .collect(),
        }
    }
}

/// Joins two entry lists on relative path. A file is modified only when its
/// content hash differs; size and mtime are ignored.
pub fn diff_entries(old: &[SnapshotEntry], new: &[SnapshotEntry]) -> SnapshotDiff {
    let old_by_path: HashMap<&str, &str> = old
        .iter()
        .map(|e| (e.relative_path.as_str(), e.hash.as_str()))
        .collect();
    let new_by_path: HashMap<&str, &str> = new
        .iter()
        .map(|e| (e.relative_path.as_str(), e.hash.as_str()))
        .collect();

    let mut diff = SnapshotDiff::default();
    for (path, old_hash) in &old_by_path {
        match new_by_path.get(path) {
            None => {
                diff.removed.insert(path.to_string());
            }
            Some(new_hash) if new_hash != old_hash => {
                diff.modified.insert(
                    path.to_string(),
                    (old_hash.to_string(), new_hash.to_string()),
                );
            }
            Some(_) => {}
        }
    }
    for path in new_by_path.keys() {
        if !old_by_path.contains_key(path) {
            diff.added.insert(path.to_string());
        }
    }
    diff
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(path: &str, hash: &str, mtime_ns: i64) -> SnapshotEntry {
        SnapshotEntry {
            relative_path: path.to_string(),
            size: 1,
            mtime_ns,
            hash: hash.to_string(),
        }
    }

    #[test]
    fn test_added_removed_modified() {
        let old = vec![entry("x", "1", 0), entry("y", "2", 0)];
        let new = vec![entry("x", "1b", 0), entry("z", "3", 0)];
        let diff = diff_entries(&old, &new);

        assert_eq!(diff.added, BTreeSet::from(["z".to_string()]));
        assert_eq!(diff.removed, BTreeSet::from(["y".to_string()]));
        assert_eq!(
            diff.modified.get("x"),
            Some(&("1".to_string(), "1b".to_string()))
        );
        assert_eq!(diff.change_count(), 3);
    }

    #[test]
    fn test_swapping_sides_swaps_added_and_removed() {
        let old = vec![entry("x", "1", 0), entry("y", "2", 0)];
        let new = vec![entry("x", "1b", 0), entry("z", "3", 0)];
        assert_eq!(diff_entries(&new, &old), diff_entries(&old, &new).reversed());
    }

    #[test]
    fn test_mtime_only_change_is_not_a_modification() {
        let old = vec![entry("x", "1", 10)];
        let new = vec![entry("x", "1", 99)];
        assert!(diff_entries(&old, &new).is_empty());
    }
}
