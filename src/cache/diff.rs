//! Reconciliation of two subtree snapshots into create/update/delete events.
//!
//! Diffing full listings instead of raw watcher events means a dropped or
//! coalesced event can never leave the cache with a missed transition.

use std::collections::BTreeMap;
use std::path::PathBuf;

use super::entry::CacheEntry;

/// A single cache transition.
#[derive(Debug, Clone)]
pub enum CacheUpdate<T> {
    /// Path appeared.
    Create(CacheEntry<T>),
    /// Path survived; `new` replaces `old`.
    Update {
        old: CacheEntry<T>,
        new: CacheEntry<T>,
    },
    /// Path disappeared. The entry is marked as no longer existing.
    Delete(CacheEntry<T>),
}

impl<T> CacheUpdate<T> {
    /// The path this transition applies to.
    #[must_use]
    pub fn path(&self) -> &std::path::Path {
        match self {
            Self::Create(e) | Self::Delete(e) | Self::Update { new: e, .. } => e.path(),
        }
    }
}

/// Ordered transitions produced by one reconciliation call.
#[derive(Debug)]
pub struct CacheUpdates<T> {
    updates: Vec<CacheUpdate<T>>,
}

impl<T> Default for CacheUpdates<T> {
    fn default() -> Self {
        Self {
            updates: Vec::new(),
        }
    }
}

impl<T> CacheUpdates<T> {
    /// Create an empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a creation.
    pub fn on_create(&mut self, entry: CacheEntry<T>) {
        self.updates.push(CacheUpdate::Create(entry));
    }

    /// Record an update.
    pub fn on_update(&mut self, old: CacheEntry<T>, new: CacheEntry<T>) {
        self.updates.push(CacheUpdate::Update { old, new });
    }

    /// Record a deletion.
    pub fn on_delete(&mut self, entry: CacheEntry<T>) {
        self.updates.push(CacheUpdate::Delete(entry.into_missing()));
    }

    /// Append every transition of `other`.
    pub fn extend(&mut self, other: Self) {
        self.updates.extend(other.updates);
    }

    /// Check if batch is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    /// Get total number of transitions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.updates.len()
    }

    /// Iterate transitions in recording order.
    pub fn iter(&self) -> std::slice::Iter<'_, CacheUpdate<T>> {
        self.updates.iter()
    }

    /// Count of creations, updates and deletions.
    #[must_use]
    pub fn counts(&self) -> (usize, usize, usize) {
        self.updates
            .iter()
            .fold((0, 0, 0), |(c, u, d), update| match update {
                CacheUpdate::Create(_) => (c + 1, u, d),
                CacheUpdate::Update { .. } => (c, u + 1, d),
                CacheUpdate::Delete(_) => (c, u, d + 1),
            })
    }
}

impl<T> IntoIterator for CacheUpdates<T> {
    type Item = CacheUpdate<T>;
    type IntoIter = std::vec::IntoIter<CacheUpdate<T>>;

    fn into_iter(self) -> Self::IntoIter {
        self.updates.into_iter()
    }
}

/// Compare `old` and `new` snapshots of the same subtree.
///
/// Every path only in `old` yields a `Delete`, every path only in `new` a
/// `Create`, and every path in both an `Update`, whether or not the value
/// changed. Output is ordered by path within each kind: deletes, then
/// creates, then updates.
pub fn diff_entries<T>(
    old: impl IntoIterator<Item = CacheEntry<T>>,
    new: impl IntoIterator<Item = CacheEntry<T>>,
    updates: &mut CacheUpdates<T>,
) {
    let mut old: BTreeMap<PathBuf, CacheEntry<T>> = old
        .into_iter()
        .map(|e| (e.path().to_path_buf(), e))
        .collect();
    let new: BTreeMap<PathBuf, CacheEntry<T>> = new
        .into_iter()
        .map(|e| (e.path().to_path_buf(), e))
        .collect();

    let deleted: Vec<PathBuf> = old
        .keys()
        .filter(|path| !new.contains_key(*path))
        .cloned()
        .collect();
    for path in deleted {
        if let Some(entry) = old.remove(&path) {
            updates.on_delete(entry);
        }
    }

    let mut surviving = Vec::new();
    for (path, entry) in new {
        match old.remove(&path) {
            Some(previous) => surviving.push((previous, entry)),
            None => updates.on_create(entry),
        }
    }
    for (previous, entry) in surviving {
        updates.on_update(previous, entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::path::{FileKind, TypedPath};
    use std::path::Path;

    fn entry(path: &str, value: u32) -> CacheEntry<u32> {
        CacheEntry::from_value(TypedPath::new(path, FileKind::File, false), value)
    }

    #[test]
    fn test_diff_create_update_delete() {
        let old = vec![entry("/r/a", 1), entry("/r/b", 2)];
        let new = vec![entry("/r/b", 2), entry("/r/c", 3)];
        let mut updates = CacheUpdates::new();
        diff_entries(old, new, &mut updates);

        let kinds: Vec<(String, &str)> = updates
            .iter()
            .map(|u| {
                let kind = match u {
                    CacheUpdate::Create(_) => "create",
                    CacheUpdate::Update { .. } => "update",
                    CacheUpdate::Delete(_) => "delete",
                };
                (u.path().display().to_string(), kind)
            })
            .collect();
        assert_eq!(
            kinds,
            vec![
                ("/r/a".to_string(), "delete"),
                ("/r/c".to_string(), "create"),
                ("/r/b".to_string(), "update"),
            ]
        );
    }

    #[test]
    fn test_diff_counts_cover_union() {
        let old = vec![entry("/r/a", 1), entry("/r/b", 1), entry("/r/c", 1)];
        let new = vec![entry("/r/c", 2), entry("/r/d", 1)];
        let mut updates = CacheUpdates::new();
        diff_entries(old, new, &mut updates);

        let (c, u, d) = updates.counts();
        assert_eq!((c, u, d), (1, 1, 2));
        assert_eq!(c + u + d, 4);
    }

    #[test]
    fn test_diff_identical_snapshots_emit_updates() {
        let snapshot = vec![entry("/r/a", 7), entry("/r/b", 8)];
        let mut updates = CacheUpdates::new();
        diff_entries(snapshot.clone(), snapshot, &mut updates);
        assert_eq!(updates.counts(), (0, 2, 0));
    }

    #[test]
    fn test_deletes_are_marked_missing() {
        let mut updates = CacheUpdates::new();
        diff_entries(vec![entry("/r/gone", 1)], Vec::new(), &mut updates);
        match updates.into_iter().next() {
            Some(CacheUpdate::Delete(e)) => {
                assert!(!e.exists());
                assert_eq!(e.path(), Path::new("/r/gone"));
            }
            other => panic!("expected delete, got {other:?}"),
        }
    }

    #[test]
    fn test_extend_and_len() {
        let mut first = CacheUpdates::new();
        first.on_create(entry("/a", 1));
        let mut second = CacheUpdates::new();
        second.on_delete(entry("/b", 1));
        first.extend(second);
        assert_eq!(first.len(), 2);
        assert!(!first.is_empty());
    }
}
