//! Registered roots and the coverage they imply.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;

use super::path::distance;
use super::UNBOUNDED_DEPTH;

/// Tracks registered root paths and their depths. Registrations may overlap
/// or nest.
#[derive(Debug, Default)]
pub struct DirectoryRegistry {
    registered: RwLock<BTreeMap<PathBuf, i32>>,
}

impl DirectoryRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `path` with `max_depth`. Returns false if `path` was already
    /// registered at the same or a greater depth.
    pub fn add_directory(&self, path: &Path, max_depth: i32) -> bool {
        let mut registered = self.registered.write();
        match registered.get(path) {
            Some(&existing) if existing >= max_depth => false,
            _ => {
                registered.insert(path.to_path_buf(), max_depth);
                true
            }
        }
    }

    /// Drop the registration for `path`, if any.
    pub fn remove_directory(&self, path: &Path) -> bool {
        self.registered.write().remove(path).is_some()
    }

    /// True if some registration covers `path`: it is a registered root, or it
    /// lies at most `depth + 1` components below one.
    #[must_use]
    pub fn accept(&self, path: &Path) -> bool {
        self.registered.read().iter().any(|(root, &depth)| {
            distance(root, path).is_some_and(|d| covers(depth, d))
        })
    }

    /// Effective depth budget left at `path`: the largest registered depth
    /// minus the distance from that root. `-1` when nothing covers `path`.
    #[must_use]
    pub fn max_depth_for(&self, path: &Path) -> i32 {
        self.registered
            .read()
            .iter()
            .filter_map(|(root, &depth)| {
                let d = distance(root, path)?;
                if depth == UNBOUNDED_DEPTH {
                    Some(UNBOUNDED_DEPTH)
                } else {
                    let d = i32::try_from(d).unwrap_or(i32::MAX);
                    Some(depth.saturating_sub(d))
                }
            })
            .max()
            .map_or(-1, |depth| depth.max(-1))
    }

    /// Depth `path` itself is registered with, if any.
    #[must_use]
    pub fn depth_of(&self, path: &Path) -> Option<i32> {
        self.registered.read().get(path).copied()
    }

    /// True if exactly `path` is registered.
    #[must_use]
    pub fn is_registered(&self, path: &Path) -> bool {
        self.registered.read().contains_key(path)
    }

    /// Snapshot of all registrations.
    #[must_use]
    pub fn registered(&self) -> Vec<(PathBuf, i32)> {
        self.registered
            .read()
            .iter()
            .map(|(p, d)| (p.clone(), *d))
            .collect()
    }

    /// Drop every registration.
    pub fn clear(&self) {
        self.registered.write().clear();
    }
}

const fn covers(depth: i32, distance: usize) -> bool {
    if depth == UNBOUNDED_DEPTH || distance == 0 {
        return true;
    }
    if depth < 0 {
        return false;
    }
    // depth N caches entries down to N + 1 components below the root
    distance <= depth as usize + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_remove() {
        let registry = DirectoryRegistry::new();
        assert!(registry.add_directory(Path::new("/root"), 1));
        assert!(!registry.add_directory(Path::new("/root"), 1));
        assert!(!registry.add_directory(Path::new("/root"), 0));
        assert!(registry.add_directory(Path::new("/root"), 3));
        assert!(registry.is_registered(Path::new("/root")));
        assert_eq!(registry.depth_of(Path::new("/root")), Some(3));

        assert!(registry.remove_directory(Path::new("/root")));
        assert!(!registry.remove_directory(Path::new("/root")));
        assert!(registry.registered().is_empty());
    }

    #[test]
    fn test_accept_respects_depth() {
        let registry = DirectoryRegistry::new();
        registry.add_directory(Path::new("/root"), 1);

        assert!(registry.accept(Path::new("/root")));
        assert!(registry.accept(Path::new("/root/a")));
        assert!(registry.accept(Path::new("/root/a/b")));
        assert!(!registry.accept(Path::new("/root/a/b/c.txt")));
        assert!(!registry.accept(Path::new("/other")));
    }

    #[test]
    fn test_accept_leaf_registration() {
        let registry = DirectoryRegistry::new();
        registry.add_directory(Path::new("/root"), -1);
        assert!(registry.accept(Path::new("/root")));
        assert!(!registry.accept(Path::new("/root/a")));
    }

    #[test]
    fn test_accept_unbounded() {
        let registry = DirectoryRegistry::new();
        registry.add_directory(Path::new("/root"), UNBOUNDED_DEPTH);
        assert!(registry.accept(Path::new("/root/a/b/c/d/e/f")));
    }

    #[test]
    fn test_max_depth_for_overlapping() {
        let registry = DirectoryRegistry::new();
        registry.add_directory(Path::new("/root"), 1);
        registry.add_directory(Path::new("/root/sub"), 5);

        assert_eq!(registry.max_depth_for(Path::new("/root")), 1);
        assert_eq!(registry.max_depth_for(Path::new("/root/sub")), 5);
        assert_eq!(registry.max_depth_for(Path::new("/root/sub/x")), 4);
        assert_eq!(registry.max_depth_for(Path::new("/root/other")), 0);
        assert_eq!(registry.max_depth_for(Path::new("/elsewhere")), -1);

        registry.add_directory(Path::new("/root"), UNBOUNDED_DEPTH);
        assert_eq!(registry.max_depth_for(Path::new("/root/sub/x")), UNBOUNDED_DEPTH);
    }

    #[test]
    fn test_clear() {
        let registry = DirectoryRegistry::new();
        registry.add_directory(Path::new("/a"), 0);
        registry.add_directory(Path::new("/b"), 0);
        registry.clear();
        assert!(!registry.accept(Path::new("/a")));
    }
}
