//! Raw file system event types.

#![allow(clippy::missing_const_for_fn)]

use std::path::{Path, PathBuf};

use crate::cache::TypedPath;

/// Kind of a raw watcher event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Path was created.
    Create,
    /// Path was deleted.
    Delete,
    /// Path was modified.
    Modify,
    /// Events below the path may have been lost; rescan it.
    Overflow,
}

/// A raw event delivered by a `RawWatcher`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// Snapshot of the path at delivery time.
    pub typed_path: TypedPath,
    /// What happened.
    pub kind: EventKind,
}

impl Event {
    /// Create an event.
    #[must_use]
    pub fn new(typed_path: TypedPath, kind: EventKind) -> Self {
        Self { typed_path, kind }
    }

    /// Stat `path` now and derive `Modify` or `Delete` from whether it exists.
    #[must_use]
    pub fn observed(path: impl Into<PathBuf>) -> Self {
        let typed_path = TypedPath::stat(path);
        let kind = if typed_path.exists() {
            EventKind::Modify
        } else {
            EventKind::Delete
        };
        Self { typed_path, kind }
    }

    /// Overflow event for `path`.
    #[must_use]
    pub fn overflow(path: impl Into<PathBuf>) -> Self {
        Self {
            typed_path: TypedPath::stat(path),
            kind: EventKind::Overflow,
        }
    }

    /// Get the path associated with this event.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.typed_path.path()
    }
}

/// Batch of raw events, deduplicated by path. A later event for a path
/// replaces an earlier one, except that an overflow is never downgraded.
#[derive(Debug, Default)]
pub struct EventBatch {
    events: Vec<Event>,
}

impl EventBatch {
    /// Create a new empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an event to the batch.
    pub fn add(&mut self, event: Event) {
        match self.events.iter_mut().find(|e| e.path() == event.path()) {
            Some(existing) if existing.kind == EventKind::Overflow => {
                existing.typed_path = event.typed_path;
            }
            Some(existing) => *existing = event,
            None => self.events.push(event),
        }
    }

    /// Check if batch is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Get total number of events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Drop events whose path fails `keep`.
    pub fn retain(&mut self, mut keep: impl FnMut(&Path) -> bool) {
        self.events.retain(|e| keep(e.path()));
    }
}

impl IntoIterator for EventBatch {
    type Item = Event;
    type IntoIter = std::vec::IntoIter<Event>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::FileKind;
    use tempfile::TempDir;

    fn event(path: &str, kind: EventKind) -> Event {
        Event::new(TypedPath::new(path, FileKind::File, false), kind)
    }

    #[test]
    fn test_event_path() {
        let modified = event("/test/file.rs", EventKind::Modify);
        assert_eq!(modified.path(), Path::new("/test/file.rs"));
    }

    #[test]
    fn test_observed_kind() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("here.txt");
        std::fs::write(&file, "x").unwrap();

        assert_eq!(Event::observed(&file).kind, EventKind::Modify);
        assert_eq!(
            Event::observed(tmp.path().join("gone.txt")).kind,
            EventKind::Delete
        );
    }

    #[test]
    fn test_event_batch_dedup() {
        let mut batch = EventBatch::new();
        batch.add(event("/a.rs", EventKind::Create));
        batch.add(event("/b.rs", EventKind::Modify));
        batch.add(event("/a.rs", EventKind::Delete));

        assert_eq!(batch.len(), 2);
        let kinds: Vec<_> = batch.into_iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![EventKind::Delete, EventKind::Modify]);
    }

    #[test]
    fn test_event_batch_keeps_overflow() {
        let mut batch = EventBatch::new();
        batch.add(event("/dir", EventKind::Overflow));
        batch.add(event("/dir", EventKind::Modify));

        let events: Vec<_> = batch.into_iter().collect();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::Overflow);
    }

    #[test]
    fn test_event_batch_retain() {
        let mut batch = EventBatch::new();
        batch.add(event("/watched/a.rs", EventKind::Modify));
        batch.add(event("/tmp/b.rs", EventKind::Modify));
        batch.retain(|p| p.starts_with("/watched"));
        assert_eq!(batch.len(), 1);
        assert!(!batch.is_empty());
    }
}
