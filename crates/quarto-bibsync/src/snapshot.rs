/*
 * snapshot.rs
 * Copyright (c) 2025 Posit, PBC
 *
 * Last state known to be consistent across both files.
 */

use crate::entry::{Entry, EntryMap};
use crate::ownership::{Side, owned_by};

/// Unified view of every key the engine has synchronized so far: metadata
/// as the bib file had it, notes as the document had it.
///
/// The snapshot lives in memory for the lifetime of a watch loop. Keys are
/// never removed; a key that disappears from a file simply stops changing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    entries: EntryMap,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Combine both files: metadata from `bib`, notes from `doc`.
    pub fn from_sides(bib: &EntryMap, doc: &EntryMap) -> Self {
        let mut snapshot = Snapshot::new();
        for entry in bib.values() {
            snapshot.absorb(entry, Side::Bib);
        }
        for entry in doc.values() {
            snapshot.absorb(entry, Side::Doc);
        }
        snapshot
    }

    pub fn get(&self, key: &str) -> Option<&Entry> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &EntryMap {
        &self.entries
    }

    /// Record the classes `side` owns from `entry`, creating the key if
    /// needed and leaving the other side's classes as they were.
    pub fn absorb(&mut self, entry: &Entry, side: Side) {
        let slot = self
            .entries
            .entry(entry.key.clone())
            .or_insert_with(|| Entry::new(entry.key.clone()));
        for class in owned_by(side) {
            slot.adopt(entry, class);
        }
    }
}
