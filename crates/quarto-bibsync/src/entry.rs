/*
 * entry.rs
 * Copyright (c) 2025 Posit, PBC
 *
 * In-memory model of one citation.
 */

use std::collections::{BTreeMap, HashSet};

use hashlink::LinkedHashMap;

use crate::error::RecordError;
use crate::ownership::FieldClass;

/// Entries keyed by citation key, in the order they appear in their file.
pub type EntryMap = LinkedHashMap<String, Entry>;

/// One citation as seen by either file.
///
/// An entry parsed from only one file is partial: a doc block knows its
/// note and the title it displays, a bib record knows the metadata and
/// (maybe) a note field. Equality is per field; field order is irrelevant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Entry {
    /// Citation key; the only join column between the two files
    pub key: String,

    /// Lower-cased record type (`article`, `book`, ...), if known
    pub entry_type: Option<String>,

    /// Metadata fields, keyed by lower-cased field name. Never contains
    /// the note field.
    pub fields: BTreeMap<String, String>,

    /// Free-text note; `None` when the source file has no note for it
    pub note: Option<String>,
}

impl Entry {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..Default::default()
        }
    }

    pub fn with_type(mut self, entry_type: impl Into<String>) -> Self {
        self.entry_type = Some(entry_type.into().to_ascii_lowercase());
        self
    }

    pub fn with_field(mut self, name: &str, value: impl Into<String>) -> Self {
        self.fields.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    pub fn title(&self) -> Option<&str> {
        self.field("title")
    }

    /// The note, treating a missing note as empty.
    pub fn note_text(&self) -> &str {
        self.note.as_deref().unwrap_or("")
    }

    pub fn has_metadata(&self) -> bool {
        self.entry_type.is_some() || !self.fields.is_empty()
    }

    /// Whether two views of the same key disagree on one class of data.
    ///
    /// A missing note and an empty note are the same note.
    pub fn differs_in(&self, other: &Entry, class: FieldClass) -> bool {
        match class {
            FieldClass::Metadata => {
                self.entry_type != other.entry_type || self.fields != other.fields
            }
            FieldClass::Note => self.note_text() != other.note_text(),
        }
    }

    /// Copy one class of data from `source`, leaving the rest untouched.
    pub fn adopt(&mut self, source: &Entry, class: FieldClass) {
        match class {
            FieldClass::Metadata => {
                self.entry_type = source.entry_type.clone();
                self.fields = source.fields.clone();
            }
            FieldClass::Note => {
                self.note = source.note.clone();
            }
        }
    }
}

/// Entries read from one file, plus whatever had to be skipped.
#[derive(Debug, Clone, Default)]
pub struct Parsed {
    /// Well-formed records, in file order
    pub entries: EntryMap,

    /// Records that were skipped
    pub errors: Vec<RecordError>,

    /// Keys that appear in the text but belong to a skipped record. Writers
    /// leave these records alone and never append a second copy.
    pub unusable_keys: HashSet<String>,
}
