/*
 * bib/mod.rs
 * Copyright (c) 2025 Posit, PBC
 *
 * Adapter between BibTeX text and the entry model.
 */

mod parse;
mod write;

use crate::entry::{EntryMap, Parsed};

/// Name of the bib field that carries the note unless configured otherwise.
pub const DEFAULT_NOTE_FIELD: &str = "comment";

/// Reads and writes the citation database.
#[derive(Debug, Clone)]
pub struct BibAdapter {
    note_field: String,
}

impl Default for BibAdapter {
    fn default() -> Self {
        Self::new(DEFAULT_NOTE_FIELD)
    }
}

impl BibAdapter {
    pub fn new(note_field: impl Into<String>) -> Self {
        Self {
            note_field: note_field.into().to_ascii_lowercase(),
        }
    }

    pub fn note_field(&self) -> &str {
        &self.note_field
    }

    pub fn parse(&self, text: &str) -> Parsed {
        let file = parse::BibFile::scan(text, &self.note_field);
        let mut entries = EntryMap::new();
        for record in file.records {
            entries.insert(record.entry.key.clone(), record.entry);
        }
        Parsed {
            entries,
            errors: file.errors,
            unusable_keys: file.unusable_keys,
        }
    }

    /// Produce new bib text that represents `mapping`, starting from
    /// `previous`.
    ///
    /// Records whose entry is unchanged are copied byte for byte, as is
    /// everything between records (comments, `@string`, `@comment`, the
    /// JabRef encoding line). Changed records get only their changed values
    /// rewritten. Keys missing from `previous` are appended in mapping
    /// order. Records of `previous` that are absent from `mapping` are kept.
    pub fn serialize(&self, mapping: &EntryMap, previous: &str) -> String {
        write::write_bib(mapping, previous, &self.note_field)
    }
}
