/*
 * doc/mod.rs
 * Copyright (c) 2025 Posit, PBC
 *
 * Adapter between the notes document and the entry model.
 */

mod parse;
mod render;

use crate::entry::{EntryMap, Parsed};

/// Reads and writes the notes document.
#[derive(Debug, Clone, Copy, Default)]
pub struct DocAdapter;

impl DocAdapter {
    pub fn parse(&self, text: &str) -> Parsed {
        let file = parse::DocFile::scan(text);
        let mut entries = EntryMap::new();
        for block in file.blocks {
            entries.insert(block.entry.key.clone(), block.entry);
        }
        Parsed {
            entries,
            errors: file.errors,
            unusable_keys: file.unusable_keys,
        }
    }

    /// Produce new document text that represents `mapping`, starting from
    /// `previous` (or from `template` when `previous` is blank).
    ///
    /// A block whose mapping entry disagrees with the block on metadata gets
    /// its heading and citation line regenerated; its note region is never
    /// touched. Keys without a block are appended in mapping order with the
    /// mapping entry's note (usually empty). Front matter and everything
    /// else is copied through.
    pub fn serialize(&self, mapping: &EntryMap, previous: &str, template: &str) -> String {
        render::write_doc(mapping, previous, template)
    }
}

/// Front matter for a document created without a configured template.
pub fn default_template(title: &str, bib_file_name: &str) -> String {
    format!(
        "---\ntitle: \"{}\"\nbibliography: {}\n---\n\n",
        title.replace('"', "\\\""),
        bib_file_name
    )
}
