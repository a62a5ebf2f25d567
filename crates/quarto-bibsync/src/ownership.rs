/*
 * ownership.rs
 * Copyright (c) 2025 Posit, PBC
 *
 * Field ownership between the bibliography and the notes document.
 *
 * The bib file is authoritative for citation metadata, the document is
 * authoritative for the free-text note. That rule lives in one table,
 * `OWNERSHIP`; everything else asks the table instead of branching on
 * field names.
 */

use std::fmt;

/// One of the two files of a synchronized pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    /// The citation database (`.bib`)
    Bib,
    /// The human-edited notes document (`.qmd`)
    Doc,
}

impl Side {
    pub const ALL: [Side; 2] = [Side::Bib, Side::Doc];

    /// The file a change on this side gets propagated to.
    pub fn other(self) -> Side {
        match self {
            Side::Bib => Side::Doc,
            Side::Doc => Side::Bib,
        }
    }

    /// Stable index, for per-side arrays.
    pub fn index(self) -> usize {
        match self {
            Side::Bib => 0,
            Side::Doc => 1,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Bib => write!(f, "bib"),
            Side::Doc => write!(f, "doc"),
        }
    }
}

/// Classes of entry data that have a single owning side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldClass {
    /// Record type plus every bib field except the note field
    Metadata,
    /// The free-text note
    Note,
}

/// Which side owns which class of data.
pub const OWNERSHIP: [(FieldClass, Side); 2] = [
    (FieldClass::Metadata, Side::Bib),
    (FieldClass::Note, Side::Doc),
];

impl FieldClass {
    /// Classify a bib field name. `note_field` is the field that carries
    /// the note (conventionally `comment`); matching is case-insensitive.
    pub fn of_field(name: &str, note_field: &str) -> FieldClass {
        if name.eq_ignore_ascii_case(note_field) {
            FieldClass::Note
        } else {
            FieldClass::Metadata
        }
    }

    /// The side whose edits to this class are authoritative.
    pub fn owner(self) -> Side {
        OWNERSHIP
            .iter()
            .find(|(class, _)| *class == self)
            .map(|(_, side)| *side)
            .unwrap_or(Side::Bib)
    }
}

/// The classes a side is authoritative for.
pub fn owned_by(side: Side) -> impl Iterator<Item = FieldClass> {
    OWNERSHIP
        .into_iter()
        .filter(move |(_, owner)| *owner == side)
        .map(|(class, _)| class)
}
