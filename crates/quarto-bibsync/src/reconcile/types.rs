/*
 * types.rs
 * Copyright (c) 2025 Posit, PBC
 *
 * Types for reconcile plans and pass results.
 */

use serde::{Deserialize, Serialize};

use crate::bib::DEFAULT_NOTE_FIELD;
use crate::error::RecordError;
use crate::ownership::Side;
use crate::snapshot::Snapshot;

/// What to do with a key that exists only in the document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocOnlyKeys {
    /// Append a minimal bib record carrying the heading text and the note
    #[default]
    Stub,
    /// Leave the bib file alone
    Ignore,
}

/// Policy knobs of the reconciler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileOptions {
    /// Bib field that holds the note
    pub note_field: String,

    /// Fill the note of a newly rendered doc block from the bib note field
    /// instead of leaving it empty.
    pub seed_note_from_bib: bool,

    pub doc_only_keys: DocOnlyKeys,

    /// Record type of stubs created for doc-only keys
    pub stub_entry_type: String,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            note_field: DEFAULT_NOTE_FIELD.to_string(),
            seed_note_from_bib: false,
            doc_only_keys: DocOnlyKeys::Stub,
            stub_entry_type: "misc".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// Key is not in the snapshot yet
    Added,
    /// Key is in the snapshot but a class owned by the source side differs
    Changed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedChange {
    pub key: String,
    pub kind: ChangeKind,
}

/// Changes detected on one side, in the order the keys appear in that file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcilePlan {
    pub source: Side,
    pub changes: Vec<PlannedChange>,
}

impl ReconcilePlan {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn count(&self, kind: ChangeKind) -> usize {
        self.changes.iter().filter(|c| c.kind == kind).count()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    /// Planned changes for keys new to the snapshot
    pub added: usize,
    /// Planned changes for keys already in the snapshot
    pub changed: usize,
    /// Existing entries on the other side that received the change
    pub updated: usize,
    /// Entries created on the other side
    pub created: usize,
    /// Changes with nowhere to go (key absent on the other side)
    pub inert: usize,
    /// Changes held back because the other side's record is malformed
    pub skipped: usize,
}

impl ReconcileStats {
    pub fn merge(&mut self, other: &ReconcileStats) {
        self.added += other.added;
        self.changed += other.changed;
        self.updated += other.updated;
        self.created += other.created;
        self.inert += other.inert;
        self.skipped += other.skipped;
    }
}

/// Result of one reconcile pass. Nothing has been written yet: the caller
/// writes `other_text` (when present) and only then commits `snapshot`.
#[derive(Debug, Clone)]
pub struct PassOutcome {
    pub plan: ReconcilePlan,
    pub stats: ReconcileStats,

    /// New text for the other file, present only when it differs from the
    /// text the pass was given
    pub other_text: Option<String>,

    pub snapshot: Snapshot,

    /// The other file already held edits of its own that the snapshot has
    /// not seen. Those edits survive in `other_text`, so the write must not
    /// be treated as a pure echo of this pass.
    pub other_pending: bool,

    /// Malformed records found in either file
    pub errors: Vec<RecordError>,
}

impl PassOutcome {
    pub fn source(&self) -> Side {
        self.plan.source
    }
}

/// Result of the startup synchronisation of a pair.
#[derive(Debug, Clone)]
pub struct BootstrapOutcome {
    /// New bib text, when it differs from the bib text given
    pub bib_text: Option<String>,
    /// New doc text, when it differs from the doc text given
    pub doc_text: Option<String>,
    pub snapshot: Snapshot,
    pub stats: ReconcileStats,
    pub errors: Vec<RecordError>,
}
