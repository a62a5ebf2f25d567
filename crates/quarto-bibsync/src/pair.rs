//! One synchronized bib/doc pair
//!
//! `SyncPair` owns the snapshot for its two files and performs the I/O
//! around a reconcile pass: read both files, reconcile, write the other
//! file atomically, and only then commit the new snapshot. A failed write
//! leaves both the file and the snapshot as they were, so the next event
//! retries from the same starting point.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{RecordError, Result};
use crate::fs_util::{read_text, read_text_if_exists, sha256_hash, write_atomic};
use crate::ownership::Side;
use crate::reconcile::{ReconcileStats, Reconciler};
use crate::snapshot::Snapshot;

/// What a reconcile pass did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncResult {
    /// The source file still holds exactly the text we last wrote to it.
    OwnWrite,

    /// Nothing the source side owns differs from the snapshot.
    NoChanges,

    /// Changes were found but the other file's text did not need to change
    /// (e.g. an edit to a field the heading does not show).
    Absorbed { stats: ReconcileStats },

    /// The other file was rewritten. `carries_edits` is set when the
    /// rewritten file also held edits of its own not yet synchronised, so
    /// its next change event is not an echo.
    Written {
        target: Side,
        stats: ReconcileStats,
        carries_edits: bool,
    },
}

/// Outcome of one pass, with the malformed records seen on the way.
#[derive(Debug, Clone)]
pub struct PassReport {
    pub source: Side,
    pub result: SyncResult,
    pub errors: Vec<RecordError>,
}

impl PassReport {
    /// The file this pass wrote, if any.
    pub fn written(&self) -> Option<Side> {
        match self.result {
            SyncResult::Written { target, .. } => Some(target),
            _ => None,
        }
    }

    /// The file whose next change events are echoes of this pass.
    pub fn echo_side(&self) -> Option<Side> {
        match self.result {
            SyncResult::Written {
                target,
                carries_edits: false,
                ..
            } => Some(target),
            _ => None,
        }
    }
}

/// Outcome of the startup synchronisation.
#[derive(Debug, Clone, Default)]
pub struct BootstrapReport {
    /// The document did not exist and was created
    pub doc_created: bool,
    pub bib_written: bool,
    pub doc_written: bool,
    pub stats: ReconcileStats,
    pub errors: Vec<RecordError>,
}

pub struct SyncPair {
    bib_path: PathBuf,
    doc_path: PathBuf,
    reconciler: Reconciler,
    snapshot: Snapshot,

    /// Fingerprint of the last text written to each file, indexed by
    /// `Side::index`
    last_written: [Option<String>; 2],
}

impl SyncPair {
    pub fn new(
        bib_path: impl Into<PathBuf>,
        doc_path: impl Into<PathBuf>,
        reconciler: Reconciler,
    ) -> Self {
        Self {
            bib_path: bib_path.into(),
            doc_path: doc_path.into(),
            reconciler,
            snapshot: Snapshot::new(),
            last_written: [None, None],
        }
    }

    pub fn path(&self, side: Side) -> &Path {
        match side {
            Side::Bib => &self.bib_path,
            Side::Doc => &self.doc_path,
        }
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    /// Whether `text` is exactly what this pair last wrote to `side`.
    pub fn is_own_write(&self, side: Side, text: &str) -> bool {
        self.last_written[side.index()]
            .as_deref()
            .is_some_and(|hash| hash == sha256_hash(text))
    }

    /// Bring both files in line with each other and seed the snapshot.
    ///
    /// Creates the document from the template when it does not exist.
    pub fn bootstrap(&mut self) -> Result<BootstrapReport> {
        let bib_text = read_text(&self.bib_path)?;
        let existing_doc = read_text_if_exists(&self.doc_path)?;
        let doc_created = existing_doc.is_none();
        let doc_text = existing_doc.unwrap_or_default();

        let outcome = self.reconciler.bootstrap(&bib_text, &doc_text);

        let doc_out = match outcome.doc_text {
            Some(text) => Some(text),
            None if doc_created => Some(self.reconciler.template().to_string()),
            None => None,
        };
        if let Some(text) = &doc_out {
            if doc_created {
                info!(path = %self.doc_path.display(), "Creating document from template");
            }
            self.write(Side::Doc, text)?;
        }
        if let Some(text) = &outcome.bib_text {
            self.write(Side::Bib, text)?;
        }

        self.snapshot = outcome.snapshot;
        info!(
            bib = %self.bib_path.display(),
            doc = %self.doc_path.display(),
            entries = self.snapshot.len(),
            malformed = outcome.errors.len(),
            "Pair synchronised"
        );

        Ok(BootstrapReport {
            doc_created,
            bib_written: outcome.bib_text.is_some(),
            doc_written: doc_out.is_some(),
            stats: outcome.stats,
            errors: outcome.errors,
        })
    }

    /// Propagate whatever changed in `source` to the other file.
    pub fn run_pass(&mut self, source: Side) -> Result<PassReport> {
        let source_text = read_text(self.path(source))?;
        if self.is_own_write(source, &source_text) {
            debug!(side = %source, "File holds our own last write, skipping pass");
            return Ok(PassReport {
                source,
                result: SyncResult::OwnWrite,
                errors: Vec::new(),
            });
        }
        self.last_written[source.index()] = None;

        let target = source.other();
        let other_text = read_text(self.path(target))?;

        let outcome = self
            .reconciler
            .reconcile(&self.snapshot, source, &source_text, &other_text);

        let result = match &outcome.other_text {
            Some(text) => {
                self.write(target, text)?;
                if outcome.other_pending {
                    // Let the next pass over the target pick up its own edits
                    self.last_written[target.index()] = None;
                }
                SyncResult::Written {
                    target,
                    stats: outcome.stats.clone(),
                    carries_edits: outcome.other_pending,
                }
            }
            None if outcome.plan.is_empty() => SyncResult::NoChanges,
            None => SyncResult::Absorbed {
                stats: outcome.stats.clone(),
            },
        };
        self.snapshot = outcome.snapshot;

        Ok(PassReport {
            source,
            result,
            errors: outcome.errors,
        })
    }

    fn write(&mut self, side: Side, text: &str) -> Result<()> {
        write_atomic(self.path(side), text)?;
        self.last_written[side.index()] = Some(sha256_hash(text));
        info!(path = %self.path(side).display(), side = %side, "Updated file");
        Ok(())
    }
}
