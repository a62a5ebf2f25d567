/*
 * apply.rs
 * Copyright (c) 2025 Posit, PBC
 *
 * Apply a reconcile plan onto the other side's entries.
 */

use std::collections::HashSet;

use tracing::{debug, warn};

use super::types::{ChangeKind, DocOnlyKeys, ReconcileOptions, ReconcilePlan, ReconcileStats};
use crate::entry::{Entry, EntryMap, Parsed};
use crate::ownership::{FieldClass, Side, owned_by};

/// The other side's entries after a plan has been applied.
#[derive(Debug, Clone, Default)]
pub struct Application {
    pub next_other: EntryMap,

    /// Keys whose entry was created on the other side by this application
    pub created: Vec<String>,

    /// Keys whose change was held back because the other side's record for
    /// them is malformed
    pub skipped: HashSet<String>,

    pub stats: ReconcileStats,
}

/// Carry the changes of `plan` from `current` (the source side) onto a copy
/// of `other`.
///
/// Only the classes owned by the source side are copied. A key missing on
/// the other side gets a new entry when it is new to the snapshot and is
/// left alone (inert) when it was deleted there.
pub fn apply_plan(
    plan: &ReconcilePlan,
    current: &Parsed,
    other: &Parsed,
    options: &ReconcileOptions,
) -> Application {
    let source = plan.source;
    let mut app = Application {
        next_other: other.entries.clone(),
        ..Default::default()
    };

    for change in &plan.changes {
        match change.kind {
            ChangeKind::Added => app.stats.added += 1,
            ChangeKind::Changed => app.stats.changed += 1,
        }
        let Some(entry) = current.entries.get(&change.key) else {
            continue;
        };

        if other.unusable_keys.contains(&change.key) {
            warn!(
                key = %change.key,
                target = %source.other(),
                "Not propagating change: target record is malformed"
            );
            app.stats.skipped += 1;
            app.skipped.insert(change.key.clone());
            continue;
        }

        if let Some(target) = app.next_other.get_mut(&change.key) {
            for class in owned_by(source) {
                target.adopt(entry, class);
            }
            app.stats.updated += 1;
            continue;
        }

        let counterpart = match change.kind {
            ChangeKind::Added => new_counterpart(source, entry, options),
            ChangeKind::Changed => None,
        };
        match counterpart {
            Some(created) => {
                app.next_other.insert(change.key.clone(), created);
                app.created.push(change.key.clone());
                app.stats.created += 1;
            }
            None => {
                debug!(
                    key = %change.key,
                    target = %source.other(),
                    "Key absent on target side, leaving it alone"
                );
                app.stats.inert += 1;
            }
        }
    }

    app
}

/// The entry to create on the other side for a key new on `source`.
fn new_counterpart(source: Side, entry: &Entry, options: &ReconcileOptions) -> Option<Entry> {
    match source {
        Side::Bib => {
            let mut block = Entry::new(entry.key.clone());
            block.adopt(entry, FieldClass::Metadata);
            if options.seed_note_from_bib {
                block.adopt(entry, FieldClass::Note);
            }
            Some(block)
        }
        Side::Doc => match options.doc_only_keys {
            DocOnlyKeys::Ignore => None,
            DocOnlyKeys::Stub => {
                let mut stub = Entry::new(entry.key.clone()).with_type(&options.stub_entry_type);
                if let Some(title) = entry.title().filter(|t| !t.trim().is_empty()) {
                    stub = stub.with_field("title", title);
                }
                stub.adopt(entry, FieldClass::Note);
                Some(stub)
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::types::PlannedChange;

    fn parsed(entries: Vec<Entry>) -> Parsed {
        Parsed {
            entries: entries.into_iter().map(|e| (e.key.clone(), e)).collect(),
            ..Default::default()
        }
    }

    fn plan(source: Side, changes: &[(&str, ChangeKind)]) -> ReconcilePlan {
        ReconcilePlan {
            source,
            changes: changes
                .iter()
                .map(|(key, kind)| PlannedChange {
                    key: key.to_string(),
                    kind: *kind,
                })
                .collect(),
        }
    }

    #[test]
    fn test_bib_change_updates_existing_block_metadata() {
        let bib = parsed(vec![
            Entry::new("a")
                .with_type("article")
                .with_field("title", "New")
                .with_note("bib comment"),
        ]);
        let doc = parsed(vec![Entry::new("a").with_field("title", "Old").with_note("mine")]);

        let app = apply_plan(
            &plan(Side::Bib, &[("a", ChangeKind::Changed)]),
            &bib,
            &doc,
            &ReconcileOptions::default(),
        );
        let block = &app.next_other["a"];
        assert_eq!(block.title(), Some("New"));
        assert_eq!(block.note_text(), "mine");
        assert_eq!(app.stats.updated, 1);
        assert!(app.created.is_empty());
    }

    #[test]
    fn test_new_bib_key_creates_block_with_empty_note() {
        let bib = parsed(vec![
            Entry::new("n").with_field("title", "N").with_note("from jabref"),
        ]);
        let app = apply_plan(
            &plan(Side::Bib, &[("n", ChangeKind::Added)]),
            &bib,
            &Parsed::default(),
            &ReconcileOptions::default(),
        );
        assert_eq!(app.next_other["n"].note, None);
        assert_eq!(app.created, vec!["n".to_string()]);
    }

    #[test]
    fn test_seed_note_from_bib() {
        let bib = parsed(vec![
            Entry::new("n").with_field("title", "N").with_note("from jabref"),
        ]);
        let options = ReconcileOptions {
            seed_note_from_bib: true,
            ..Default::default()
        };
        let app = apply_plan(
            &plan(Side::Bib, &[("n", ChangeKind::Added)]),
            &bib,
            &Parsed::default(),
            &options,
        );
        assert_eq!(app.next_other["n"].note_text(), "from jabref");
    }

    #[test]
    fn test_doc_only_key_becomes_stub() {
        let doc = parsed(vec![
            Entry::new("s").with_field("title", "Seen at a talk").with_note("ask for slides"),
        ]);
        let app = apply_plan(
            &plan(Side::Doc, &[("s", ChangeKind::Added)]),
            &doc,
            &Parsed::default(),
            &ReconcileOptions::default(),
        );
        let stub = &app.next_other["s"];
        assert_eq!(stub.entry_type.as_deref(), Some("misc"));
        assert_eq!(stub.title(), Some("Seen at a talk"));
        assert_eq!(stub.note_text(), "ask for slides");
    }

    #[test]
    fn test_doc_only_key_ignored() {
        let doc = parsed(vec![Entry::new("s").with_note("x")]);
        let options = ReconcileOptions {
            doc_only_keys: DocOnlyKeys::Ignore,
            ..Default::default()
        };
        let app = apply_plan(
            &plan(Side::Doc, &[("s", ChangeKind::Added)]),
            &doc,
            &Parsed::default(),
            &options,
        );
        assert!(app.next_other.is_empty());
        assert_eq!(app.stats.inert, 1);
    }

    #[test]
    fn test_change_for_deleted_key_is_inert() {
        let bib = parsed(vec![Entry::new("gone").with_field("title", "G2")]);
        let app = apply_plan(
            &plan(Side::Bib, &[("gone", ChangeKind::Changed)]),
            &bib,
            &Parsed::default(),
            &ReconcileOptions::default(),
        );
        assert!(app.next_other.is_empty());
        assert_eq!(app.stats.inert, 1);
        assert_eq!(app.stats.changed, 1);
    }

    #[test]
    fn test_malformed_target_is_skipped() {
        let doc = parsed(vec![Entry::new("k").with_note("new note")]);
        let mut bib = Parsed::default();
        bib.unusable_keys.insert("k".into());

        let app = apply_plan(
            &plan(Side::Doc, &[("k", ChangeKind::Changed)]),
            &doc,
            &bib,
            &ReconcileOptions::default(),
        );
        assert!(app.next_other.is_empty());
        assert!(app.skipped.contains("k"));
        assert_eq!(app.stats.skipped, 1);
    }
}
