/*
 * mod.rs
 * Copyright (c) 2025 Posit, PBC
 *
 * Reconciliation between the bib file and the notes document.
 *
 * A pass is split into two phases:
 * 1. Compute: diff the changed side against the snapshot, restricted to the
 *    classes that side owns, and produce a ReconcilePlan
 * 2. Apply: carry the plan onto the other side's entries, then serialize
 *    the other file through its adapter
 *
 * Reconciliation is pure: it takes texts and a snapshot and returns texts
 * and a snapshot. Reading, writing and committing the snapshot belong to
 * the caller.
 */

mod apply;
mod compute;
mod types;

pub use apply::{Application, apply_plan};
pub use compute::compute_plan;
pub use types::{
    BootstrapOutcome, ChangeKind, DocOnlyKeys, PassOutcome, PlannedChange, ReconcileOptions,
    ReconcilePlan, ReconcileStats,
};

use tracing::{debug, info};

use crate::bib::BibAdapter;
use crate::doc::DocAdapter;
use crate::entry::{EntryMap, Parsed};
use crate::ownership::Side;
use crate::snapshot::Snapshot;

/// Both adapters plus the policy that decides what a change turns into.
#[derive(Debug, Clone)]
pub struct Reconciler {
    bib: BibAdapter,
    doc: DocAdapter,
    options: ReconcileOptions,
    /// Prefix used when the document has to be written from scratch
    template: String,
}

impl Reconciler {
    pub fn new(options: ReconcileOptions, template: impl Into<String>) -> Self {
        Self {
            bib: BibAdapter::new(options.note_field.clone()),
            doc: DocAdapter,
            options,
            template: template.into(),
        }
    }

    pub fn options(&self) -> &ReconcileOptions {
        &self.options
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn parse(&self, side: Side, text: &str) -> Parsed {
        match side {
            Side::Bib => self.bib.parse(text),
            Side::Doc => self.doc.parse(text),
        }
    }

    pub fn serialize(&self, side: Side, mapping: &EntryMap, previous: &str) -> String {
        match side {
            Side::Bib => self.bib.serialize(mapping, previous),
            Side::Doc => self.doc.serialize(mapping, previous, &self.template),
        }
    }

    /// Run one pass for a change on `source`.
    ///
    /// `source_text` is the changed file, `other_text` the current text of
    /// the file the change is propagated to. The returned snapshot absorbs
    /// what `source` owns for every key it has, plus the entries this pass
    /// created on the other side. Entries that merely received an update
    /// keep their previous snapshot state for the other side's classes, so
    /// an edit on the other file that has not had its own pass yet is still
    /// detected later.
    pub fn reconcile(
        &self,
        snapshot: &Snapshot,
        source: Side,
        source_text: &str,
        other_text: &str,
    ) -> PassOutcome {
        let current = self.parse(source, source_text);
        let other = self.parse(source.other(), other_text);

        let plan = compute_plan(snapshot, source, &current.entries);
        if plan.is_empty() {
            debug!(source = %source, entries = current.entries.len(), "No changes to propagate");
        }
        let app = apply_plan(&plan, &current, &other, &self.options);

        let mut next_snapshot = snapshot.clone();
        for entry in current.entries.values() {
            if !app.skipped.contains(&entry.key) {
                next_snapshot.absorb(entry, source);
            }
        }
        for key in &app.created {
            if let Some(entry) = app.next_other.get(key) {
                next_snapshot.absorb(entry, source.other());
            }
        }

        let other_pending =
            !compute_plan(&next_snapshot, source.other(), &other.entries).is_empty();

        let serialized = self.serialize(source.other(), &app.next_other, other_text);
        let other_text = (serialized != other_text).then_some(serialized);

        if !plan.is_empty() {
            info!(
                source = %source,
                added = app.stats.added,
                changed = app.stats.changed,
                updated = app.stats.updated,
                created = app.stats.created,
                inert = app.stats.inert,
                skipped = app.stats.skipped,
                rewrite = other_text.is_some(),
                "Reconciled"
            );
        }

        let mut errors = current.errors;
        errors.extend(other.errors);

        PassOutcome {
            plan,
            stats: app.stats,
            other_text,
            snapshot: next_snapshot,
            other_pending,
            errors,
        }
    }

    /// Startup synchronisation with no prior snapshot.
    ///
    /// Every key of each file counts as added: bib metadata flows into the
    /// document (creating missing blocks) and document notes flow into the
    /// bib file (creating stubs per policy). Both plans are computed from the
    /// texts as given, so neither direction sees the other's output.
    pub fn bootstrap(&self, bib_text: &str, doc_text: &str) -> BootstrapOutcome {
        let bib = self.bib.parse(bib_text);
        let doc = self.doc.parse(doc_text);
        let empty = Snapshot::new();

        let to_doc = apply_plan(
            &compute_plan(&empty, Side::Bib, &bib.entries),
            &bib,
            &doc,
            &self.options,
        );
        let mut doc_plan = compute_plan(&empty, Side::Doc, &doc.entries);
        // A block nobody has written in yet must not blank a note the bib
        // file already carries (a document created earlier without seeding).
        doc_plan.changes.retain(|change| {
            let blank_block = doc
                .entries
                .get(&change.key)
                .is_some_and(|block| block.note_text().trim().is_empty());
            let bib_note = bib
                .entries
                .get(&change.key)
                .is_some_and(|record| !record.note_text().trim().is_empty());
            !(blank_block && bib_note)
        });
        let to_bib = apply_plan(&doc_plan, &doc, &bib, &self.options);

        // Keys held back by a malformed target stay out of the snapshot on
        // the source side, so the change is retried once the record is fixed.
        let mut snapshot = Snapshot::new();
        for entry in to_bib.next_other.values() {
            if !to_doc.skipped.contains(&entry.key) {
                snapshot.absorb(entry, Side::Bib);
            }
        }
        for entry in to_doc.next_other.values() {
            if !to_bib.skipped.contains(&entry.key) {
                snapshot.absorb(entry, Side::Doc);
            }
        }

        let next_bib = self.bib.serialize(&to_bib.next_other, bib_text);
        let next_doc = self
            .doc
            .serialize(&to_doc.next_other, doc_text, &self.template);

        let mut stats = to_doc.stats;
        stats.merge(&to_bib.stats);
        info!(
            bib_entries = bib.entries.len(),
            doc_entries = doc.entries.len(),
            blocks_created = to_doc.created.len(),
            stubs_created = to_bib.created.len(),
            "Initial synchronisation computed"
        );

        let mut errors = bib.errors;
        errors.extend(doc.errors);

        BootstrapOutcome {
            bib_text: (next_bib != bib_text).then_some(next_bib),
            doc_text: (next_doc != doc_text).then_some(next_doc),
            snapshot,
            stats,
            errors,
        }
    }
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new(ReconcileOptions::default(), String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BIB: &str = "% Encoding: UTF-8\n\n@article{smith2020,\n  author = {Smith, Jane},\n  title = {On {RNA} Things},\n  year = 2020,\n  comment = {Read twice.}\n}\n\n@book{doe1999,\n  title = {A Book},\n  year = 1999\n}\n";

    const DOC: &str = "---\ntitle: Notes\n---\n\n### On RNA Things\n<br>@smith2020\n\n::: notes\n<!-- smith2020 -->\n\nRead twice.\n\n:::\n\n### A Book\n<br>@doe1999\n\n::: notes\n<!-- doe1999 -->\n\n:::\n";

    fn synced() -> (Reconciler, Snapshot) {
        let reconciler = Reconciler::default();
        let outcome = reconciler.bootstrap(BIB, DOC);
        assert!(outcome.bib_text.is_none());
        assert!(outcome.doc_text.is_none());
        (reconciler, outcome.snapshot)
    }

    #[test]
    fn test_bootstrap_of_consistent_pair_writes_nothing() {
        let (_, snapshot) = synced();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.get("smith2020").unwrap().note_text(), "Read twice.");
        assert_eq!(snapshot.get("doe1999").unwrap().field("year"), Some("1999"));
    }

    #[test]
    fn test_bootstrap_creates_document_from_template() {
        let reconciler = Reconciler::new(ReconcileOptions::default(), "---\ntitle: T\n---\n\n");
        let outcome = reconciler.bootstrap(BIB, "");
        let doc = outcome.doc_text.unwrap();
        assert!(doc.starts_with("---\ntitle: T\n---\n\n### On RNA Things\n<br>@smith2020\n"));
        assert!(doc.contains("### A Book\n<br>@doe1999\n"));
        assert!(outcome.bib_text.is_none());
        assert_eq!(outcome.stats.created, 2);
    }

    #[test]
    fn test_bootstrap_pushes_notes_and_stubs_into_bib() {
        let talk = "\n### Heard at a talk\n<br>@talk2024\n\n::: notes\n<!-- talk2024 -->\n\nask for slides\n\n:::\n";
        let doc = DOC.replace(
            "<!-- doe1999 -->\n\n",
            "<!-- doe1999 -->\n\nBorrowed from the library.\n\n",
        ) + talk;
        let outcome = Reconciler::default().bootstrap(BIB, &doc);
        let bib = outcome.bib_text.unwrap();
        assert!(bib.contains("  year = 1999,\n  comment = {Borrowed from the library.}\n}"));
        assert!(bib.ends_with(
            "@misc{talk2024,\n  title = {Heard at a talk},\n  comment = {ask for slides}\n}\n"
        ));
        assert!(outcome.doc_text.is_none());
    }

    #[test]
    fn test_new_bib_key_gets_block_with_empty_note() {
        let (reconciler, snapshot) = synced();
        let bib = format!(
            "{}\n@misc{{new2024,\n  title = {{Fresh}},\n  comment = {{c}}\n}}\n",
            BIB
        );

        let outcome = reconciler.reconcile(&snapshot, Side::Bib, &bib, DOC);
        assert_eq!(outcome.stats.created, 1);
        let expected = format!(
            "{}\n### Fresh\n<br>@new2024\n\n::: notes\n<!-- new2024 -->\n\n:::\n",
            DOC
        );
        assert_eq!(outcome.other_text.as_deref(), Some(expected.as_str()));
        assert!(outcome.snapshot.contains("new2024"));
        assert!(!outcome.other_pending);
    }

    #[test]
    fn test_note_edit_updates_only_comment() {
        let (reconciler, snapshot) = synced();
        let doc = DOC.replace("Read twice.", "Read three times.");

        let outcome = reconciler.reconcile(&snapshot, Side::Doc, &doc, BIB);
        assert_eq!(
            outcome.other_text.as_deref(),
            Some(BIB.replace("{Read twice.}", "{Read three times.}").as_str())
        );
        assert_eq!(
            outcome.snapshot.get("smith2020").unwrap().note_text(),
            "Read three times."
        );
    }

    #[test]
    fn test_doc_title_edit_is_not_propagated() {
        let (reconciler, snapshot) = synced();
        let doc = DOC.replace("### A Book", "### A Much Better Title");

        let outcome = reconciler.reconcile(&snapshot, Side::Doc, &doc, BIB);
        assert!(outcome.plan.is_empty());
        assert!(outcome.other_text.is_none());
    }

    #[test]
    fn test_bib_metadata_change_rewrites_heading() {
        let (reconciler, snapshot) = synced();
        let bib = BIB.replace("{A Book}", "{A Second Book}");

        let outcome = reconciler.reconcile(&snapshot, Side::Bib, &bib, DOC);
        assert_eq!(
            outcome.other_text.as_deref(),
            Some(DOC.replace("### A Book", "### A Second Book").as_str())
        );
    }

    #[test]
    fn test_second_pass_is_idempotent() {
        let (reconciler, snapshot) = synced();
        let doc = DOC.replace("Read twice.", "Changed.");

        let first = reconciler.reconcile(&snapshot, Side::Doc, &doc, BIB);
        let bib = first.other_text.clone().unwrap();
        let second = reconciler.reconcile(&first.snapshot, Side::Doc, &doc, &bib);
        assert!(second.plan.is_empty());
        assert!(second.other_text.is_none());

        let echo = reconciler.reconcile(&first.snapshot, Side::Bib, &bib, &doc);
        assert!(echo.plan.is_empty());
        assert!(echo.other_text.is_none());
    }

    #[test]
    fn test_one_malformed_record_among_ten() {
        let mut bib = String::new();
        for i in 0..9 {
            bib.push_str(&format!("@misc{{key{},\n  title = {{Title {}}}\n}}\n\n", i, i));
        }
        bib.push_str("@misc{broken,\n  title {missing equals}\n}\n");

        let reconciler = Reconciler::default();
        let outcome = reconciler.reconcile(&Snapshot::new(), Side::Bib, &bib, "");
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].key.as_deref(), Some("broken"));
        assert_eq!(outcome.stats.created, 9);

        let doc = outcome.other_text.unwrap();
        let parsed = reconciler.parse(Side::Doc, &doc);
        assert_eq!(parsed.entries.len(), 9);
        assert!(!parsed.entries.contains_key("broken"));
    }

    #[test]
    fn test_deleted_block_stays_deleted() {
        let (reconciler, snapshot) = synced();
        let start = DOC.find("### A Book").unwrap();
        let doc = DOC[..start].to_string();
        let bib = BIB.replace("{A Book}", "{Renamed}");

        let outcome = reconciler.reconcile(&snapshot, Side::Bib, &bib, &doc);
        assert_eq!(outcome.stats.inert, 1);
        assert!(outcome.other_text.is_none());
    }

    #[test]
    fn test_pending_doc_edit_survives_bib_pass() {
        let (reconciler, snapshot) = synced();
        let doc = DOC.replace("Read twice.", "Edited, not yet synced.");
        let bib = BIB.replace("year = 2020", "year = 2021");

        let bib_pass = reconciler.reconcile(&snapshot, Side::Bib, &bib, &doc);
        assert_eq!(
            bib_pass.snapshot.get("smith2020").unwrap().note_text(),
            "Read twice."
        );

        assert!(bib_pass.other_pending);

        let doc_pass = reconciler.reconcile(&bib_pass.snapshot, Side::Doc, &doc, &bib);
        assert_eq!(doc_pass.plan.changes.len(), 1);
        assert!(
            doc_pass
                .other_text
                .unwrap()
                .contains("comment = {Edited, not yet synced.}")
        );
    }

    #[test]
    fn test_change_to_malformed_target_is_retried() {
        let (reconciler, snapshot) = synced();
        let broken_bib = BIB.replace("title = {A Book}", "title {A Book}");
        let doc = DOC.replace("<!-- doe1999 -->\n\n", "<!-- doe1999 -->\n\nlater\n\n");

        let outcome = reconciler.reconcile(&snapshot, Side::Doc, &doc, &broken_bib);
        assert_eq!(outcome.stats.skipped, 1);
        assert!(outcome.other_text.is_none());
        assert_eq!(outcome.snapshot.get("doe1999").unwrap().note_text(), "");

        let fixed = reconciler.reconcile(&outcome.snapshot, Side::Doc, &doc, BIB);
        assert!(fixed.other_text.unwrap().contains("comment = {later}"));
    }

    #[test]
    fn test_bootstrap_note_for_malformed_record_is_retried() {
        let broken_bib = "@misc{k, title {broken}}\n";
        let doc = "### Broken\n<br>@k\n\n::: notes\n<!-- k -->\n\nimportant note\n\n:::\n";
        let reconciler = Reconciler::default();

        let outcome = reconciler.bootstrap(broken_bib, doc);
        assert_eq!(outcome.stats.skipped, 1);
        assert!(outcome.bib_text.is_none());
        assert!(!outcome.snapshot.contains("k"));

        let fixed_bib = "@misc{k,\n  title = {Broken}\n}\n";
        let bib_pass = reconciler.reconcile(&outcome.snapshot, Side::Bib, fixed_bib, doc);
        let doc = bib_pass.other_text.as_deref().unwrap_or(doc);
        let doc_pass = reconciler.reconcile(&bib_pass.snapshot, Side::Doc, doc, fixed_bib);
        assert_eq!(
            doc_pass.other_text.as_deref(),
            Some("@misc{k,\n  title = {Broken},\n  comment = {important note}\n}\n")
        );
    }

    #[test]
    fn test_restart_keeps_bib_notes_of_unwritten_blocks() {
        let bib = BIB.replace("  year = 1999\n", "  year = 1999,\n  comment = {From the bib}\n");
        let reconciler = Reconciler::new(ReconcileOptions::default(), "---\ntitle: T\n---\n\n");

        let first = reconciler.bootstrap(&bib, "");
        assert!(first.bib_text.is_none());
        let doc = first.doc_text.unwrap();

        let restart = reconciler.bootstrap(&bib, &doc);
        assert!(restart.bib_text.is_none());
        assert!(restart.doc_text.is_none());
        assert_eq!(restart.snapshot.get("doe1999").unwrap().note_text(), "");

        // Writing the note afterwards still reaches the bib file
        let doc = doc.replace("<!-- doe1999 -->\n\n", "<!-- doe1999 -->\n\nMine now.\n\n");
        let pass = reconciler.reconcile(&restart.snapshot, Side::Doc, &doc, &bib);
        assert!(pass.other_text.unwrap().contains("comment = {Mine now.}"));
    }
}
