/*
 * compute.rs
 * Copyright (c) 2025 Posit, PBC
 *
 * Compute which keys changed on one side since the snapshot.
 */

use super::types::{ChangeKind, PlannedChange, ReconcilePlan};
use crate::entry::EntryMap;
use crate::ownership::{Side, owned_by};
use crate::snapshot::Snapshot;

/// Compare the freshly parsed `current` entries of `source` against the
/// snapshot.
///
/// Only the classes `source` owns are compared: a title edited in the
/// document or a comment edited in the bib file never shows up here.
pub fn compute_plan(snapshot: &Snapshot, source: Side, current: &EntryMap) -> ReconcilePlan {
    let changes = current
        .values()
        .filter_map(|entry| {
            let kind = match snapshot.get(&entry.key) {
                None => ChangeKind::Added,
                Some(known) if owned_by(source).any(|class| entry.differs_in(known, class)) => {
                    ChangeKind::Changed
                }
                Some(_) => return None,
            };
            Some(PlannedChange {
                key: entry.key.clone(),
                kind,
            })
        })
        .collect();

    ReconcilePlan { source, changes }
}
