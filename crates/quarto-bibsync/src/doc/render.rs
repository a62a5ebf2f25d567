/*
 * doc/render.rs
 * Copyright (c) 2025 Posit, PBC
 *
 * Rendering of citation blocks and minimal-edit document writer.
 */

use super::parse::DocFile;
use crate::entry::{Entry, EntryMap};
use crate::ownership::FieldClass;

/// Title as shown in a heading: protective braces dropped, whitespace
/// collapsed onto one line, the key when there is no usable title.
pub(crate) fn render_title(entry: &Entry) -> String {
    let raw = entry.title().unwrap_or("");
    let mut stripped = String::with_capacity(raw.len());
    let mut prev_backslash = false;
    for c in raw.chars() {
        if (c == '{' || c == '}') && !prev_backslash {
            prev_backslash = false;
            continue;
        }
        prev_backslash = c == '\\' && !prev_backslash;
        stripped.push(c);
    }
    let title = stripped.split_whitespace().collect::<Vec<_>>().join(" ");
    if title.is_empty() {
        entry.key.clone()
    } else {
        title
    }
}

fn render_heading(entry: &Entry) -> String {
    format!("### {}", render_title(entry))
}

fn render_citation(key: &str) -> String {
    format!("<br>@{}", key)
}

/// A complete block for a key the document does not have yet.
pub(crate) fn render_block(entry: &Entry) -> String {
    let mut block = format!(
        "{}\n{}\n\n::: notes\n<!-- {} -->\n\n",
        render_heading(entry),
        render_citation(&entry.key),
        entry.key
    );
    let note = entry.note_text().trim();
    if !note.is_empty() {
        block.push_str(note);
        block.push_str("\n\n");
    }
    block.push_str(":::\n");
    block
}

pub(crate) fn write_doc(mapping: &EntryMap, previous: &str, template: &str) -> String {
    let base = if previous.trim().is_empty() {
        template
    } else {
        previous
    };
    let file = DocFile::scan(base);
    let mut out = String::with_capacity(base.len());
    let mut cursor = 0;

    for block in &file.blocks {
        let Some(wanted) = mapping.get(&block.entry.key) else {
            continue;
        };
        if !wanted.differs_in(&block.entry, FieldClass::Metadata) {
            continue;
        }
        out.push_str(&base[cursor..block.heading.start]);
        out.push_str(&render_heading(wanted));
        out.push_str(&base[block.heading.end..block.citation.start]);
        out.push_str(&render_citation(&wanted.key));
        cursor = block.citation.end;
    }
    out.push_str(&base[cursor..]);

    for (key, entry) in mapping {
        if file.contains(key) {
            continue;
        }
        if !out.is_empty() {
            if !out.ends_with('\n') {
                out.push('\n');
            }
            if !out.ends_with("\n\n") {
                out.push('\n');
            }
        }
        out.push_str(&render_block(entry));
    }

    out
}
