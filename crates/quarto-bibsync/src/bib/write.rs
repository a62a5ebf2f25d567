/*
 * bib/write.rs
 * Copyright (c) 2025 Posit, PBC
 *
 * Minimal-edit BibTeX writer.
 *
 * The previous text is rescanned and copied through; a record is touched
 * only when the wanted entry differs from what the text already says, and
 * then only the differing values are rewritten. New keys are appended.
 */

use std::collections::HashSet;
use std::ops::Range;

use tracing::warn;

use super::parse::{BibFile, RawField, RawRecord, ValueStyle, braces_balanced};
use crate::entry::{Entry, EntryMap};
use crate::ownership::FieldClass;

/// A pending replacement of `range` (absolute offsets) by `text`.
type Edit = (Range<usize>, String);

pub(crate) fn write_bib(mapping: &EntryMap, previous: &str, note_field: &str) -> String {
    let file = BibFile::scan(previous, note_field);
    let mut out = String::with_capacity(previous.len());
    let mut cursor = 0;

    for record in &file.records {
        out.push_str(&previous[cursor..record.span.start]);
        match mapping.get(record.key()) {
            Some(wanted) if *wanted != record.entry => {
                out.push_str(&patch_record(previous, record, wanted, note_field));
            }
            _ => out.push_str(&previous[record.span.clone()]),
        }
        cursor = record.span.end;
    }
    out.push_str(&previous[cursor..]);

    let indent = file.field_indent(previous);
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
        out.push_str(&render_record(entry, note_field, &indent));
        out.push('\n');
    }

    out
}

/// Render a record that does not exist in the file yet.
pub(crate) fn render_record(entry: &Entry, note_field: &str, indent: &str) -> String {
    let entry_type = entry.entry_type.as_deref().unwrap_or("misc");
    let mut lines: Vec<String> = entry
        .fields
        .iter()
        .map(|(name, value)| format!("{}{} = {}", indent, name, braced(value)))
        .collect();
    if let Some(note) = entry.note.as_deref().filter(|n| !n.is_empty()) {
        lines.push(format!("{}{} = {}", indent, note_field, braced(note)));
    }

    if lines.is_empty() {
        format!("@{}{{{},\n}}", entry_type, entry.key)
    } else {
        format!("@{}{{{},\n{}\n}}", entry_type, entry.key, lines.join(",\n"))
    }
}

fn patch_record(text: &str, record: &RawRecord, wanted: &Entry, note_field: &str) -> String {
    let mut edits: Vec<Edit> = Vec::new();

    if let Some(entry_type) = &wanted.entry_type {
        if !text[record.type_span.clone()].eq_ignore_ascii_case(entry_type) {
            edits.push((record.type_span.clone(), entry_type.clone()));
        }
    }

    let mut present = HashSet::new();
    let mut kept: Option<&RawField> = None;
    for field in &record.fields {
        if !present.insert(field.name.as_str()) {
            continue;
        }
        let desired = match FieldClass::of_field(&field.name, note_field) {
            FieldClass::Note => Some(wanted.note.as_deref().unwrap_or(&field.value)),
            FieldClass::Metadata => wanted.fields.get(&field.name).map(String::as_str),
        };
        match desired {
            Some(value) => {
                kept = Some(field);
                if value != field.value {
                    edits.push((field.value_span.clone(), format_value(value, field.style)));
                }
            }
            None => edits.push((removal_range(text, record, field), String::new())),
        }
    }

    let mut additions: Vec<(&str, &str)> = wanted
        .fields
        .iter()
        .filter(|(name, _)| !present.contains(name.as_str()))
        .map(|(name, value)| (name.as_str(), value.as_str()))
        .collect();
    let has_note_field = record
        .fields
        .iter()
        .any(|f| FieldClass::of_field(&f.name, note_field) == FieldClass::Note);
    if let Some(note) = wanted.note.as_deref().filter(|n| !n.is_empty()) {
        if !has_note_field {
            additions.push((note_field, note));
        }
    }
    if !additions.is_empty() {
        edits.push(insertion(text, record, kept, &additions));
    }

    apply_edits(text, record.span.clone(), edits)
}

/// Build the text for fields that are not in the record yet, placed after
/// the last surviving field (or the key) so the closing delimiter stays
/// where it is.
fn insertion(
    text: &str,
    record: &RawRecord,
    anchor_field: Option<&RawField>,
    additions: &[(&str, &str)],
) -> Edit {
    let indent = record.field_indent(text).unwrap_or_else(|| "  ".to_string());
    let bytes = text.as_bytes();
    let anchor = anchor_field.map_or(record.key_span.end, |f| f.value_span.end);

    let mut after = anchor;
    while after < record.close && bytes[after].is_ascii_whitespace() {
        after += 1;
    }
    let trailing_comma = after < record.close && bytes[after] == b',';

    let mut inserted = String::new();
    if trailing_comma {
        for (name, value) in additions {
            inserted.push_str(&format!("\n{}{} = {},", indent, name, braced(value)));
        }
        (after + 1..after + 1, inserted)
    } else {
        for (name, value) in additions {
            inserted.push_str(&format!(",\n{}{} = {}", indent, name, braced(value)));
        }
        if anchor_field.is_none() {
            inserted.push('\n');
        }
        (anchor..anchor, inserted)
    }
}

/// Range covering a field, its separating comma and, when the field sits on
/// its own line, the whole line.
fn removal_range(text: &str, record: &RawRecord, field: &RawField) -> Range<usize> {
    let bytes = text.as_bytes();
    let line_start = text[..field.span.start].rfind('\n').map_or(0, |i| i + 1);
    let own_line = line_start > record.span.start
        && bytes[line_start..field.span.start]
            .iter()
            .all(|b| *b == b' ' || *b == b'\t');
    let start = if own_line { line_start } else { field.span.start };

    let mut end = field.value_span.end;
    let mut probe = end;
    while probe < record.close && (bytes[probe] == b' ' || bytes[probe] == b'\t') {
        probe += 1;
    }
    if probe < record.close && bytes[probe] == b',' {
        end = probe + 1;
    }
    if own_line {
        let mut probe = end;
        while probe < record.close && (bytes[probe] == b' ' || bytes[probe] == b'\t') {
            probe += 1;
        }
        if probe < record.close && bytes[probe] == b'\n' {
            end = probe + 1;
        }
    }
    start..end
}

fn apply_edits(text: &str, span: Range<usize>, mut edits: Vec<Edit>) -> String {
    edits.sort_by_key(|(range, _)| range.start);
    let mut out = String::with_capacity(span.len());
    let mut cursor = span.start;
    for (range, replacement) in edits {
        if range.start < cursor {
            continue;
        }
        out.push_str(&text[cursor..range.start]);
        out.push_str(&replacement);
        cursor = range.end;
    }
    out.push_str(&text[cursor..span.end]);
    out
}

fn format_value(value: &str, style: ValueStyle) -> String {
    match style {
        ValueStyle::Quoted if !value.contains('"') && braces_balanced(value) => {
            format!("\"{}\"", value)
        }
        ValueStyle::Bare if !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()) => {
            value.to_string()
        }
        _ => braced(value),
    }
}

fn braced(value: &str) -> String {
    if braces_balanced(value) {
        return format!("{{{}}}", value);
    }
    warn!("Escaping unbalanced braces in bib value");
    let mut escaped = String::with_capacity(value.len() + 8);
    let mut prev_backslash = false;
    for c in value.chars() {
        if (c == '{' || c == '}') && !prev_backslash {
            escaped.push('\\');
        }
        prev_backslash = c == '\\' && !prev_backslash;
        escaped.push(c);
    }
    format!("{{{}}}", escaped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bib::BibAdapter;

    const TWO_RECORDS: &str = "% Encoding: UTF-8\n\n@Article{smith2020,\n  author    = {Smith, Jane},\n  title     = {On Things},\n  year      = 2020,\n  custom-x  = {kept as is},\n  comment   = {Old note}\n}\n\n@book{doe1999,\n  title = \"A Book\",\n  year = {1999},\n}\n\n@comment{jabref-meta: databaseType:bibtex;}\n";

    fn adapter() -> BibAdapter {
        BibAdapter::default()
    }

    #[test]
    fn test_unchanged_mapping_is_identity() {
        let parsed = adapter().parse(TWO_RECORDS);
        assert_eq!(adapter().serialize(&parsed.entries, TWO_RECORDS), TWO_RECORDS);
    }

    #[test]
    fn test_note_change_touches_only_comment_value() {
        let mut entries = adapter().parse(TWO_RECORDS).entries;
        entries.get_mut("smith2020").unwrap().note = Some("New note".into());

        let out = adapter().serialize(&entries, TWO_RECORDS);
        assert_eq!(out, TWO_RECORDS.replace("{Old note}", "{New note}"));
    }

    #[test]
    fn test_note_added_after_trailing_comma() {
        let mut entries = adapter().parse(TWO_RECORDS).entries;
        entries.get_mut("doe1999").unwrap().note = Some("Borrowed".into());

        let out = adapter().serialize(&entries, TWO_RECORDS);
        assert!(out.contains("  year = {1999},\n  comment = {Borrowed},\n}"));
        assert!(out.starts_with("% Encoding: UTF-8\n\n@Article{smith2020,"));
    }

    #[test]
    fn test_note_added_without_trailing_comma() {
        let text = "@misc{a,\n  title = {A}\n}\n";
        let mut entries = adapter().parse(text).entries;
        entries.get_mut("a").unwrap().note = Some("hello".into());

        let out = adapter().serialize(&entries, text);
        assert_eq!(out, "@misc{a,\n  title = {A},\n  comment = {hello}\n}\n");
    }

    #[test]
    fn test_note_added_to_record_without_fields() {
        let text = "@misc{bare}\n";
        let mut entries = adapter().parse(text).entries;
        entries.get_mut("bare").unwrap().note = Some("n".into());

        let out = adapter().serialize(&entries, text);
        assert_eq!(out, "@misc{bare,\n  comment = {n}\n}\n");
        assert_eq!(adapter().parse(&out).entries["bare"].note.as_deref(), Some("n"));
    }

    #[test]
    fn test_empty_note_does_not_add_field() {
        let text = "@misc{a,\n  title = {A}\n}\n";
        let mut entries = adapter().parse(text).entries;
        entries.get_mut("a").unwrap().note = Some(String::new());

        assert_eq!(adapter().serialize(&entries, text), text);
    }

    #[test]
    fn test_metadata_change_keeps_quote_style() {
        let mut entries = adapter().parse(TWO_RECORDS).entries;
        entries
            .get_mut("doe1999")
            .unwrap()
            .fields
            .insert("title".into(), "A Better Book".into());

        let out = adapter().serialize(&entries, TWO_RECORDS);
        assert!(out.contains("title = \"A Better Book\","));
    }

    #[test]
    fn test_removed_field_drops_its_line() {
        let mut entries = adapter().parse(TWO_RECORDS).entries;
        entries.get_mut("smith2020").unwrap().fields.remove("year");

        let out = adapter().serialize(&entries, TWO_RECORDS);
        assert!(!out.contains("2020,\n  custom"));
        assert!(out.contains("  title     = {On Things},\n  custom-x  = {kept as is},"));
    }

    #[test]
    fn test_new_entry_appended() {
        let mut entries = adapter().parse(TWO_RECORDS).entries;
        entries.insert(
            "new2024".into(),
            Entry::new("new2024")
                .with_type("misc")
                .with_field("title", "Fresh")
                .with_note("From the notes"),
        );

        let out = adapter().serialize(&entries, TWO_RECORDS);
        assert!(out.starts_with(TWO_RECORDS));
        assert!(out.ends_with(
            "\n\n@misc{new2024,\n  title = {Fresh},\n  comment = {From the notes}\n}\n"
        ));

        let reparsed = adapter().parse(&out);
        assert!(reparsed.errors.is_empty());
        assert_eq!(reparsed.entries.len(), 3);
    }

    #[test]
    fn test_new_entry_in_empty_file() {
        let mut entries = EntryMap::new();
        entries.insert("k".into(), Entry::new("k").with_field("title", "T"));
        let out = adapter().serialize(&entries, "");
        assert_eq!(out, "@misc{k,\n  title = {T}\n}\n");
    }

    #[test]
    fn test_malformed_record_is_not_duplicated() {
        let text = "@misc{bad, title {oops}}\n";
        let mut entries = EntryMap::new();
        entries.insert("bad".into(), Entry::new("bad").with_note("note"));

        assert_eq!(adapter().serialize(&entries, text), text);
    }

    #[test]
    fn test_unbalanced_note_is_escaped() {
        let text = "@misc{a,\n  comment = {x}\n}\n";
        let mut entries = adapter().parse(text).entries;
        entries.get_mut("a").unwrap().note = Some("uses a { brace".into());

        let out = adapter().serialize(&entries, text);
        assert!(out.contains("comment = {uses a \\{ brace}"));
        let reparsed = adapter().parse(&out);
        assert!(reparsed.errors.is_empty());
        assert_eq!(reparsed.entries["a"].note.as_deref(), Some("uses a \\{ brace"));
    }

    #[test]
    fn test_multiline_note() {
        let text = "@misc{a,\n  title = {A}\n}\n";
        let mut entries = adapter().parse(text).entries;
        entries.get_mut("a").unwrap().note = Some("line one\n\nline two".into());

        let out = adapter().serialize(&entries, text);
        let reparsed = adapter().parse(&out);
        assert_eq!(reparsed.entries["a"].note.as_deref(), Some("line one\n\nline two"));
        assert_eq!(adapter().serialize(&reparsed.entries, &out), out);
    }
}
