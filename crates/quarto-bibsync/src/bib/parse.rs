/*
 * bib/parse.rs
 * Copyright (c) 2025 Posit, PBC
 *
 * Span-preserving BibTeX scanner.
 *
 * Records are located by their `@type{` header and a balanced scan to the
 * closing delimiter. Every record and field keeps its byte range in the
 * source so the writer can copy untouched text through verbatim and patch
 * only the values that changed.
 */

use std::collections::HashSet;
use std::ops::Range;

use tracing::warn;

use crate::entry::Entry;
use crate::error::RecordError;
use crate::ownership::{FieldClass, Side};

/// How a field value was delimited in the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ValueStyle {
    Braced,
    Quoted,
    Bare,
    Concatenated,
}

#[derive(Debug, Clone)]
pub(crate) struct RawField {
    /// Lower-cased field name
    pub name: String,
    /// From the first character of the name to the end of the value
    pub span: Range<usize>,
    pub value_span: Range<usize>,
    /// Value with its outer delimiters removed
    pub value: String,
    pub style: ValueStyle,
}

#[derive(Debug, Clone)]
pub(crate) struct RawRecord {
    /// From `@` through the closing delimiter
    pub span: Range<usize>,
    pub type_span: Range<usize>,
    pub key_span: Range<usize>,
    /// Offset of the closing delimiter
    pub close: usize,
    pub fields: Vec<RawField>,
    pub entry: Entry,
}

impl RawRecord {
    pub fn key(&self) -> &str {
        &self.entry.key
    }

    /// Whitespace that precedes this record's first field on its line.
    pub fn field_indent(&self, text: &str) -> Option<String> {
        let first = self.fields.first()?;
        let line_start = text[..first.span.start].rfind('\n').map_or(0, |i| i + 1);
        let prefix = &text[line_start..first.span.start];
        if prefix.chars().all(|c| c == ' ' || c == '\t') {
            Some(prefix.to_string())
        } else {
            None
        }
    }
}

/// A scanned bib file: the well-formed records in source order plus the
/// problems found along the way.
#[derive(Debug, Default)]
pub(crate) struct BibFile {
    pub records: Vec<RawRecord>,
    pub errors: Vec<RecordError>,
    /// Keys of records that exist in the text but could not be used
    pub unusable_keys: HashSet<String>,
}

impl BibFile {
    pub fn scan(text: &str, note_field: &str) -> Self {
        let mut file = BibFile::default();
        let mut seen = HashSet::new();
        let bytes = text.as_bytes();
        let mut pos = 0;

        while let Some(offset) = text[pos..].find('@') {
            let at = pos + offset;
            let Some(header) = scan_header(bytes, at) else {
                pos = at + 1;
                continue;
            };

            let (end, close) = match find_record_end(bytes, header.open) {
                Some(close) => (close + 1, Some(close)),
                None => (next_record_start(text, header.open), None),
            };
            pos = end;

            let entry_type = text[header.type_span.clone()].to_ascii_lowercase();
            if matches!(entry_type.as_str(), "comment" | "string" | "preamble") {
                continue;
            }

            let line = line_of(text, at);
            let Some(close) = close else {
                let key = leading_key(text, header.open + 1, end);
                file.reject(RecordError::new(Side::Bib, key, line, "record is never closed"));
                continue;
            };

            match scan_body(text, header.open + 1, close) {
                Ok(body) => {
                    if !seen.insert(body.key.clone()) {
                        file.reject(RecordError::new(
                            Side::Bib,
                            Some(body.key),
                            line,
                            "duplicate key",
                        ));
                        continue;
                    }
                    let entry = build_entry(&body.key, &entry_type, &body.fields, note_field);
                    file.records.push(RawRecord {
                        span: at..end,
                        type_span: header.type_span,
                        key_span: body.key_span,
                        close,
                        fields: body.fields,
                        entry,
                    });
                }
                Err(BodyError { key, message }) => {
                    file.reject(RecordError::new(Side::Bib, key, line, message));
                }
            }
        }

        file
    }

    pub fn contains(&self, key: &str) -> bool {
        self.unusable_keys.contains(key) || self.records.iter().any(|r| r.key() == key)
    }

    /// Indentation used for fields of newly written records.
    pub fn field_indent(&self, text: &str) -> String {
        self.records
            .iter()
            .find_map(|r| r.field_indent(text))
            .unwrap_or_else(|| "  ".to_string())
    }

    fn reject(&mut self, error: RecordError) {
        warn!(
            side = %error.side,
            key = error.key.as_deref().unwrap_or("<none>"),
            line = error.line,
            reason = %error.message,
            "Skipping malformed record"
        );
        if let Some(key) = &error.key {
            self.unusable_keys.insert(key.clone());
        }
        self.errors.push(error);
    }
}

struct Header {
    type_span: Range<usize>,
    /// Offset of `{` or `(`
    open: usize,
}

struct Body {
    key: String,
    key_span: Range<usize>,
    fields: Vec<RawField>,
}

struct BodyError {
    key: Option<String>,
    message: String,
}

impl BodyError {
    fn new(key: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            key: key.map(str::to_string),
            message: message.into(),
        }
    }
}

fn build_entry(key: &str, entry_type: &str, fields: &[RawField], note_field: &str) -> Entry {
    let mut entry = Entry::new(key).with_type(entry_type);
    for field in fields {
        match FieldClass::of_field(&field.name, note_field) {
            FieldClass::Note => {
                if entry.note.is_none() {
                    entry.note = Some(field.value.clone());
                }
            }
            FieldClass::Metadata => {
                entry
                    .fields
                    .entry(field.name.clone())
                    .or_insert_with(|| field.value.clone());
            }
        }
    }
    entry
}

/// `@type` followed by optional whitespace and an opening delimiter.
fn scan_header(bytes: &[u8], at: usize) -> Option<Header> {
    let type_start = at + 1;
    let type_end = scan_while(bytes, type_start, is_name_byte);
    if type_end == type_start {
        return None;
    }
    let open = skip_ws(bytes, type_end, bytes.len());
    match bytes.get(open) {
        Some(b'{') | Some(b'(') => Some(Header {
            type_span: type_start..type_end,
            open,
        }),
        _ => None,
    }
}

/// Offset of the delimiter closing the one at `open`.
fn find_record_end(bytes: &[u8], open: usize) -> Option<usize> {
    let paren = bytes[open] == b'(';
    let mut depth = 0usize;
    let mut in_quotes = false;
    let mut i = open + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 1,
            b'{' => depth += 1,
            b'}' => {
                if depth == 0 {
                    if !paren {
                        return Some(i);
                    }
                    return None;
                }
                depth -= 1;
            }
            b'"' if paren && depth == 0 => in_quotes = !in_quotes,
            b')' if paren && depth == 0 && !in_quotes => return Some(i),
            _ => {}
        }
        i += 1;
    }
    None
}

/// Where to resume after an unterminated record: the next line that starts
/// a new record, or the end of the text.
fn next_record_start(text: &str, from: usize) -> usize {
    text[from..]
        .find("\n@")
        .map_or(text.len(), |i| from + i + 1)
}

/// Best-effort key of a record that could not be scanned.
fn leading_key(text: &str, start: usize, end: usize) -> Option<String> {
    let bytes = text.as_bytes();
    let key_start = skip_ws(bytes, start, end);
    let key_end = scan_while(&bytes[..end], key_start, is_key_byte);
    let after = skip_ws(bytes, key_end, end);
    if key_end > key_start && bytes.get(after) == Some(&b',') {
        Some(text[key_start..key_end].to_string())
    } else {
        None
    }
}

fn scan_body(text: &str, start: usize, end: usize) -> Result<Body, BodyError> {
    let bytes = text.as_bytes();
    let key_start = skip_ws(bytes, start, end);
    let key_end = scan_while(&bytes[..end], key_start, is_key_byte);
    if key_end == key_start {
        return Err(BodyError::new(None, "record has no key"));
    }
    let key = &text[key_start..key_end];

    let mut i = skip_ws(bytes, key_end, end);
    if i < end && bytes[i] == b'=' {
        return Err(BodyError::new(None, "record has no key"));
    }

    let mut fields = Vec::new();
    if i < end {
        if bytes[i] != b',' {
            return Err(BodyError::new(Some(key), "expected ',' after the key"));
        }
        i += 1;
    }

    loop {
        i = skip_ws(bytes, i, end);
        if i >= end {
            break;
        }
        if bytes[i] == b',' {
            i += 1;
            continue;
        }

        let name_start = i;
        let name_end = scan_while(&bytes[..end], name_start, is_name_byte);
        if name_end == name_start {
            return Err(BodyError::new(
                Some(key),
                format!("unexpected '{}' where a field name was expected", bytes[i] as char),
            ));
        }
        let name = text[name_start..name_end].to_ascii_lowercase();

        i = skip_ws(bytes, name_end, end);
        if i >= end || bytes[i] != b'=' {
            return Err(BodyError::new(
                Some(key),
                format!("missing '=' after field '{}'", name),
            ));
        }
        i = skip_ws(bytes, i + 1, end);

        let (value_end, value, style) = scan_value(text, i, end).map_err(|message| {
            BodyError::new(Some(key), format!("field '{}': {}", name, message))
        })?;
        fields.push(RawField {
            name,
            span: name_start..value_end,
            value_span: i..value_end,
            value,
            style,
        });

        i = skip_ws(bytes, value_end, end);
        if i < end {
            if bytes[i] != b',' {
                return Err(BodyError::new(Some(key), "expected ',' between fields"));
            }
            i += 1;
        }
    }

    Ok(Body {
        key: key.to_string(),
        key_span: key_start..key_end,
        fields,
    })
}

/// Scan one value (possibly `#`-concatenated). Returns its end offset, the
/// undelimited value and how it was written.
fn scan_value(text: &str, start: usize, end: usize) -> Result<(usize, String, ValueStyle), String> {
    let bytes = text.as_bytes();
    let mut pieces = 0;
    let mut i = start;

    loop {
        match bytes.get(i).copied().filter(|_| i < end) {
            Some(b'{') => {
                let close = matching_brace(bytes, i, end).ok_or("unbalanced braces")?;
                i = close + 1;
            }
            Some(b'"') => {
                let close = closing_quote(bytes, i, end).ok_or("unterminated quoted value")?;
                i = close + 1;
            }
            Some(b) if is_name_byte(b) => {
                i = scan_while(&bytes[..end], i, is_name_byte);
            }
            _ => return Err("expected a value".to_string()),
        }
        pieces += 1;

        let next = skip_ws(bytes, i, end);
        if next < end && bytes[next] == b'#' {
            i = skip_ws(bytes, next + 1, end);
            continue;
        }
        break;
    }

    let raw = &text[start..i];
    let (value, style) = if pieces > 1 {
        (raw.to_string(), ValueStyle::Concatenated)
    } else {
        match bytes[start] {
            b'{' => (raw[1..raw.len() - 1].to_string(), ValueStyle::Braced),
            b'"' => (raw[1..raw.len() - 1].to_string(), ValueStyle::Quoted),
            _ => (raw.to_string(), ValueStyle::Bare),
        }
    };
    Ok((i, value, style))
}

fn matching_brace(bytes: &[u8], open: usize, end: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut i = open;
    while i < end {
        match bytes[i] {
            b'\\' => i += 1,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}

fn closing_quote(bytes: &[u8], open: usize, end: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut i = open + 1;
    while i < end {
        match bytes[i] {
            b'\\' => i += 1,
            b'{' => depth += 1,
            b'}' => depth = depth.saturating_sub(1),
            b'"' if depth == 0 => return Some(i),
            _ => {}
        }
        i += 1;
    }
    None
}

fn skip_ws(bytes: &[u8], mut i: usize, end: usize) -> usize {
    while i < end && bytes[i].is_ascii_whitespace() {
        i += 1;
    }
    i
}

fn scan_while(bytes: &[u8], mut i: usize, pred: impl Fn(u8) -> bool) -> usize {
    while i < bytes.len() && pred(bytes[i]) {
        i += 1;
    }
    i
}

fn is_name_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b':' | b'.' | b'+' | b'/')
}

fn is_key_byte(b: u8) -> bool {
    !b.is_ascii_whitespace() && !matches!(b, b',' | b'{' | b'}' | b'(' | b')' | b'=' | b'"' | b'#')
}

fn line_of(text: &str, offset: usize) -> usize {
    text[..offset].matches('\n').count() + 1
}

/// Whether every unescaped brace in `value` is matched.
pub(crate) fn braces_balanced(value: &str) -> bool {
    let bytes = value.as_bytes();
    let mut depth = 0i64;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 1,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
            }
            _ => {}
        }
        i += 1;
    }
    depth == 0
}
