/*
 * doc/parse.rs
 * Copyright (c) 2025 Posit, PBC
 *
 * Line-based scanner for the notes document.
 *
 * A citation block looks like
 *
 * ```text
 * ### On Things
 * <br>@smith2020
 *
 * ::: notes
 * <!-- smith2020 -->
 *
 * Free text, any markdown, nested ::: fences included.
 *
 * :::
 * ```
 *
 * Everything before the first such block is front matter and is never
 * interpreted.
 */

use std::collections::HashSet;
use std::ops::Range;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

use crate::entry::Entry;
use crate::error::RecordError;
use crate::ownership::Side;

/// Level-3 heading. Captures the title text in group 1.
static HEADING: Lazy<Regex> = Lazy::new(|| Regex::new(r"^###[ \t]+(.*?)[ \t]*$").unwrap());

/// `<br>@key` citation line. Captures the key in group 1.
static CITATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^<br>[ \t]*@([^\s,;\[\]{}()]+)[ \t]*$").unwrap());

/// Opening fence of the notes region, `::: notes` or `::: {.notes}`.
static NOTES_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^:{3,}[ \t]*(?:notes|\{[ \t]*\.notes[ \t]*\})[ \t]*$").unwrap());

/// `<!-- key -->` marker. Captures the key in group 1.
static KEY_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^<!--[ \t]*(\S+?)[ \t]*-->[ \t]*$").unwrap());

static FENCE_OPEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^:{3,}[ \t]*\S").unwrap());

static FENCE_CLOSE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^:{3,}[ \t]*$").unwrap());

#[derive(Debug, Clone, Copy)]
struct Line {
    start: usize,
    /// End of the line content, excluding `\n` and a trailing `\r`
    end: usize,
    /// Start of the following line
    next: usize,
}

#[derive(Debug, Clone)]
pub(crate) struct DocBlock {
    /// From the heading line through the line before the next block
    pub span: Range<usize>,
    /// Heading line, without its line break
    pub heading: Range<usize>,
    /// Citation line, without its line break
    pub citation: Range<usize>,
    pub entry: Entry,
}

#[derive(Debug, Default)]
pub(crate) struct DocFile {
    pub blocks: Vec<DocBlock>,
    pub errors: Vec<RecordError>,
    /// Keys of blocks that exist in the text but could not be used
    pub unusable_keys: HashSet<String>,
}

impl DocFile {
    pub fn scan(text: &str) -> Self {
        let mut file = DocFile::default();
        let lines = split_lines(text);
        let content = |i: usize| &text[lines[i].start..lines[i].end];

        let citation_after = |i: usize| -> Option<usize> {
            next_nonblank(text, &lines, i + 1, lines.len())
                .filter(|&j| CITATION.is_match(content(j)))
        };

        let Some(first) = (0..lines.len())
            .find(|&i| HEADING.is_match(content(i)) && citation_after(i).is_some())
        else {
            return file;
        };

        let mut starts = vec![first];
        let mut depth = 0usize;
        for i in first + 1..lines.len() {
            let line = content(i);
            if HEADING.is_match(line) && (depth == 0 || citation_after(i).is_some()) {
                starts.push(i);
                depth = 0;
            } else if FENCE_CLOSE.is_match(line) {
                depth = depth.saturating_sub(1);
            } else if FENCE_OPEN.is_match(line) {
                depth += 1;
            }
        }

        let mut seen = HashSet::new();
        for (n, &from) in starts.iter().enumerate() {
            let to = starts.get(n + 1).copied().unwrap_or(lines.len());
            match scan_block(text, &lines, from, to) {
                Ok(block) => {
                    if !seen.insert(block.entry.key.clone()) {
                        file.reject(RecordError::new(
                            Side::Doc,
                            Some(block.entry.key),
                            from + 1,
                            "duplicate key",
                        ));
                        continue;
                    }
                    file.blocks.push(block);
                }
                Err((key, message)) => {
                    file.reject(RecordError::new(Side::Doc, key, from + 1, message));
                }
            }
        }

        file
    }

    pub fn contains(&self, key: &str) -> bool {
        self.unusable_keys.contains(key) || self.blocks.iter().any(|b| b.entry.key == key)
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

type BlockError = (Option<String>, String);

fn unkeyed(message: &str) -> BlockError {
    (None, message.to_string())
}

fn scan_block(text: &str, lines: &[Line], from: usize, to: usize) -> Result<DocBlock, BlockError> {
    let content = |i: usize| &text[lines[i].start..lines[i].end];

    let heading = HEADING
        .captures(content(from))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| unkeyed("block does not start with a '### ' heading"))?;

    let citation_line = next_nonblank(text, lines, from + 1, to)
        .filter(|&i| CITATION.is_match(content(i)))
        .ok_or_else(|| unkeyed("heading is not followed by a '<br>@key' citation line"))?;
    let key = CITATION
        .captures(content(citation_line))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| unkeyed("citation line has no key"))?;

    let fail = |message: &str| (Some(key.clone()), message.to_string());

    let fence_line = next_nonblank(text, lines, citation_line + 1, to)
        .filter(|&i| NOTES_FENCE.is_match(content(i)))
        .ok_or_else(|| fail("missing '::: notes' fence"))?;

    let marker_line = next_nonblank(text, lines, fence_line + 1, to)
        .ok_or_else(|| fail("missing '<!-- key -->' marker"))?;
    let marker_key = KEY_MARKER
        .captures(content(marker_line))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .ok_or_else(|| fail("missing '<!-- key -->' marker"))?;
    if marker_key != key {
        return Err(fail(&format!(
            "note marker names '{}' instead of '{}'",
            marker_key, key
        )));
    }

    let mut depth = 1usize;
    let mut close_line = None;
    for i in marker_line + 1..to {
        let line = content(i);
        if FENCE_CLOSE.is_match(line) {
            depth -= 1;
            if depth == 0 {
                close_line = Some(i);
                break;
            }
        } else if FENCE_OPEN.is_match(line) {
            depth += 1;
        }
    }
    let close_line = close_line.ok_or_else(|| fail("unterminated '::: notes' fence"))?;

    let note = text[lines[marker_line].next..lines[close_line].start].trim();
    let block_end = if to < lines.len() {
        lines[to].start
    } else {
        text.len()
    };

    Ok(DocBlock {
        span: lines[from].start..block_end,
        heading: lines[from].start..lines[from].end,
        citation: lines[citation_line].start..lines[citation_line].end,
        entry: Entry::new(key.clone())
            .with_field("title", heading)
            .with_note(note),
    })
}

fn split_lines(text: &str) -> Vec<Line> {
    let mut lines = Vec::new();
    let mut start = 0;
    while start < text.len() {
        let (end, next) = match text[start..].find('\n') {
            Some(i) => (start + i, start + i + 1),
            None => (text.len(), text.len()),
        };
        let end = if text[start..end].ends_with('\r') {
            end - 1
        } else {
            end
        };
        lines.push(Line { start, end, next });
        start = next;
    }
    lines
}

fn next_nonblank(text: &str, lines: &[Line], from: usize, to: usize) -> Option<usize> {
    (from..to).find(|&i| !text[lines[i].start..lines[i].end].trim().is_empty())
}
