//! Source Units
//!
//! A [`SourceUnit`] is the full text of one file at one pipeline stage. Stages
//! never mutate a unit; they return a new one, so the previous stage's output
//! is always available as a fallback.

use std::fmt;

/// Immutable source text for one pipeline stage.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SourceUnit {
    text: String,
}

impl SourceUnit {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn into_string(self) -> String {
        self.text
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.text.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

impl From<String> for SourceUnit {
    fn from(text: String) -> Self {
        Self::new(text)
    }
}

impl From<&str> for SourceUnit {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

impl fmt::Display for SourceUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Replace the byte range `start..end` with `replacement`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edit {
    pub start: usize,
    pub end: usize,
    pub replacement: String,
}

impl Edit {
    pub fn new(start: usize, end: usize, replacement: impl Into<String>) -> Self {
        Self {
            start,
            end,
            replacement: replacement.into(),
        }
    }

    pub fn delete(start: usize, end: usize) -> Self {
        Self::new(start, end, String::new())
    }
}

/// Apply non-overlapping edits to `source`.
///
/// Edits are sorted by start offset first; an edit overlapping an earlier one
/// is dropped with a debug log instead of corrupting the text.
pub fn apply_edits(source: &str, mut edits: Vec<Edit>) -> String {
    edits.sort_by_key(|e| (e.start, e.end));
    let mut out = String::with_capacity(source.len());
    let mut cursor = 0usize;
    for edit in edits {
        if edit.start < cursor || edit.end > source.len() || edit.start > edit.end {
            log::debug!(
                "Dropping overlapping edit {}..{} (cursor at {})",
                edit.start,
                edit.end,
                cursor
            );
            continue;
        }
        out.push_str(&source[cursor..edit.start]);
        out.push_str(&edit.replacement);
        cursor = edit.end;
    }
    out.push_str(&source[cursor..]);
    out
}

/// Widen a deletion so that a line left holding only whitespace disappears too.
///
/// Returns the (possibly widened) `start..end` range.
pub fn widen_to_line(source: &str, start: usize, end: usize) -> (usize, usize) {
    let line_start = source[..start].rfind('\n').map_or(0, |p| p + 1);
    let leading_blank = source[line_start..start]
        .bytes()
        .all(|b| b == b' ' || b == b'\t');
    let line_end = source[end..].find('\n').map_or(source.len(), |p| end + p);
    let trailing_blank = source[end..line_end]
        .bytes()
        .all(|b| b == b' ' || b == b'\t' || b == b'\r');
    if leading_blank && trailing_blank {
        let next = if line_end < source.len() { line_end + 1 } else { line_end };
        (line_start, next)
    } else {
        (start, end)
    }
}
