//! Dead Code Elimination
//!
//! Removes the handful of idioms obfuscators inject to mislead static readers:
//!
//! - `if (false) { ... }` and `if (!1) { ... }`, with or without an `else`
//! - empty zero-parameter function declarations (`function _0x1f() {}`)
//! - `console.clear()` calls
//!
//! Matching is done on significant tokens with balanced-brace extraction, so
//! nested blocks are removed as one unit. No other guard is ever evaluated.
//! Removals are repeated until nothing changes; every removal shrinks the
//! token sequence, so the loop terminates.

use crate::deobfuscator::lexer::{is_keyword, matching_close, significant_tokens, Token, TokenKind};
use crate::deobfuscator::source::{apply_edits, widen_to_line, Edit, SourceUnit};
use smallvec::{smallvec, SmallVec};

/// What the stripper removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StripStats {
    pub dead_branches: usize,
    pub empty_stubs: usize,
    pub console_clears: usize,
    pub passes: usize,
}

impl StripStats {
    pub fn total(&self) -> usize {
        self.dead_branches + self.empty_stubs + self.console_clears
    }
}

#[derive(Debug, Clone, Copy)]
enum RemovalKind {
    DeadBranch,
    EmptyStub,
    ConsoleClear,
}

struct Removal {
    edits: SmallVec<[Edit; 1]>,
    /// Last significant token consumed; scanning resumes after it.
    last: usize,
    kind: RemovalKind,
}

/// Where a construct sits relative to the token before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Position {
    /// Start of input or after `;`, `{` or `}`: safe to delete outright.
    Statement,
    /// After `else`, whose branch would be left empty.
    AfterElse(usize),
    /// Body of `if (...)`, `for (...)`, `do`, or a label: must become `;`.
    Body,
    Other,
}

fn position(sig: &[Token], src: &str, i: usize) -> Position {
    let Some(p) = i.checked_sub(1) else {
        return Position::Statement;
    };
    let prev = sig[p];
    if prev.is_punct(src, ";") || prev.is_punct(src, "{") || prev.is_punct(src, "}") {
        Position::Statement
    } else if prev.is_word(src, "else") {
        Position::AfterElse(p)
    } else if prev.is_punct(src, ")") || prev.is_punct(src, ":") || prev.is_word(src, "do") {
        Position::Body
    } else {
        Position::Other
    }
}

/// Removes constant-false branches, empty stubs and `console.clear()` calls.
#[derive(Debug, Clone, Default)]
pub struct DeadCodeStripper;

impl DeadCodeStripper {
    pub fn new() -> Self {
        Self
    }

    /// Strip dead code from `unit`. Never fails; unknown shapes are left alone.
    pub fn strip(&self, unit: &SourceUnit) -> SourceUnit {
        self.strip_with_stats(unit).0
    }

    pub fn strip_with_stats(&self, unit: &SourceUnit) -> (SourceUnit, StripStats) {
        let mut text = unit.as_str().to_string();
        let mut stats = StripStats::default();
        loop {
            let edits = find_removals(&text, &mut stats);
            if edits.is_empty() {
                break;
            }
            stats.passes += 1;
            text = apply_edits(&text, edits);
        }
        if stats.total() > 0 {
            log::debug!(
                "Removed {} dead branches, {} empty stubs, {} console.clear calls in {} passes",
                stats.dead_branches,
                stats.empty_stubs,
                stats.console_clears,
                stats.passes
            );
        }
        (SourceUnit::new(text), stats)
    }
}

fn find_removals(src: &str, stats: &mut StripStats) -> Vec<Edit> {
    let sig = significant_tokens(src);
    let mut edits = Vec::new();
    let mut i = 0usize;
    while i < sig.len() {
        let removal = dead_branch(&sig, src, i)
            .or_else(|| empty_stub(&sig, src, i))
            .or_else(|| console_clear(&sig, src, i));
        let Some(removal) = removal else {
            i += 1;
            continue;
        };
        match removal.kind {
            RemovalKind::DeadBranch => stats.dead_branches += 1,
            RemovalKind::EmptyStub => stats.empty_stubs += 1,
            RemovalKind::ConsoleClear => stats.console_clears += 1,
        }
        edits.extend(removal.edits);
        i = removal.last + 1;
    }
    edits
}

/// `false` or `!1`, nothing else.
fn is_false_guard(cond: &[Token], src: &str) -> bool {
    match cond {
        [t] => t.is_word(src, "false"),
        [bang, one] => bang.is_punct(src, "!") && one.text(src) == "1",
        _ => false,
    }
}

fn dead_branch(sig: &[Token], src: &str, i: usize) -> Option<Removal> {
    if !sig[i].is_word(src, "if") || !sig.get(i + 1)?.is_punct(src, "(") {
        return None;
    }
    if i > 0 && (sig[i - 1].is_punct(src, ".") || sig[i - 1].is_punct(src, "?.")) {
        return None;
    }
    let close_paren = matching_close(sig, src, i + 1)?;
    if !is_false_guard(&sig[i + 2..close_paren], src)
        || !sig.get(close_paren + 1)?.is_punct(src, "{")
    {
        return None;
    }
    let close_brace = matching_close(sig, src, close_paren + 1)?;
    let start = sig[i].start;

    // `if (false) {..} else B` keeps B where the `if` stood.
    if sig.get(close_brace + 1).is_some_and(|t| t.is_word(src, "else")) {
        let kept = sig.get(close_brace + 2)?;
        return Some(Removal {
            edits: smallvec![Edit::delete(start, kept.start)],
            last: close_brace + 1,
            kind: RemovalKind::DeadBranch,
        });
    }

    let end = sig[close_brace].end;
    let edit = match position(sig, src, i) {
        Position::Statement => {
            let (s, e) = widen_to_line(src, start, end);
            Edit::delete(s, e)
        }
        Position::AfterElse(p) => {
            let from = if p > 0 { sig[p - 1].end } else { sig[p].start };
            Edit::delete(from, end)
        }
        Position::Body | Position::Other => Edit::new(start, end, ";"),
    };
    Some(Removal {
        edits: smallvec![edit],
        last: close_brace,
        kind: RemovalKind::DeadBranch,
    })
}

fn empty_stub(sig: &[Token], src: &str, i: usize) -> Option<Removal> {
    let window = sig.get(i..i + 6)?;
    let shape = window[0].is_word(src, "function")
        && window[1].kind == TokenKind::Ident
        && !is_keyword(window[1].text(src))
        && window[2].is_punct(src, "(")
        && window[3].is_punct(src, ")")
        && window[4].is_punct(src, "{")
        && window[5].is_punct(src, "}");
    if !shape || position(sig, src, i) != Position::Statement {
        return None;
    }
    let (s, e) = widen_to_line(src, window[0].start, window[5].end);
    Some(Removal {
        edits: smallvec![Edit::delete(s, e)],
        last: i + 5,
        kind: RemovalKind::EmptyStub,
    })
}

fn console_clear(sig: &[Token], src: &str, i: usize) -> Option<Removal> {
    let window = sig.get(i..i + 5)?;
    let shape = window[0].is_word(src, "console")
        && window[1].is_punct(src, ".")
        && window[2].is_word(src, "clear")
        && window[3].is_punct(src, "(")
        && window[4].is_punct(src, ")");
    if !shape {
        return None;
    }
    let close = window[4];
    let last = match sig.get(i + 5) {
        Some(t) if t.is_punct(src, ";") => i + 5,
        None => i + 4,
        Some(t) if t.is_punct(src, "}") || src[close.end..t.start].contains('\n') => i + 4,
        Some(_) => return None,
    };
    let (start, end) = (window[0].start, sig[last].end);
    let edit = match position(sig, src, i) {
        Position::Statement => {
            let (s, e) = widen_to_line(src, start, end);
            Edit::delete(s, e)
        }
        Position::AfterElse(_) | Position::Body => Edit::new(start, end, ";"),
        Position::Other => return None,
    };
    Some(Removal {
        edits: smallvec![edit],
        last,
        kind: RemovalKind::ConsoleClear,
    })
}
