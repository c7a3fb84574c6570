//! Source Formatting
//!
//! Formatting is the last pipeline stage and is layout-only. Two engines sit
//! behind the [`CodeFormatter`] trait:
//!
//! - [`PrettierFormatter`]: the real formatter, run as a subprocess
//! - [`LineFormatter`]: a token-aware line normalizer used when the primary
//!   engine is missing or rejects the input
//!
//! [`SourceFormatter`] tries the primary and falls back to the line
//! normalizer, so formatting never fails.

use crate::config::FormatterSettings;
use crate::deobfuscator::error::{DeobsError, Result};
use crate::deobfuscator::external::{locate, run_tool};
use crate::deobfuscator::lexer::{tokenize, Token, TokenKind};
use crate::deobfuscator::source::SourceUnit;
use std::ffi::OsString;
use std::time::Duration;

const INDENT: &str = "  ";

/// A formatting engine.
pub trait CodeFormatter: Send + Sync {
    fn name(&self) -> &str;
    fn format(&self, unit: &SourceUnit) -> Result<SourceUnit>;
}

/// Formats with `prettier`, feeding the source on stdin.
#[derive(Debug, Clone)]
pub struct PrettierFormatter {
    program: String,
    timeout: Duration,
    args: Vec<String>,
}

impl PrettierFormatter {
    pub fn new(settings: &FormatterSettings) -> Self {
        let style = &settings.style;
        let mut args = vec![
            "--stdin-filepath".to_string(),
            "input.js".to_string(),
            "--parser".to_string(),
            style.parser.clone(),
            "--trailing-comma".to_string(),
            style.trailing_comma.clone(),
            "--arrow-parens".to_string(),
            style.arrow_parens.clone(),
        ];
        if !style.semi {
            args.push("--no-semi".to_string());
        }
        if style.single_quote {
            args.push("--single-quote".to_string());
        }
        if !style.bracket_spacing {
            args.push("--no-bracket-spacing".to_string());
        }
        Self {
            program: settings.program.clone(),
            timeout: Duration::from_secs(settings.timeout_secs),
            args,
        }
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }
}

impl CodeFormatter for PrettierFormatter {
    fn name(&self) -> &str {
        "prettier"
    }

    fn format(&self, unit: &SourceUnit) -> Result<SourceUnit> {
        let fail = |e: anyhow::Error| DeobsError::format_failed(self.name(), format!("{:#}", e));
        let program = locate(&self.program).map_err(fail)?;
        let args: Vec<OsString> = self.args.iter().map(OsString::from).collect();
        let run = run_tool(&program, &args, Some(unit.as_str()), self.timeout).map_err(fail)?;
        if !run.status.success() {
            return Err(DeobsError::format_failed(self.name(), run.stderr_summary()));
        }
        if run.stdout.trim().is_empty() && !unit.as_str().trim().is_empty() {
            return Err(DeobsError::format_failed(self.name(), "produced no output"));
        }
        Ok(SourceUnit::new(run.stdout))
    }
}

/// Line-oriented fallback formatter.
///
/// Re-indents by bracket depth, starts a new line after `{` and statement
/// `;`, gives `}` its own line and lays out `switch` labels. It keeps every
/// token and every existing line break (blank-line runs collapse to one), so
/// it is idempotent and never changes what the code means.
#[derive(Debug, Clone, Copy, Default)]
pub struct LineFormatter;

impl LineFormatter {
    pub fn new() -> Self {
        Self
    }

    /// Infallible form of [`CodeFormatter::format`].
    pub fn format_unit(&self, unit: &SourceUnit) -> SourceUnit {
        let formatted = format_lines(unit.as_str());
        if formatted.is_empty() {
            unit.clone()
        } else {
            SourceUnit::new(formatted)
        }
    }
}

impl CodeFormatter for LineFormatter {
    fn name(&self) -> &str {
        "line"
    }

    fn format(&self, unit: &SourceUnit) -> Result<SourceUnit> {
        Ok(self.format_unit(unit))
    }
}

/// Primary formatter with a line-normalizer fallback.
pub struct SourceFormatter {
    primary: Option<Box<dyn CodeFormatter>>,
    fallback: LineFormatter,
}

impl SourceFormatter {
    pub fn new(primary: Option<Box<dyn CodeFormatter>>) -> Self {
        Self {
            primary,
            fallback: LineFormatter::new(),
        }
    }

    /// Fallback only; no subprocesses.
    pub fn line_only() -> Self {
        Self::new(None)
    }

    pub fn from_settings(settings: &FormatterSettings) -> Self {
        if settings.enabled {
            Self::new(Some(Box::new(PrettierFormatter::new(settings))))
        } else {
            Self::line_only()
        }
    }

    pub fn primary_name(&self) -> Option<&str> {
        self.primary.as_ref().map(|p| p.name())
    }

    /// Format `unit`, reporting the primary engine's failure if it had one.
    pub fn format_detailed(&self, unit: &SourceUnit) -> (SourceUnit, Option<DeobsError>) {
        let Some(primary) = &self.primary else {
            return (self.fallback.format_unit(unit), None);
        };
        match primary.format(unit) {
            Ok(formatted) => (formatted, None),
            Err(e) => {
                log::warn!("{}; using line formatter", e);
                (self.fallback.format_unit(unit), Some(e))
            }
        }
    }

    /// Format `unit`. Never fails.
    pub fn format(&self, unit: &SourceUnit) -> SourceUnit {
        self.format_detailed(unit).0
    }
}

impl Default for SourceFormatter {
    fn default() -> Self {
        Self::line_only()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameKind {
    Paren,
    Bracket,
    Brace,
}

#[derive(Debug, Clone, Copy)]
struct Frame<'a> {
    kind: FrameKind,
    /// Identifier right before a `(`, e.g. `for` or `switch`.
    keyword: Option<&'a str>,
    switch: bool,
    in_case: bool,
}

impl Frame<'_> {
    fn depth(&self) -> usize {
        if self.switch && self.in_case {
            2
        } else {
            1
        }
    }
}

/// Line break owed after the previous token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pending {
    None,
    Always,
    /// After a `case`/`default` label; a following `{` stays on the line.
    Label,
    /// After `{`; an immediately following `}` stays on the line.
    OpenBrace,
    /// After `}`; only a new statement starts a new line.
    CloseBrace,
}

/// Keywords that continue an expression or statement after `}`.
const CONTINUES_AFTER_BRACE: &[&str] =
    &["else", "catch", "finally", "while", "in", "instanceof", "of"];

struct LineWriter {
    out: String,
    line: String,
    indent: Option<usize>,
}

impl LineWriter {
    fn flush(&mut self, fallback_indent: usize) {
        if !self.line.is_empty() {
            let indent = self.indent.unwrap_or(fallback_indent);
            for _ in 0..indent {
                self.out.push_str(INDENT);
            }
            self.out.push_str(&self.line);
        }
        self.out.push('\n');
        self.line.clear();
        self.indent = None;
    }
}

fn depth(frames: &[Frame<'_>]) -> usize {
    frames.iter().map(Frame::depth).sum()
}

fn close_frame<'a>(frames: &mut Vec<Frame<'a>>, kind: FrameKind) -> Option<Frame<'a>> {
    let pos = frames.iter().rposition(|f| f.kind == kind)?;
    let frame = frames[pos];
    frames.truncate(pos);
    Some(frame)
}

fn pending_applies(pending: Pending, tok: Token, src: &str) -> bool {
    let text = tok.text(src);
    match pending {
        Pending::None => false,
        Pending::Always => true,
        Pending::Label => !tok.is_punct(src, "{"),
        Pending::OpenBrace => !tok.is_punct(src, "}"),
        Pending::CloseBrace => match tok.kind {
            TokenKind::Ident => !CONTINUES_AFTER_BRACE.contains(&text),
            TokenKind::Str | TokenKind::Number | TokenKind::Regex => true,
            TokenKind::Punct => matches!(text, "{" | "!" | "~"),
            _ => false,
        },
    }
}

fn wants_space(
    a: Token,
    b: Token,
    src: &str,
    label_colon: bool,
    after_label: bool,
    had_space: bool,
) -> bool {
    let (at, bt) = (a.text(src), b.text(src));
    if b.kind == TokenKind::LineComment {
        return true;
    }
    if (b.kind == TokenKind::Punct && matches!(bt, ";" | "," | ")" | "]")) || label_colon {
        return false;
    }
    if a.kind == TokenKind::Punct && matches!(at, "(" | "[") {
        return false;
    }
    if a.is_punct(src, ",") || a.is_punct(src, ";") {
        return true;
    }
    if bt == "("
        && a.kind == TokenKind::Ident
        && matches!(at, "if" | "for" | "while" | "switch" | "catch" | "with")
    {
        return true;
    }
    if b.is_punct(src, "{")
        && (at == ")" || at == "=>" || a.kind == TokenKind::Ident || after_label)
    {
        return true;
    }
    if at == "}"
        && b.kind == TokenKind::Ident
        && matches!(bt, "else" | "catch" | "finally" | "while")
    {
        return true;
    }
    had_space
}

/// Lay out `src` line by line.
///
/// # Algorithm
/// Walks every token once, keeping a stack of open brackets. A token starts a
/// new line when the input had a line break before it, when the previous token
/// owes one (`{`, statement `;`, `}`, a label, a line comment), when it is a
/// `}` closing a non-empty block, or when it is a `case`/`default` label. A
/// line's indent is the bracket depth once its leading closers are popped.
///
/// # Returns
/// Formatted text ending in a newline, or an empty string for blank input
fn format_lines(src: &str) -> String {
    let mut w = LineWriter {
        out: String::with_capacity(src.len() + src.len() / 4),
        line: String::new(),
        indent: None,
    };
    let mut frames: Vec<Frame<'_>> = Vec::new();
    let mut prev: Option<Token> = None;
    let mut pending = Pending::None;
    let mut prev_label_colon = false;
    let mut newlines = 0usize;
    let mut had_space = false;
    let mut closed_paren_keyword: Option<&str> = None;
    // Open `?` count while scanning a case expression for its label colon.
    let mut case_label: Option<usize> = None;

    for tok in tokenize(src) {
        match tok.kind {
            TokenKind::Whitespace => {
                had_space = true;
                continue;
            }
            TokenKind::Newline => {
                newlines += 1;
                continue;
            }
            _ => {}
        }
        let text = tok.text(src);
        let top_is_switch = frames.last().is_some_and(|f| f.switch);
        let is_label_kw =
            top_is_switch && tok.kind == TokenKind::Ident && matches!(text, "case" | "default");

        let mut label_colon = false;
        if tok.is_punct(src, "?") {
            case_label = case_label.map(|n| n + 1);
        } else if tok.is_punct(src, ":") {
            match case_label {
                Some(0) => {
                    label_colon = true;
                    case_label = None;
                }
                Some(n) => case_label = Some(n - 1),
                None => {}
            }
        }

        if let Some(a) = prev {
            let comment_on_line = tok.is_comment() && newlines == 0;
            let break_before = newlines > 0
                || (!comment_on_line
                    && (pending_applies(pending, tok, src)
                        || (tok.is_punct(src, "}") && !a.is_punct(src, "{"))
                        || is_label_kw));
            if break_before {
                w.flush(depth(&frames));
                if newlines >= 2 {
                    w.out.push('\n');
                }
                pending = Pending::None;
            } else if wants_space(a, tok, src, label_colon, prev_label_colon, had_space) {
                w.line.push(' ');
            }
        }

        let closer = match text {
            ")" if tok.kind == TokenKind::Punct => Some(FrameKind::Paren),
            "]" if tok.kind == TokenKind::Punct => Some(FrameKind::Bracket),
            "}" if tok.kind == TokenKind::Punct => Some(FrameKind::Brace),
            _ => None,
        };
        if let Some(kind) = closer {
            let closed = close_frame(&mut frames, kind);
            if kind == FrameKind::Paren {
                closed_paren_keyword = closed.and_then(|f| f.keyword);
            }
        } else if w.indent.is_none() {
            let mut indent = depth(&frames);
            if is_label_kw && frames.last().is_some_and(|f| f.in_case) {
                indent -= 1;
            }
            w.indent = Some(indent);
        }
        w.line.push_str(text);

        if is_label_kw {
            if let Some(top) = frames.last_mut() {
                top.in_case = true;
            }
            case_label = Some(0);
        }
        if tok.kind == TokenKind::Punct {
            let prev_text = prev.map(|p| p.text(src));
            match text {
                "(" => frames.push(Frame {
                    kind: FrameKind::Paren,
                    keyword: prev.filter(|p| p.kind == TokenKind::Ident).map(|p| p.text(src)),
                    switch: false,
                    in_case: false,
                }),
                "[" => frames.push(Frame {
                    kind: FrameKind::Bracket,
                    keyword: None,
                    switch: false,
                    in_case: false,
                }),
                "{" => frames.push(Frame {
                    kind: FrameKind::Brace,
                    keyword: None,
                    switch: prev_text == Some(")") && closed_paren_keyword == Some("switch"),
                    in_case: false,
                }),
                _ => {}
            }
        }

        let in_parens = frames
            .last()
            .is_some_and(|f| matches!(f.kind, FrameKind::Paren | FrameKind::Bracket));
        pending = match tok.kind {
            TokenKind::LineComment => Pending::Always,
            TokenKind::BlockComment => pending,
            _ if label_colon => Pending::Label,
            _ if text == ";" && !in_parens => Pending::Always,
            _ if text == "{" => Pending::OpenBrace,
            _ if text == "}" => Pending::CloseBrace,
            _ => Pending::None,
        };
        if !tok.is_comment() {
            prev_label_colon = label_colon;
        }
        prev = Some(tok);
        newlines = 0;
        had_space = false;
    }

    if prev.is_some() {
        w.flush(depth(&frames));
    }
    w.out
}
