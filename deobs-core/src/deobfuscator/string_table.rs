//! String Table Resolution
//!
//! Obfuscators move every string literal into one array (`var _0x1a2b = [...]`)
//! and replace each use with an indexed lookup, either directly (`_0x1a2b[3]`)
//! or through a generated accessor function (`_0x3c4d('0x3')`). This module
//! decodes that array with the literal-only evaluator and inlines every lookup
//! whose index can be proven to land inside the table.
//!
//! # Algorithm
//! 1. Find the first `var|let|const _0x<hex> = [ ... ]` declaration (first match wins)
//! 2. Decode its elements; any non-literal element rejects the table
//! 3. Reject tables that are rotated at runtime (`(..., _0x1a2b, 0x1f3)`)
//! 4. Find accessor functions that index the table with their first parameter
//! 5. Replace the declaration with an annotated, re-rendered copy
//! 6. Inline resolvable references; leave everything else byte-for-byte intact
//!
//! # Accessor Binding
//! References are bound to the declared table only: the table identifier
//! itself and accessor functions whose body contains `TABLE[PARAM]`. Other
//! `_0x...` callees are never rewritten, even if they look like lookups.

use crate::deobfuscator::error::{DeobsError, Result};
use crate::deobfuscator::lexer::{matching_close, significant_tokens, Token, TokenKind};
use crate::deobfuscator::literal::{self, LiteralValue};
use crate::deobfuscator::source::{apply_edits, Edit, SourceUnit};
use smallvec::SmallVec;

/// Marker that starts the comment written above a materialized table.
pub const ANNOTATION_PREFIX: &str = "/* deobs: string table";

/// Identifiers an accessor calls when its table holds encoded strings.
const DECODER_CALLS: &[&str] = &["atob", "fromCharCode", "decodeURIComponent", "escape"];

/// Assignment operators that make an indexed access a write target.
const ASSIGNMENT_OPS: &[&str] = &[
    "=", "+=", "-=", "*=", "/=", "%=", "**=", "<<=", ">>=", ">>>=", "&=", "|=", "^=", "&&=",
    "||=", "??=", "++", "--",
];

/// Decoded obfuscator string table.
#[derive(Debug, Clone, PartialEq)]
pub struct StringTable {
    /// Declared identifier (`_0x1a2b`)
    pub name: String,
    /// Declaration keyword (`var`, `let` or `const`)
    pub keyword: String,
    /// Elements in source order
    pub values: Vec<LiteralValue>,
}

impl StringTable {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&LiteralValue> {
        self.values.get(index)
    }
}

/// Generated function that returns `TABLE[PARAM - offset]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Accessor {
    pub name: String,
    pub param: String,
    /// `Some(n)` when the body rebases the index (`p = p - n`); implies numeric conversion.
    pub offset: Option<f64>,
    /// The body decodes the stored value, so the raw element is not the result.
    pub encoded: bool,
    /// Significant-token range covering the whole function.
    span: (usize, usize),
}

/// Counters for one resolution run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolveStats {
    pub table: Option<String>,
    pub entries: usize,
    pub accessors: usize,
    pub inlined: usize,
    pub unresolved: usize,
}

struct Declaration {
    table: StringTable,
    replace_start: usize,
    replace_end: usize,
    has_semicolon: bool,
    /// Significant-token range of the declaration.
    span: (usize, usize),
}

/// Locates the obfuscator string table and inlines references to it.
#[derive(Debug, Clone, Default)]
pub struct StringTableResolver;

impl StringTableResolver {
    pub fn new() -> Self {
        Self
    }

    /// Whether `name` follows the obfuscator naming convention `_0x<hex>`.
    pub fn is_obfuscated_name(name: &str) -> bool {
        name.strip_prefix("_0x")
            .is_some_and(|hex| !hex.is_empty() && hex.bytes().all(|b| b.is_ascii_hexdigit()))
    }

    /// Resolve string table references in `unit`.
    ///
    /// # Returns
    /// The rewritten unit, or an unchanged copy when no table is declared.
    ///
    /// # Errors
    /// `UnsupportedStringTable` when the first table contains non-literal
    /// elements or is rotated at runtime.
    pub fn resolve(&self, unit: &SourceUnit) -> Result<SourceUnit> {
        self.resolve_with_stats(unit).map(|(unit, _)| unit)
    }

    /// Like [`resolve`](Self::resolve), also returning what was done.
    pub fn resolve_with_stats(&self, unit: &SourceUnit) -> Result<(SourceUnit, ResolveStats)> {
        let src = unit.as_str();
        let sig = significant_tokens(src);

        let Some(decl) = find_declaration(&sig, src)? else {
            log::debug!("No string table found");
            return Ok((unit.clone(), ResolveStats::default()));
        };
        let table = &decl.table;
        check_rotation(&sig, src, &decl)?;

        let accessors = find_accessors(&sig, src, &table.name);
        let mut stats = ResolveStats {
            table: Some(table.name.clone()),
            entries: table.len(),
            accessors: accessors.len(),
            ..ResolveStats::default()
        };

        let patterns = destructuring_patterns(&sig, src);
        let mut skip: Vec<(usize, usize)> = accessors.iter().map(|a| a.span).collect();
        skip.push(decl.span);
        skip.sort_unstable();

        let mut edits = vec![Edit::new(
            decl.replace_start,
            decl.replace_end,
            materialize(&decl),
        )];

        let mut k = 0usize;
        while k < sig.len() {
            if let Some(&(_, end)) = skip.iter().find(|(s, e)| *s <= k && k <= *e) {
                k = end + 1;
                continue;
            }
            match self.reference_at(&sig, src, k, table, &accessors, &patterns) {
                Reference::Resolved { end, edit } => {
                    edits.push(edit);
                    stats.inlined += 1;
                    k = end + 1;
                }
                Reference::Unresolved => {
                    stats.unresolved += 1;
                    k += 1;
                }
                Reference::None => k += 1,
            }
        }

        log::debug!(
            "String table {}: {} entries, {} accessors, {} inlined, {} left unresolved",
            table.name,
            stats.entries,
            stats.accessors,
            stats.inlined,
            stats.unresolved
        );
        Ok((SourceUnit::new(apply_edits(src, edits)), stats))
    }

    fn reference_at(
        &self,
        sig: &[Token],
        src: &str,
        k: usize,
        table: &StringTable,
        accessors: &[Accessor],
        patterns: &[(usize, usize)],
    ) -> Reference {
        let token = sig[k];
        if token.kind != TokenKind::Ident {
            return Reference::None;
        }
        let name = token.text(src);
        let is_table = name == table.name;
        let accessor = accessors.iter().find(|a| a.name == name);
        if !is_table && accessor.is_none() {
            return Reference::None;
        }
        let prev = k.checked_sub(1).map(|p| sig[p]);
        if prev.is_some_and(|p| {
            p.is_punct(src, ".")
                || p.is_punct(src, "?.")
                || p.is_word(src, "function")
                || p.is_word(src, "new")
        }) {
            return Reference::None;
        }

        let Some(open) = sig.get(k + 1) else {
            return Reference::None;
        };
        let is_call = open.is_punct(src, "(");
        let is_index = is_table && open.is_punct(src, "[");
        if !is_call && !is_index {
            return Reference::None;
        }
        let Some(close) = matching_close(sig, src, k + 1) else {
            return Reference::Unresolved;
        };
        if is_index && is_write_target(sig, src, k, close, patterns) {
            return Reference::Unresolved;
        }

        let args = &sig[k + 2..close];
        let index = match literal::evaluate(args, src) {
            Ok(value) => match accessor {
                Some(a) if a.encoded => None,
                Some(Accessor {
                    offset: Some(offset),
                    ..
                }) => LiteralValue::Num(value.to_number() - offset).as_numeric_index(),
                _ => value.as_property_index(),
            },
            Err(_) => None,
        };
        let Some(value) = index.and_then(|i| table.get(i)) else {
            return Reference::Unresolved;
        };

        let followed_by_member = sig
            .get(close + 1)
            .is_some_and(|t| t.is_punct(src, ".") || t.is_punct(src, "?."));
        let mut replacement = value.to_js();
        if let LiteralValue::Num(n) = value {
            if *n < 0.0 || followed_by_member {
                replacement = format!("({})", replacement);
            }
        }
        Reference::Resolved {
            end: close,
            edit: Edit::new(token.start, sig[close].end, replacement),
        }
    }
}

/// Whether the indexed access `sig[k..=close]` is written rather than read.
fn is_write_target(
    sig: &[Token],
    src: &str,
    k: usize,
    close: usize,
    patterns: &[(usize, usize)],
) -> bool {
    let next = sig.get(close + 1);
    if next.is_some_and(|t| t.kind == TokenKind::Punct && ASSIGNMENT_OPS.contains(&t.text(src))) {
        return true;
    }
    let prev = k.checked_sub(1).map(|p| sig[p]);
    if prev.is_some_and(|p| {
        p.is_punct(src, "++") || p.is_punct(src, "--") || p.is_word(src, "delete")
    }) {
        return true;
    }
    // `for (T[i] in obj)` and `for (T[i] of list)`
    let for_head = k >= 2 && sig[k - 1].is_punct(src, "(") && sig[k - 2].is_word(src, "for");
    if for_head && next.is_some_and(|t| t.is_word(src, "in") || t.is_word(src, "of")) {
        return true;
    }
    patterns.iter().any(|&(open, end)| open < k && close < end)
}

/// Spans of `[...]` and `{...}` groups used as destructuring targets.
///
/// A group counts when its closer is followed by a plain `=` or by `of`
/// (`for (const [a, b] of list)`). Defaults inside such a group are treated as
/// targets too, which only leaves them unresolved.
fn destructuring_patterns(sig: &[Token], src: &str) -> Vec<(usize, usize)> {
    let mut open: Vec<usize> = Vec::new();
    let mut patterns = Vec::new();
    for (i, tok) in sig.iter().enumerate() {
        if tok.kind != TokenKind::Punct {
            continue;
        }
        match tok.text(src) {
            "(" | "[" | "{" => open.push(i),
            ")" | "]" | "}" => {
                let Some(start) = open.pop() else {
                    continue;
                };
                let is_group = !sig[start].is_punct(src, "(");
                let assigned = sig
                    .get(i + 1)
                    .is_some_and(|t| t.is_punct(src, "=") || t.is_word(src, "of"));
                if is_group && assigned {
                    patterns.push((start, i));
                }
            }
            _ => {}
        }
    }
    patterns
}

enum Reference {
    Resolved { end: usize, edit: Edit },
    Unresolved,
    None,
}

fn find_declaration(sig: &[Token], src: &str) -> Result<Option<Declaration>> {
    for i in 0..sig.len() {
        let kw = sig[i];
        let keyword = kw.text(src);
        if kw.kind != TokenKind::Ident || !matches!(keyword, "var" | "let" | "const") {
            continue;
        }
        if i > 0 && sig[i - 1].is_punct(src, ".") {
            continue;
        }
        let (Some(name_tok), Some(eq), Some(open)) =
            (sig.get(i + 1), sig.get(i + 2), sig.get(i + 3))
        else {
            continue;
        };
        let name = name_tok.text(src);
        if name_tok.kind != TokenKind::Ident
            || !StringTableResolver::is_obfuscated_name(name)
            || !eq.is_punct(src, "=")
            || !open.is_punct(src, "[")
        {
            continue;
        }

        let close = matching_close(sig, src, i + 3)
            .ok_or_else(|| DeobsError::unsupported_table(name, "unterminated array literal"))?;
        let values = literal::evaluate_list(&sig[i + 4..close], src)
            .map_err(|e| DeobsError::unsupported_table(name, e.to_string()))?;
        let has_semicolon = sig.get(close + 1).is_some_and(|t| t.is_punct(src, ";"));
        let last = if has_semicolon { close + 1 } else { close };

        // Re-materializing replaces the previous annotation too.
        let gap_start = if i == 0 { 0 } else { sig[i - 1].end };
        let gap = &src[gap_start..kw.start];
        let replace_start = match gap.rfind(ANNOTATION_PREFIX) {
            Some(pos) if gap[pos..].contains("*/") => gap_start + pos,
            _ => kw.start,
        };

        return Ok(Some(Declaration {
            table: StringTable {
                name: name.to_string(),
                keyword: keyword.to_string(),
                values,
            },
            replace_start,
            replace_end: sig[last].end,
            has_semicolon,
            span: (i, last),
        }));
    }
    Ok(None)
}

/// Tables passed to the rotation IIFE together with a shift count are reordered at runtime.
fn check_rotation(sig: &[Token], src: &str, decl: &Declaration) -> Result<()> {
    let name = decl.table.name.as_str();
    let is = |idx: usize, p: &str| sig.get(idx).is_some_and(|t| t.is_punct(src, p));
    let is_number = |idx: usize| sig.get(idx).is_some_and(|t| t.kind == TokenKind::Number);

    for k in 1..sig.len() {
        if (decl.span.0..=decl.span.1).contains(&k) || !sig[k].is_word(src, name) {
            continue;
        }
        let leading = is(k - 1, "(") && is(k + 1, ",") && is_number(k + 2) && is(k + 3, ")");
        let trailing =
            k >= 3 && is(k - 1, ",") && is_number(k - 2) && is(k - 3, "(") && is(k + 1, ")");
        if leading || trailing {
            return Err(DeobsError::unsupported_table(
                name,
                "table is rotated at runtime, source order does not match lookup order",
            ));
        }
    }
    Ok(())
}

fn find_accessors(sig: &[Token], src: &str, table: &str) -> Vec<Accessor> {
    let mut accessors = Vec::new();
    let word = |idx: usize| {
        sig.get(idx)
            .filter(|t| t.kind == TokenKind::Ident)
            .map(|t| t.text(src))
    };
    let is = |idx: usize, p: &str| sig.get(idx).is_some_and(|t| t.is_punct(src, p));

    for i in 0..sig.len() {
        let (name_idx, paren_idx) = match word(i) {
            Some("function") if is(i + 2, "(") => (i + 1, i + 2),
            Some("var" | "let" | "const")
                if is(i + 2, "=") && word(i + 3) == Some("function") && is(i + 4, "(") =>
            {
                (i + 1, i + 4)
            }
            _ => continue,
        };
        let Some(name) = word(name_idx) else {
            continue;
        };
        if name == table || !StringTableResolver::is_obfuscated_name(name) {
            continue;
        }
        let Some(close_paren) = matching_close(sig, src, paren_idx) else {
            continue;
        };
        let params: SmallVec<[&str; 4]> = sig[paren_idx + 1..close_paren]
            .split(|t| t.is_punct(src, ","))
            .filter_map(|p| p.first().map(|t| t.text(src)))
            .collect();
        let Some(&param) = params.first() else {
            continue;
        };
        if !is(close_paren + 1, "{") {
            continue;
        }
        let Some(body_close) = matching_close(sig, src, close_paren + 1) else {
            continue;
        };
        let body = &sig[close_paren + 2..body_close];

        let indexes_table = body.windows(4).any(|w| {
            w[0].is_word(src, table)
                && w[1].is_punct(src, "[")
                && w[2].is_word(src, param)
                && w[3].is_punct(src, "]")
        });
        if !indexes_table {
            continue;
        }
        let encoded = body
            .iter()
            .any(|t| t.kind == TokenKind::Ident && DECODER_CALLS.contains(&t.text(src)));

        accessors.push(Accessor {
            name: name.to_string(),
            param: param.to_string(),
            offset: find_offset(body, src, param),
            encoded,
            span: (i, body_close),
        });
    }
    accessors
}

/// Find `p = p - n`, `p = p + n`, `p -= n` or `p += n`; returns the amount subtracted.
fn find_offset(body: &[Token], src: &str, param: &str) -> Option<f64> {
    let number = |t: &Token| {
        (t.kind == TokenKind::Number)
            .then(|| literal::parse_number_literal(t.text(src)))
            .flatten()
    };
    for (j, t) in body.iter().enumerate() {
        if !t.is_word(src, param) {
            continue;
        }
        let rest = &body[j + 1..];
        match rest {
            [eq, p, op, n, ..] if eq.is_punct(src, "=") && p.is_word(src, param) => {
                if let Some(n) = number(n) {
                    if op.is_punct(src, "-") {
                        return Some(n);
                    }
                    if op.is_punct(src, "+") {
                        return Some(-n);
                    }
                }
            }
            [op, n, ..] if op.is_punct(src, "-=") => return number(n),
            [op, n, ..] if op.is_punct(src, "+=") => return number(n).map(|n| -n),
            _ => {}
        }
    }
    None
}

fn materialize(decl: &Declaration) -> String {
    let table = &decl.table;
    format!(
        "{} {} [{} entries] */\n{} {} = {}{}",
        ANNOTATION_PREFIX,
        table.name,
        table.len(),
        table.keyword,
        table.name,
        LiteralValue::Array(table.values.clone()).to_js(),
        if decl.has_semicolon { ";" } else { "" }
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolve(src: &str) -> Result<String> {
        StringTableResolver::new()
            .resolve(&SourceUnit::new(src))
            .map(SourceUnit::into_string)
    }

    #[test]
    fn test_inlines_in_range_and_keeps_out_of_range() {
        let src = "var _0xabc1 = [\"foo\",\"bar\"];\nconsole.log(_0xabc1(1));\nconsole.log(_0xabc1(2));\n";
        let out = resolve(src).unwrap();
        assert!(out.contains("console.log(\"bar\");"));
        assert!(out.contains("console.log(_0xabc1(2));"));
        assert!(out.contains(ANNOTATION_PREFIX));
        assert!(out.contains("var _0xabc1 = [\"foo\", \"bar\"];"));
    }

    #[test]
    fn test_rejects_non_literal_elements() {
        let err = resolve("var _0xabc1 = [foo(), \"bar\"];\nfoo();").unwrap_err();
        match err {
            DeobsError::UnsupportedStringTable { table, reason } => {
                assert_eq!(table, "_0xabc1");
                assert!(reason.contains("foo"));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_no_table_is_noop() {
        let src = "const a = [1, 2];\nf(a[0]);\n";
        assert_eq!(resolve(src).unwrap(), src);
    }

    #[test]
    fn test_accessor_with_offset() {
        let src = "var _0x1a2b = ['a', 'b', 'c'];\n\
                   var _0x3c4d = function (_0x5, _0x6) { _0x5 = _0x5 - 0x1; var _0x7 = _0x1a2b[_0x5]; return _0x7; };\n\
                   x(_0x3c4d('0x2'), _0x3c4d(0x1, 'key'), _0x3c4d(0x9));\n";
        let out = resolve(src).unwrap();
        assert!(out.contains("x(\"b\", _0x3c4d(0x1, 'key'), _0x3c4d(0x9));"));
        // The accessor body itself is left alone.
        assert!(out.contains("var _0x7 = _0x1a2b[_0x5];"));
    }

    #[test]
    fn test_encoded_accessor_is_skipped() {
        let src = "var _0x1a2b = ['YQ=='];\n\
                   function _0x3c4d(_0x5) { return atob(_0x1a2b[_0x5]); }\n\
                   x(_0x3c4d(0));\n";
        let out = resolve(src).unwrap();
        assert!(out.contains("x(_0x3c4d(0));"));
    }

    #[test]
    fn test_rotated_table_rejected() {
        let src = "var _0x1a2b = ['a', 'b'];\n(function (_0xa, _0xb) { _0xa.push(_0xa.shift()); })(_0x1a2b, 0x7b);\n";
        assert!(matches!(
            resolve(src),
            Err(DeobsError::UnsupportedStringTable { .. })
        ));
    }

    #[test]
    fn test_direct_index_and_unbound_callees() {
        let src = "var _0x1a2b = ['a', -2];\n\
                   y(_0x1a2b[0], _0x1a2b[1], _0x1a2b['1']);\n\
                   _0x1a2b[0] = 'z';\n\
                   obj._0x1a2b(0);\n\
                   _0x9999(0);\n";
        let out = resolve(src).unwrap();
        assert!(out.contains("y(\"a\", (-2), (-2));"));
        assert!(out.contains("_0x1a2b[0] = 'z';"));
        assert!(out.contains("obj._0x1a2b(0);"));
        assert!(out.contains("_0x9999(0);"));
    }

    #[test]
    fn test_prefix_updates_and_delete_left_alone() {
        let src = "var _0xabc1 = ['foo', 'bar'];\n++_0xabc1[0];\n--_0xabc1[1];\ndelete _0xabc1[1];\nf(-_0xabc1[0]);\n";
        let out = resolve(src).unwrap();
        assert!(out.contains("++_0xabc1[0];"));
        assert!(out.contains("--_0xabc1[1];"));
        assert!(out.contains("delete _0xabc1[1];"));
        assert!(out.contains("f(-\"foo\");"));
    }

    #[test]
    fn test_destructuring_targets_left_alone() {
        let src = "var _0xabc1 = ['foo', 'bar'];\n\
                   [_0xabc1[0]] = x;\n\
                   ({ a: _0xabc1[1], b: [_0xabc1[0]] } = y);\n\
                   for (_0xabc1[0] of list) {}\n\
                   for ([_0xabc1[1]] of pairs) {}\n\
                   g([_0xabc1[0]], { k: _0xabc1[1] });\n\
                   h([_0xabc1[0]] == z);\n";
        let out = resolve(src).unwrap();
        assert!(out.contains("[_0xabc1[0]] = x;"));
        assert!(out.contains("({ a: _0xabc1[1], b: [_0xabc1[0]] } = y);"));
        assert!(out.contains("for (_0xabc1[0] of list) {}"));
        assert!(out.contains("for ([_0xabc1[1]] of pairs) {}"));
        assert!(out.contains("g([\"foo\"], { k: \"bar\" });"));
        assert!(out.contains("h([\"foo\"] == z);"));
    }

    #[test]
    fn test_unpaired_surrogate_table_rejected() {
        let src = "var _0xabc1 = ['\\uD800x'];\nf(_0xabc1[0]);\n";
        assert!(matches!(
            resolve(src),
            Err(DeobsError::UnsupportedStringTable { .. })
        ));
    }

    #[test]
    fn test_rematerialization_is_stable() {
        let src = "var _0xabc1 = ['foo', 'bar'];\nlog(_0xabc1(0));\n";
        let once = resolve(src).unwrap();
        let twice = resolve(&once).unwrap();
        assert_eq!(once, twice);
        assert_eq!(once.matches(ANNOTATION_PREFIX).count(), 1);
    }

    #[test]
    fn test_naming_convention() {
        assert!(StringTableResolver::is_obfuscated_name("_0xabc1"));
        assert!(StringTableResolver::is_obfuscated_name("_0x1A2B"));
        assert!(!StringTableResolver::is_obfuscated_name("_0x"));
        assert!(!StringTableResolver::is_obfuscated_name("_0xzz"));
        assert!(!StringTableResolver::is_obfuscated_name("strings"));
    }
}
