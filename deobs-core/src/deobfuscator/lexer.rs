//! JavaScript Tokenizer
//!
//! This module provides a total tokenizer for JavaScript source text. It never
//! fails: malformed input (unterminated strings, comments, templates or regex
//! literals) is tokenized best-effort and the remaining text is consumed.
//!
//! Every token carries the byte span it occupies in the source, so transforms
//! can splice replacements into the original text without re-printing it.
//!
//! # Token Kinds
//! - **Ident**: identifiers and keywords (`var`, `_0x1a2b`, `if`)
//! - **Number**: numeric literals (`42`, `0x1f`, `.5`, `1e-3`, `10n`)
//! - **Str**: single- or double-quoted string literals
//! - **Template**: template literals, kept whole including `${}` substitutions
//! - **Regex**: regular expression literals (decided by the previous token)
//! - **Punct**: punctuators, longest match (`===`, `=>`, `?.`)
//! - **LineComment / BlockComment / Whitespace / Newline**: trivia

/// Token classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Ident,
    Number,
    Str,
    Template,
    Regex,
    Punct,
    LineComment,
    BlockComment,
    Whitespace,
    Newline,
}

/// A token and its byte span in the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub start: usize,
    pub end: usize,
}

impl Token {
    /// Source text covered by this token.
    #[inline]
    pub fn text<'a>(&self, source: &'a str) -> &'a str {
        &source[self.start..self.end]
    }

    /// Whitespace, newlines and comments.
    #[inline]
    pub fn is_trivia(&self) -> bool {
        matches!(
            self.kind,
            TokenKind::Whitespace
                | TokenKind::Newline
                | TokenKind::LineComment
                | TokenKind::BlockComment
        )
    }

    #[inline]
    pub fn is_comment(&self) -> bool {
        matches!(self.kind, TokenKind::LineComment | TokenKind::BlockComment)
    }

    /// Whether this token is the punctuator `p`.
    #[inline]
    pub fn is_punct(&self, source: &str, p: &str) -> bool {
        self.kind == TokenKind::Punct && self.text(source) == p
    }

    /// Whether this token is the identifier or keyword `word`.
    #[inline]
    pub fn is_word(&self, source: &str, word: &str) -> bool {
        self.kind == TokenKind::Ident && self.text(source) == word
    }
}

/// Punctuators ordered longest first so the first match is the longest.
const PUNCTUATORS: &[&str] = &[
    ">>>=", "...", "===", "!==", "**=", "<<=", ">>=", ">>>", "&&=", "||=", "??=", "=>", "==",
    "!=", "<=", ">=", "&&", "||", "??", "?.", "++", "--", "+=", "-=", "*=", "/=", "%=", "&=",
    "|=", "^=", "**", "<<", ">>",
];

/// Reserved words and contextual keywords that can never be binding names.
const KEYWORDS: &[&str] = &[
    "await", "break", "case", "catch", "class", "const", "continue", "debugger", "default",
    "delete", "do", "else", "export", "extends", "false", "finally", "for", "function", "if",
    "import", "in", "instanceof", "let", "new", "null", "of", "return", "super", "switch",
    "this", "throw", "true", "try", "typeof", "var", "void", "while", "with", "yield",
];

/// Keywords after which a `/` starts a regular expression rather than a division.
const REGEX_PREFIX_KEYWORDS: &[&str] = &[
    "return", "typeof", "instanceof", "in", "of", "new", "delete", "void", "throw", "case",
    "do", "else", "yield", "await",
];

/// Whether `word` is a JavaScript keyword.
#[inline]
pub fn is_keyword(word: &str) -> bool {
    KEYWORDS.contains(&word)
}

#[inline]
fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_' || b == b'$' || b >= 0x80
}

#[inline]
fn is_ident_continue(b: u8) -> bool {
    is_ident_start(b) || b.is_ascii_digit()
}

/// Tokenize JavaScript source text.
///
/// # Algorithm
/// Single left-to-right scan over the bytes. All delimiters are ASCII and
/// non-ASCII bytes are only ever consumed as part of a larger token, so every
/// span boundary falls on a UTF-8 character boundary.
///
/// # Arguments
/// * `source` - JavaScript source text
///
/// # Returns
/// `Vec<Token>` - Every byte of `source` is covered by exactly one token
pub fn tokenize(source: &str) -> Vec<Token> {
    let bytes = source.as_bytes();
    let len = bytes.len();
    let mut tokens: Vec<Token> = Vec::with_capacity(len / 3 + 1);
    let mut prev_significant: Option<Token> = None;
    // One entry per open `(`: whether it starts a statement header.
    let mut paren_headers: Vec<bool> = Vec::new();
    let mut after_header = false;
    let mut i = 0usize;

    while i < len {
        let b = bytes[i];
        let start = i;
        let kind = match b {
            b'\n' => {
                i += 1;
                TokenKind::Newline
            }
            b' ' | b'\t' | b'\r' | 0x0B | 0x0C => {
                while i < len && matches!(bytes[i], b' ' | b'\t' | b'\r' | 0x0B | 0x0C) {
                    i += 1;
                }
                TokenKind::Whitespace
            }
            b'/' if bytes.get(i + 1) == Some(&b'/') => {
                while i < len && bytes[i] != b'\n' {
                    i += 1;
                }
                TokenKind::LineComment
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i = match find_from(bytes, i + 2, b"*/") {
                    Some(pos) => pos + 2,
                    None => len,
                };
                TokenKind::BlockComment
            }
            b'/' if regex_allowed(source, prev_significant, after_header) => {
                match scan_regex(bytes, i) {
                    Some(end) => {
                        i = end;
                        TokenKind::Regex
                    }
                    None => {
                        i = scan_punct(bytes, i);
                        TokenKind::Punct
                    }
                }
            }
            b'\'' | b'"' => {
                i = scan_string(bytes, i);
                TokenKind::Str
            }
            b'`' => {
                i = scan_template(bytes, i);
                TokenKind::Template
            }
            b'0'..=b'9' => {
                i = scan_number(bytes, i);
                TokenKind::Number
            }
            b'.' if bytes.get(i + 1).is_some_and(|c| c.is_ascii_digit()) => {
                i = scan_number(bytes, i);
                TokenKind::Number
            }
            _ if is_ident_start(b) => {
                while i < len && is_ident_continue(bytes[i]) {
                    i += 1;
                }
                TokenKind::Ident
            }
            _ => {
                i = scan_punct(bytes, i);
                TokenKind::Punct
            }
        };

        let token = Token {
            kind,
            start,
            end: i,
        };
        if !token.is_trivia() {
            after_header = false;
            if token.is_punct(source, "(") {
                let header = prev_significant.is_some_and(|p| {
                    p.kind == TokenKind::Ident && STATEMENT_HEADERS.contains(&p.text(source))
                });
                paren_headers.push(header);
            } else if token.is_punct(source, ")") {
                after_header = paren_headers.pop().unwrap_or(false);
            }
            prev_significant = Some(token);
        }
        tokens.push(token);
    }

    tokens
}

/// Tokenize and keep only significant (non-trivia) tokens.
pub fn significant_tokens(source: &str) -> Vec<Token> {
    tokenize(source)
        .into_iter()
        .filter(|t| !t.is_trivia())
        .collect()
}

/// Find the index of the token closing the bracket opened at `open`.
///
/// # Arguments
/// * `tokens` - Significant tokens
/// * `source` - Source text the tokens index into
/// * `open` - Index of an opening `(`, `[` or `{`
///
/// # Returns
/// `Option<usize>` - Index of the matching closer, `None` if unbalanced
pub fn matching_close(tokens: &[Token], source: &str, open: usize) -> Option<usize> {
    let (opener, closer) = match tokens.get(open)?.text(source) {
        "(" => ("(", ")"),
        "[" => ("[", "]"),
        "{" => ("{", "}"),
        _ => return None,
    };
    let mut depth = 0usize;
    for (idx, token) in tokens.iter().enumerate().skip(open) {
        if token.kind != TokenKind::Punct {
            continue;
        }
        let text = token.text(source);
        if text == opener {
            depth += 1;
        } else if text == closer {
            depth -= 1;
            if depth == 0 {
                return Some(idx);
            }
        }
    }
    None
}

fn find_from(bytes: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    if from >= bytes.len() {
        return None;
    }
    bytes[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}

/// Keywords whose parenthesized header is followed by a statement, so a `/`
/// after the closing `)` starts a regex.
const STATEMENT_HEADERS: &[&str] = &["if", "while", "for", "with"];

/// Whether a `/` after `prev` starts a regex rather than a division.
///
/// `after_header` is set when `prev` is the `)` closing a statement header.
fn regex_allowed(source: &str, prev: Option<Token>, after_header: bool) -> bool {
    let Some(prev) = prev else {
        return true;
    };
    let text = prev.text(source);
    match prev.kind {
        TokenKind::Punct if text == ")" => after_header,
        TokenKind::Punct => !matches!(text, "]" | "}" | "++" | "--"),
        TokenKind::Ident => REGEX_PREFIX_KEYWORDS.contains(&text),
        _ => false,
    }
}

fn scan_punct(bytes: &[u8], i: usize) -> usize {
    for p in PUNCTUATORS {
        if bytes[i..].starts_with(p.as_bytes()) {
            // `?.5` is a conditional followed by a number, not optional chaining
            if *p == "?." && bytes.get(i + 2).is_some_and(|c| c.is_ascii_digit()) {
                continue;
            }
            return i + p.len();
        }
    }
    // Single byte punctuator; step over a whole UTF-8 sequence if one starts here.
    let mut end = i + 1;
    while end < bytes.len() && (bytes[end] & 0xC0) == 0x80 {
        end += 1;
    }
    end
}

fn scan_string(bytes: &[u8], i: usize) -> usize {
    let quote = bytes[i];
    let mut j = i + 1;
    while j < bytes.len() {
        match bytes[j] {
            b'\\' => j += 2,
            b'\n' => return j,
            c if c == quote => return j + 1,
            _ => j += 1,
        }
    }
    bytes.len()
}

fn scan_template(bytes: &[u8], i: usize) -> usize {
    let mut j = i + 1;
    while j < bytes.len() {
        match bytes[j] {
            b'\\' => j += 2,
            b'`' => return j + 1,
            b'$' if bytes.get(j + 1) == Some(&b'{') => {
                j = scan_substitution(bytes, j + 2);
            }
            _ => j += 1,
        }
    }
    bytes.len()
}

/// Scan a `${ ... }` body starting after the `{`; returns the index after the closing `}`.
fn scan_substitution(bytes: &[u8], mut j: usize) -> usize {
    let mut depth = 1usize;
    while j < bytes.len() {
        match bytes[j] {
            b'{' => {
                depth += 1;
                j += 1;
            }
            b'}' => {
                depth -= 1;
                j += 1;
                if depth == 0 {
                    return j;
                }
            }
            b'\'' | b'"' => j = scan_string(bytes, j),
            b'`' => j = scan_template(bytes, j),
            _ => j += 1,
        }
    }
    bytes.len()
}

/// Returns `None` when no closing `/` is found on the same line.
fn scan_regex(bytes: &[u8], i: usize) -> Option<usize> {
    let mut j = i + 1;
    let mut in_class = false;
    while j < bytes.len() {
        match bytes[j] {
            b'\\' => j += 2,
            b'\n' => return None,
            b'[' => {
                in_class = true;
                j += 1;
            }
            b']' => {
                in_class = false;
                j += 1;
            }
            b'/' if !in_class => {
                j += 1;
                while j < bytes.len() && bytes[j].is_ascii_alphabetic() {
                    j += 1;
                }
                return Some(j);
            }
            _ => j += 1,
        }
    }
    None
}

fn scan_number(bytes: &[u8], i: usize) -> usize {
    let len = bytes.len();
    let mut j = i;
    let radix_prefix = bytes[j] == b'0'
        && bytes
            .get(j + 1)
            .is_some_and(|c| matches!(c | 0x20, b'x' | b'o' | b'b'));
    if radix_prefix {
        j += 2;
        while j < len && (bytes[j].is_ascii_alphanumeric() || bytes[j] == b'_') {
            j += 1;
        }
        return j;
    }
    while j < len && (bytes[j].is_ascii_digit() || bytes[j] == b'_') {
        j += 1;
    }
    if j < len && bytes[j] == b'.' {
        j += 1;
        while j < len && (bytes[j].is_ascii_digit() || bytes[j] == b'_') {
            j += 1;
        }
    }
    if j < len && (bytes[j] | 0x20) == b'e' {
        let mut k = j + 1;
        if k < len && (bytes[k] == b'+' || bytes[k] == b'-') {
            k += 1;
        }
        if k < len && bytes[k].is_ascii_digit() {
            j = k;
            while j < len && bytes[j].is_ascii_digit() {
                j += 1;
            }
        }
    }
    if j < len && bytes[j] == b'n' {
        j += 1;
    }
    j
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds_and_texts(src: &str) -> Vec<(TokenKind, &str)> {
        significant_tokens(src)
            .into_iter()
            .map(|t| (t.kind, t.text(src)))
            .collect()
    }

    #[test]
    fn test_tokens_cover_source() {
        let src = "var a = 'x\\'y'; // c\n/* b */ a >>>= 2;";
        let tokens = tokenize(src);
        let rebuilt: String = tokens.iter().map(|t| t.text(src)).collect();
        assert_eq!(rebuilt, src);
    }

    #[test]
    fn test_regex_versus_division() {
        let toks = kinds_and_texts("a = b / c / d; r = /[/]x/g.test(s);");
        assert!(toks.contains(&(TokenKind::Punct, "/")));
        assert!(toks.contains(&(TokenKind::Regex, "/[/]x/g")));
    }

    #[test]
    fn test_regex_after_statement_header() {
        let toks = kinds_and_texts("if (ok) /{;}/.test(s); while (f(x)) /a/g.exec(t);");
        assert!(toks.contains(&(TokenKind::Regex, "/{;}/")));
        assert!(toks.contains(&(TokenKind::Regex, "/a/g")));
        assert!(!toks.contains(&(TokenKind::Punct, "{")));

        let toks = kinds_and_texts("x = (a + b) / 2 / c; if (f(a) / 2) y();");
        assert_eq!(toks.iter().filter(|t| **t == (TokenKind::Punct, "/")).count(), 3);
        assert!(toks.iter().all(|(k, _)| *k != TokenKind::Regex));
    }

    #[test]
    fn test_template_with_nested_braces() {
        let src = "`a ${ {b: `c${d}`}.b } e` + 1";
        let toks = kinds_and_texts(src);
        assert_eq!(toks[0].0, TokenKind::Template);
        assert_eq!(toks[1], (TokenKind::Punct, "+"));
    }

    #[test]
    fn test_numbers() {
        let toks = kinds_and_texts("0x1F .5 1e-3 10n 1_000");
        assert!(toks.iter().all(|(k, _)| *k == TokenKind::Number));
        assert_eq!(toks.len(), 5);
    }

    #[test]
    fn test_unterminated_input_is_total() {
        for src in ["'abc", "/* open", "`tpl ${", "a = /re", "\u{e9}\u{e8} = 1"] {
            let tokens = tokenize(src);
            let rebuilt: String = tokens.iter().map(|t| t.text(src)).collect();
            assert_eq!(rebuilt, src);
        }
    }

    #[test]
    fn test_matching_close() {
        let src = "if (a) { b({c: [1]}); }";
        let toks = significant_tokens(src);
        let open = toks.iter().position(|t| t.is_punct(src, "{")).unwrap();
        let close = matching_close(&toks, src, open).unwrap();
        assert_eq!(close, toks.len() - 1);
    }
}
