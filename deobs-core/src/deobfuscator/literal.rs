//! Literal-Only Expression Evaluator
//!
//! Decodes obfuscator string tables and index arguments without executing
//! anything. The accepted grammar is deliberately tiny:
//!
//! ```text
//! list    := [ expr ( ',' expr )* [ ',' ] ]
//! expr    := unary ( ( '+' | '-' ) unary )*
//! unary   := ( '+' | '-' )* primary
//! primary := string | template-without-substitutions | number
//!          | 'true' | 'false' | 'null' | '[' list ']' | '(' expr ')'
//! ```
//!
//! Identifiers, calls, member accesses, holes and every other construct are
//! rejected with [`LiteralError::NonLiteral`].

use crate::deobfuscator::lexer::{Token, TokenKind};
use serde::Serialize;
use thiserror::Error;

/// A decoded literal value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum LiteralValue {
    Str(String),
    Num(f64),
    Bool(bool),
    Null,
    Array(Vec<LiteralValue>),
}

/// Why a token sequence is not a literal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LiteralError {
    #[error("non-literal syntax `{0}`")]
    NonLiteral(String),
    #[error("malformed literal: {0}")]
    Malformed(String),
}

impl LiteralValue {
    /// Render as JavaScript source.
    pub fn to_js(&self) -> String {
        match self {
            LiteralValue::Str(s) => quote_js_string(s),
            LiteralValue::Num(n) => format_number(*n),
            LiteralValue::Bool(b) => b.to_string(),
            LiteralValue::Null => "null".to_string(),
            LiteralValue::Array(items) => {
                let inner: Vec<String> = items.iter().map(LiteralValue::to_js).collect();
                format!("[{}]", inner.join(", "))
            }
        }
    }

    /// JavaScript `ToNumber` for the supported value kinds.
    pub fn to_number(&self) -> f64 {
        match self {
            LiteralValue::Num(n) => *n,
            LiteralValue::Bool(b) => f64::from(u8::from(*b)),
            LiteralValue::Null => 0.0,
            LiteralValue::Str(s) => string_to_number(s),
            LiteralValue::Array(_) => f64::NAN,
        }
    }

    /// Array index this value selects when used as a property key (`table[key]`).
    ///
    /// Strings only select an element when they are canonical index strings
    /// (`"1"` does, `"01"` and `"0x1"` do not).
    pub fn as_property_index(&self) -> Option<usize> {
        match self {
            LiteralValue::Num(n) => integral_index(*n),
            LiteralValue::Str(s) => {
                let idx: usize = s.parse().ok()?;
                (idx.to_string() == *s).then_some(idx)
            }
            _ => None,
        }
    }

    /// Array index this value selects after numeric conversion (`table[key - 0]`).
    pub fn as_numeric_index(&self) -> Option<usize> {
        integral_index(self.to_number())
    }
}

fn integral_index(n: f64) -> Option<usize> {
    if n.is_finite() && n >= 0.0 && n.fract() == 0.0 && n < u32::MAX as f64 {
        Some(n as usize)
    } else {
        None
    }
}

/// Evaluate a comma-separated element list (the inside of an array literal).
pub fn evaluate_list(tokens: &[Token], source: &str) -> Result<Vec<LiteralValue>, LiteralError> {
    let mut parser = Parser {
        tokens,
        source,
        pos: 0,
    };
    let values = parser.list()?;
    parser.finish()?;
    Ok(values)
}

/// Evaluate a single literal-valued expression spanning all of `tokens`.
pub fn evaluate(tokens: &[Token], source: &str) -> Result<LiteralValue, LiteralError> {
    let mut parser = Parser {
        tokens,
        source,
        pos: 0,
    };
    let value = parser.expr()?;
    parser.finish()?;
    Ok(value)
}

struct Parser<'a> {
    tokens: &'a [Token],
    source: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    fn peek_punct(&self, p: &str) -> bool {
        self.peek().is_some_and(|t| t.is_punct(self.source, p))
    }

    fn finish(&self) -> Result<(), LiteralError> {
        match self.peek() {
            None => Ok(()),
            Some(t) => Err(LiteralError::NonLiteral(t.text(self.source).to_string())),
        }
    }

    fn list(&mut self) -> Result<Vec<LiteralValue>, LiteralError> {
        let mut values = Vec::new();
        while self.peek().is_some() && !self.peek_punct("]") {
            if self.peek_punct(",") {
                return Err(LiteralError::Malformed("array hole".to_string()));
            }
            values.push(self.expr()?);
            if self.peek_punct(",") {
                self.pos += 1;
            } else {
                break;
            }
        }
        Ok(values)
    }

    fn expr(&mut self) -> Result<LiteralValue, LiteralError> {
        let mut lhs = self.unary()?;
        loop {
            let op = if self.peek_punct("+") {
                '+'
            } else if self.peek_punct("-") {
                '-'
            } else {
                return Ok(lhs);
            };
            self.pos += 1;
            let rhs = self.unary()?;
            lhs = binary(op, lhs, rhs)?;
        }
    }

    fn unary(&mut self) -> Result<LiteralValue, LiteralError> {
        if self.peek_punct("-") {
            self.pos += 1;
            let value = self.unary()?;
            return Ok(LiteralValue::Num(-value.to_number()));
        }
        if self.peek_punct("+") {
            self.pos += 1;
            let value = self.unary()?;
            return Ok(LiteralValue::Num(value.to_number()));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<LiteralValue, LiteralError> {
        let token = *self
            .peek()
            .ok_or_else(|| LiteralError::Malformed("unexpected end of expression".to_string()))?;
        let text = token.text(self.source);
        self.pos += 1;
        match token.kind {
            TokenKind::Str => parse_string_literal(text)
                .map(LiteralValue::Str)
                .ok_or_else(|| LiteralError::Malformed(format!("bad string {}", text))),
            TokenKind::Template if !text.contains("${") => parse_string_literal(text)
                .map(LiteralValue::Str)
                .ok_or_else(|| LiteralError::Malformed(format!("bad template {}", text))),
            TokenKind::Number => parse_number_literal(text)
                .map(LiteralValue::Num)
                .ok_or_else(|| LiteralError::Malformed(format!("bad number {}", text))),
            TokenKind::Ident => match text {
                "true" => Ok(LiteralValue::Bool(true)),
                "false" => Ok(LiteralValue::Bool(false)),
                "null" => Ok(LiteralValue::Null),
                _ => Err(LiteralError::NonLiteral(text.to_string())),
            },
            TokenKind::Punct if text == "[" => {
                let items = self.list()?;
                if !self.peek_punct("]") {
                    return Err(LiteralError::Malformed("unclosed array".to_string()));
                }
                self.pos += 1;
                Ok(LiteralValue::Array(items))
            }
            TokenKind::Punct if text == "(" => {
                let value = self.expr()?;
                if !self.peek_punct(")") {
                    return Err(LiteralError::Malformed("unclosed parenthesis".to_string()));
                }
                self.pos += 1;
                Ok(value)
            }
            _ => Err(LiteralError::NonLiteral(text.to_string())),
        }
    }
}

fn binary(op: char, lhs: LiteralValue, rhs: LiteralValue) -> Result<LiteralValue, LiteralError> {
    match (op, lhs, rhs) {
        ('+', LiteralValue::Str(a), LiteralValue::Str(b)) => Ok(LiteralValue::Str(a + &b)),
        ('+', LiteralValue::Num(a), LiteralValue::Num(b)) => Ok(LiteralValue::Num(a + b)),
        ('+', _, _) => Err(LiteralError::NonLiteral(
            "mixed-type concatenation".to_string(),
        )),
        (_, a, b) => Ok(LiteralValue::Num(a.to_number() - b.to_number())),
    }
}

/// Decode a quoted string or substitution-free template literal, escapes included.
///
/// Returns `None` for malformed escapes and for unpaired surrogate escapes.
pub fn parse_string_literal(text: &str) -> Option<String> {
    let mut chars = text.chars();
    let quote = chars.next()?;
    if !matches!(quote, '\'' | '"' | '`') || text.len() < 2 || !text.ends_with(quote) {
        return None;
    }
    let body = &text[1..text.len() - 1];
    let mut units: Vec<u16> = Vec::with_capacity(body.len());
    let mut it = body.chars().peekable();
    while let Some(c) = it.next() {
        if c != '\\' {
            let mut buf = [0u16; 2];
            units.extend_from_slice(c.encode_utf16(&mut buf));
            continue;
        }
        let esc = it.next()?;
        match esc {
            'n' => units.push(0x0A),
            'r' => units.push(0x0D),
            't' => units.push(0x09),
            'b' => units.push(0x08),
            'f' => units.push(0x0C),
            'v' => units.push(0x0B),
            '0' if !it.peek().is_some_and(|d| d.is_ascii_digit()) => units.push(0),
            'x' => {
                let hex: String = (0..2).filter_map(|_| it.next()).collect();
                units.push(u16::from_str_radix(&hex, 16).ok()?);
            }
            'u' if it.peek() == Some(&'{') => {
                it.next();
                let hex: String = it.by_ref().take_while(|d| *d != '}').collect();
                let cp = u32::from_str_radix(&hex, 16).ok()?;
                let ch = char::from_u32(cp)?;
                let mut buf = [0u16; 2];
                units.extend_from_slice(ch.encode_utf16(&mut buf));
            }
            'u' => {
                let hex: String = (0..4).filter_map(|_| it.next()).collect();
                units.push(u16::from_str_radix(&hex, 16).ok()?);
            }
            '\r' => {
                if it.peek() == Some(&'\n') {
                    it.next();
                }
            }
            '\n' | '\u{2028}' | '\u{2029}' => {}
            other => {
                let mut buf = [0u16; 2];
                units.extend_from_slice(other.encode_utf16(&mut buf));
            }
        }
    }
    // Lone surrogates have no UTF-8 form; such strings are not decoded.
    String::from_utf16(&units).ok()
}

/// Parse a numeric literal token. BigInt literals are not supported.
pub fn parse_number_literal(text: &str) -> Option<f64> {
    let cleaned: String = text.chars().filter(|c| *c != '_').collect();
    if cleaned.ends_with('n') {
        return None;
    }
    let lower = cleaned.to_ascii_lowercase();
    let radix = if lower.starts_with("0x") {
        Some(16)
    } else if lower.starts_with("0o") {
        Some(8)
    } else if lower.starts_with("0b") {
        Some(2)
    } else {
        None
    };
    if let Some(radix) = radix {
        return parse_radix(&lower[2..], radix);
    }
    // Legacy octal: 017 == 15
    if lower.len() > 1
        && lower.starts_with('0')
        && lower.bytes().all(|b| (b'0'..=b'7').contains(&b))
    {
        return parse_radix(&lower[1..], 8);
    }
    lower.parse::<f64>().ok()
}

fn parse_radix(digits: &str, radix: u32) -> Option<f64> {
    if digits.is_empty() {
        return None;
    }
    digits.chars().try_fold(0f64, |acc, c| {
        c.to_digit(radix).map(|d| acc * f64::from(radix) + f64::from(d))
    })
}

fn string_to_number(s: &str) -> f64 {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return 0.0;
    }
    let lower = trimmed.to_ascii_lowercase();
    let parsed = if let Some(hex) = lower.strip_prefix("0x") {
        parse_radix(hex, 16)
    } else if let Some(oct) = lower.strip_prefix("0o") {
        parse_radix(oct, 8)
    } else if let Some(bin) = lower.strip_prefix("0b") {
        parse_radix(bin, 2)
    } else if lower.contains(|c: char| c.is_ascii_alphabetic() && c != 'e') || lower.contains('_') {
        None
    } else {
        lower.parse::<f64>().ok()
    };
    parsed.unwrap_or(f64::NAN)
}

/// Quote a string as a double-quoted JavaScript literal.
pub fn quote_js_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{8}' => out.push_str("\\b"),
            '\u{c}' => out.push_str("\\f"),
            '\u{b}' => out.push_str("\\v"),
            '\u{2028}' => out.push_str("\\u2028"),
            '\u{2029}' => out.push_str("\\u2029"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\x{:02x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e21 {
        format!("{}", n as i128)
    } else {
        format!("{}", n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deobfuscator::lexer::significant_tokens;

    fn eval(src: &str) -> Result<LiteralValue, LiteralError> {
        evaluate(&significant_tokens(src), src)
    }

    #[test]
    fn test_string_list() {
        let src = r#""foo", 'b\x61r', `baz`,"#;
        let values = evaluate_list(&significant_tokens(src), src).unwrap();
        assert_eq!(
            values,
            vec![
                LiteralValue::Str("foo".into()),
                LiteralValue::Str("bar".into()),
                LiteralValue::Str("baz".into()),
            ]
        );
    }

    #[test]
    fn test_rejects_calls_and_identifiers() {
        let src = r#"foo(), "bar""#;
        let err = evaluate_list(&significant_tokens(src), src).unwrap_err();
        assert_eq!(err, LiteralError::NonLiteral("foo".to_string()));
        assert!(matches!(eval("a + 1"), Err(LiteralError::NonLiteral(_))));
        assert!(matches!(eval("`x${y}`"), Err(LiteralError::NonLiteral(_))));
    }

    #[test]
    fn test_numeric_expressions() {
        assert_eq!(eval("0x1f").unwrap(), LiteralValue::Num(31.0));
        assert_eq!(eval("-(0x2 - 5)").unwrap(), LiteralValue::Num(3.0));
        assert_eq!(eval("'a' + \"b\"").unwrap(), LiteralValue::Str("ab".into()));
        assert_eq!(eval("017").unwrap(), LiteralValue::Num(15.0));
        assert!(eval("10n").is_err());
    }

    #[test]
    fn test_index_semantics() {
        assert_eq!(LiteralValue::Str("1".into()).as_property_index(), Some(1));
        assert_eq!(LiteralValue::Str("0x1".into()).as_property_index(), None);
        assert_eq!(LiteralValue::Str("0x1".into()).as_numeric_index(), Some(1));
        assert_eq!(LiteralValue::Num(1.5).as_numeric_index(), None);
        assert_eq!(LiteralValue::Num(-1.0).as_property_index(), None);
    }

    #[test]
    fn test_unicode_escapes_and_quoting() {
        let decoded = parse_string_literal(r#""😀 \u{41}\"""#).unwrap();
        assert_eq!(decoded, "\u{1F600} A\"");
        assert_eq!(quote_js_string("a\"b\\\n"), r#""a\"b\\\n""#);
        assert_eq!(LiteralValue::Num(3.0).to_js(), "3");
        assert_eq!(LiteralValue::Num(0.5).to_js(), "0.5");
    }

    #[test]
    fn test_unpaired_surrogates_not_decoded() {
        assert_eq!(parse_string_literal(r"'\uD83D\uDE00'").as_deref(), Some("\u{1F600}"));
        assert_eq!(parse_string_literal(r"'\uD800x'"), None);
        assert_eq!(parse_string_literal(r"'\uDE00'"), None);
        let src = r"'ok', '\uD800x'";
        assert!(matches!(
            evaluate_list(&significant_tokens(src), src),
            Err(LiteralError::Malformed(_))
        ));
    }
}
