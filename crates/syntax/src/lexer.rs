//! Lexer for the sable expression language using logos.
//!
//! The raw logos token stream is post-processed into [`Token`]s that carry a
//! coarse [`Kind`], their text and a resolved [`Location`]. Two rewrites happen
//! after logos has run: `not` followed by `in` becomes the single operator
//! `not in`, and a `?.` directly followed by digits is split back into `?` and
//! a leading-dot float so that `a ?.5 : 1` still reads as a ternary.

use logos::{FilterResult, Logos};
use std::fmt;
use thiserror::Error;

use crate::errors::SourceError;
use crate::source::{Location, Source};

/// Why logos rejected a piece of input.
#[derive(Debug, Clone, PartialEq, Eq, Default, Error)]
pub enum LexErrorKind {
    #[default]
    #[error("unrecognized character")]
    Unrecognized,
    #[error("invalid char escape")]
    InvalidEscape,
    #[error("literal not terminated")]
    Unterminated,
}

/// Tokens as produced by logos.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n\f]+")]
#[logos(error = LexErrorKind)]
enum RawToken {
    #[regex(r"//[^\n]*")]
    LineComment,

    #[token("/*", block_comment)]
    BlockComment,

    // Decimal, hex, octal, binary and float literals. The text is kept as
    // written and converted by the parser.
    #[regex(r"[0-9][0-9_]*")]
    #[regex(r"0[xX][0-9a-fA-F_]+")]
    #[regex(r"0[oO][0-7_]+")]
    #[regex(r"0[bB][01_]+")]
    #[regex(r"[0-9][0-9_]*\.[0-9][0-9_]*([eE][+-]?[0-9]+)?")]
    #[regex(r"[0-9][0-9_]*[eE][+-]?[0-9]+")]
    #[regex(r"\.[0-9][0-9_]*([eE][+-]?[0-9]+)?")]
    Number,

    #[regex(r#""([^"\\\n]|\\.)*""#, |lex| unescape_quoted(lex.slice()))]
    #[regex(r"'([^'\\\n]|\\.)*'", |lex| unescape_quoted(lex.slice()))]
    #[regex(r"`[^`]*`", |lex| raw_string(lex.slice()))]
    String(String),

    #[regex(r"[A-Za-z_][A-Za-z0-9_]*")]
    #[regex(r"\$[A-Za-z_][A-Za-z0-9_]*")]
    Identifier,

    #[token("and")]
    #[token("or")]
    #[token("not")]
    #[token("in")]
    #[token("matches")]
    #[token("contains")]
    #[token("startsWith")]
    #[token("endsWith")]
    WordOperator,

    #[token("==")]
    #[token("!=")]
    #[token("<=")]
    #[token(">=")]
    #[token("&&")]
    #[token("||")]
    #[token("??")]
    #[token("?.")]
    #[token("..")]
    #[token("**")]
    #[token("+")]
    #[token("-")]
    #[token("*")]
    #[token("/")]
    #[token("%")]
    #[token("^")]
    #[token("!")]
    #[token("<")]
    #[token(">")]
    #[token("=")]
    #[token("?")]
    #[token(":")]
    #[token(".")]
    #[token(",")]
    #[token(";")]
    #[token("|")]
    #[token("#")]
    Operator,

    #[token("(")]
    #[token(")")]
    #[token("[")]
    #[token("]")]
    #[token("{")]
    #[token("}")]
    Bracket,
}

/// Coarse token classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Identifier,
    Number,
    String,
    Operator,
    Bracket,
    EOF,
}

/// A token with its source location.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: Kind,
    /// Literal text for numbers, identifiers and operators; the unescaped
    /// content for strings.
    pub value: String,
    pub location: Location,
}

impl Token {
    pub fn new(kind: Kind, value: impl Into<String>, location: Location) -> Self {
        Self {
            kind,
            value: value.into(),
            location,
        }
    }

    /// The location-free part of the token, as seen by the parser.
    pub fn lexeme(&self) -> Lexeme {
        Lexeme {
            kind: self.kind,
            value: self.value.clone(),
        }
    }

    pub fn is(&self, kind: Kind, value: &str) -> bool {
        self.kind == kind && self.value == value
    }
}

/// Kind plus text. This is the parser's input alphabet.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Lexeme {
    pub kind: Kind,
    pub value: String,
}

impl Lexeme {
    pub fn new(kind: Kind, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }

    pub fn operator(value: &str) -> Self {
        Self::new(Kind::Operator, value)
    }

    pub fn bracket(value: &str) -> Self {
        Self::new(Kind::Bracket, value)
    }

    pub fn identifier(value: &str) -> Self {
        Self::new(Kind::Identifier, value)
    }
}

impl fmt::Display for Lexeme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            Kind::EOF => write!(f, "EOF"),
            kind => write!(f, "{:?}({:?})", kind, self.value),
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.lexeme())
    }
}

/// Lex a source into tokens terminated by `EOF`.
///
/// The first error wins; no tokens past it are produced.
pub fn lex(source: &Source) -> Result<Vec<Token>, SourceError> {
    let text = source.as_str();
    let mut raw: Vec<(RawToken, std::ops::Range<usize>)> = Vec::new();

    for (result, span) in RawToken::lexer(text).spanned() {
        match result {
            Ok(RawToken::LineComment | RawToken::BlockComment) => {}
            Ok(token) => raw.push((token, span)),
            Err(kind) => return Err(lex_error(source, kind, span)),
        }
    }

    let mut tokens: Vec<Token> = Vec::with_capacity(raw.len() + 1);
    let mut iter = raw.into_iter().peekable();
    while let Some((token, span)) = iter.next() {
        let slice = &text[span.clone()];
        let location = source.locate(span.start, span.end);
        match token {
            RawToken::Number => tokens.push(Token::new(Kind::Number, slice, location)),
            RawToken::String(value) => tokens.push(Token::new(Kind::String, value, location)),
            RawToken::Identifier => tokens.push(Token::new(Kind::Identifier, slice, location)),
            RawToken::Bracket => tokens.push(Token::new(Kind::Bracket, slice, location)),
            RawToken::WordOperator if slice == "not" => {
                if let Some((RawToken::WordOperator, next)) = iter.peek() {
                    let spaced = text[span.end..next.start].chars().all(|c| c == ' ');
                    if spaced && &text[next.clone()] == "in" {
                        let end = next.end;
                        iter.next();
                        tokens.push(Token::new(
                            Kind::Operator,
                            "not in",
                            source.locate(span.start, end),
                        ));
                        continue;
                    }
                }
                tokens.push(Token::new(Kind::Operator, slice, location));
            }
            RawToken::WordOperator => tokens.push(Token::new(Kind::Operator, slice, location)),
            RawToken::Operator if slice == "?." => {
                let digits_follow = matches!(
                    iter.peek(),
                    Some((RawToken::Number, next))
                        if next.start == span.end
                            && text[next.clone()].starts_with(|c: char| c.is_ascii_digit())
                );
                if digits_follow {
                    if let Some((_, next)) = iter.next() {
                        tokens.push(Token::new(
                            Kind::Operator,
                            "?",
                            source.locate(span.start, span.start + 1),
                        ));
                        tokens.push(Token::new(
                            Kind::Number,
                            &text[span.start + 1..next.end],
                            source.locate(span.start + 1, next.end),
                        ));
                    }
                    continue;
                }
                tokens.push(Token::new(Kind::Operator, slice, location));
            }
            RawToken::Operator => tokens.push(Token::new(Kind::Operator, slice, location)),
            RawToken::LineComment | RawToken::BlockComment => {}
        }
    }

    tokens.push(Token::new(
        Kind::EOF,
        "",
        source.locate(text.len(), text.len()),
    ));
    Ok(tokens)
}

fn lex_error(source: &Source, kind: LexErrorKind, span: std::ops::Range<usize>) -> SourceError {
    let text = source.as_str();
    let first = text[span.start..].chars().next();
    let location = source.locate(span.start, span.end.max(span.start + 1).min(text.len()));
    let message = match (kind, first) {
        (LexErrorKind::InvalidEscape, _) => LexErrorKind::InvalidEscape.to_string(),
        (_, Some('"' | '\'' | '`')) => LexErrorKind::Unterminated.to_string(),
        (LexErrorKind::Unterminated, _) => LexErrorKind::Unterminated.to_string(),
        (LexErrorKind::Unrecognized, Some(ch)) => format!("unrecognized character: {:?}", ch),
        (LexErrorKind::Unrecognized, None) => LexErrorKind::Unrecognized.to_string(),
    };
    SourceError::lex(message, location)
}

/// Skip past the closing `*/`; block comments do not nest.
fn block_comment(lex: &mut logos::Lexer<RawToken>) -> FilterResult<(), LexErrorKind> {
    match lex.remainder().find("*/") {
        Some(end) => {
            lex.bump(end + 2);
            FilterResult::Skip
        }
        None => {
            lex.bump(lex.remainder().len());
            FilterResult::Error(LexErrorKind::Unterminated)
        }
    }
}

fn raw_string(slice: &str) -> String {
    slice[1..slice.len() - 1].replace("\r\n", "\n")
}

fn unescape_quoted(slice: &str) -> Result<String, LexErrorKind> {
    unescape(&slice[1..slice.len() - 1])
}

/// Resolve escape sequences in the body of a quoted string.
pub fn unescape(body: &str) -> Result<String, LexErrorKind> {
    let body = body.replace("\r\n", "\n");
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        let escape = chars.next().ok_or(LexErrorKind::InvalidEscape)?;
        let resolved = match escape {
            'a' => '\u{07}',
            'b' => '\u{08}',
            'f' => '\u{0C}',
            'n' => '\n',
            'r' => '\r',
            't' => '\t',
            'v' => '\u{0B}',
            '\\' | '\'' | '"' | '`' | '?' => escape,
            '0'..='3' => {
                let mut value = escape.to_digit(8).unwrap_or(0);
                for _ in 0..2 {
                    let digit = chars
                        .next()
                        .and_then(|c| c.to_digit(8))
                        .ok_or(LexErrorKind::InvalidEscape)?;
                    value = value * 8 + digit;
                }
                char::from_u32(value).ok_or(LexErrorKind::InvalidEscape)?
            }
            'x' => read_hex(&mut chars, 2)?,
            'u' if chars.peek() == Some(&'{') => {
                chars.next();
                let mut digits = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(c) if c.is_ascii_hexdigit() && digits.len() < 6 => digits.push(c),
                        _ => return Err(LexErrorKind::InvalidEscape),
                    }
                }
                if digits.is_empty() {
                    return Err(LexErrorKind::InvalidEscape);
                }
                u32::from_str_radix(&digits, 16)
                    .ok()
                    .and_then(char::from_u32)
                    .ok_or(LexErrorKind::InvalidEscape)?
            }
            'u' => read_hex(&mut chars, 4)?,
            'U' => read_hex(&mut chars, 8)?,
            _ => return Err(LexErrorKind::InvalidEscape),
        };
        out.push(resolved);
    }
    Ok(out)
}

fn read_hex(
    chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
    count: usize,
) -> Result<char, LexErrorKind> {
    let mut value = 0u32;
    for _ in 0..count {
        let digit = chars
            .next()
            .and_then(|c| c.to_digit(16))
            .ok_or(LexErrorKind::InvalidEscape)?;
        value = value * 16 + digit;
    }
    char::from_u32(value).ok_or(LexErrorKind::InvalidEscape)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<(Kind, String)> {
        lex(&Source::new(input))
            .expect("lex failed")
            .into_iter()
            .map(|t| (t.kind, t.value))
            .collect()
    }

    fn op(value: &str) -> (Kind, String) {
        (Kind::Operator, value.to_string())
    }

    fn num(value: &str) -> (Kind, String) {
        (Kind::Number, value.to_string())
    }

    fn eof() -> (Kind, String) {
        (Kind::EOF, String::new())
    }

    #[test]
    fn test_range_is_not_a_float() {
        assert_eq!(kinds("1..5"), vec![num("1"), op(".."), num("5"), eof()]);
    }

    #[test]
    fn test_leading_dot_float() {
        assert_eq!(kinds(".5"), vec![num(".5"), eof()]);
        assert_eq!(
            kinds("a.b"),
            vec![
                (Kind::Identifier, "a".into()),
                op("."),
                (Kind::Identifier, "b".into()),
                eof()
            ]
        );
    }

    #[test]
    fn test_not_in_is_one_token() {
        let tokens = lex(&Source::new("a not   in b")).unwrap();
        assert_eq!(tokens[1].value, "not in");
        assert_eq!(tokens[1].location.from, 2);
        assert_eq!(tokens[1].location.to, 10);
        assert_eq!(kinds("not inside")[1], (Kind::Identifier, "inside".into()));
    }

    #[test]
    fn test_not_newline_in_stays_apart() {
        assert_eq!(
            kinds("not\nin"),
            vec![op("not"), op("in"), eof()]
        );
        assert_eq!(kinds("not\tin")[0], op("not"));
    }

    #[test]
    fn test_question_dot_before_digit() {
        assert_eq!(
            kinds("a ?.5 : 1"),
            vec![
                (Kind::Identifier, "a".into()),
                op("?"),
                num(".5"),
                op(":"),
                num("1"),
                eof()
            ]
        );
    }

    #[test]
    fn test_escapes() {
        assert_eq!(unescape(r"a\tb").unwrap(), "a\tb");
        assert_eq!(unescape(r"\x41\101é\U0001F600").unwrap(), "AAé😀");
        assert_eq!(unescape(r"\u{1F600}").unwrap(), "😀");
        assert_eq!(unescape(r"\q"), Err(LexErrorKind::InvalidEscape));
        assert_eq!(unescape(r"\uD800"), Err(LexErrorKind::InvalidEscape));
    }

    #[test]
    fn test_comments_skipped() {
        assert_eq!(
            kinds("1 // one\n + /* two */ 2"),
            vec![num("1"), op("+"), num("2"), eof()]
        );
        assert_eq!(
            kinds("/* a * b\n ** / */ 1/* x */*2"),
            vec![num("1"), op("*"), num("2"), eof()]
        );
        assert_eq!(kinds("4 / 2"), vec![num("4"), op("/"), num("2"), eof()]);
    }

    #[test]
    fn test_unterminated_block_comment() {
        let err = lex(&Source::new("1 + /* open")).unwrap_err();
        assert_eq!(err.message, "literal not terminated");
        assert_eq!(err.location.column, 4);
    }

    #[test]
    fn test_errors() {
        let err = lex(&Source::new("'abc")).unwrap_err();
        assert_eq!(err.message, "literal not terminated");
        let err = lex(&Source::new("1 @ 2")).unwrap_err();
        assert!(err.message.starts_with("unrecognized character"));
        assert_eq!(err.location.column, 2);
        let err = lex(&Source::new(r#"x + "\z""#)).unwrap_err();
        assert_eq!(err.message, "invalid char escape");
    }
}
