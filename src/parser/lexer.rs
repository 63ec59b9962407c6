//! Tokenizer shared by the policy and schema parsers.

use std::fmt::{Display, Formatter, Result as FmtResult};

use crate::ast::PatternElem;
use crate::diagnostics::{Diagnostic, Span, codes};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TokenKind {
    Ident(String),
    Int(u64),
    /// Raw string contents between the quotes, escapes not yet processed.
    Str(String),
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Semi,
    Colon,
    DoubleColon,
    Dot,
    At,
    Question,
    EqEq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    AndAnd,
    OrOr,
    Bang,
    Plus,
    Minus,
    Star,
    Assign,
    Eof,
}

impl TokenKind {
    pub(crate) fn is_ident(&self, word: &str) -> bool {
        matches!(self, TokenKind::Ident(s) if s == word)
    }
}

impl Display for TokenKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let punct = match self {
            TokenKind::Ident(s) => return write!(f, "`{s}`"),
            TokenKind::Int(n) => return write!(f, "integer `{n}`"),
            TokenKind::Str(s) => return write!(f, "string \"{s}\""),
            TokenKind::Eof => return write!(f, "end of input"),
            TokenKind::LParen => "(",
            TokenKind::RParen => ")",
            TokenKind::LBrace => "{",
            TokenKind::RBrace => "}",
            TokenKind::LBracket => "[",
            TokenKind::RBracket => "]",
            TokenKind::Comma => ",",
            TokenKind::Semi => ";",
            TokenKind::Colon => ":",
            TokenKind::DoubleColon => "::",
            TokenKind::Dot => ".",
            TokenKind::At => "@",
            TokenKind::Question => "?",
            TokenKind::EqEq => "==",
            TokenKind::NotEq => "!=",
            TokenKind::Lt => "<",
            TokenKind::LtEq => "<=",
            TokenKind::Gt => ">",
            TokenKind::GtEq => ">=",
            TokenKind::AndAnd => "&&",
            TokenKind::OrOr => "||",
            TokenKind::Bang => "!",
            TokenKind::Plus => "+",
            TokenKind::Minus => "-",
            TokenKind::Star => "*",
            TokenKind::Assign => "=",
        };
        write!(f, "`{punct}`")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

/// Tokenize `src`. Lexing never stops early: every bad character or literal
/// produces a diagnostic and scanning resumes after it. The token list always
/// ends with [`TokenKind::Eof`].
pub(crate) fn tokenize(src: &str) -> (Vec<Token>, Vec<Diagnostic>) {
    let mut lexer = Lexer {
        src,
        bytes: src.as_bytes(),
        pos: 0,
        tokens: Vec::new(),
        diagnostics: Vec::new(),
    };
    lexer.run();
    (lexer.tokens, lexer.diagnostics)
}

struct Lexer<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
    tokens: Vec<Token>,
    diagnostics: Vec<Diagnostic>,
}

impl Lexer<'_> {
    fn run(&mut self) {
        while let Some(c) = self.peek_char() {
            let start = self.pos;
            match c {
                c if c.is_whitespace() => self.pos += c.len_utf8(),
                '/' if self.peek_byte_at(1) == Some(b'/') => self.skip_line(),
                '"' => self.string(),
                '0'..='9' => self.integer(),
                c if c == '_' || c.is_ascii_alphabetic() => self.ident(),
                _ => {
                    if let Some((kind, len)) = self.punct() {
                        self.pos += len;
                        self.push(kind, start);
                    } else {
                        self.pos += c.len_utf8();
                        let mut diag = Diagnostic::error(
                            format!("unexpected character `{c}`"),
                            Span::between(start, self.pos),
                        )
                        .with_code(codes::SYNTAX);
                        if c == '&' || c == '|' {
                            diag = diag.with_help(format!("did you mean `{c}{c}`?"));
                        }
                        self.diagnostics.push(diag);
                    }
                }
            }
        }
        self.push(TokenKind::Eof, self.src.len());
    }

    fn peek_char(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn peek_byte_at(&self, offset: usize) -> Option<u8> {
        self.bytes.get(self.pos + offset).copied()
    }

    fn push(&mut self, kind: TokenKind, start: usize) {
        self.tokens.push(Token {
            kind,
            span: Span::between(start, self.pos),
        });
    }

    fn skip_line(&mut self) {
        while let Some(b) = self.peek_byte_at(0) {
            if b == b'\n' {
                break;
            }
            self.pos += 1;
        }
    }

    fn punct(&self) -> Option<(TokenKind, usize)> {
        let two = match (self.peek_byte_at(0)?, self.peek_byte_at(1)) {
            (b':', Some(b':')) => Some(TokenKind::DoubleColon),
            (b'=', Some(b'=')) => Some(TokenKind::EqEq),
            (b'!', Some(b'=')) => Some(TokenKind::NotEq),
            (b'<', Some(b'=')) => Some(TokenKind::LtEq),
            (b'>', Some(b'=')) => Some(TokenKind::GtEq),
            (b'&', Some(b'&')) => Some(TokenKind::AndAnd),
            (b'|', Some(b'|')) => Some(TokenKind::OrOr),
            _ => None,
        };
        if let Some(kind) = two {
            return Some((kind, 2));
        }
        let one = match self.peek_byte_at(0)? {
            b'(' => TokenKind::LParen,
            b')' => TokenKind::RParen,
            b'{' => TokenKind::LBrace,
            b'}' => TokenKind::RBrace,
            b'[' => TokenKind::LBracket,
            b']' => TokenKind::RBracket,
            b',' => TokenKind::Comma,
            b';' => TokenKind::Semi,
            b':' => TokenKind::Colon,
            b'.' => TokenKind::Dot,
            b'@' => TokenKind::At,
            b'?' => TokenKind::Question,
            b'<' => TokenKind::Lt,
            b'>' => TokenKind::Gt,
            b'!' => TokenKind::Bang,
            b'+' => TokenKind::Plus,
            b'-' => TokenKind::Minus,
            b'*' => TokenKind::Star,
            b'=' => TokenKind::Assign,
            _ => return None,
        };
        Some((one, 1))
    }

    fn string(&mut self) {
        let start = self.pos;
        self.pos += 1;
        loop {
            match self.peek_byte_at(0) {
                None => {
                    self.diagnostics.push(
                        Diagnostic::error(
                            "unterminated string literal",
                            Span::between(start, self.pos),
                        )
                        .with_code(codes::SYNTAX),
                    );
                    let raw = self.src[start + 1..].to_string();
                    self.push(TokenKind::Str(raw), start);
                    return;
                }
                Some(b'"') => {
                    let raw = self.src[start + 1..self.pos].to_string();
                    self.pos += 1;
                    self.push(TokenKind::Str(raw), start);
                    return;
                }
                Some(b'\\') => {
                    self.pos += 1;
                    if let Some(c) = self.peek_char() {
                        self.pos += c.len_utf8();
                    }
                }
                Some(_) => {
                    let c = self.peek_char().unwrap_or('\0');
                    self.pos += c.len_utf8().max(1);
                }
            }
        }
    }

    fn integer(&mut self) {
        let start = self.pos;
        while matches!(self.peek_byte_at(0), Some(b'0'..=b'9')) {
            self.pos += 1;
        }
        let digits = &self.src[start..self.pos];
        match digits.parse::<u64>() {
            Ok(n) => self.push(TokenKind::Int(n), start),
            Err(_) => {
                self.diagnostics.push(
                    Diagnostic::error(
                        format!("integer literal `{digits}` is too large"),
                        Span::between(start, self.pos),
                    )
                    .with_code(codes::SYNTAX),
                );
                self.push(TokenKind::Int(0), start);
            }
        }
    }

    fn ident(&mut self) {
        let start = self.pos;
        while matches!(self.peek_byte_at(0), Some(b) if b == b'_' || b.is_ascii_alphanumeric()) {
            self.pos += 1;
        }
        let word = self.src[start..self.pos].to_string();
        self.push(TokenKind::Ident(word), start);
    }
}

/// Process escapes in a raw string literal. With `pattern` set, an unescaped
/// `*` becomes a wildcard and `\*` a literal star; otherwise `*` is an
/// ordinary character and `\*` is rejected.
pub(crate) fn unescape(raw: &str, pattern: bool) -> Result<Vec<PatternElem>, String> {
    let mut out = Vec::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        match c {
            '*' if pattern => out.push(PatternElem::Wildcard),
            '\\' => {
                let escaped = match chars.next() {
                    Some('n') => '\n',
                    Some('r') => '\r',
                    Some('t') => '\t',
                    Some('0') => '\0',
                    Some('\\') => '\\',
                    Some('\'') => '\'',
                    Some('"') => '"',
                    Some('*') if pattern => '*',
                    Some('u') => unicode_escape(&mut chars)?,
                    Some(other) => return Err(format!("invalid escape sequence `\\{other}`")),
                    None => return Err("string ends with a lone `\\`".to_string()),
                };
                out.push(PatternElem::Char(escaped));
            }
            c => out.push(PatternElem::Char(c)),
        }
    }
    Ok(out)
}

fn unicode_escape(chars: &mut std::str::Chars<'_>) -> Result<char, String> {
    if chars.next() != Some('{') {
        return Err("expected `{` after `\\u`".to_string());
    }
    let mut hex = String::new();
    for c in chars.by_ref() {
        if c == '}' {
            return u32::from_str_radix(&hex, 16)
                .ok()
                .filter(|_| (1..=6).contains(&hex.len()))
                .and_then(char::from_u32)
                .ok_or_else(|| format!("invalid unicode escape `\\u{{{hex}}}`"));
        }
        hex.push(c);
    }
    Err("unterminated unicode escape".to_string())
}

/// Unescape an ordinary string literal.
pub(crate) fn unescape_str(raw: &str) -> Result<String, String> {
    Ok(unescape(raw, false)?
        .into_iter()
        .map(|e| match e {
            PatternElem::Char(c) => c,
            PatternElem::Wildcard => '*',
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use yare::parameterized;

    fn kinds(src: &str) -> Vec<TokenKind> {
        let (tokens, diags) = tokenize(src);
        assert!(diags.is_empty(), "unexpected diagnostics: {diags:?}");
        tokens.into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_tokenize_policy_head() {
        assert_eq!(
            kinds(r#"permit(principal == User::"alice",)"#),
            vec![
                TokenKind::Ident("permit".into()),
                TokenKind::LParen,
                TokenKind::Ident("principal".into()),
                TokenKind::EqEq,
                TokenKind::Ident("User".into()),
                TokenKind::DoubleColon,
                TokenKind::Str("alice".into()),
                TokenKind::Comma,
                TokenKind::RParen,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_spans_are_byte_offsets() {
        let (tokens, _) = tokenize("ab  \"é\" 12");
        assert_eq!(tokens[0].span, Span::new(0, 2));
        assert_eq!(tokens[1].span, Span::new(4, 4));
        assert_eq!(tokens[2].span, Span::new(9, 2));
        assert_eq!(tokens[3].span, Span::new(11, 0));
    }

    #[test]
    fn test_comments_are_skipped() {
        assert_eq!(
            kinds("a // comment ( \n b"),
            vec![
                TokenKind::Ident("a".into()),
                TokenKind::Ident("b".into()),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn test_escaped_quote_stays_in_string() {
        assert_eq!(
            kinds(r#""a\"b""#),
            vec![TokenKind::Str(r#"a\"b"#.into()), TokenKind::Eof]
        );
    }

    #[parameterized(
        stray_ampersand = { "a & b", 2 },
        hash = { "#", 0 },
        unterminated = { "\"abc", 0 },
    )]
    fn test_lexer_errors(src: &str, offset: usize) {
        let (tokens, diags) = tokenize(src);
        assert_eq!(diags.len(), 1);
        assert!(diags[0].is_error());
        assert_eq!(diags[0].span().unwrap().offset, offset);
        assert_eq!(tokens.last().unwrap().kind, TokenKind::Eof);
    }

    #[test]
    fn test_integer_overflow() {
        let (_, diags) = tokenize("99999999999999999999999");
        assert_eq!(diags.len(), 1);
        assert!(diags[0].message().contains("too large"));
    }

    #[parameterized(
        newline = { r"a\nb", "a\nb" },
        quote = { r#"say \"hi\""#, "say \"hi\"" },
        unicode = { r"\u{e9}", "é" },
        star_is_plain = { "a*b", "a*b" },
    )]
    fn test_unescape_str(raw: &str, expected: &str) {
        assert_eq!(unescape_str(raw).unwrap(), expected);
    }

    #[parameterized(
        bad_escape = { r"\q" },
        star_escape_outside_pattern = { r"\*" },
        bad_unicode = { r"\u{110000}" },
        lone_backslash = { "\\" },
    )]
    fn test_unescape_str_rejects(raw: &str) {
        assert!(unescape_str(raw).is_err());
    }

    #[test]
    fn test_unescape_pattern() {
        assert_eq!(
            unescape(r"a*\*", true).unwrap(),
            vec![
                PatternElem::Char('a'),
                PatternElem::Wildcard,
                PatternElem::Char('*')
            ]
        );
    }
}
