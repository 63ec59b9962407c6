//! Token cursor with diagnostic collection, shared by the policy and schema
//! grammars.

use super::lexer::{Token, TokenKind, tokenize};
use crate::ast::is_valid_ident;
use crate::diagnostics::{Diagnostic, Span, codes};

/// Marker returned once a syntax diagnostic has been recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Failed;

pub(crate) type PResult<T> = Result<T, Failed>;

/// Deepest nesting accepted in expressions and types. Chained operators
/// (`a || b || c`, `x.a.b`) count one level per link, so this also bounds
/// the depth of the trees the parser builds.
pub(crate) const MAX_NESTING: usize = 100;

pub(crate) struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
    pub(crate) diagnostics: Vec<Diagnostic>,
}

impl Parser {
    pub(crate) fn new(src: &str) -> Self {
        let (tokens, diagnostics) = tokenize(src);
        Self {
            tokens,
            pos: 0,
            depth: 0,
            diagnostics,
        }
    }

    pub(crate) fn tok(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    pub(crate) fn peek(&self) -> &TokenKind {
        &self.tok().kind
    }

    pub(crate) fn peek_at(&self, n: usize) -> &TokenKind {
        let idx = (self.pos + n).min(self.tokens.len() - 1);
        &self.tokens[idx].kind
    }

    pub(crate) fn at_eof(&self) -> bool {
        matches!(self.peek(), TokenKind::Eof)
    }

    /// Consume and return the current token. Never moves past `Eof`.
    pub(crate) fn bump(&mut self) -> Token {
        let token = self.tok().clone();
        if token.kind != TokenKind::Eof {
            self.pos += 1;
        }
        token
    }

    pub(crate) fn at(&self, kind: &TokenKind) -> bool {
        self.peek() == kind
    }

    pub(crate) fn at_ident(&self, word: &str) -> bool {
        self.peek().is_ident(word)
    }

    pub(crate) fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.at(kind) {
            self.bump();
            true
        } else {
            false
        }
    }

    pub(crate) fn eat_ident(&mut self, word: &str) -> bool {
        if self.at_ident(word) {
            self.bump();
            true
        } else {
            false
        }
    }

    /// Byte offset where the current token starts.
    pub(crate) fn start(&self) -> usize {
        self.tok().span.offset
    }

    /// Byte offset just past the last consumed token.
    pub(crate) fn prev_end(&self) -> usize {
        if self.pos == 0 {
            return 0;
        }
        self.tokens[self.pos - 1].span.end()
    }

    pub(crate) fn span_from(&self, start: usize) -> Span {
        Span::between(start, self.prev_end().max(start))
    }

    pub(crate) fn expect(&mut self, kind: TokenKind) -> PResult<Span> {
        if self.at(&kind) {
            return Ok(self.bump().span);
        }
        Err(self.unexpected(&kind.to_string()))
    }

    pub(crate) fn expect_ident(&mut self, word: &str) -> PResult<Span> {
        if self.at_ident(word) {
            return Ok(self.bump().span);
        }
        Err(self.unexpected(&format!("`{word}`")))
    }

    /// Any identifier token, reserved words included.
    pub(crate) fn any_ident(&mut self, what: &str) -> PResult<(String, Span)> {
        match self.peek().clone() {
            TokenKind::Ident(name) => Ok((name, self.bump().span)),
            _ => Err(self.unexpected(what)),
        }
    }

    /// An identifier usable as a path segment.
    pub(crate) fn path_segment(&mut self) -> PResult<(String, Span)> {
        let (name, span) = self.any_ident("identifier")?;
        if !is_valid_ident(&name) {
            return Err(self.error_at(
                format!("`{name}` is a reserved word and cannot be used as a name"),
                span,
            ));
        }
        Ok((name, span))
    }

    pub(crate) fn string_literal(&mut self, what: &str) -> PResult<(String, Span)> {
        match self.peek().clone() {
            TokenKind::Str(raw) => {
                let span = self.bump().span;
                match super::lexer::unescape_str(&raw) {
                    Ok(s) => Ok((s, span)),
                    Err(msg) => Err(self.error_at(msg, span)),
                }
            }
            _ => Err(self.unexpected(what)),
        }
    }

    /// Record "unexpected X, expected Y" at the current token.
    pub(crate) fn unexpected(&mut self, expected: &str) -> Failed {
        let token = self.tok().clone();
        let mut diag = Diagnostic::error(
            format!("unexpected {}, expected {expected}", token.kind),
            token.span,
        )
        .with_code(codes::SYNTAX);
        if expected.contains("`;`") {
            diag = diag.with_help("every policy and declaration must end with `;`");
        }
        self.diagnostics.push(diag);
        Failed
    }

    pub(crate) fn error_at(&mut self, message: impl Into<String>, span: Span) -> Failed {
        self.diagnostics
            .push(Diagnostic::error(message, span).with_code(codes::SYNTAX));
        Failed
    }

    pub(crate) fn push(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    /// Go one nesting level deeper, failing once `MAX_NESTING` is reached.
    /// Every `enter` is paired with a `leave` on success; after a failure
    /// the item parser calls `reset_depth` before the next item.
    pub(crate) fn enter(&mut self) -> PResult<()> {
        if self.depth >= MAX_NESTING {
            let span = self.tok().span;
            return Err(self.error_at(
                format!("expression is nested too deeply (the limit is {MAX_NESTING} levels)"),
                span,
            ));
        }
        self.depth += 1;
        Ok(())
    }

    pub(crate) fn leave(&mut self, levels: usize) {
        self.depth = self.depth.saturating_sub(levels);
    }

    pub(crate) fn reset_depth(&mut self) {
        self.depth = 0;
    }

    pub(crate) fn position(&self) -> usize {
        self.pos
    }

    /// Skip ahead after an error in the item that began at token `item_begin`:
    /// past the next `;`, or up to (not including) a token for which
    /// `at_start` holds. A start token is only honoured once the cursor has
    /// moved beyond `item_begin`, so recovery always makes progress.
    pub(crate) fn synchronize(&mut self, item_begin: usize, at_start: impl Fn(&Self) -> bool) {
        loop {
            if self.at_eof() {
                return;
            }
            if self.pos > item_begin && at_start(self) {
                return;
            }
            if self.bump().kind == TokenKind::Semi {
                return;
            }
        }
    }
}
