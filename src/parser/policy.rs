//! Recursive-descent grammar for policies and condition expressions.

use super::cursor::{Failed, PResult, Parser};
use super::lexer::{TokenKind, unescape};
use crate::ast::{
    ActionConstraint, Annotation, BinaryOp, Condition, ConditionKind, Effect, EntityConstraint,
    EntityUid, Expr, ExprKind, Literal, Name, Pattern, Policy, PolicyId, Scope, UnaryOp, Var,
    is_valid_ident,
};
use crate::diagnostics::{Diagnostic, Span, codes};

/// Longest chain of prefix operators accepted, e.g. `!!!!x`.
const MAX_UNARY_CHAIN: usize = 4;

impl Parser {
    /// Parse every policy in the input, recovering after each syntax error.
    pub(crate) fn policies(&mut self) -> Vec<Policy> {
        let mut policies = Vec::new();
        let mut index = 0;
        while !self.at_eof() {
            let begin = self.position();
            match self.policy(index) {
                Ok(policy) => policies.push(policy),
                Err(Failed) => self.synchronize(begin, |p| p.at_policy_start()),
            }
            index += 1;
        }
        policies
    }

    fn at_policy_start(&self) -> bool {
        match self.peek() {
            TokenKind::Ident(word) if word == "permit" || word == "forbid" => {
                matches!(self.peek_at(1), TokenKind::LParen)
            }
            TokenKind::At => matches!(self.peek_at(1), TokenKind::Ident(_)),
            _ => false,
        }
    }

    fn policy(&mut self, index: usize) -> PResult<Policy> {
        self.reset_depth();
        let start = self.start();
        let annotations = self.annotations()?;

        let effect = if self.eat_ident("permit") {
            Effect::Permit
        } else if self.eat_ident("forbid") {
            Effect::Forbid
        } else {
            return Err(self.unexpected("`permit` or `forbid`"));
        };

        self.expect(TokenKind::LParen)?;
        let (principal, principal_span) = self.entity_scope("principal")?;
        self.expect(TokenKind::Comma)?;
        let (action, action_span) = self.action_scope()?;
        self.expect(TokenKind::Comma)?;
        let (resource, resource_span) = self.entity_scope("resource")?;
        self.expect(TokenKind::RParen)?;

        let mut conditions = Vec::new();
        loop {
            let kind = if self.at_ident("when") {
                ConditionKind::When
            } else if self.at_ident("unless") {
                ConditionKind::Unless
            } else {
                break;
            };
            let cond_start = self.start();
            self.bump();
            self.expect(TokenKind::LBrace)?;
            let body = self.expr()?;
            self.expect(TokenKind::RBrace)?;
            conditions.push(Condition {
                kind,
                body,
                span: self.span_from(cond_start),
            });
        }

        if !self.eat(&TokenKind::Semi) {
            return Err(self.unexpected("`when`, `unless` or `;`"));
        }

        let id = annotations
            .iter()
            .find(|a| a.key == "id")
            .map(|a| PolicyId::new(a.value.clone()))
            .unwrap_or_else(|| PolicyId::new(format!("policy{index}")));

        Ok(Policy {
            id,
            annotations,
            effect,
            scope: Scope {
                principal,
                principal_span,
                action,
                action_span,
                resource,
                resource_span,
            },
            conditions,
            span: self.span_from(start),
        })
    }

    fn annotations(&mut self) -> PResult<Vec<Annotation>> {
        let mut annotations: Vec<Annotation> = Vec::new();
        while self.at(&TokenKind::At) {
            let start = self.start();
            self.bump();
            let (key, _) = self.any_ident("annotation name")?;
            self.expect(TokenKind::LParen)?;
            let (value, _) = self.string_literal("annotation value string")?;
            self.expect(TokenKind::RParen)?;
            let span = self.span_from(start);

            if annotations.iter().any(|a| a.key == key) {
                self.push(
                    Diagnostic::error(format!("duplicate annotation `@{key}`"), span)
                        .with_code(codes::DUPLICATE_ANNOTATION),
                );
                continue;
            }
            annotations.push(Annotation { key, value, span });
        }
        Ok(annotations)
    }

    fn entity_scope(&mut self, var: &str) -> PResult<(EntityConstraint, Span)> {
        let start = self.start();
        self.expect_ident(var)?;

        let constraint = if self.eat(&TokenKind::EqEq) {
            EntityConstraint::Eq(self.scope_entity()?)
        } else if self.eat_ident("in") {
            if self.at(&TokenKind::LBracket) {
                let span = self.tok().span;
                return Err(self.error_at(
                    format!("`{var} in` takes a single entity; only `action in` accepts a list"),
                    span,
                ));
            }
            EntityConstraint::In(self.scope_entity()?)
        } else if self.eat_ident("is") {
            let ty = self.path()?;
            if self.eat_ident("in") {
                EntityConstraint::IsIn(ty, self.scope_entity()?)
            } else {
                EntityConstraint::Is(ty)
            }
        } else {
            EntityConstraint::Any
        };

        Ok((constraint, self.span_from(start)))
    }

    fn action_scope(&mut self) -> PResult<(ActionConstraint, Span)> {
        let start = self.start();
        self.expect_ident("action")?;

        let constraint = if self.eat(&TokenKind::EqEq) {
            ActionConstraint::Eq(self.action_ref()?)
        } else if self.eat_ident("in") {
            if self.eat(&TokenKind::LBracket) {
                let mut uids = Vec::new();
                while !self.at(&TokenKind::RBracket) {
                    uids.push(self.action_ref()?);
                    if !self.eat(&TokenKind::Comma) {
                        break;
                    }
                }
                self.expect(TokenKind::RBracket)?;
                ActionConstraint::In(uids)
            } else {
                ActionConstraint::In(vec![self.action_ref()?])
            }
        } else if self.at_ident("is") {
            let span = self.tok().span;
            return Err(self.error_at("`is` cannot constrain the action", span));
        } else {
            ActionConstraint::Any
        };

        Ok((constraint, self.span_from(start)))
    }

    fn scope_entity(&mut self) -> PResult<EntityUid> {
        self.reject_template_slot()?;
        Ok(self.entity_ref()?.0)
    }

    fn action_ref(&mut self) -> PResult<EntityUid> {
        self.reject_template_slot()?;
        let (uid, span) = self.entity_ref()?;
        if !uid.entity_type().is_action_type() {
            return Err(self.error_at(
                format!("expected an action entity such as `Action::\"view\"`, found `{uid}`"),
                span,
            ));
        }
        Ok(uid)
    }

    fn reject_template_slot(&mut self) -> PResult<()> {
        if !self.at(&TokenKind::Question) {
            return Ok(());
        }
        let start = self.start();
        self.bump();
        if matches!(self.peek(), TokenKind::Ident(_)) {
            self.bump();
        }
        let span = self.span_from(start);
        self.push(
            Diagnostic::error("template slots are not supported", span)
                .with_code(codes::SYNTAX)
                .with_help("write a concrete entity such as `User::\"alice\"`"),
        );
        Err(Failed)
    }

    /// `Type::"id"`, where the type may be namespaced.
    pub(crate) fn entity_ref(&mut self) -> PResult<(EntityUid, Span)> {
        let start = self.start();
        let mut segments = vec![self.path_segment()?.0];
        loop {
            self.expect(TokenKind::DoubleColon)?;
            match self.peek() {
                TokenKind::Str(_) => {
                    let (eid, _) = self.string_literal("entity id")?;
                    let uid = EntityUid::new(Name::from_segments(segments), eid);
                    return Ok((uid, self.span_from(start)));
                }
                TokenKind::Ident(_) => segments.push(self.path_segment()?.0),
                _ => return Err(self.unexpected("identifier or quoted entity id")),
            }
        }
    }

    /// `Ident (:: Ident)*`. Stops before a `::` that is not followed by an
    /// identifier.
    pub(crate) fn path(&mut self) -> PResult<Name> {
        let mut segments = vec![self.path_segment()?.0];
        while self.at(&TokenKind::DoubleColon) && matches!(self.peek_at(1), TokenKind::Ident(_)) {
            self.bump();
            segments.push(self.path_segment()?.0);
        }
        Ok(Name::from_segments(segments))
    }

    pub(crate) fn expr(&mut self) -> PResult<Expr> {
        self.enter()?;
        let expr = self.conditional();
        self.leave(1);
        expr
    }

    fn conditional(&mut self) -> PResult<Expr> {
        if !self.at_ident("if") {
            return self.or_expr();
        }
        let start = self.start();
        self.bump();
        let cond = self.expr()?;
        self.expect_ident("then")?;
        let then_expr = self.expr()?;
        self.expect_ident("else")?;
        let else_expr = self.expr()?;
        Ok(Expr::new(
            ExprKind::If {
                cond: Box::new(cond),
                then_expr: Box::new(then_expr),
                else_expr: Box::new(else_expr),
            },
            self.span_from(start),
        ))
    }

    fn or_expr(&mut self) -> PResult<Expr> {
        let mut left = self.and_expr()?;
        let mut links = 0;
        while self.eat(&TokenKind::OrOr) {
            self.enter()?;
            links += 1;
            let right = self.and_expr()?;
            let span = left.span.to(right.span);
            left = Expr::new(ExprKind::Or(Box::new(left), Box::new(right)), span);
        }
        self.leave(links);
        Ok(left)
    }

    fn and_expr(&mut self) -> PResult<Expr> {
        let mut left = self.relation()?;
        let mut links = 0;
        while self.eat(&TokenKind::AndAnd) {
            self.enter()?;
            links += 1;
            let right = self.relation()?;
            let span = left.span.to(right.span);
            left = Expr::new(ExprKind::And(Box::new(left), Box::new(right)), span);
        }
        self.leave(links);
        Ok(left)
    }

    fn relation(&mut self) -> PResult<Expr> {
        let left = self.add_expr()?;
        let start = left.span.offset;

        let op = match self.peek() {
            TokenKind::EqEq => Some(BinaryOp::Eq),
            TokenKind::NotEq => Some(BinaryOp::NotEq),
            TokenKind::Lt => Some(BinaryOp::Less),
            TokenKind::LtEq => Some(BinaryOp::LessEq),
            TokenKind::Gt => Some(BinaryOp::Greater),
            TokenKind::GtEq => Some(BinaryOp::GreaterEq),
            TokenKind::Ident(word) if word == "in" => Some(BinaryOp::In),
            _ => None,
        };
        if let Some(op) = op {
            self.bump();
            let right = self.add_expr()?;
            let span = left.span.to(right.span);
            return Ok(Expr::new(
                ExprKind::Binary(op, Box::new(left), Box::new(right)),
                span,
            ));
        }

        if self.eat_ident("has") {
            let (attr, _) = match self.peek() {
                TokenKind::Str(_) => self.string_literal("attribute name")?,
                _ => self.any_ident("attribute name")?,
            };
            return Ok(Expr::new(
                ExprKind::HasAttr(Box::new(left), attr),
                self.span_from(start),
            ));
        }

        if self.eat_ident("like") {
            let TokenKind::Str(raw) = self.peek().clone() else {
                return Err(self.unexpected("pattern string"));
            };
            let pattern_span = self.bump().span;
            let elems = unescape(&raw, true).map_err(|msg| self.error_at(msg, pattern_span))?;
            return Ok(Expr::new(
                ExprKind::Like(Box::new(left), Pattern::new(elems)),
                self.span_from(start),
            ));
        }

        if self.eat_ident("is") {
            let ty = self.path()?;
            let in_expr = if self.eat_ident("in") {
                Some(Box::new(self.add_expr()?))
            } else {
                None
            };
            return Ok(Expr::new(
                ExprKind::Is(Box::new(left), ty, in_expr),
                self.span_from(start),
            ));
        }

        Ok(left)
    }

    fn add_expr(&mut self) -> PResult<Expr> {
        let mut left = self.mul_expr()?;
        let mut links = 0;
        loop {
            let op = match self.peek() {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => break,
            };
            self.bump();
            self.enter()?;
            links += 1;
            let right = self.mul_expr()?;
            let span = left.span.to(right.span);
            left = Expr::new(ExprKind::Binary(op, Box::new(left), Box::new(right)), span);
        }
        self.leave(links);
        Ok(left)
    }

    fn mul_expr(&mut self) -> PResult<Expr> {
        let mut left = self.unary_expr()?;
        let mut links = 0;
        while self.eat(&TokenKind::Star) {
            self.enter()?;
            links += 1;
            let right = self.unary_expr()?;
            let span = left.span.to(right.span);
            left = Expr::new(
                ExprKind::Binary(BinaryOp::Mul, Box::new(left), Box::new(right)),
                span,
            );
        }
        self.leave(links);
        Ok(left)
    }

    fn unary_expr(&mut self) -> PResult<Expr> {
        let mut ops: Vec<(UnaryOp, usize)> = Vec::new();
        loop {
            let op = match self.peek() {
                TokenKind::Bang => UnaryOp::Not,
                TokenKind::Minus => UnaryOp::Neg,
                _ => break,
            };
            ops.push((op, self.start()));
            self.bump();
        }
        if ops.len() > MAX_UNARY_CHAIN {
            let span = self.span_from(ops[0].1);
            return Err(self.error_at(
                format!("at most {MAX_UNARY_CHAIN} prefix operators may be chained"),
                span,
            ));
        }

        // `-` directly before an integer is part of the literal, so that
        // `-9223372036854775808` is representable.
        let negative_literal = match (ops.last(), self.peek()) {
            (Some(&(UnaryOp::Neg, minus_start)), &TokenKind::Int(n)) => Some((minus_start, n)),
            _ => None,
        };
        let mut expr = match negative_literal {
            Some((minus_start, n)) => {
                ops.pop();
                let end = self.bump().span.end();
                let span = Span::between(minus_start, end);
                let value = i64::try_from(-i128::from(n)).map_err(|_| {
                    self.error_at(format!("integer literal `-{n}` is out of range"), span)
                })?;
                Expr::new(ExprKind::Lit(Literal::Long(value)), span)
            }
            None => self.member_expr()?,
        };

        for (op, start) in ops.into_iter().rev() {
            let span = Span::between(start, expr.span.end());
            expr = Expr::new(ExprKind::Unary(op, Box::new(expr)), span);
        }
        Ok(expr)
    }

    fn member_expr(&mut self) -> PResult<Expr> {
        let mut expr = self.primary()?;
        let mut links = 0;
        loop {
            let start = expr.span.offset;
            if matches!(self.peek(), TokenKind::Dot | TokenKind::LBracket) {
                self.enter()?;
                links += 1;
            }
            if self.eat(&TokenKind::Dot) {
                let (name, name_span) = self.any_ident("attribute or method name")?;
                if !self.eat(&TokenKind::LParen) {
                    expr = Expr::new(ExprKind::GetAttr(Box::new(expr), name), self.span_from(start));
                    continue;
                }
                let mut args = self.expr_list(TokenKind::RParen)?;
                let Some(op) = BinaryOp::from_method(&name) else {
                    self.push(
                        Diagnostic::error(format!("unknown method `{name}`"), name_span)
                            .with_code(codes::SYNTAX)
                            .with_help("extension functions are not supported"),
                    );
                    return Err(Failed);
                };
                let span = self.span_from(start);
                let arg = match (args.pop(), args.is_empty()) {
                    (Some(arg), true) => arg,
                    _ => {
                        return Err(self.error_at(
                            format!("`{name}` takes exactly one argument"),
                            span,
                        ));
                    }
                };
                expr = Expr::new(ExprKind::Binary(op, Box::new(expr), Box::new(arg)), span);
            } else if self.eat(&TokenKind::LBracket) {
                let (attr, _) = self.string_literal("quoted attribute name")?;
                self.expect(TokenKind::RBracket)?;
                expr = Expr::new(ExprKind::GetAttr(Box::new(expr), attr), self.span_from(start));
            } else {
                self.leave(links);
                return Ok(expr);
            }
        }
    }

    /// Comma separated expressions up to and including `close`. A trailing
    /// comma is accepted.
    fn expr_list(&mut self, close: TokenKind) -> PResult<Vec<Expr>> {
        let mut items = Vec::new();
        while !self.at(&close) {
            items.push(self.expr()?);
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(close)?;
        Ok(items)
    }

    fn primary(&mut self) -> PResult<Expr> {
        let start = self.start();
        match self.peek().clone() {
            TokenKind::Int(n) => {
                let span = self.bump().span;
                let value = i64::try_from(n).map_err(|_| {
                    self.error_at(format!("integer literal `{n}` is out of range"), span)
                })?;
                Ok(Expr::new(ExprKind::Lit(Literal::Long(value)), span))
            }
            TokenKind::Str(_) => {
                let (s, span) = self.string_literal("string")?;
                Ok(Expr::new(ExprKind::Lit(Literal::String(s)), span))
            }
            TokenKind::LParen => {
                self.bump();
                let inner = self.expr()?;
                self.expect(TokenKind::RParen)?;
                Ok(Expr::new(inner.kind, self.span_from(start)))
            }
            TokenKind::LBracket => {
                self.bump();
                let items = self.expr_list(TokenKind::RBracket)?;
                Ok(Expr::new(ExprKind::Set(items), self.span_from(start)))
            }
            TokenKind::LBrace => {
                self.bump();
                self.record(start)
            }
            TokenKind::Question => {
                self.reject_template_slot()?;
                Err(Failed)
            }
            TokenKind::Ident(word) => self.ident_expr(word),
            _ => Err(self.unexpected("an expression")),
        }
    }

    fn ident_expr(&mut self, word: String) -> PResult<Expr> {
        let start = self.start();
        match word.as_str() {
            "true" | "false" => {
                let span = self.bump().span;
                return Ok(Expr::new(ExprKind::Lit(Literal::Bool(word == "true")), span));
            }
            "if" => return self.expr(),
            _ if !is_valid_ident(&word) => return Err(self.unexpected("an expression")),
            _ => {}
        }

        if !matches!(self.peek_at(1), TokenKind::DoubleColon) {
            let span = self.bump().span;
            if let Ok(var) = word.parse::<Var>() {
                return Ok(Expr::new(ExprKind::Var(var), span));
            }
            let diagnostic = if self.at(&TokenKind::LParen) {
                Diagnostic::error(format!("unknown function `{word}`"), span)
                    .with_help("extension functions are not supported")
            } else {
                Diagnostic::error(format!("unknown variable `{word}`"), span).with_help(
                    "the variables are `principal`, `action`, `resource` and `context`",
                )
            };
            self.push(diagnostic.with_code(codes::SYNTAX));
            return Err(Failed);
        }

        let mut segments = vec![self.path_segment()?.0];
        while self.eat(&TokenKind::DoubleColon) {
            match self.peek() {
                TokenKind::Str(_) => {
                    let (eid, _) = self.string_literal("entity id")?;
                    let uid = EntityUid::new(Name::from_segments(segments), eid);
                    return Ok(Expr::new(
                        ExprKind::Lit(Literal::Entity(uid)),
                        self.span_from(start),
                    ));
                }
                TokenKind::Ident(_) => segments.push(self.path_segment()?.0),
                _ => return Err(self.unexpected("identifier or quoted entity id")),
            }
        }

        let span = self.span_from(start);
        let path = segments.join("::");
        let diagnostic = if self.at(&TokenKind::LParen) {
            Diagnostic::error(format!("unknown function `{path}`"), span)
                .with_help("extension functions are not supported")
        } else {
            Diagnostic::error(format!("expected an entity literal, found `{path}`"), span)
                .with_help(format!("entity literals are written `{path}::\"id\"`"))
        };
        self.push(diagnostic.with_code(codes::SYNTAX));
        Err(Failed)
    }

    fn record(&mut self, start: usize) -> PResult<Expr> {
        let mut attrs: Vec<(String, Expr)> = Vec::new();
        while !self.at(&TokenKind::RBrace) {
            let (key, key_span) = match self.peek() {
                TokenKind::Str(_) => self.string_literal("attribute name")?,
                _ => self.any_ident("attribute name")?,
            };
            self.expect(TokenKind::Colon)?;
            let value = self.expr()?;
            if attrs.iter().any(|(k, _)| *k == key) {
                return Err(self.error_at(
                    format!("duplicate attribute `{key}` in record literal"),
                    key_span,
                ));
            }
            attrs.push((key, value));
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RBrace)?;
        Ok(Expr::new(ExprKind::Record(attrs), self.span_from(start)))
    }
}
