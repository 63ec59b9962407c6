//! Condition expressions.

use std::fmt::{Display, Formatter, Result as FmtResult};

use itertools::Itertools;
use once_cell::sync::OnceCell;
use regex::Regex;
use strum_macros::{AsRefStr, Display as StrumDisplay, EnumString};

use super::{EntityUid, Name, escape_str};
use crate::diagnostics::Span;

/// The four request variables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, StrumDisplay, EnumString, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum Var {
    Principal,
    Action,
    Resource,
    Context,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Literal {
    Bool(bool),
    Long(i64),
    String(String),
    Entity(EntityUid),
}

impl Display for Literal {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Literal::Bool(b) => write!(f, "{b}"),
            Literal::Long(n) => write!(f, "{n}"),
            Literal::String(s) => write!(f, "\"{}\"", escape_str(s)),
            Literal::Entity(uid) => write!(f, "{uid}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, StrumDisplay)]
pub enum BinaryOp {
    #[strum(serialize = "==")]
    Eq,
    #[strum(serialize = "!=")]
    NotEq,
    #[strum(serialize = "<")]
    Less,
    #[strum(serialize = "<=")]
    LessEq,
    #[strum(serialize = ">")]
    Greater,
    #[strum(serialize = ">=")]
    GreaterEq,
    #[strum(serialize = "in")]
    In,
    #[strum(serialize = "+")]
    Add,
    #[strum(serialize = "-")]
    Sub,
    #[strum(serialize = "*")]
    Mul,
    #[strum(serialize = "contains")]
    Contains,
    #[strum(serialize = "containsAll")]
    ContainsAll,
    #[strum(serialize = "containsAny")]
    ContainsAny,
}

impl BinaryOp {
    /// Operators written as `left.op(right)` rather than infix.
    pub fn is_method(&self) -> bool {
        matches!(
            self,
            BinaryOp::Contains | BinaryOp::ContainsAll | BinaryOp::ContainsAny
        )
    }

    pub fn from_method(name: &str) -> Option<Self> {
        match name {
            "contains" => Some(BinaryOp::Contains),
            "containsAll" => Some(BinaryOp::ContainsAll),
            "containsAny" => Some(BinaryOp::ContainsAny),
            _ => None,
        }
    }
}

/// One element of a `like` pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PatternElem {
    Char(char),
    Wildcard,
}

/// A `like` pattern, compiled to a regex on first use.
#[derive(Debug, Clone)]
pub struct Pattern {
    elems: Vec<PatternElem>,
    compiled: OnceCell<Regex>,
}

impl Pattern {
    pub fn new(elems: Vec<PatternElem>) -> Self {
        Self {
            elems,
            compiled: OnceCell::new(),
        }
    }

    pub fn elems(&self) -> &[PatternElem] {
        &self.elems
    }

    pub fn is_match(&self, text: &str) -> bool {
        // Every element is escaped, so compilation only fails on size limits.
        self.compiled
            .get_or_try_init(|| self.to_regex())
            .map(|re| re.is_match(text))
            .unwrap_or(false)
    }

    fn to_regex(&self) -> Result<Regex, regex::Error> {
        let mut source = String::from("(?s)^");
        for elem in &self.elems {
            match elem {
                PatternElem::Char(c) => source.push_str(&regex::escape(&c.to_string())),
                PatternElem::Wildcard => source.push_str(".*"),
            }
        }
        source.push('$');
        Regex::new(&source)
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.elems == other.elems
    }
}

impl Eq for Pattern {}

impl Display for Pattern {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "\"")?;
        for elem in &self.elems {
            match elem {
                PatternElem::Wildcard => write!(f, "*")?,
                PatternElem::Char('*') => write!(f, "\\*")?,
                PatternElem::Char(c) => write!(f, "{}", escape_str(&c.to_string()))?,
            }
        }
        write!(f, "\"")
    }
}

/// An expression node together with its byte span in the policy source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExprKind {
    Lit(Literal),
    Var(Var),
    If {
        cond: Box<Expr>,
        then_expr: Box<Expr>,
        else_expr: Box<Expr>,
    },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    GetAttr(Box<Expr>, String),
    HasAttr(Box<Expr>, String),
    Like(Box<Expr>, Pattern),
    Is(Box<Expr>, Name, Option<Box<Expr>>),
    Set(Vec<Expr>),
    Record(Vec<(String, Expr)>),
}

impl Expr {
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Self { kind, span }
    }

    /// Returns the boolean value if this is a `true`/`false` literal.
    pub fn as_bool_literal(&self) -> Option<bool> {
        match &self.kind {
            ExprKind::Lit(Literal::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    /// Entity literals appearing anywhere in this expression, in source order.
    pub fn entity_literals(&self) -> Vec<(&EntityUid, Span)> {
        let mut out = Vec::new();
        self.visit(&mut |e| {
            if let ExprKind::Lit(Literal::Entity(uid)) = &e.kind {
                out.push((uid, e.span));
            }
        });
        out
    }

    /// Pre-order traversal.
    pub fn visit<'a>(&'a self, f: &mut impl FnMut(&'a Expr)) {
        f(self);
        match &self.kind {
            ExprKind::Lit(_) | ExprKind::Var(_) => {}
            ExprKind::If {
                cond,
                then_expr,
                else_expr,
            } => {
                cond.visit(f);
                then_expr.visit(f);
                else_expr.visit(f);
            }
            ExprKind::And(l, r) | ExprKind::Or(l, r) | ExprKind::Binary(_, l, r) => {
                l.visit(f);
                r.visit(f);
            }
            ExprKind::Unary(_, e)
            | ExprKind::GetAttr(e, _)
            | ExprKind::HasAttr(e, _)
            | ExprKind::Like(e, _) => e.visit(f),
            ExprKind::Is(e, _, in_expr) => {
                e.visit(f);
                if let Some(in_expr) = in_expr {
                    in_expr.visit(f);
                }
            }
            ExprKind::Set(items) => {
                for item in items {
                    item.visit(f);
                }
            }
            ExprKind::Record(attrs) => {
                for (_, value) in attrs {
                    value.visit(f);
                }
            }
        }
    }
}

fn fmt_attr(attr: &str) -> String {
    if super::is_valid_ident(attr) {
        attr.to_string()
    } else {
        format!("[\"{}\"]", escape_str(attr))
    }
}

impl Display for Expr {
    /// Renders fully parenthesized compound expressions, which keeps the
    /// output unambiguous without tracking precedence.
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match &self.kind {
            ExprKind::Lit(lit) => write!(f, "{lit}"),
            ExprKind::Var(v) => write!(f, "{v}"),
            ExprKind::If {
                cond,
                then_expr,
                else_expr,
            } => write!(f, "(if {cond} then {then_expr} else {else_expr})"),
            ExprKind::And(l, r) => write!(f, "({l} && {r})"),
            ExprKind::Or(l, r) => write!(f, "({l} || {r})"),
            ExprKind::Unary(UnaryOp::Not, e) => write!(f, "(!{e})"),
            ExprKind::Unary(UnaryOp::Neg, e) => write!(f, "(-{e})"),
            ExprKind::Binary(op, l, r) if op.is_method() => write!(f, "{l}.{op}({r})"),
            ExprKind::Binary(op, l, r) => write!(f, "({l} {op} {r})"),
            ExprKind::GetAttr(e, attr) => {
                let rendered = fmt_attr(attr);
                if rendered.starts_with('[') {
                    write!(f, "{e}{rendered}")
                } else {
                    write!(f, "{e}.{rendered}")
                }
            }
            ExprKind::HasAttr(e, attr) => {
                if super::is_valid_ident(attr) {
                    write!(f, "({e} has {attr})")
                } else {
                    write!(f, "({e} has \"{}\")", escape_str(attr))
                }
            }
            ExprKind::Like(e, pattern) => write!(f, "({e} like {pattern})"),
            ExprKind::Is(e, ty, None) => write!(f, "({e} is {ty})"),
            ExprKind::Is(e, ty, Some(in_expr)) => write!(f, "({e} is {ty} in {in_expr})"),
            ExprKind::Set(items) => write!(f, "[{}]", items.iter().join(", ")),
            ExprKind::Record(attrs) => write!(
                f,
                "{{{}}}",
                attrs
                    .iter()
                    .map(|(k, v)| format!("\"{}\": {v}", escape_str(k)))
                    .join(", ")
            ),
        }
    }
}
