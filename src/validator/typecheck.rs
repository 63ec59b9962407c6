//! Typechecking of policy conditions in one request environment.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter, Result as FmtResult};

use itertools::Itertools;

use super::ValidationMode;
use crate::ast::{BinaryOp, EntityUid, Expr, ExprKind, Literal, Name, UnaryOp, Var};
use crate::diagnostics::{Diagnostic, Span, codes};
use crate::schema::{RecordType, Schema, SchemaType};

/// The static type of an expression. `Unknown` is used where the type cannot
/// be determined (an earlier error, an empty set) and is compatible with
/// everything, so one mistake is reported once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum Ty {
    Bool,
    Long,
    String,
    Set(Box<Ty>),
    Record(BTreeMap<String, (Ty, bool)>),
    Entity(Name),
    Unknown,
}

impl Ty {
    fn from_schema(ty: &SchemaType) -> Ty {
        match ty {
            SchemaType::Bool => Ty::Bool,
            SchemaType::Long => Ty::Long,
            SchemaType::String => Ty::String,
            SchemaType::Set(elem) => Ty::Set(Box::new(Ty::from_schema(elem))),
            SchemaType::Record(record) => Ty::from_record(record),
            SchemaType::Entity(name) => Ty::Entity(name.clone()),
        }
    }

    pub(super) fn from_record(record: &RecordType) -> Ty {
        Ty::Record(
            record
                .attributes()
                .map(|(name, attr)| (name.clone(), (Ty::from_schema(&attr.ty), attr.required)))
                .collect(),
        )
    }

    fn is_entity(&self) -> bool {
        matches!(self, Ty::Entity(_) | Ty::Unknown)
    }

    /// Whether values of the two types can ever be equal.
    fn compatible(&self, other: &Ty) -> bool {
        match (self, other) {
            (Ty::Unknown, _) | (_, Ty::Unknown) => true,
            (Ty::Set(a), Ty::Set(b)) => a.compatible(b),
            (Ty::Entity(_), Ty::Entity(_)) | (Ty::Record(_), Ty::Record(_)) => true,
            (a, b) => std::mem::discriminant(a) == std::mem::discriminant(b),
        }
    }
}

impl Display for Ty {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Ty::Bool => write!(f, "bool"),
            Ty::Long => write!(f, "long"),
            Ty::String => write!(f, "string"),
            Ty::Set(elem) => write!(f, "set<{elem}>"),
            Ty::Record(attrs) => write!(f, "{{{}}}", attrs.keys().join(", ")),
            Ty::Entity(name) => write!(f, "entity `{name}`"),
            Ty::Unknown => write!(f, "unknown"),
        }
    }
}

/// The types of the request variables for one action and one
/// principal/resource type pair the action applies to.
pub(super) struct RequestEnv<'s> {
    pub principal: &'s Name,
    pub action: &'s EntityUid,
    pub resource: &'s Name,
    pub context: &'s RecordType,
}

/// Attributes known to be present when an expression evaluates to `true`,
/// keyed by the rendered target expression.
type Guards = BTreeSet<(String, String)>;

pub(super) struct TypeChecker<'a> {
    schema: &'a Schema,
    env: &'a RequestEnv<'a>,
    mode: ValidationMode,
    diagnostics: Vec<Diagnostic>,
}

impl<'a> TypeChecker<'a> {
    pub(super) fn new(schema: &'a Schema, env: &'a RequestEnv<'a>, mode: ValidationMode) -> Self {
        Self {
            schema,
            env,
            mode,
            diagnostics: Vec::new(),
        }
    }

    pub(super) fn into_diagnostics(self) -> Vec<Diagnostic> {
        self.diagnostics
    }

    /// Check a `when`/`unless` body, which must be boolean.
    pub(super) fn check_condition(&mut self, body: &Expr) {
        let (ty, _) = self.check(body, &Guards::new());
        self.expect(&ty, &Ty::Bool, "bool", body.span);
    }

    fn mismatch(&mut self, expected: &str, found: &Ty, span: Span) {
        self.diagnostics.push(
            Diagnostic::error(
                format!("type mismatch: expected {expected}, found {found}"),
                span,
            )
            .with_code(codes::TYPE_MISMATCH),
        );
    }

    /// A finding that is a warning in permissive mode and an error in strict.
    fn lenient(&self, message: String, span: Span) -> Diagnostic {
        match self.mode {
            ValidationMode::Permissive => Diagnostic::warning(message, span),
            ValidationMode::Strict => Diagnostic::error(message, span),
        }
    }

    fn expect(&mut self, found: &Ty, expected: &Ty, what: &str, span: Span) {
        if *found != Ty::Unknown && found != expected {
            self.mismatch(what, found, span);
        }
    }

    fn expect_set(&mut self, found: &Ty, span: Span) {
        if !matches!(found, Ty::Set(_) | Ty::Unknown) {
            self.mismatch("set", found, span);
        }
    }

    /// `left in right`: an entity in an entity or a set of entities.
    fn check_in(&mut self, left: (&Ty, Span), right: (&Ty, Span)) {
        if !left.0.is_entity() {
            self.mismatch("entity", left.0, left.1);
        }
        match right.0 {
            Ty::Entity(_) | Ty::Unknown => {}
            Ty::Set(elem) if elem.is_entity() => {}
            other => self.mismatch("entity or set of entities", other, right.1),
        }
    }

    fn check(&mut self, expr: &Expr, guards: &Guards) -> (Ty, Guards) {
        let none = Guards::new();
        match &expr.kind {
            ExprKind::Lit(lit) => (
                match lit {
                    Literal::Bool(_) => Ty::Bool,
                    Literal::Long(_) => Ty::Long,
                    Literal::String(_) => Ty::String,
                    Literal::Entity(uid) => Ty::Entity(uid.entity_type().clone()),
                },
                none,
            ),
            ExprKind::Var(var) => (
                match var {
                    Var::Principal => Ty::Entity(self.env.principal.clone()),
                    Var::Action => Ty::Entity(self.env.action.entity_type().clone()),
                    Var::Resource => Ty::Entity(self.env.resource.clone()),
                    Var::Context => Ty::from_record(self.env.context),
                },
                none,
            ),
            ExprKind::If {
                cond,
                then_expr,
                else_expr,
            } => {
                let (cond_ty, cond_guards) = self.check(cond, guards);
                self.expect(&cond_ty, &Ty::Bool, "bool", cond.span);
                let then_guards: Guards = guards.union(&cond_guards).cloned().collect();
                let (then_ty, _) = self.check(then_expr, &then_guards);
                let (else_ty, _) = self.check(else_expr, guards);
                let ty = if then_ty == else_ty { then_ty } else { Ty::Unknown };
                (ty, none)
            }
            ExprKind::And(left, right) => {
                let (left_ty, left_guards) = self.check(left, guards);
                self.expect(&left_ty, &Ty::Bool, "bool", left.span);
                let inner: Guards = guards.union(&left_guards).cloned().collect();
                let (right_ty, right_guards) = self.check(right, &inner);
                self.expect(&right_ty, &Ty::Bool, "bool", right.span);
                (Ty::Bool, left_guards.union(&right_guards).cloned().collect())
            }
            ExprKind::Or(left, right) => {
                for operand in [left, right] {
                    let (ty, _) = self.check(operand, guards);
                    self.expect(&ty, &Ty::Bool, "bool", operand.span);
                }
                (Ty::Bool, none)
            }
            ExprKind::Unary(op, operand) => {
                let (ty, _) = self.check(operand, guards);
                match op {
                    UnaryOp::Not => {
                        self.expect(&ty, &Ty::Bool, "bool", operand.span);
                        (Ty::Bool, none)
                    }
                    UnaryOp::Neg => {
                        self.expect(&ty, &Ty::Long, "long", operand.span);
                        (Ty::Long, none)
                    }
                }
            }
            ExprKind::Binary(op, left, right) => {
                (self.check_binary(*op, left, right, expr.span, guards), none)
            }
            ExprKind::GetAttr(target, attr) => {
                (self.check_get_attr(target, attr, expr.span, guards), none)
            }
            ExprKind::HasAttr(target, attr) => {
                let (ty, _) = self.check(target, guards);
                if !matches!(ty, Ty::Entity(_) | Ty::Record(_) | Ty::Unknown) {
                    self.mismatch("entity or record", &ty, target.span);
                }
                let mut known = Guards::new();
                known.insert((target.to_string(), attr.clone()));
                (Ty::Bool, known)
            }
            ExprKind::Like(target, _) => {
                let (ty, _) = self.check(target, guards);
                self.expect(&ty, &Ty::String, "string", target.span);
                (Ty::Bool, none)
            }
            ExprKind::Is(target, _, in_expr) => {
                let (ty, _) = self.check(target, guards);
                if !ty.is_entity() {
                    self.mismatch("entity", &ty, target.span);
                }
                if let Some(in_expr) = in_expr {
                    let (in_ty, _) = self.check(in_expr, guards);
                    self.check_in((&Ty::Unknown, target.span), (&in_ty, in_expr.span));
                }
                (Ty::Bool, none)
            }
            ExprKind::Set(items) => {
                let types: Vec<Ty> = items.iter().map(|item| self.check(item, guards).0).collect();
                let elem = match types.split_first() {
                    Some((first, rest)) if rest.iter().all(|t| t == first) => first.clone(),
                    _ => Ty::Unknown,
                };
                (Ty::Set(Box::new(elem)), none)
            }
            ExprKind::Record(attrs) => {
                let fields = attrs
                    .iter()
                    .map(|(name, value)| (name.clone(), (self.check(value, guards).0, true)))
                    .collect();
                (Ty::Record(fields), none)
            }
        }
    }

    fn check_binary(
        &mut self,
        op: BinaryOp,
        left: &Expr,
        right: &Expr,
        span: Span,
        guards: &Guards,
    ) -> Ty {
        let (left_ty, _) = self.check(left, guards);
        let (right_ty, _) = self.check(right, guards);
        match op {
            BinaryOp::Eq | BinaryOp::NotEq => {
                if !left_ty.compatible(&right_ty) {
                    let diagnostic = self.lenient(
                        format!("comparing {left_ty} with {right_ty} is always false"),
                        span,
                    );
                    self.diagnostics
                        .push(diagnostic.with_code(codes::TYPE_MISMATCH));
                }
                Ty::Bool
            }
            BinaryOp::Less | BinaryOp::LessEq | BinaryOp::Greater | BinaryOp::GreaterEq => {
                self.expect(&left_ty, &Ty::Long, "long", left.span);
                self.expect(&right_ty, &Ty::Long, "long", right.span);
                Ty::Bool
            }
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul => {
                self.expect(&left_ty, &Ty::Long, "long", left.span);
                self.expect(&right_ty, &Ty::Long, "long", right.span);
                Ty::Long
            }
            BinaryOp::In => {
                self.check_in((&left_ty, left.span), (&right_ty, right.span));
                Ty::Bool
            }
            BinaryOp::Contains => {
                self.expect_set(&left_ty, left.span);
                Ty::Bool
            }
            BinaryOp::ContainsAll | BinaryOp::ContainsAny => {
                self.expect_set(&left_ty, left.span);
                self.expect_set(&right_ty, right.span);
                Ty::Bool
            }
        }
    }

    fn check_get_attr(&mut self, target: &Expr, attr: &str, span: Span, guards: &Guards) -> Ty {
        let (target_ty, _) = self.check(target, guards);
        let found = match &target_ty {
            Ty::Unknown => return Ty::Unknown,
            Ty::Entity(name) => {
                if name.is_action_type() {
                    None
                } else {
                    match self.schema.entity_type(name) {
                        // Undeclared types are reported separately.
                        None => return Ty::Unknown,
                        Some(def) => def
                            .attributes
                            .get(attr)
                            .map(|a| (Ty::from_schema(&a.ty), a.required)),
                    }
                }
            }
            Ty::Record(fields) => fields.get(attr).cloned(),
            other => {
                self.mismatch("entity or record", other, target.span);
                return Ty::Unknown;
            }
        };

        let Some((ty, required)) = found else {
            self.diagnostics.push(
                Diagnostic::error(
                    format!("attribute `{attr}` is not declared for {target_ty}"),
                    span,
                )
                .with_code(codes::UNDECLARED_ATTRIBUTE),
            );
            return Ty::Unknown;
        };
        if !required && !guards.contains(&(target.to_string(), attr.to_string())) {
            let diagnostic = self.lenient(
                format!("optional attribute `{attr}` is accessed without a `has` check"),
                span,
            );
            self.diagnostics.push(
                diagnostic
                    .with_code(codes::UNSAFE_OPTIONAL_ATTRIBUTE)
                    .with_help(format!("guard the access with `{target} has {attr} && ...`")),
            );
        }
        ty
    }
}
