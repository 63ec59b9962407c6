//! Expression and scope evaluation against one request.

use thiserror::Error;

use super::Request;
use crate::ast::{
    ActionConstraint, BinaryOp, EntityConstraint, EntityUid, Expr, ExprKind, Literal, Policy,
    Scope, UnaryOp, Value, ValueKind, Var,
};
use crate::diagnostics::Span;
use crate::entities::Entities;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EvaluationErrorKind {
    #[error("entity `{0}` does not exist")]
    EntityDoesNotExist(EntityUid),

    #[error("`{entity}` does not have the attribute `{attr}`")]
    EntityAttrDoesNotExist { entity: EntityUid, attr: String },

    #[error("record does not have the attribute `{0}`")]
    RecordAttrDoesNotExist(String),

    #[error("type error: expected {expected}, got {actual}")]
    TypeError {
        expected: &'static str,
        actual: ValueKind,
    },

    #[error("integer overflow")]
    Overflow,
}

/// A runtime error, located at the expression that raised it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{kind}")]
pub struct EvaluationError {
    kind: EvaluationErrorKind,
    span: Span,
}

impl EvaluationError {
    pub fn new(kind: EvaluationErrorKind, span: Span) -> Self {
        Self { kind, span }
    }

    pub fn kind(&self) -> &EvaluationErrorKind {
        &self.kind
    }

    /// Span of the failing expression in the policy source.
    pub fn span(&self) -> Span {
        self.span
    }
}

type EvalResult<T> = Result<T, EvaluationError>;

fn type_error(expected: &'static str, actual: &Value, span: Span) -> EvaluationError {
    EvaluationError::new(
        EvaluationErrorKind::TypeError {
            expected,
            actual: actual.kind(),
        },
        span,
    )
}

/// Evaluates scopes and conditions for a single request.
pub struct Evaluator<'e> {
    request: &'e Request,
    entities: &'e Entities,
}

impl<'e> Evaluator<'e> {
    pub fn new(request: &'e Request, entities: &'e Entities) -> Self {
        Self { request, entities }
    }

    /// Whether the policy applies: scope matches and every condition holds.
    /// Conditions are evaluated in order and stop at the first that fails.
    pub fn matches_policy(&self, policy: &Policy) -> EvalResult<bool> {
        if !self.matches_scope(policy.scope()) {
            return Ok(false);
        }
        for condition in policy.conditions() {
            let holds = self.evaluate_bool(&condition.body)?;
            let satisfied = match condition.kind {
                crate::ast::ConditionKind::When => holds,
                crate::ast::ConditionKind::Unless => !holds,
            };
            if !satisfied {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Scope matching never fails: unknown entities simply have no ancestors.
    pub fn matches_scope(&self, scope: &Scope) -> bool {
        self.matches_entity(&scope.principal, &self.request.principal)
            && self.matches_action(&scope.action)
            && self.matches_entity(&scope.resource, &self.request.resource)
    }

    fn matches_entity(&self, constraint: &EntityConstraint, uid: &EntityUid) -> bool {
        match constraint {
            EntityConstraint::Any => true,
            EntityConstraint::Eq(expected) => uid == expected,
            EntityConstraint::In(ancestor) => self.entities.is_ancestor(ancestor, uid),
            EntityConstraint::Is(ty) => uid.entity_type() == ty,
            EntityConstraint::IsIn(ty, ancestor) => {
                uid.entity_type() == ty && self.entities.is_ancestor(ancestor, uid)
            }
        }
    }

    fn matches_action(&self, constraint: &ActionConstraint) -> bool {
        let action = &self.request.action;
        match constraint {
            ActionConstraint::Any => true,
            ActionConstraint::Eq(expected) => action == expected,
            ActionConstraint::In(ancestors) => ancestors
                .iter()
                .any(|ancestor| self.entities.is_ancestor(ancestor, action)),
        }
    }

    pub fn evaluate_bool(&self, expr: &Expr) -> EvalResult<bool> {
        let value = self.evaluate(expr)?;
        value
            .as_bool()
            .ok_or_else(|| type_error("bool", &value, expr.span))
    }

    fn evaluate_long(&self, expr: &Expr) -> EvalResult<i64> {
        let value = self.evaluate(expr)?;
        value
            .as_long()
            .ok_or_else(|| type_error("long", &value, expr.span))
    }

    pub fn evaluate(&self, expr: &Expr) -> EvalResult<Value> {
        let span = expr.span;
        match &expr.kind {
            ExprKind::Lit(lit) => Ok(match lit {
                Literal::Bool(b) => Value::Bool(*b),
                Literal::Long(n) => Value::Long(*n),
                Literal::String(s) => Value::String(s.clone()),
                Literal::Entity(uid) => Value::Entity(uid.clone()),
            }),
            ExprKind::Var(var) => Ok(match var {
                Var::Principal => Value::Entity(self.request.principal.clone()),
                Var::Action => Value::Entity(self.request.action.clone()),
                Var::Resource => Value::Entity(self.request.resource.clone()),
                Var::Context => Value::Record(self.request.context.clone()),
            }),
            ExprKind::If {
                cond,
                then_expr,
                else_expr,
            } => {
                if self.evaluate_bool(cond)? {
                    self.evaluate(then_expr)
                } else {
                    self.evaluate(else_expr)
                }
            }
            ExprKind::And(left, right) => Ok(Value::Bool(
                self.evaluate_bool(left)? && self.evaluate_bool(right)?,
            )),
            ExprKind::Or(left, right) => Ok(Value::Bool(
                self.evaluate_bool(left)? || self.evaluate_bool(right)?,
            )),
            ExprKind::Unary(UnaryOp::Not, operand) => {
                Ok(Value::Bool(!self.evaluate_bool(operand)?))
            }
            ExprKind::Unary(UnaryOp::Neg, operand) => self
                .evaluate_long(operand)?
                .checked_neg()
                .map(Value::Long)
                .ok_or_else(|| EvaluationError::new(EvaluationErrorKind::Overflow, span)),
            ExprKind::Binary(op, left, right) => self.binary(*op, left, right, span),
            ExprKind::GetAttr(target, attr) => self.get_attr(target, attr, span),
            ExprKind::HasAttr(target, attr) => match self.evaluate(target)? {
                Value::Entity(uid) => Ok(Value::Bool(
                    self.entities
                        .get(&uid)
                        .is_some_and(|entity| entity.attr(attr).is_some()),
                )),
                Value::Record(record) => Ok(Value::Bool(record.contains_key(attr))),
                other => Err(type_error("entity or record", &other, target.span)),
            },
            ExprKind::Like(target, pattern) => match self.evaluate(target)? {
                Value::String(s) => Ok(Value::Bool(pattern.is_match(&s))),
                other => Err(type_error("string", &other, target.span)),
            },
            ExprKind::Is(target, ty, in_expr) => {
                let value = self.evaluate(target)?;
                let Value::Entity(uid) = &value else {
                    return Err(type_error("entity", &value, target.span));
                };
                if uid.entity_type() != ty {
                    return Ok(Value::Bool(false));
                }
                match in_expr {
                    None => Ok(Value::Bool(true)),
                    Some(in_expr) => self.is_in(uid, in_expr).map(Value::Bool),
                }
            }
            ExprKind::Set(items) => items
                .iter()
                .map(|item| self.evaluate(item))
                .collect::<EvalResult<_>>()
                .map(Value::Set),
            ExprKind::Record(attrs) => attrs
                .iter()
                .map(|(name, value)| Ok((name.clone(), self.evaluate(value)?)))
                .collect::<EvalResult<_>>()
                .map(Value::Record),
        }
    }

    fn binary(&self, op: BinaryOp, left: &Expr, right: &Expr, span: Span) -> EvalResult<Value> {
        let overflow = || EvaluationError::new(EvaluationErrorKind::Overflow, span);
        match op {
            BinaryOp::Eq => Ok(Value::Bool(self.evaluate(left)? == self.evaluate(right)?)),
            BinaryOp::NotEq => Ok(Value::Bool(self.evaluate(left)? != self.evaluate(right)?)),
            BinaryOp::Less
            | BinaryOp::LessEq
            | BinaryOp::Greater
            | BinaryOp::GreaterEq => {
                let (l, r) = (self.evaluate_long(left)?, self.evaluate_long(right)?);
                Ok(Value::Bool(match op {
                    BinaryOp::Less => l < r,
                    BinaryOp::LessEq => l <= r,
                    BinaryOp::Greater => l > r,
                    _ => l >= r,
                }))
            }
            BinaryOp::Add => {
                let (l, r) = (self.evaluate_long(left)?, self.evaluate_long(right)?);
                l.checked_add(r).map(Value::Long).ok_or_else(overflow)
            }
            BinaryOp::Sub => {
                let (l, r) = (self.evaluate_long(left)?, self.evaluate_long(right)?);
                l.checked_sub(r).map(Value::Long).ok_or_else(overflow)
            }
            BinaryOp::Mul => {
                let (l, r) = (self.evaluate_long(left)?, self.evaluate_long(right)?);
                l.checked_mul(r).map(Value::Long).ok_or_else(overflow)
            }
            BinaryOp::In => {
                let value = self.evaluate(left)?;
                let Value::Entity(uid) = &value else {
                    return Err(type_error("entity", &value, left.span));
                };
                self.is_in(uid, right).map(Value::Bool)
            }
            BinaryOp::Contains => {
                let set = self.evaluate(left)?;
                let Value::Set(items) = &set else {
                    return Err(type_error("set", &set, left.span));
                };
                Ok(Value::Bool(items.contains(&self.evaluate(right)?)))
            }
            BinaryOp::ContainsAll | BinaryOp::ContainsAny => {
                let (l, r) = (self.evaluate(left)?, self.evaluate(right)?);
                let Value::Set(haystack) = &l else {
                    return Err(type_error("set", &l, left.span));
                };
                let Value::Set(needles) = &r else {
                    return Err(type_error("set", &r, right.span));
                };
                Ok(Value::Bool(if op == BinaryOp::ContainsAll {
                    needles.is_subset(haystack)
                } else {
                    !needles.is_disjoint(haystack)
                }))
            }
        }
    }

    /// `uid in <expr>`, where the right side is an entity or a set of them.
    fn is_in(&self, uid: &EntityUid, container: &Expr) -> EvalResult<bool> {
        match self.evaluate(container)? {
            Value::Entity(ancestor) => Ok(self.entities.is_ancestor(&ancestor, uid)),
            Value::Set(items) => {
                let mut found = false;
                for item in &items {
                    let Value::Entity(ancestor) = item else {
                        return Err(type_error("set of entities", item, container.span));
                    };
                    found = found || self.entities.is_ancestor(ancestor, uid);
                }
                Ok(found)
            }
            other => Err(type_error("entity or set of entities", &other, container.span)),
        }
    }

    fn get_attr(&self, target: &Expr, attr: &str, span: Span) -> EvalResult<Value> {
        match self.evaluate(target)? {
            Value::Entity(uid) => {
                let Some(entity) = self.entities.get(&uid) else {
                    return Err(EvaluationError::new(
                        EvaluationErrorKind::EntityDoesNotExist(uid),
                        target.span,
                    ));
                };
                entity.attr(attr).cloned().ok_or_else(|| {
                    EvaluationError::new(
                        EvaluationErrorKind::EntityAttrDoesNotExist {
                            entity: uid.clone(),
                            attr: attr.to_string(),
                        },
                        span,
                    )
                })
            }
            Value::Record(mut record) => record.remove(attr).ok_or_else(|| {
                EvaluationError::new(
                    EvaluationErrorKind::RecordAttrDoesNotExist(attr.to_string()),
                    span,
                )
            }),
            other => Err(type_error("entity or record", &other, target.span)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, BTreeSet};

    use super::*;
    use crate::entities::Entity;
    use yare::parameterized;

    fn uid(s: &str) -> EntityUid {
        s.parse().unwrap()
    }

    fn entities() -> Entities {
        Entities::from_entities(
            vec![
                Entity::new(
                    uid(r#"User::"alice""#),
                    BTreeMap::from([
                        ("age".to_string(), Value::Long(30)),
                        ("name".to_string(), Value::from("Alice")),
                    ]),
                    BTreeSet::from([uid(r#"Group::"admins""#)]),
                ),
                Entity::with_uid(uid(r#"Group::"admins""#)),
            ],
            None,
        )
        .unwrap()
    }

    fn request() -> Request {
        Request::new(
            uid(r#"User::"alice""#),
            uid(r#"Action::"view""#),
            uid(r#"Photo::"p1""#),
            BTreeMap::from([
                ("level".to_string(), Value::Long(3)),
                ("tags".to_string(), Value::set([Value::from("a"), Value::from("b")])),
            ]),
        )
    }

    fn eval(text: &str) -> EvalResult<Value> {
        let expr: Expr = text.parse().unwrap();
        let (request, entities) = (request(), entities());
        Evaluator::new(&request, &entities).evaluate(&expr)
    }

    #[parameterized(
        arithmetic = { "1 + 2 * 3 - 4", Value::Long(3) },
        comparison = { "context.level >= 3", Value::Bool(true) },
        structural_eq = { r#"[1, 2] == [2, 1]"#, Value::Bool(true) },
        mixed_eq = { r#"1 == "1""#, Value::Bool(false) },
        entity_attr = { "principal.age", Value::Long(30) },
        in_group = { r#"principal in Group::"admins""#, Value::Bool(true) },
        in_set = { r#"principal in [Group::"other", Group::"admins"]"#, Value::Bool(true) },
        in_self = { r#"resource in Photo::"p1""#, Value::Bool(true) },
        has_entity_attr = { "principal has name", Value::Bool(true) },
        has_missing_entity = { "resource has owner", Value::Bool(false) },
        has_record_attr = { "context has level", Value::Bool(true) },
        like = { r#"principal.name like "A*e""#, Value::Bool(true) },
        is = { "principal is User", Value::Bool(true) },
        is_in = { r#"principal is User in Group::"admins""#, Value::Bool(true) },
        is_wrong_type = { r#"principal is Group in Group::"admins""#, Value::Bool(false) },
        contains = { r#"context.tags.contains("a")"#, Value::Bool(true) },
        contains_all = { r#"context.tags.containsAll(["a", "b"])"#, Value::Bool(true) },
        contains_any = { r#"context.tags.containsAny(["z"])"#, Value::Bool(false) },
        if_then_else = { "if context.level > 5 then 1 else 2", Value::Long(2) },
        short_circuit_and = { "false && principal.missing", Value::Bool(false) },
        short_circuit_or = { "true || principal.missing", Value::Bool(true) },
        record_literal = { r#"{a: 1}.a"#, Value::Long(1) },
        negation = { "-(context.level)", Value::Long(-3) },
    )]
    fn test_evaluate(text: &str, expected: Value) {
        assert_eq!(eval(text).unwrap(), expected);
    }

    #[parameterized(
        missing_entity = { "resource.owner", "entity `Photo::\"p1\"` does not exist" },
        missing_attr = { "principal.height", "`User::\"alice\"` does not have the attribute `height`" },
        missing_record_attr = { "context.nope", "record does not have the attribute `nope`" },
        not_bool = { "1 && true", "type error: expected bool, got long" },
        not_long = { r#""a" < 1"#, "type error: expected long, got string" },
        in_non_entity = { r#"1 in Group::"a""#, "type error: expected entity, got long" },
        in_mixed_set = { r#"principal in [Group::"a", 1]"#, "expected set of entities" },
        overflow = { "9223372036854775807 + 1", "integer overflow" },
        mul_overflow = { "9223372036854775807 * 2", "integer overflow" },
        neg_overflow = { "-(-9223372036854775808)", "integer overflow" },
        like_non_string = { r#"1 like "*""#, "expected string" },
        contains_non_set = { r#"context.level.contains(1)"#, "expected set" },
    )]
    fn test_evaluation_errors(text: &str, expected: &str) {
        let err = eval(text).unwrap_err();
        assert!(
            err.to_string().contains(expected),
            "{err} does not contain {expected}"
        );
    }

    #[test]
    fn test_error_span_points_at_failing_expression() {
        let text = "context.level > 1 && principal.height > 1";
        let err = eval(text).unwrap_err();
        let start = text.find("principal.height").unwrap();
        assert_eq!(err.span(), Span::new(start, "principal.height".len()));
    }
}
