//! Parsed policies.

use std::fmt::{Display, Formatter, Result as FmtResult};

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display as StrumDisplay, EnumString};
use utoipa::ToSchema;

use super::{EntityUid, Expr, Name, escape_str};
use crate::diagnostics::Span;

/// Identifier of a policy within its set.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(transparent)]
pub struct PolicyId(String);

impl PolicyId {
    pub fn new(id: impl Into<String>) -> Self {
        PolicyId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for PolicyId {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PolicyId {
    fn from(s: &str) -> Self {
        PolicyId(s.to_string())
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    StrumDisplay,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Effect {
    Permit,
    Forbid,
}

/// Scope constraint on the principal or resource slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntityConstraint {
    Any,
    Eq(EntityUid),
    In(EntityUid),
    Is(Name),
    IsIn(Name, EntityUid),
}

impl EntityConstraint {
    /// Entity uids and types named by the constraint.
    pub fn referenced_uid(&self) -> Option<&EntityUid> {
        match self {
            EntityConstraint::Eq(uid) | EntityConstraint::In(uid) | EntityConstraint::IsIn(_, uid) => {
                Some(uid)
            }
            EntityConstraint::Any | EntityConstraint::Is(_) => None,
        }
    }

    pub fn referenced_type(&self) -> Option<&Name> {
        match self {
            EntityConstraint::Is(ty) | EntityConstraint::IsIn(ty, _) => Some(ty),
            _ => None,
        }
    }

    fn fmt_for(&self, var: &str, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            EntityConstraint::Any => write!(f, "{var}"),
            EntityConstraint::Eq(uid) => write!(f, "{var} == {uid}"),
            EntityConstraint::In(uid) => write!(f, "{var} in {uid}"),
            EntityConstraint::Is(ty) => write!(f, "{var} is {ty}"),
            EntityConstraint::IsIn(ty, uid) => write!(f, "{var} is {ty} in {uid}"),
        }
    }
}

/// Scope constraint on the action slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ActionConstraint {
    Any,
    Eq(EntityUid),
    In(Vec<EntityUid>),
}

impl ActionConstraint {
    pub fn referenced_uids(&self) -> Vec<&EntityUid> {
        match self {
            ActionConstraint::Any => Vec::new(),
            ActionConstraint::Eq(uid) => vec![uid],
            ActionConstraint::In(uids) => uids.iter().collect(),
        }
    }
}

impl Display for ActionConstraint {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            ActionConstraint::Any => write!(f, "action"),
            ActionConstraint::Eq(uid) => write!(f, "action == {uid}"),
            ActionConstraint::In(uids) if uids.len() == 1 => write!(f, "action in {}", uids[0]),
            ActionConstraint::In(uids) => write!(f, "action in [{}]", uids.iter().join(", ")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    pub principal: EntityConstraint,
    pub principal_span: Span,
    pub action: ActionConstraint,
    pub action_span: Span,
    pub resource: EntityConstraint,
    pub resource_span: Span,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, StrumDisplay, EnumString, AsRefStr,
)]
#[strum(serialize_all = "lowercase")]
pub enum ConditionKind {
    When,
    Unless,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    pub kind: ConditionKind,
    pub body: Expr,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Annotation {
    pub key: String,
    pub value: String,
    pub span: Span,
}

/// An immutable, parsed policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Policy {
    pub(crate) id: PolicyId,
    pub(crate) annotations: Vec<Annotation>,
    pub(crate) effect: Effect,
    pub(crate) scope: Scope,
    pub(crate) conditions: Vec<Condition>,
    pub(crate) span: Span,
}

impl Policy {
    pub fn id(&self) -> &PolicyId {
        &self.id
    }

    pub fn effect(&self) -> Effect {
        self.effect
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn principal_constraint(&self) -> &EntityConstraint {
        &self.scope.principal
    }

    pub fn action_constraint(&self) -> &ActionConstraint {
        &self.scope.action
    }

    pub fn resource_constraint(&self) -> &EntityConstraint {
        &self.scope.resource
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn annotations(&self) -> &[Annotation] {
        &self.annotations
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations
            .iter()
            .find(|a| a.key == key)
            .map(|a| a.value.as_str())
    }

    /// Byte span of the whole policy in the source text.
    pub fn span(&self) -> Span {
        self.span
    }
}

impl Display for Policy {
    /// Canonical policy text. Parsing the output yields an equivalent policy.
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        for annotation in &self.annotations {
            writeln!(
                f,
                "@{}(\"{}\")",
                annotation.key,
                escape_str(&annotation.value)
            )?;
        }
        writeln!(f, "{} (", self.effect)?;
        write!(f, "    ")?;
        self.scope.principal.fmt_for("principal", f)?;
        writeln!(f, ",")?;
        writeln!(f, "    {},", self.scope.action)?;
        write!(f, "    ")?;
        self.scope.resource.fmt_for("resource", f)?;
        write!(f, "\n)")?;
        for condition in &self.conditions {
            write!(f, " {} {{\n    {}\n}}", condition.kind, condition.body)?;
        }
        write!(f, ";")
    }
}
