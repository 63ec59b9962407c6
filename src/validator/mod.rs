//! Static checks of policies against a schema.

mod typecheck;

use std::sync::Arc;

use serde::Serialize;
use strum_macros::{AsRefStr, Display as StrumDisplay, EnumString};
use tracing::debug;
use utoipa::ToSchema;

use crate::ast::{
    ActionConstraint, EntityConstraint, EntityUid, Expr, ExprKind, Name, Policy, PolicySet,
};
use crate::diagnostics::{Diagnostic, Severity, Span, codes};
use crate::schema::{ActionDef, Schema};
use typecheck::{RequestEnv, TypeChecker};

/// How strictly findings that may be intentional are reported.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    ToSchema,
    StrumDisplay,
    EnumString,
    AsRefStr,
)]
#[strum(serialize_all = "lowercase")]
pub enum ValidationMode {
    /// Unguarded optional attributes and comparisons between unrelated
    /// types are warnings.
    #[default]
    Permissive,
    /// The same findings are errors.
    Strict,
}

/// The diagnostics of one validation pass, in policy order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct ValidationResult {
    diagnostics: Vec<Diagnostic>,
}

impl ValidationResult {
    /// No error diagnostics. Warnings and advice may still be present.
    pub fn is_ok(&self) -> bool {
        !self.diagnostics.iter().any(Diagnostic::is_error)
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(|d| d.is_error())
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Warning)
    }

    pub fn into_diagnostics(self) -> Vec<Diagnostic> {
        self.diagnostics
    }
}

/// Checks policies against a schema. Never modifies the policies.
#[derive(Debug, Clone)]
pub struct Validator {
    schema: Arc<Schema>,
    mode: ValidationMode,
}

impl Validator {
    pub fn new(schema: impl Into<Arc<Schema>>) -> Self {
        Self {
            schema: schema.into(),
            mode: ValidationMode::default(),
        }
    }

    pub fn with_mode(mut self, mode: ValidationMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn mode(&self) -> ValidationMode {
        self.mode
    }

    pub fn validate(&self, policies: &PolicySet) -> ValidationResult {
        let mut diagnostics = Vec::new();
        for policy in policies.policies() {
            diagnostics.extend(self.validate_policy(policy));
        }
        let result = ValidationResult { diagnostics };
        debug!(
            event = "Validate",
            phase = "Result",
            policies = policies.num_of_policies(),
            errors = result.errors().count(),
            warnings = result.warnings().count(),
            mode = self.mode.as_ref()
        );
        result
    }

    fn validate_policy(&self, policy: &Policy) -> Vec<Diagnostic> {
        let mut found = self.check_references(policy);
        // Type information is only meaningful when every name resolves.
        if found.iter().any(Diagnostic::is_error) {
            return label(policy, found);
        }

        let envs = self.request_envs(policy);
        if envs.is_empty() {
            found.push(
                Diagnostic::warning(
                    "policy is impossible: no request valid for the schema matches its scope",
                    policy.span(),
                )
                .with_code(codes::IMPOSSIBLE_POLICY),
            );
            return label(policy, found);
        }

        for env in &envs {
            let mut checker = TypeChecker::new(&self.schema, env, self.mode);
            for condition in policy.conditions() {
                checker.check_condition(&condition.body);
            }
            for diagnostic in checker.into_diagnostics() {
                if !found.contains(&diagnostic) {
                    found.push(diagnostic);
                }
            }
        }
        label(policy, found)
    }

    /// Undeclared entity types and actions, in scope and conditions.
    fn check_references(&self, policy: &Policy) -> Vec<Diagnostic> {
        let mut found = Vec::new();
        let scope = policy.scope();

        for (constraint, span) in [
            (&scope.principal, scope.principal_span),
            (&scope.resource, scope.resource_span),
        ] {
            if let Some(ty) = constraint.referenced_type() {
                self.check_type(ty, span, &mut found);
            }
            if let Some(uid) = constraint.referenced_uid() {
                self.check_uid(uid, span, &mut found);
            }
        }
        for uid in scope.action.referenced_uids() {
            self.check_action(uid, scope.action_span, &mut found);
        }

        for condition in policy.conditions() {
            condition.body.visit(&mut |expr: &Expr| match &expr.kind {
                ExprKind::Lit(crate::ast::Literal::Entity(uid)) => {
                    self.check_uid(uid, expr.span, &mut found)
                }
                ExprKind::Is(_, ty, _) => self.check_type(ty, expr.span, &mut found),
                _ => {}
            });
        }
        found
    }

    fn check_type(&self, ty: &Name, span: Span, found: &mut Vec<Diagnostic>) {
        if !self.schema.is_known_type(ty) {
            found.push(
                Diagnostic::error(format!("entity type `{ty}` is not declared in the schema"), span)
                    .with_code(codes::UNDECLARED_ENTITY_TYPE),
            );
        }
    }

    fn check_uid(&self, uid: &EntityUid, span: Span, found: &mut Vec<Diagnostic>) {
        if uid.entity_type().is_action_type() {
            self.check_action(uid, span, found);
        } else {
            self.check_type(uid.entity_type(), span, found);
        }
    }

    fn check_action(&self, uid: &EntityUid, span: Span, found: &mut Vec<Diagnostic>) {
        if self.schema.action(uid).is_none() {
            found.push(
                Diagnostic::error(format!("action `{uid}` is not declared in the schema"), span)
                    .with_code(codes::UNDECLARED_ACTION),
            );
        }
    }

    /// Every (principal type, action, resource type) the scope admits.
    fn request_envs(&self, policy: &Policy) -> Vec<RequestEnv<'_>> {
        let scope = policy.scope();
        let mut envs = Vec::new();
        for action in self.schema.actions() {
            if !self.action_matches(&scope.action, action) {
                continue;
            }
            let Some(context) = action.context() else {
                continue;
            };
            for principal in action.principal_types() {
                if !self.type_matches(&scope.principal, principal) {
                    continue;
                }
                for resource in action.resource_types() {
                    if self.type_matches(&scope.resource, resource) {
                        envs.push(RequestEnv {
                            principal,
                            action: &action.uid,
                            resource,
                            context,
                        });
                    }
                }
            }
        }
        envs
    }

    fn action_matches(&self, constraint: &ActionConstraint, action: &ActionDef) -> bool {
        match constraint {
            ActionConstraint::Any => true,
            ActionConstraint::Eq(uid) => action.uid == *uid,
            ActionConstraint::In(ancestors) => ancestors
                .iter()
                .any(|ancestor| self.schema.is_action_in(&action.uid, ancestor)),
        }
    }

    /// Whether an entity of type `ty` can satisfy the constraint.
    fn type_matches(&self, constraint: &EntityConstraint, ty: &Name) -> bool {
        match constraint {
            EntityConstraint::Any => true,
            EntityConstraint::Eq(uid) => uid.entity_type() == ty,
            EntityConstraint::In(uid) => self.schema.may_descend(ty, uid.entity_type()),
            EntityConstraint::Is(is_ty) => is_ty == ty,
            EntityConstraint::IsIn(is_ty, uid) => {
                is_ty == ty && self.schema.may_descend(ty, uid.entity_type())
            }
        }
    }
}

/// Attach the policy id to every diagnostic of that policy.
fn label(policy: &Policy, diagnostics: Vec<Diagnostic>) -> Vec<Diagnostic> {
    diagnostics
        .into_iter()
        .map(|d| d.with_label(format!("in policy `{}`", policy.id()), policy.span()))
        .collect()
}

#[cfg(test)]
mod tests;
