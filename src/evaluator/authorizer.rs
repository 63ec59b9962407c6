use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display as StrumDisplay, EnumString};
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use super::{EvaluationError, Evaluator, Request, RequestValidationError};
use crate::ast::{Policy, PolicyId, PolicySet};
use crate::diagnostics::{Diagnostic, codes};
use crate::entities::Entities;
use crate::schema::Schema;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    ToSchema,
    StrumDisplay,
    EnumString,
    AsRefStr,
)]
pub enum Decision {
    Allow,
    Deny,
}

/// The outcome of one authorization call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    decision: Decision,
    reasons: Vec<PolicyId>,
    errors: Vec<Diagnostic>,
}

impl Response {
    pub fn decision(&self) -> Decision {
        self.decision
    }

    /// Ids of the permit policies that allowed the request, in policy order.
    /// Empty on deny.
    pub fn reasons(&self) -> &[PolicyId] {
        &self.reasons
    }

    /// One diagnostic per policy whose evaluation failed.
    pub fn errors(&self) -> &[Diagnostic] {
        &self.errors
    }
}

/// Combines policy results: any matching forbid denies, otherwise any
/// matching permit allows, otherwise deny. A policy that fails to evaluate
/// is treated as not matching and reported in the response.
#[derive(Debug, Clone, Copy, Default)]
pub struct Authorizer;

impl Authorizer {
    pub fn new() -> Self {
        Self
    }

    pub fn is_authorized(
        &self,
        request: &Request,
        policies: &PolicySet,
        entities: &Entities,
        schema: Option<&Schema>,
    ) -> Result<Response, RequestValidationError> {
        debug!(
            event = "Request",
            phase = "Evaluation",
            principal = request.principal().to_string(),
            action = request.action().to_string(),
            resource = request.resource().to_string(),
            policies = policies.num_of_policies()
        );

        if let Some(schema) = schema {
            if let Err(e) = request.validate(schema) {
                warn!(event = "Request", phase = "Validation", error = e.to_string());
                return Err(e);
            }
        }

        let evaluator = Evaluator::new(request, entities);
        let (forbids, permits) = policies.partition_by_effect();
        let mut errors = Vec::new();

        // Every forbid is probed so that all of their errors are reported.
        let mut forbidden = Vec::new();
        for policy in forbids {
            if probe(&evaluator, policy, &mut errors) {
                forbidden.push(policy.id());
            }
        }

        let response = if !forbidden.is_empty() {
            debug!(
                event = "Request",
                phase = "Forbid",
                policies = forbidden.iter().map(|id| id.as_str()).collect::<Vec<_>>().join(",")
            );
            Response {
                decision: Decision::Deny,
                reasons: Vec::new(),
                errors,
            }
        } else {
            let reasons: Vec<PolicyId> = permits
                .into_iter()
                .filter(|policy| probe(&evaluator, policy, &mut errors))
                .map(|policy| policy.id().clone())
                .collect();
            let decision = if reasons.is_empty() {
                Decision::Deny
            } else {
                Decision::Allow
            };
            Response {
                decision,
                reasons,
                errors,
            }
        };

        for reason in &response.reasons {
            info!(event = "Request", phase = "Policy", reason = reason.as_str());
        }
        debug!(event = "Request", phase = "Result", result = ?response.decision);
        Ok(response)
    }
}

/// Whether the policy matches. Errors are recorded and count as no match.
fn probe(evaluator: &Evaluator<'_>, policy: &Policy, errors: &mut Vec<Diagnostic>) -> bool {
    match evaluator.matches_policy(policy) {
        Ok(matched) => matched,
        Err(err) => {
            warn!(
                event = "Request",
                phase = "Policy",
                policy = policy.id().as_str(),
                error = err.to_string()
            );
            errors.push(evaluation_diagnostic(policy, &err));
            false
        }
    }
}

fn evaluation_diagnostic(policy: &Policy, err: &EvaluationError) -> Diagnostic {
    Diagnostic::error(
        format!("while evaluating policy `{}`: {err}", policy.id()),
        err.span(),
    )
    .with_code(codes::EVALUATION)
    .with_label(format!("in policy `{}`", policy.id()), policy.span())
}
