//! Policy text parsing.
//!
//! Parsing never stops at the first mistake: after a syntax error the parser
//! skips to the end of the broken policy and carries on, so one pass reports
//! every independent error together with its byte span.

mod cursor;
mod lexer;
mod policy;

use std::collections::HashMap;
use std::str::FromStr;

use tracing::debug;

pub(crate) use cursor::{Failed, PResult, Parser};
pub(crate) use lexer::TokenKind;

use crate::ast::{ActionConstraint, ConditionKind, EntityUid, Expr, Policy, PolicySet};
use crate::diagnostics::{self, Diagnostic, codes};
use crate::error::ParseErrors;

/// Parse a policy set, returning every diagnostic found.
///
/// The set is `None` when any diagnostic is an error. Warnings and advice
/// (e.g. a `when { false }` clause) accompany a successful parse.
pub fn parse_policies(text: &str) -> (Option<PolicySet>, Vec<Diagnostic>) {
    let mut parser = Parser::new(text);
    let policies = parser.policies();
    let mut diagnostics = parser.diagnostics;

    check_policy_ids(&policies, &mut diagnostics);
    for policy in &policies {
        lint_policy(policy, &mut diagnostics);
    }
    diagnostics.sort_by_key(|d| d.span().map(|s| s.offset));

    debug!(
        event = "Parse",
        phase = "Policies",
        policies = policies.len(),
        diagnostics = diagnostics.len()
    );

    if diagnostics::has_errors(&diagnostics) {
        return (None, diagnostics);
    }
    (
        Some(PolicySet::from_parts(policies, text.to_string())),
        diagnostics,
    )
}

/// Parse a single condition expression, e.g. `principal.age >= 18`.
pub fn parse_expression(text: &str) -> Result<Expr, ParseErrors> {
    let mut parser = Parser::new(text);
    let result = parser.expr();
    if result.is_ok() && !parser.at_eof() {
        parser.unexpected("end of input");
    }
    match result {
        Ok(expr) if !diagnostics::has_errors(&parser.diagnostics) => Ok(expr),
        _ => Err(ParseErrors(parser.diagnostics)),
    }
}

/// Parse the policy-text form of an entity uid, e.g. `Photos::Album::"trip"`.
pub(crate) fn parse_entity_uid(text: &str) -> Result<EntityUid, Vec<Diagnostic>> {
    let mut parser = Parser::new(text);
    let result = parser.entity_ref();
    if result.is_ok() && !parser.at_eof() {
        parser.unexpected("end of input");
    }
    match result {
        Ok((uid, _)) if !diagnostics::has_errors(&parser.diagnostics) => Ok(uid),
        _ => Err(parser.diagnostics),
    }
}

impl FromStr for Expr {
    type Err = ParseErrors;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_expression(s)
    }
}

fn check_policy_ids(policies: &[Policy], diagnostics: &mut Vec<Diagnostic>) {
    let mut seen: HashMap<&str, usize> = HashMap::new();
    for (index, policy) in policies.iter().enumerate() {
        let id = policy.id().as_str();
        if seen.contains_key(id) {
            let span = policy
                .annotations()
                .iter()
                .find(|a| a.key == "id")
                .map(|a| a.span)
                .unwrap_or(policy.span());
            diagnostics.push(
                Diagnostic::error(format!("duplicate policy id `{id}`"), span)
                    .with_code(codes::DUPLICATE_POLICY_ID),
            );
        } else {
            seen.insert(id, index);
        }
    }
}

/// Style diagnostics: conditions that are constant, and empty action lists.
fn lint_policy(policy: &Policy, diagnostics: &mut Vec<Diagnostic>) {
    if let ActionConstraint::In(uids) = policy.action_constraint() {
        if uids.is_empty() {
            diagnostics.push(
                Diagnostic::warning(
                    format!(
                        "policy `{}` can never apply: `action in []` matches no action",
                        policy.id()
                    ),
                    policy.scope().action_span,
                )
                .with_code(codes::NEVER_APPLIES),
            );
        }
    }

    for condition in policy.conditions() {
        let Some(value) = condition.body.as_bool_literal() else {
            continue;
        };
        let always_holds = match condition.kind {
            ConditionKind::When => value,
            ConditionKind::Unless => !value,
        };
        let diagnostic = if always_holds {
            Diagnostic::advice(
                format!("this `{}` clause is always satisfied", condition.kind),
                condition.span,
            )
            .with_code(codes::REDUNDANT_CONDITION)
            .with_help("remove the clause")
        } else {
            Diagnostic::warning(
                format!(
                    "policy `{}` can never apply: this `{}` clause is never satisfied",
                    policy.id(),
                    condition.kind
                ),
                condition.span,
            )
            .with_code(codes::NEVER_APPLIES)
        };
        diagnostics.push(diagnostic);
    }
}
