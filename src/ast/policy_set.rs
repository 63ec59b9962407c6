//! Ordered collections of policies.

use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

use itertools::Itertools;

use super::{Effect, Policy, PolicyId};
use crate::error::ParseErrors;
use crate::parser;

/// An immutable, ordered set of policies with unique ids.
///
/// Built once by parsing and then shared read-only, typically behind an
/// `Arc`, across any number of evaluations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicySet {
    policies: Vec<Policy>,
    source: String,
}

impl PolicySet {
    /// An empty set; every request against it is denied.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_parts(policies: Vec<Policy>, source: String) -> Self {
        Self { policies, source }
    }

    /// Policies in source order.
    pub fn policies(&self) -> impl Iterator<Item = &Policy> {
        self.policies.iter()
    }

    pub fn policy(&self, id: &PolicyId) -> Option<&Policy> {
        self.policies.iter().find(|p| p.id() == id)
    }

    pub fn num_of_policies(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    /// The text the set was parsed from. Diagnostic spans point into it.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Split into `(forbid, permit)` policies, keeping relative order.
    pub fn partition_by_effect(&self) -> (Vec<&Policy>, Vec<&Policy>) {
        self.policies
            .iter()
            .partition(|p| p.effect() == Effect::Forbid)
    }
}

impl FromStr for PolicySet {
    type Err = ParseErrors;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match parser::parse_policies(s) {
            (Some(set), _) => Ok(set),
            (None, diagnostics) => Err(ParseErrors(diagnostics)),
        }
    }
}

impl Display for PolicySet {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.policies.iter().join("\n\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const POLICIES: &str = r#"
        permit (principal, action, resource);
        forbid (principal == User::"mallory", action, resource);
        permit (principal, action == Action::"view", resource);
    "#;

    #[test]
    fn test_compile_policy_set() {
        let set: PolicySet = POLICIES.parse().unwrap();
        assert_eq!(set.num_of_policies(), 3);
        assert_eq!(set.source(), POLICIES);
        assert!(set.policy(&PolicyId::new("policy1")).is_some());
        assert!(set.policy(&PolicyId::new("policy3")).is_none());
    }

    #[test]
    fn test_partition_keeps_order() {
        let set: PolicySet = POLICIES.parse().unwrap();
        let (forbids, permits) = set.partition_by_effect();
        let forbid_ids: Vec<&str> = forbids.iter().map(|p| p.id().as_str()).collect();
        let permit_ids: Vec<&str> = permits.iter().map(|p| p.id().as_str()).collect();
        assert_eq!(forbid_ids, vec!["policy1"]);
        assert_eq!(permit_ids, vec!["policy0", "policy2"]);
    }

    #[test]
    fn test_display_reparses_to_same_scopes() {
        let set: PolicySet = r#"
            @id("owner-edit")
            permit (
                principal is User in Group::"editors",
                action in [Action::"edit", Action::"view"],
                resource
            ) when { resource.owner == principal && context.level >= 2 }
              unless { resource has locked };
        "#
        .parse()
        .unwrap();

        let rendered = set.to_string();
        let reparsed: PolicySet = rendered.parse().unwrap();
        let original = set.policies().next().unwrap();
        let again = reparsed.policies().next().unwrap();
        assert_eq!(again.id().as_str(), "owner-edit");
        assert_eq!(again.scope().principal, original.scope().principal);
        assert_eq!(again.scope().action, original.scope().action);
        assert_eq!(again.conditions().len(), 2);
        assert_eq!(
            again.conditions()[0].body.to_string(),
            original.conditions()[0].body.to_string()
        );
    }

    #[test]
    fn test_empty_set() {
        let set: PolicySet = "// nothing here\n".parse().unwrap();
        assert!(set.is_empty());
        assert_eq!(PolicySet::new(), PolicySet::default());
    }
}
