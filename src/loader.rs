use std::sync::Arc;

use tracing::{debug, warn};

use crate::ast::PolicySet;
use crate::diagnostics;
use crate::error::PolicyError;
use crate::schema::{Schema, parse_schema};
use crate::validator::Validator;

/// Compile policy text into a `PolicySet`, validating it against `schema`
/// when one is given.
///
/// Syntax errors map to `PolicyError::ParseError`, validation errors to
/// `PolicyError::ValidationError`. Validation warnings are logged.
///
/// Example:
/// ```rust
/// use parc_core::compile_policy;
/// let policy_text = r#"
///     permit (principal, action, resource);
///     forbid  (principal == User::"evil", action, resource);
/// "#;
/// let set = compile_policy(policy_text, None).unwrap();
/// assert_eq!(set.num_of_policies(), 2);
/// ```
pub fn compile_policy(text: &str, schema: Option<&Arc<Schema>>) -> Result<PolicySet, PolicyError> {
    let set: PolicySet = text.parse()?;
    if let Some(schema) = schema {
        let result = Validator::new(Arc::clone(schema)).validate(&set);
        for warning in result.warnings() {
            warn!(event = "Load", phase = "Validation", warning = warning.to_string());
        }
        if !result.is_ok() {
            let errors: Vec<_> = result.errors().cloned().collect();
            return Err(PolicyError::ValidationError(diagnostics::render(&errors)));
        }
    }
    debug!(
        event = "Load",
        phase = "Policies",
        policies = set.num_of_policies(),
        schema = schema.is_some()
    );
    Ok(set)
}

/// Compile schema text, in either schema format.
pub fn compile_schema(text: &str) -> Result<Schema, PolicyError> {
    match parse_schema(text) {
        (Some(schema), _) => Ok(schema),
        (None, diagnostics) => Err(PolicyError::SchemaError(diagnostics::render(&diagnostics))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_policy() {
        let policy_text = r#"
            permit (principal == User::"alice", action == Action::"read", resource == Document::"doc1");
            permit (principal == User::"bob", action == Action::"write", resource == Document::"doc2");
        "#;
        let policy_set = compile_policy(policy_text, None).unwrap();
        assert_eq!(policy_set.num_of_policies(), 2);
    }

    #[test]
    fn test_compile_policy_reports_every_syntax_error() {
        let err = compile_policy("permit(principal action, resource); forbid(;", None).unwrap_err();
        let PolicyError::ParseError(message) = err else {
            panic!("unexpected {err:?}");
        };
        assert_eq!(message.lines().count(), 2, "{message}");
    }

    #[test]
    fn test_compile_policy_with_schema() {
        let schema = Arc::new(compile_schema("entity User; action read appliesTo { principal: User, resource: User };").unwrap());
        assert!(compile_policy(r#"permit(principal == User::"a", action, resource);"#, Some(&schema)).is_ok());
        // Warnings alone do not reject the set.
        assert!(compile_policy(r#"permit(principal, action == Action::"read", resource) when { 1 == "a" };"#, Some(&schema)).is_ok());
        assert!(matches!(
            compile_policy(r#"permit(principal == Doc::"a", action, resource);"#, Some(&schema)),
            Err(PolicyError::ValidationError(_))
        ));
    }

    #[test]
    fn test_compile_schema_errors() {
        assert!(matches!(
            compile_schema("this is not a schema"),
            Err(PolicyError::SchemaError(_))
        ));
    }
}
