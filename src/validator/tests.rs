use super::*;
use crate::diagnostics::Severity;
use yare::parameterized;

const PHOTOS: &str = r#"
    entity Group;
    entity User in [Group] { name: String, age?: Long, manager?: User };
    entity Album;
    entity Photo in [Album] { owner: User, tags: Set<String>, private: Bool };
    action view appliesTo {
        principal: [User],
        resource: [Photo, Album],
        context: { ip: String, mfa?: Bool }
    };
    action edit in [view] appliesTo { principal: User, resource: Photo };
    action admin;
"#;

fn validate_with(mode: ValidationMode, text: &str) -> ValidationResult {
    let schema: Schema = PHOTOS.parse().unwrap();
    let policies: PolicySet = text.parse().unwrap();
    Validator::new(schema).with_mode(mode).validate(&policies)
}

fn validate(text: &str) -> ValidationResult {
    validate_with(ValidationMode::Permissive, text)
}

fn codes_of(result: &ValidationResult) -> Vec<(Severity, &str)> {
    result
        .diagnostics()
        .iter()
        .map(|d| (d.severity, d.code.as_deref().unwrap_or_default()))
        .collect()
}

/// A policy over `edit`, where principal is a `User` and resource a `Photo`.
fn edit_policy(condition: &str) -> String {
    format!("permit(principal, action == Action::\"edit\", resource) when {{ {condition} }};")
}

#[test]
fn test_valid_policies() {
    let result = validate(
        r#"
        permit(principal in Group::"staff", action == Action::"view", resource is Photo)
        when { resource.owner == principal && context.ip like "10.*" && resource.tags.contains("public") };

        forbid(principal, action in Action::"view", resource is Photo in Album::"private")
        unless { principal has manager && principal.manager == resource.owner };

        permit(principal, action == Action::"view", resource) when { context has mfa && context.mfa };
        "#,
    );
    assert!(result.is_ok(), "{:?}", result.diagnostics());
    assert!(result.diagnostics().is_empty());
}

#[parameterized(
    scope_type = { r#"permit(principal, action, resource == Resource::"x");"#, codes::UNDECLARED_ENTITY_TYPE },
    is_type = { "permit(principal is Admin, action, resource);", codes::UNDECLARED_ENTITY_TYPE },
    literal_type = { r#"permit(principal, action, resource) when { principal in Team::"a" };"#, codes::UNDECLARED_ENTITY_TYPE },
    expr_is_type = { "permit(principal, action, resource) when { resource is Video };", codes::UNDECLARED_ENTITY_TYPE },
    scope_action = { r#"permit(principal, action == Action::"delete", resource);"#, codes::UNDECLARED_ACTION },
    action_list = { r#"permit(principal, action in [Action::"view", Action::"delete"], resource);"#, codes::UNDECLARED_ACTION },
    literal_action = { r#"permit(principal, action, resource) when { action == Action::"delete" };"#, codes::UNDECLARED_ACTION },
)]
fn test_undeclared_references(text: &str, code: &str) {
    let result = validate(text);
    assert!(!result.is_ok());
    assert_eq!(codes_of(&result), vec![(Severity::Error, code)]);
}

#[test]
fn test_undeclared_attribute() {
    let result = validate(&edit_policy("principal.email == \"a\""));
    assert_eq!(
        codes_of(&result),
        vec![(Severity::Error, codes::UNDECLARED_ATTRIBUTE)]
    );
    assert!(result.diagnostics()[0]
        .message()
        .contains("attribute `email` is not declared for entity `User`"));

    let result = validate(&edit_policy("context.ip == \"a\""));
    assert_eq!(
        codes_of(&result),
        vec![(Severity::Error, codes::UNDECLARED_ATTRIBUTE)]
    );
}

#[parameterized(
    less_than = { "principal.name < 3", "expected long, found string" },
    and = { "principal.name && true", "expected bool, found string" },
    like = { r#"resource.private like "*""#, "expected string, found bool" },
    contains = { r#"principal.name.contains("a")"#, "expected set, found string" },
    has = { "1 has name", "expected entity or record, found long" },
    in_left = { r#"1 in Group::"a""#, "expected entity, found long" },
    in_right = { r#"principal in "a""#, "expected entity or set of entities, found string" },
    in_set = { "principal in [1, 2]", "expected entity or set of entities, found set<long>" },
    not_bool_condition = { "principal.name", "expected bool, found string" },
    negate = { "-principal.name == 1", "expected long, found string" },
    attr_of_long = { "resource.private.x", "expected entity or record, found bool" },
)]
fn test_type_mismatches(condition: &str, expected: &str) {
    let result = validate(&edit_policy(condition));
    let errors: Vec<_> = result.errors().collect();
    assert!(
        errors
            .iter()
            .any(|d| d.code.as_deref() == Some(codes::TYPE_MISMATCH) && d.message().contains(expected)),
        "{expected} not in {errors:?}"
    );
}

#[parameterized(
    unguarded = { "principal.age > 18", true },
    guarded_and = { "principal has age && principal.age > 18", false },
    guarded_if = { "if principal has age then principal.age > 18 else false", false },
    guarded_nested = { "principal has manager && (principal.manager has age && principal.manager.age > 1)", false },
    unguarded_or = { "principal has age || principal.age > 18", true },
    wrong_target = { "resource.owner has age && principal.age > 18", true },
)]
fn test_optional_attribute_guards(condition: &str, flagged: bool) {
    let result = validate(&edit_policy(condition));
    let unsafe_access = result
        .diagnostics()
        .iter()
        .any(|d| d.code.as_deref() == Some(codes::UNSAFE_OPTIONAL_ATTRIBUTE));
    assert_eq!(unsafe_access, flagged, "{:?}", result.diagnostics());
}

#[parameterized(
    optional = { "principal.age > 18", codes::UNSAFE_OPTIONAL_ATTRIBUTE },
    incompatible_eq = { "principal.name == 1", codes::TYPE_MISMATCH },
)]
fn test_mode_sets_severity(condition: &str, code: &str) {
    let text = edit_policy(condition);

    let permissive = validate_with(ValidationMode::Permissive, &text);
    assert!(permissive.is_ok());
    assert_eq!(codes_of(&permissive), vec![(Severity::Warning, code)]);

    let strict = validate_with(ValidationMode::Strict, &text);
    assert!(!strict.is_ok());
    assert_eq!(codes_of(&strict), vec![(Severity::Error, code)]);
}

#[parameterized(
    wrong_principal = { r#"permit(principal is Group, action == Action::"view", resource);"# },
    no_applies_to = { r#"permit(principal, action == Action::"admin", resource);"# },
    unreachable_parent = { r#"permit(principal in Album::"a", action, resource);"# },
    wrong_resource_for_action = { r#"permit(principal, action == Action::"edit", resource is Album);"# },
)]
fn test_impossible_policy(text: &str) {
    let result = validate(text);
    assert!(result.is_ok());
    assert_eq!(
        codes_of(&result),
        vec![(Severity::Warning, codes::IMPOSSIBLE_POLICY)]
    );
}

#[test]
fn test_diagnostics_are_reported_once_across_environments() {
    // `view` applies to two resource types, so the condition is checked twice.
    let result = validate(r#"permit(principal, action == Action::"view", resource) when { 1 < "a" };"#);
    assert_eq!(codes_of(&result), vec![(Severity::Error, codes::TYPE_MISMATCH)]);
}

#[test]
fn test_diagnostics_name_their_policy() {
    let result = validate(
        r#"
        permit(principal, action, resource);
        @id("bad")
        permit(principal, action == Action::"delete", resource);
        "#,
    );
    let diagnostic = &result.diagnostics()[0];
    assert!(
        diagnostic
            .labels
            .iter()
            .any(|label| label.text == "in policy `bad`")
    );
}

#[test]
fn test_validation_does_not_change_the_set() {
    let schema: Schema = PHOTOS.parse().unwrap();
    let policies: PolicySet = edit_policy("principal.age > 1").parse().unwrap();
    let before = policies.clone();
    let validator = Validator::new(schema);
    assert_eq!(validator.validate(&policies), validator.validate(&policies));
    assert_eq!(policies, before);
}
