use super::*;

const TEST_SCHEMA: &str = r#"
entity Group;
entity User in [Group] { department: String };
entity Photo { owner: User, sensitivity: Long };

action view appliesTo {
    principal: [User],
    resource: [Photo],
    context: { mfa: Bool }
};
action edit in [view] appliesTo {
    principal: User,
    resource: Photo,
    context: { mfa: Bool }
};
"#;

const TEST_SCHEMA_POLICY: &str = r#"
permit (
    principal in Group::"staff",
    action in Action::"view",
    resource
) when {
    resource.sensitivity < 3 && context.mfa
};

permit (
    principal,
    action == Action::"edit",
    resource
) when {
    resource.owner == principal
};
"#;

const TEST_ENTITIES: &str = r#"[
    {"uid": {"type": "User", "id": "alice"}, "attrs": {"department": "sales"}, "parents": [{"type": "Group", "id": "staff"}]},
    {"uid": {"type": "User", "id": "bob"}, "attrs": {"department": "it"}},
    {"uid": {"type": "Group", "id": "staff"}},
    {"uid": {"type": "Photo", "id": "doc1"}, "attrs": {"owner": {"type": "User", "id": "bob"}, "sensitivity": 1}}
]"#;

fn schema_engine() -> PolicyEngine {
    PolicyEngine::new_from_str_with_schema_text(TEST_SCHEMA_POLICY, TEST_SCHEMA).unwrap()
}

fn mfa_request(user: &str, action: &str, photo: &str) -> Request {
    Request::new(
        uid("User", user),
        uid("Action", action),
        uid("Photo", photo),
        BTreeMap::from([("mfa".to_string(), Value::Bool(true))]),
    )
}

#[test]
fn test_schema_rejects_undeclared_entity_type_at_load() {
    let result = PolicyEngine::new_from_str_with_schema_text(
        r#"permit (principal, action, resource == Resource::"x");"#,
        "entity Photo;",
    );
    let Err(PolicyError::ValidationError(message)) = result else {
        panic!("policy on an undeclared type was accepted");
    };
    assert!(message.contains("`Resource`"), "{message}");
}

#[test]
fn test_schema_rejects_invalid_policy_at_load() {
    let invalid_policy = r#"
        permit (
            principal == User::"alice",
            action == Action::"write",
            resource is Photo
        );
    "#;

    let result = PolicyEngine::new_from_str_with_schema_text(invalid_policy, TEST_SCHEMA);
    assert!(matches!(result, Err(PolicyError::ValidationError(_))));
}

#[test]
fn test_schema_object_constructor_works() {
    let schema: Schema = TEST_SCHEMA.parse().unwrap();
    let engine = PolicyEngine::new_from_str_with_schema(TEST_SCHEMA_POLICY, schema)
        .expect("schema + policy should load");
    assert!(engine.schema().unwrap().is_some());

    let entities = engine.entities_from_json(TEST_ENTITIES).unwrap();
    let response = engine
        .evaluate(&mfa_request("alice", "view", "doc1"), &entities)
        .unwrap();
    assert_allow(&response);
}

#[test]
fn test_action_hierarchy_from_schema() {
    let engine = schema_engine();
    let entities = engine.entities_from_json(TEST_ENTITIES).unwrap();

    // `edit` is in `view`, so staff may edit too.
    let response = engine
        .evaluate(&mfa_request("alice", "edit", "doc1"), &entities)
        .unwrap();
    assert_eq!(reasons(&response), vec!["policy0"]);

    let response = engine
        .evaluate(&mfa_request("bob", "edit", "doc1"), &entities)
        .unwrap();
    assert_eq!(reasons(&response), vec!["policy1"]);
}

#[test]
fn test_schema_text_constructor_rejects_invalid_schema() {
    let result =
        PolicyEngine::new_from_str_with_schema_text(TEST_SCHEMA_POLICY, "this is not a valid schema");
    assert!(matches!(result, Err(PolicyError::SchemaError(_))));
}

#[test]
fn test_schema_validates_request_principal_type() {
    let engine = schema_engine();
    let request = Request::new(
        uid("Group", "staff"),
        uid("Action", "view"),
        uid("Photo", "doc1"),
        BTreeMap::from([("mfa".to_string(), Value::Bool(true))]),
    );
    let result = engine.evaluate(&request, &Entities::empty());
    assert!(matches!(
        result,
        Err(PolicyError::RequestValidationError(_))
    ));
}

#[test]
fn test_schema_validates_request_context() {
    let engine = schema_engine();
    let result = engine.evaluate(
        &user_request("alice", "view", "doc1"),
        &Entities::empty(),
    );
    assert!(matches!(
        result,
        Err(PolicyError::RequestValidationError(_))
    ));
}

#[test]
fn test_schema_validates_entity_attribute_types() {
    let engine = schema_engine();
    let result = engine.entities_from_json(
        r#"[{"uid": {"type": "Photo", "id": "doc1"}, "attrs": {"owner": {"type": "User", "id": "bob"}, "sensitivity": "high"}}]"#,
    );
    assert!(matches!(result, Err(PolicyError::EntityError(_))));
}

#[test]
fn test_schema_rejects_unknown_action_in_request() {
    let engine = schema_engine();
    let result = engine.evaluate(&mfa_request("alice", "delete", "doc1"), &Entities::empty());
    assert!(matches!(
        result,
        Err(PolicyError::RequestValidationError(_))
    ));
}

#[test]
fn test_reload_preserves_schema_validation() {
    let engine = schema_engine();
    let result = engine.reload_from_str(r#"permit (principal, action == Action::"delete", resource);"#);
    assert!(matches!(result, Err(PolicyError::ValidationError(_))));
    assert_eq!(engine.policies().unwrap().num_of_policies(), 2);

    engine
        .reload_from_str(r#"permit (principal, action == Action::"view", resource);"#)
        .unwrap();
    assert_eq!(engine.policies().unwrap().num_of_policies(), 1);
}
