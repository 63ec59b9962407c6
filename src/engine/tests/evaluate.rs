use super::*;
use yare::parameterized;

#[parameterized(
    alice_edit_allow = { "alice", "edit", "VacationPhoto94.jpg", Decision::Allow },
    alice_view_allow = { "alice", "view", "VacationPhoto94.jpg", Decision::Allow },
    alice_delete_allow = { "alice", "delete", "VacationPhoto94.jpg", Decision::Allow },
    alice_view_deny_wrong_photo = { "alice", "view", "wrongphoto.jpg", Decision::Deny },
    bob_view_allow = { "bob", "view", "VacationPhoto94.jpg", Decision::Allow },
    bob_edit_deny = { "bob", "edit", "VacationPhoto94.jpg", Decision::Deny },
    bob_view_deny_wrong_photo = { "bob", "edit", "wrongphoto.jpg", Decision::Deny },
    charlie_view_deny = { "charlie", "view", "VacationPhoto94.jpg", Decision::Deny },
)]
fn test_evaluate_requests(user: &str, action: &str, photo: &str, expected: Decision) {
    let engine = engine_from_policy(TEST_POLICY);
    let response = engine
        .evaluate(&user_request(user, action, photo), &Entities::empty())
        .unwrap();
    assert_eq!(response.decision(), expected);
    assert!(response.errors().is_empty());
}

#[parameterized(
    alice = { "alice", "VacationPhoto94.jpg", Some("policy0") },
    bob = { "bob", "VacationPhoto95.jpg", Some("policy1") },
    chester = { "chester", "VacationPhoto96.jpg", Some("policy2") },
    dennis = { "dennis", "VacationPhoto97.jpg", Some("policy3") },
    eric = { "eric", "VacationPhoto98.jpg", Some("policy4") },
    alice_other_photo = { "alice", "VacationPhoto98.jpg", None },
    frank = { "frank", "VacationPhoto94.jpg", None },
)]
fn test_vacation_photos(user: &str, photo: &str, reason: Option<&str>) {
    let engine = engine_from_policy(&VACATION_POLICIES.join("\n"));
    let response = engine
        .evaluate(&user_request(user, "update", photo), &Entities::empty())
        .unwrap();
    match reason {
        Some(reason) => {
            assert_allow(&response);
            assert_eq!(reasons(&response), vec![reason]);
        }
        None => {
            assert_deny(&response);
            assert!(response.reasons().is_empty());
        }
    }
}

#[test]
fn test_vacation_photo_answer() {
    let engine = engine_from_policy(&VACATION_POLICIES.join("\n"));
    let response = engine
        .evaluate(
            &user_request("eric", "update", "VacationPhoto98.jpg"),
            &Entities::empty(),
        )
        .unwrap();
    insta::assert_json_snapshot!(AnswerResponse::from(&response), @r#"
    {
      "decision": "Allow",
      "diagnostics": {
        "reason": [
          "policy4"
        ],
        "errors": []
      }
    }
    "#);
}

#[parameterized(
    alice_view_allow = { "alice", "view", Decision::Allow },
    alice_edit_forbidden = { "alice", "edit", Decision::Deny },
    alice_delete_forbidden = { "alice", "delete", Decision::Deny },
    bob_delete_deny = { "bob", "delete", Decision::Deny },
)]
fn test_forbid_overrides_permit(user: &str, action: &str, expected: Decision) {
    let engine = engine_from_policy(TEST_POLICY_WITH_FORBID);
    let response = engine
        .evaluate(
            &user_request(user, action, "VacationPhoto94.jpg"),
            &Entities::empty(),
        )
        .unwrap();
    assert_eq!(response.decision(), expected);
    if expected == Decision::Deny {
        assert!(response.reasons().is_empty());
    }
}

#[test]
fn test_default_deny() {
    let engine = engine_from_policy("");
    let response = engine
        .evaluate(
            &user_request("alice", "view", "VacationPhoto94.jpg"),
            &Entities::empty(),
        )
        .unwrap();
    assert_deny(&response);
    assert!(response.reasons().is_empty());
    assert!(response.errors().is_empty());
}

#[test]
fn test_policy_order_does_not_change_the_decision() {
    let policies = [
        r#"@id("view") permit(principal, action == Action::"view", resource);"#,
        r#"@id("alice") permit(principal == User::"alice", action, resource);"#,
        r#"@id("no-delete") forbid(principal, action == Action::"delete", resource);"#,
        r#"@id("locked") forbid(principal, action, resource == Photo::"locked.jpg");"#,
    ];
    let orders = [[0, 1, 2, 3], [3, 2, 1, 0], [2, 0, 3, 1], [1, 3, 0, 2]];
    let requests = [
        user_request("alice", "view", "a.jpg"),
        user_request("alice", "delete", "a.jpg"),
        user_request("bob", "view", "locked.jpg"),
        user_request("bob", "edit", "a.jpg"),
    ];

    for request in &requests {
        let outcomes: Vec<_> = orders
            .iter()
            .map(|order| {
                let text = order.iter().map(|&i| policies[i]).collect::<Vec<_>>().join("\n");
                let response = engine_from_policy(&text)
                    .evaluate(request, &Entities::empty())
                    .unwrap();
                let mut reasons: Vec<String> = reasons(&response).into_iter().map(String::from).collect();
                reasons.sort();
                (response.decision(), reasons)
            })
            .collect();
        assert!(
            outcomes.windows(2).all(|pair| pair[0] == pair[1]),
            "{request:?}: {outcomes:?}"
        );
    }
}

#[test]
fn test_errors_are_isolated_per_policy() {
    let engine = engine_from_policy(
        r#"
        forbid (principal, action, resource) when { resource.private };
        permit (principal == User::"alice", action, resource);
        permit (principal, action, resource) when { context.level > 2 };
        "#,
    );
    let response = engine
        .evaluate(
            &user_request("alice", "view", "VacationPhoto94.jpg"),
            &Entities::empty(),
        )
        .unwrap();
    assert_allow(&response);
    assert_eq!(reasons(&response), vec!["policy1"]);
    assert_eq!(response.errors().len(), 2);
    assert!(response.errors().iter().all(|d| d.is_error()));
}

#[parameterized(
    admin_delete = { "alice", "delete", "p1", Decision::Allow },
    user_view_own = { "bob", "view", "p2", Decision::Allow },
    user_view_public = { "bob", "view", "p1", Decision::Allow },
    user_view_private = { "bob", "view", "p3", Decision::Deny },
    user_delete = { "bob", "delete", "p2", Decision::Deny },
    nested_group_view = { "carol", "view", "p1", Decision::Allow },
)]
fn test_group_membership(user: &str, action: &str, photo: &str, expected: Decision) {
    let photo_entity = |id: &str, owner: &str, private: bool| {
        Entity::new(
            uid("Photo", id),
            BTreeMap::from([
                ("owner".to_string(), Value::Entity(uid("User", owner))),
                ("private".to_string(), Value::Bool(private)),
            ]),
            Default::default(),
        )
    };
    let member = |id: &str, group: &str| {
        Entity::new(
            uid("User", id),
            BTreeMap::new(),
            [uid("Group", group)].into(),
        )
    };
    let entities = Entities::from_entities(
        vec![
            member("alice", "admins"),
            member("bob", "users"),
            member("carol", "interns"),
            Entity::new(uid("Group", "interns"), BTreeMap::new(), [uid("Group", "users")].into()),
            photo_entity("p1", "alice", false),
            photo_entity("p2", "bob", true),
            photo_entity("p3", "alice", true),
        ],
        None,
    )
    .unwrap();

    let engine = engine_from_policy(TEST_POLICY_WITH_GROUPS);
    let response = engine
        .evaluate(&user_request(user, action, photo), &entities)
        .unwrap();
    assert_eq!(response.decision(), expected);
}

#[test]
fn test_context_conditions() {
    let engine = engine_from_policy(
        r#"
        permit (principal, action == Action::"view", resource)
        when { context.mfa && context.ip like "10.*" && context.level + 1 > 2 };
        "#,
    );
    let request = |mfa: bool, ip: &str, level: i64| {
        Request::new(
            uid("User", "alice"),
            uid("Action", "view"),
            uid("Photo", "p"),
            BTreeMap::from([
                ("mfa".to_string(), Value::Bool(mfa)),
                ("ip".to_string(), Value::from(ip)),
                ("level".to_string(), Value::Long(level)),
            ]),
        )
    };
    let entities = Entities::empty();
    assert_allow(&engine.evaluate(&request(true, "10.0.0.1", 2), &entities).unwrap());
    assert_deny(&engine.evaluate(&request(false, "10.0.0.1", 2), &entities).unwrap());
    assert_deny(&engine.evaluate(&request(true, "192.168.0.1", 2), &entities).unwrap());
    assert_deny(&engine.evaluate(&request(true, "10.0.0.1", 1), &entities).unwrap());
}
