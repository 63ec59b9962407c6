use std::collections::BTreeMap;

use super::*;
use crate::ast::{EntityUid, PolicyId, Value};
use crate::entities::{Entities, Entity};
use crate::evaluator::{Decision, Request, Response};
use crate::frontend::AnswerResponse;

mod evaluate;
mod reload;
mod schema;

const TEST_POLICY: &str = r#"
permit (
    principal == User::"alice",
    action in [Action::"view", Action::"edit", Action::"delete"],
    resource == Photo::"VacationPhoto94.jpg"
);

permit (
    principal == User::"bob",
    action == Action::"view",
    resource == Photo::"VacationPhoto94.jpg"
);
"#;

const TEST_POLICY_WITHOUT_BOB: &str = r#"
permit (
    principal == User::"alice",
    action in [Action::"view", Action::"edit", Action::"delete"],
    resource == Photo::"VacationPhoto94.jpg"
);
"#;

const TEST_POLICY_WITH_FORBID: &str = r#"
permit (
    principal == User::"alice",
    action in [Action::"view", Action::"edit", Action::"delete"],
    resource == Photo::"VacationPhoto94.jpg"
);
forbid (
    principal == User::"alice",
    action == Action::"edit",
    resource == Photo::"VacationPhoto94.jpg"
);
forbid (
    principal,
    action == Action::"delete",
    resource == Photo::"VacationPhoto94.jpg"
);
"#;

/// One permit per user, each for their own photo.
const VACATION_POLICIES: [&str; 5] = [
    r#"permit(principal == User::"alice", action == Action::"update", resource == Photo::"VacationPhoto94.jpg");"#,
    r#"permit(principal == User::"bob", action == Action::"update", resource == Photo::"VacationPhoto95.jpg");"#,
    r#"permit(principal == User::"chester", action == Action::"update", resource == Photo::"VacationPhoto96.jpg");"#,
    r#"permit(principal == User::"dennis", action == Action::"update", resource == Photo::"VacationPhoto97.jpg");"#,
    r#"permit(principal == User::"eric", action == Action::"update", resource == Photo::"VacationPhoto98.jpg");"#,
];

const TEST_POLICY_WITH_GROUPS: &str = r#"
permit (
    principal in Group::"admins",
    action in [Action::"delete", Action::"view"],
    resource is Photo
);

permit (
    principal in Group::"users",
    action == Action::"view",
    resource is Photo
) when {
    resource.owner == principal || !resource.private
};
"#;

fn engine_from_policy(policy: &str) -> PolicyEngine {
    PolicyEngine::new_from_str(policy).unwrap()
}

fn uid(ty: &str, id: &str) -> EntityUid {
    EntityUid::from_type_and_id(ty, id).unwrap()
}

fn user_request(user: &str, action: &str, photo: &str) -> Request {
    Request::new(
        uid("User", user),
        uid("Action", action),
        uid("Photo", photo),
        BTreeMap::new(),
    )
}

fn assert_allow(response: &Response) {
    assert_eq!(response.decision(), Decision::Allow, "{response:?}");
}

fn assert_deny(response: &Response) {
    assert_eq!(response.decision(), Decision::Deny, "{response:?}");
}

fn reasons(response: &Response) -> Vec<&str> {
    response.reasons().iter().map(PolicyId::as_str).collect()
}
