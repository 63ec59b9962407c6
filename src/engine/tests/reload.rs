use super::*;

#[test]
fn test_reload_policy() {
    let engine = engine_from_policy(TEST_POLICY);
    let request = user_request("bob", "view", "VacationPhoto94.jpg");

    let before_reload = engine.evaluate(&request, &Entities::empty()).unwrap();
    assert_allow(&before_reload);

    engine.reload_from_str(TEST_POLICY_WITHOUT_BOB).unwrap();

    let after_reload = engine.evaluate(&request, &Entities::empty()).unwrap();
    assert_deny(&after_reload);
}

#[test]
fn test_failed_reload_keeps_current_policies() {
    let engine = engine_from_policy(TEST_POLICY);
    let err = engine
        .reload_from_str("permit (principal, action, resource")
        .unwrap_err();
    assert!(matches!(err, PolicyError::ParseError(_)));
    assert_eq!(engine.policies().unwrap().num_of_policies(), 2);
}

#[test]
fn test_clones_share_reloads() {
    let engine = engine_from_policy(TEST_POLICY);
    let clone = engine.clone();
    engine.reload_from_str(TEST_POLICY_WITHOUT_BOB).unwrap();
    assert_eq!(clone.policies().unwrap().num_of_policies(), 1);
}

#[test]
fn test_snapshot_immutable_after_reload() {
    let engine = engine_from_policy(TEST_POLICY);
    let before = engine.policies().unwrap();
    engine.reload_from_str(TEST_POLICY_WITHOUT_BOB).unwrap();
    assert_eq!(before.num_of_policies(), 2);
    assert_eq!(engine.policies().unwrap().num_of_policies(), 1);
}

#[test]
fn test_policy_reload_during_evaluation() {
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    let initial_policy = r#"
        permit (
            principal == User::"alice",
            action == Action::"read",
            resource == Photo::"doc1"
        );
    "#;

    let updated_policy = r#"
        permit (
            principal == User::"bob",
            action == Action::"write",
            resource == Photo::"doc2"
        );
    "#;

    let engine = Arc::new(engine_from_policy(initial_policy));
    let engine_eval = Arc::clone(&engine);
    let engine_reload = Arc::clone(&engine);

    let eval_handle = thread::spawn(move || {
        let request = user_request("alice", "read", "doc1");
        for _ in 0..100 {
            let response = engine_eval.evaluate(&request, &Entities::empty()).unwrap();
            // Either the old or the new set, never a mix.
            assert!(response.reasons().len() <= 1);
            thread::sleep(Duration::from_micros(10));
        }
    });

    let reload_handle = thread::spawn(move || {
        for i in 0..10 {
            let text = if i % 2 == 0 { updated_policy } else { initial_policy };
            engine_reload.reload_from_str(text).unwrap();
            thread::sleep(Duration::from_millis(1));
        }
    });

    eval_handle.join().unwrap();
    reload_handle.join().unwrap();
}
