//! Create, update and delete against the mock store, including the
//! eventual-consistency paths.

mod common;

use common::Harness;
use serde_json::json;
use std::time::Duration;
use tessera_core::{AccessError, ConsistencyError, Method, OpContext, RequestError};
use tessera_test_utils::{fixtures, Fault};
use tokio::time::Instant;

#[tokio::test]
async fn test_create_then_read_round_trips_hash() {
    let harness = Harness::new();
    let mut handle = harness.handle("role", None, None);
    handle
        .populate_raw_json(fixtures::body(json!({"name": "ops", "capabilities": ["read", "write"]})))
        .expect("populate");

    let created = handle.create(&OpContext::new()).await.expect("create");
    let key = created.rest_key().expect("server assigned a key").to_string();
    assert_eq!(handle.object().rest_key(), Some(key.as_str()));

    let read = harness
        .handle("role", Some(&key), None)
        .read(&OpContext::new())
        .await
        .expect("read")
        .expect("present");
    assert_eq!(read.logical_id(), Some("ops"));
    assert_eq!(read.content_hash(), created.content_hash());
    assert!(read.verify_content_hash());
}

#[tokio::test]
async fn test_create_populates_cache() {
    let harness = Harness::new();
    let mut handle = harness.handle("role", None, None);
    handle
        .populate_raw_json(fixtures::body(json!({"name": "auditors"})))
        .expect("populate");
    handle.create(&OpContext::new()).await.expect("create");

    let found = harness
        .handle("role", None, Some("auditors"))
        .find(&OpContext::new())
        .await
        .expect("find");
    assert!(found.is_some());
    assert_eq!(harness.mock.calls(Method::Get), 0);
}

#[tokio::test(start_paused = true)]
async fn test_create_conflict_after_lost_response_succeeds() {
    let harness = Harness::new();
    let mut handle = harness.handle("kv_record", None, Some("r1"));
    handle
        .populate_raw_json(fixtures::body(json!({"value": 1})))
        .expect("populate");
    let minted = handle.object().rest_key().expect("minted key").to_string();

    // The first POST is stored but its response is lost.
    harness.mock.fail_next(Method::Post, Fault::AppliedThen(503), 1);
    let created = handle.create(&OpContext::new()).await.expect("create");

    assert_eq!(created.rest_key(), Some(minted.as_str()));
    assert_eq!(harness.mock.calls(Method::Post), 2);
    assert_eq!(harness.mock.len("storage/kv_record"), 1);
}

#[tokio::test]
async fn test_create_conflict_without_our_object_fails() {
    let harness = Harness::new();
    let mut handle = harness.handle("kv_record", None, Some("r2"));
    handle
        .populate_raw_json(fixtures::body(json!({"value": 2})))
        .expect("populate");

    harness.mock.fail_next(Method::Post, Fault::Status(409), 1);
    let err = handle
        .create(&OpContext::new())
        .await
        .expect_err("conflict is not ours");
    assert!(matches!(
        err,
        AccessError::Request(RequestError::Conflict { .. })
    ));
    assert_eq!(harness.mock.len("storage/kv_record"), 0);
}

#[tokio::test]
async fn test_update_refreshes_cache() {
    let harness = Harness::new();
    fixtures::seed_roles(&harness.mock, 1);
    let mut handle = harness.handle("role", Some("00001"), None);
    handle.find(&OpContext::new()).await.expect("find");

    handle
        .populate_raw_json(fixtures::body(json!({"name": "role-000", "capabilities": ["admin"]})))
        .expect("populate");
    let updated = handle.update(&OpContext::new()).await.expect("update");

    let cached = harness
        .layer
        .cache()
        .get(handle.object())
        .expect("cache lock")
        .expect("entry")
        .object()
        .expect("state")
        .expect("object");
    assert_eq!(cached.content_hash(), updated.content_hash());
    assert_eq!(
        harness.mock.document("access/role", "00001").expect("doc")["capabilities"],
        json!(["admin"])
    );
}

#[tokio::test(start_paused = true)]
async fn test_update_async_waits_for_convergence() {
    let harness = Harness::new();
    fixtures::seed_roles(&harness.mock, 1);
    harness.mock.set_read_lag(1);

    let mut handle = harness.handle("role", Some("00001"), None);
    handle
        .populate_raw_json(fixtures::body(json!({"name": "role-000", "capabilities": ["write"]})))
        .expect("populate");

    let outcome = handle
        .update_async(&OpContext::new())
        .await
        .expect("converges");
    assert_eq!(outcome.diagnostics.len(), 1);
    assert_eq!(outcome.value.content_hash(), handle.object().content_hash());

    let cached = harness
        .layer
        .cache()
        .get(handle.object())
        .expect("cache lock")
        .expect("cached after confirmation");
    assert!(cached.is_fetched());
}

#[tokio::test(start_paused = true)]
async fn test_update_async_without_lag_is_clean() {
    let harness = Harness::new();
    fixtures::seed_roles(&harness.mock, 1);

    let mut handle = harness.handle("role", Some("00001"), None);
    handle
        .populate_raw_json(fixtures::body(json!({"name": "role-000"})))
        .expect("populate");

    let outcome = handle
        .update_async(&OpContext::new())
        .await
        .expect("converges");
    assert!(outcome.diagnostics.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_update_async_deadline_leaves_cache_alone() {
    let harness = Harness::new();
    fixtures::seed_roles(&harness.mock, 1);
    harness.mock.set_read_lag(u32::MAX);

    let mut handle = harness.handle("role", Some("00001"), None);
    handle
        .populate_raw_json(fixtures::body(json!({"name": "role-000", "capabilities": []})))
        .expect("populate");

    let started = Instant::now();
    let err = handle
        .update_async(&OpContext::new())
        .await
        .expect_err("never converges");
    let elapsed = started.elapsed();

    assert!(matches!(
        err,
        AccessError::Consistency(ConsistencyError::ConfirmationDeadlineExceeded { .. })
    ));
    assert!(err.is_deadline_exceeded());
    assert!(elapsed >= Duration::from_secs(2));
    assert!(elapsed < Duration::from_millis(2100));
    assert!(harness
        .layer
        .cache()
        .get(handle.object())
        .expect("cache lock")
        .is_none());
}

#[tokio::test]
async fn test_update_missing_object_is_terminal() {
    let harness = Harness::new();
    let mut handle = harness.handle("role", Some("404"), None);
    handle
        .populate_raw_json(fixtures::body(json!({"name": "ghost"})))
        .expect("populate");

    let err = handle
        .update(&OpContext::new())
        .await
        .expect_err("no such object");
    assert_eq!(err.status(), Some(404));
    assert_eq!(harness.mock.calls(Method::Put), 1);
}

#[tokio::test]
async fn test_delete_missing_object_is_ok() {
    let harness = Harness::new();
    let outcome = harness
        .handle("role", Some("ghost"), None)
        .delete(&OpContext::new())
        .await
        .expect("idempotent");
    assert!(outcome.diagnostics.is_empty());
}

#[tokio::test]
async fn test_delete_evicts_cache() {
    let harness = Harness::new();
    fixtures::seed_roles(&harness.mock, 1);
    let handle = harness.handle("role", Some("00001"), None);
    handle.find(&OpContext::new()).await.expect("find");

    handle.delete(&OpContext::new()).await.expect("delete");
    assert!(harness
        .layer
        .cache()
        .get(handle.object())
        .expect("cache lock")
        .is_none());
    assert_eq!(harness.mock.len("access/role"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_delete_lag_produces_one_warning() {
    let harness = Harness::new();
    fixtures::seed_roles(&harness.mock, 1);
    harness.mock.set_delete_lag(2);

    let outcome = harness
        .handle("role", Some("00001"), None)
        .delete(&OpContext::new())
        .await
        .expect("delete");
    assert_eq!(outcome.diagnostics.len(), 1);
    // One DELETE, then three existence checks.
    assert_eq!(harness.mock.calls(Method::Get), 3);
}

#[tokio::test(start_paused = true)]
async fn test_delete_server_error_after_apply_succeeds() {
    let harness = Harness::new();
    fixtures::seed_roles(&harness.mock, 1);
    harness
        .mock
        .fail_next(Method::Delete, Fault::AppliedThen(500), 1);

    let outcome = harness
        .handle("role", Some("00001"), None)
        .delete(&OpContext::new())
        .await
        .expect("delete");
    assert!(outcome.diagnostics.is_empty());
    assert_eq!(harness.mock.calls(Method::Delete), 1);
}

#[tokio::test(start_paused = true)]
async fn test_delete_server_error_while_present_retries() {
    let harness = Harness::new();
    fixtures::seed_roles(&harness.mock, 1);
    harness
        .mock
        .fail_next(Method::Delete, Fault::Status(500), 2);

    harness
        .handle("role", Some("00001"), None)
        .delete(&OpContext::new())
        .await
        .expect("delete");
    assert_eq!(harness.mock.calls(Method::Delete), 3);
    assert_eq!(harness.mock.len("access/role"), 0);
}
