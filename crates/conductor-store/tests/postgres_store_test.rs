//! Integration tests for the PostgreSQL state store.
//!
//! Every test provisions its own uniquely-named database inside a shared
//! testcontainers instance (see `conductor-test-utils`), so tests run in
//! parallel without seeing each other's state and need no teardown.

use conductor_store::models::{ApprovalStatus, Task, TaskType, WorkflowState};
use conductor_store::store::{StateStore, StoreError};
use conductor_test_utils::fresh_store;

fn sample_state() -> WorkflowState {
    let mut state = WorkflowState::new("research battery chemistries and compare costs");
    state.plan = vec![
        Task::new(1, TaskType::Research, "survey battery chemistries", vec![]),
        Task::new(2, TaskType::Analysis, "compare cost per kWh", vec![1]),
    ];
    state.messages.push("Initial plan generated".to_owned());
    state
}

#[tokio::test]
async fn save_then_get_roundtrips() {
    let store = fresh_store().await;

    let mut state = sample_state();
    store.save("t1", &mut state).await.expect("save should succeed");

    let loaded = store
        .get("t1")
        .await
        .expect("get should succeed")
        .expect("entry should exist");
    assert_eq!(loaded, state);
}

#[tokio::test]
async fn task_result_keys_survive_jsonb() {
    let store = fresh_store().await;

    let mut state = sample_state();
    state.plan[0].mark_completed("found three chemistries");
    state
        .task_results
        .insert(1, "found three chemistries".to_owned());
    state.approval_status = ApprovalStatus::Approved;

    store.save("t1", &mut state).await.unwrap();
    let loaded = store.get("t1").await.unwrap().unwrap();

    assert_eq!(
        loaded.task_results.get(&1).map(String::as_str),
        Some("found three chemistries")
    );
}

#[tokio::test]
async fn save_replaces_atomically() {
    let store = fresh_store().await;

    let mut first = sample_state();
    store.save("t1", &mut first).await.unwrap();

    let mut second = sample_state();
    second.approval_status = ApprovalStatus::Approved;
    second.messages.push("plan approved".to_owned());
    store.save("t1", &mut second).await.unwrap();

    let loaded = store.get("t1").await.unwrap().unwrap();
    assert_eq!(loaded.approval_status, ApprovalStatus::Approved);
    assert_eq!(loaded.messages.len(), 2);
}

#[tokio::test]
async fn get_unknown_returns_none() {
    let store = fresh_store().await;
    assert!(store.get("missing").await.unwrap().is_none());
}

#[tokio::test]
async fn delete_is_idempotent() {
    let store = fresh_store().await;

    let mut state = sample_state();
    store.save("t1", &mut state).await.unwrap();

    store.delete("t1").await.expect("first delete succeeds");
    store.delete("t1").await.expect("second delete also succeeds");
    assert!(store.get("t1").await.unwrap().is_none());
}

#[tokio::test]
async fn scan_lists_ids_in_key_order() {
    let store = fresh_store().await;

    for id in ["charlie", "alpha", "bravo"] {
        let mut state = sample_state();
        store.save(id, &mut state).await.unwrap();
    }

    let ids = store.scan().await.unwrap();
    assert_eq!(ids, vec!["alpha", "bravo", "charlie"]);
}

#[tokio::test]
async fn corrupt_row_surfaces_as_corrupt() {
    let store = fresh_store().await;

    // Plant a row whose JSON does not decode as a WorkflowState.
    sqlx::query(
        "INSERT INTO workflow_states (thread_id, state) VALUES ('bad', '{\"plan\": []}'::jsonb)",
    )
    .execute(store.pool())
    .await
    .expect("raw insert should succeed");

    let err = store.get("bad").await.unwrap_err();
    assert!(matches!(err, StoreError::Corrupt { .. }));
}

#[tokio::test]
async fn updated_at_moves_forward_on_save() {
    let store = fresh_store().await;

    let mut state = sample_state();
    store.save("t1", &mut state).await.unwrap();
    let first = store.get("t1").await.unwrap().unwrap().updated_at;

    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    store.save("t1", &mut state).await.unwrap();
    let second = store.get("t1").await.unwrap().unwrap().updated_at;

    assert!(second > first);
}

#[tokio::test]
async fn provisioning_is_idempotent() {
    // Two provisioning passes against the same database must both succeed
    // and leave the schema usable.
    let store = fresh_store().await;
    let (db_name,): (String,) = sqlx::query_as("SELECT current_database()")
        .fetch_one(store.pool())
        .await
        .unwrap();

    let base = conductor_test_utils::server_url().await;
    let again = conductor_store::postgres::PgStateStore::provision(&format!("{base}/{db_name}"))
        .await
        .expect("re-provisioning an existing database should succeed");

    let mut state = sample_state();
    again.save("t1", &mut state).await.unwrap();
    assert!(again.get("t1").await.unwrap().is_some());
}
