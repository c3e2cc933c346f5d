//! # Saved Search Integration Tests
//!
//! One execution per action watching a saved search whose results changed.

use crate::common::*;
use actions_core::models::InvocationReason;

const QUERY: &str = "repo:^github.com/acme/ file:go.mod";

#[tokio::test]
async fn test_saved_search_creates_execution_per_watching_action() {
    let harness = TestHarness::new();
    let watcher_a = harness
        .dispatcher
        .create_action(ActionBuilder::new().with_saved_search(QUERY).build())
        .await
        .unwrap();
    let watcher_b = harness
        .dispatcher
        .create_action(
            ActionBuilder::new()
                .with_name("other-watcher")
                .with_saved_search(QUERY)
                .build(),
        )
        .await
        .unwrap();
    harness
        .dispatcher
        .create_action(ActionBuilder::new().with_saved_search("repo:other").build())
        .await
        .unwrap();
    harness.resolver.set_targets(watcher_b.id, targets(&[9]));

    let created = harness
        .dispatcher
        .create_executions_for_saved_search(QUERY)
        .await
        .unwrap();

    assert_eq!(created.len(), 2);
    assert_eq!(created[0].execution.action_id, watcher_a.id);
    assert_eq!(created[0].jobs.len(), 2);
    assert_eq!(created[1].execution.action_id, watcher_b.id);
    assert_eq!(created[1].jobs[0].repo_id, 9);
    assert!(created
        .iter()
        .all(|result| result.execution.invocation_reason == InvocationReason::SavedSearch));
}

#[tokio::test]
async fn test_saved_search_without_watchers_creates_nothing() {
    let harness = TestHarness::new();
    harness.action().await;

    let created = harness
        .dispatcher
        .create_executions_for_saved_search(QUERY)
        .await
        .unwrap();

    assert!(created.is_empty());
    assert_eq!(harness.store.execution_count().await, 0);
}

#[tokio::test]
async fn test_saved_search_stops_at_first_failure() {
    let harness = TestHarness::new();
    let first = harness
        .dispatcher
        .create_action(ActionBuilder::new().with_saved_search(QUERY).build())
        .await
        .unwrap();
    let second = harness
        .dispatcher
        .create_action(ActionBuilder::new().with_saved_search(QUERY).build())
        .await
        .unwrap();
    harness.resolver.set_targets(second.id, Vec::new());

    let err = harness
        .dispatcher
        .create_executions_for_saved_search(QUERY)
        .await
        .unwrap_err();

    assert!(err.is_validation());
    // The first action's execution was committed before the failure
    let page = harness
        .dispatcher
        .list_executions(
            actions_core::database::ExecutionFilter::for_action(first.id),
            actions_core::database::ListOpts::new(),
        )
        .await
        .unwrap();
    assert_eq!(page.total_count, 1);
    assert_eq!(harness.store.execution_count().await, 1);
}
