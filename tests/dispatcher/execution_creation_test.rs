//! # Execution Creation Integration Tests
//!
//! Fan-out of an action over target repositories.

use crate::common::*;
use actions_core::models::{InvocationReason, TargetRepo};
use actions_core::state_machine::ActionJobState;
use actions_core::DispatchError;

#[tokio::test]
async fn test_create_execution_fans_out_one_pending_job_per_repository() {
    let harness = TestHarness::new();
    let action = harness.action().await;

    let created = harness.execution(&action, &[11, 12, 13]).await;

    assert_eq!(created.execution.action_id, action.id);
    assert_eq!(created.execution.invocation_reason, InvocationReason::Manual);
    assert!(created.execution.campaign_plan_id.is_none());
    assert_eq!(created.jobs.len(), 3);

    let repos: Vec<i64> = created.jobs.iter().map(|job| job.repo_id).collect();
    assert_eq!(repos, vec![11, 12, 13]);

    for job in &created.jobs {
        assert_eq!(job.execution_id, created.execution.id);
        assert_eq!(job.state, ActionJobState::Pending);
        assert_eq!(job.base_revision, format!("rev-{}", job.repo_id));
        assert!(job.patch.is_none());
        assert!(job.runner_id.is_none());
        assert!(job.execution_start.is_none());
    }
}

#[tokio::test]
async fn test_create_execution_through_resolver_uses_resolved_targets() {
    let harness = TestHarness::new();
    let action = harness.action().await;

    let default_created = harness
        .dispatcher
        .create_execution(action.id, InvocationReason::Manual)
        .await
        .unwrap();
    assert_eq!(default_created.jobs.len(), 2);

    harness.resolver.set_targets(action.id, targets(&[40]));
    let overridden = harness
        .dispatcher
        .create_execution(action.id, InvocationReason::Manual)
        .await
        .unwrap();
    assert_eq!(overridden.jobs.len(), 1);
    assert_eq!(overridden.jobs[0].repo_id, 40);
}

#[tokio::test]
async fn test_create_execution_with_empty_targets_writes_nothing() {
    let harness = TestHarness::new();
    let action = harness.action().await;

    let result = harness
        .dispatcher
        .create_execution_for_targets(action.id, &[], InvocationReason::Manual)
        .await;

    assert!(matches!(result, Err(DispatchError::Validation(_))));
    assert_eq!(harness.store.execution_count().await, 0);
    assert_eq!(harness.store.job_count().await, 0);
}

#[tokio::test]
async fn test_create_execution_rejects_duplicate_repositories() {
    let harness = TestHarness::new();
    let action = harness.action().await;

    let duplicated = vec![
        TargetRepo::new(5, "abc", "refs/heads/main"),
        TargetRepo::new(5, "def", "refs/heads/dev"),
    ];
    let err = harness
        .dispatcher
        .create_execution_for_targets(action.id, &duplicated, InvocationReason::Manual)
        .await
        .unwrap_err();

    assert!(err.is_validation());
    assert_eq!(harness.store.execution_count().await, 0);
}

#[tokio::test]
async fn test_create_execution_for_missing_action_is_not_found() {
    let harness = TestHarness::new();

    let err = harness
        .dispatcher
        .create_execution_for_targets(999, &targets(&[1]), InvocationReason::Manual)
        .await
        .unwrap_err();

    assert!(err.is_not_found());
    assert_eq!(harness.store.execution_count().await, 0);
}

#[tokio::test]
async fn test_store_failure_mid_fan_out_leaves_no_partial_execution() {
    let harness = TestHarness::new();
    let action = harness.action().await;

    harness.store.fail_next("create_job");
    let err = harness
        .dispatcher
        .create_execution_for_targets(action.id, &targets(&[1, 2, 3]), InvocationReason::Manual)
        .await
        .unwrap_err();

    assert!(err.is_store());
    assert_eq!(harness.store.execution_count().await, 0);
    assert_eq!(harness.store.job_count().await, 0);

    // The injected failure is one-shot
    let created = harness.execution(&action, &[1, 2, 3]).await;
    assert_eq!(created.jobs.len(), 3);
}

#[tokio::test]
async fn test_failed_commit_rolls_back_execution() {
    let harness = TestHarness::new();
    let action = harness.action().await;

    harness.store.fail_next("commit");
    let result = harness
        .dispatcher
        .create_execution_for_targets(action.id, &targets(&[1]), InvocationReason::Manual)
        .await;

    assert!(result.is_err());
    assert_eq!(harness.store.execution_count().await, 0);
}

#[tokio::test]
async fn test_execution_created_event_is_published() {
    let harness = TestHarness::new();
    let action = harness.action().await;
    let mut events = harness.dispatcher.events().subscribe();

    let created = harness.execution(&action, &[1, 2]).await;

    let event = events.recv().await.unwrap();
    assert_eq!(event.name, "execution.created");
    assert_eq!(event.context["execution_id"], created.execution.id);
}
