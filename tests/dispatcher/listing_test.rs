//! # Action Management and Listing Integration Tests
//!
//! Action CRUD and keyset pagination over actions, executions and jobs.

use crate::common::*;
use actions_core::config::DispatcherConfig;
use actions_core::database::{ExecutionFilter, JobFilter, ListOpts};
use actions_core::state_machine::ActionJobState;

#[tokio::test]
async fn test_create_action_from_json_definition() {
    let harness = TestHarness::new();

    let action = harness
        .dispatcher
        .create_action_from_json(
            "go-mod-tidy",
            r#"{"steps":[{"run":"go mod tidy","container":"golang:1.22","env":{"GOFLAGS":"-mod=mod"}}]}"#,
        )
        .await
        .unwrap();

    assert_eq!(action.name, "go-mod-tidy");
    assert_eq!(action.version, 1);
    assert_eq!(action.steps().len(), 1);
    assert_eq!(action.steps()[0].env["GOFLAGS"], "-mod=mod");
    assert!(!action.is_campaign_bound());
}

#[tokio::test]
async fn test_invalid_action_definitions_are_rejected() {
    let harness = TestHarness::new();

    let malformed = harness
        .dispatcher
        .create_action_from_json("broken", "{ not json")
        .await
        .unwrap_err();
    assert!(malformed.is_validation());

    let empty = harness
        .dispatcher
        .create_action_from_json("empty", r#"{"steps":[]}"#)
        .await
        .unwrap_err();
    assert!(empty.is_validation());

    let blank_container = harness
        .dispatcher
        .create_action(ActionBuilder::new().with_step("make", " ").build())
        .await
        .unwrap_err();
    assert!(blank_container.is_validation());

    let page = harness.dispatcher.list_actions(ListOpts::new()).await.unwrap();
    assert_eq!(page.total_count, 0);
}

#[tokio::test]
async fn test_update_action_bumps_version() {
    let harness = TestHarness::new();
    let action = harness.action().await;

    let updated = harness
        .dispatcher
        .update_action(
            action.id,
            ActionBuilder::new()
                .with_name("bump-go-version-v2")
                .with_step("go test ./...", "golang:1.22")
                .with_campaign(CAMPAIGN_ID)
                .build(),
        )
        .await
        .unwrap();

    assert_eq!(updated.id, action.id);
    assert_eq!(updated.version, 2);
    assert_eq!(updated.steps().len(), 2);
    assert_eq!(updated.campaign_id, Some(CAMPAIGN_ID));
    assert_eq!(harness.dispatcher.get_action(action.id).await.unwrap(), updated);
}

#[tokio::test]
async fn test_update_missing_action_is_not_found() {
    let harness = TestHarness::new();

    let err = harness
        .dispatcher
        .update_action(42, ActionBuilder::new().build())
        .await
        .unwrap_err();

    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_get_missing_entities_is_not_found() {
    let harness = TestHarness::new();

    assert!(harness.dispatcher.get_action(1).await.unwrap_err().is_not_found());
    assert!(harness.dispatcher.get_execution(1).await.unwrap_err().is_not_found());
    assert!(harness.dispatcher.get_job(1).await.unwrap_err().is_not_found());
    assert!(harness.dispatcher.get_plan(1).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_list_jobs_walks_pages_with_cursor() {
    let harness = TestHarness::new();
    let action = harness.action().await;
    let created = harness.execution(&action, &[1, 2, 3, 4, 5]).await;
    let filter = JobFilter::for_execution(created.execution.id);

    let first = harness
        .dispatcher
        .list_jobs(filter, ListOpts::limit_only(2))
        .await
        .unwrap();
    assert_eq!(first.total_count, 5);
    assert_eq!(first.nodes.len(), 2);
    assert!(first.has_next_page());

    let second = harness
        .dispatcher
        .list_jobs(filter, ListOpts::limit_only(2).after(first.next_cursor))
        .await
        .unwrap();
    let third = harness
        .dispatcher
        .list_jobs(filter, ListOpts::limit_only(2).after(second.next_cursor))
        .await
        .unwrap();

    assert_eq!(third.nodes.len(), 1);
    assert!(!third.has_next_page());

    let walked: Vec<i64> = first
        .nodes
        .iter()
        .chain(&second.nodes)
        .chain(&third.nodes)
        .map(|job| job.id)
        .collect();
    let expected: Vec<i64> = created.jobs.iter().map(|job| job.id).collect();
    assert_eq!(walked, expected);
}

#[tokio::test]
async fn test_list_jobs_filters_by_state() {
    let harness = TestHarness::new();
    let action = harness.action().await;
    let created = harness.execution(&action, &[1, 2, 3]).await;
    harness.claim("runner-a").await;

    let running = harness
        .dispatcher
        .list_jobs(
            JobFilter::for_execution(created.execution.id).with_state(ActionJobState::Running),
            ListOpts::new(),
        )
        .await
        .unwrap();
    let pending = harness
        .dispatcher
        .list_jobs(
            JobFilter::for_execution(created.execution.id).with_state(ActionJobState::Pending),
            ListOpts::new(),
        )
        .await
        .unwrap();

    assert_eq!(running.total_count, 1);
    assert_eq!(pending.total_count, 2);
}

#[tokio::test]
async fn test_list_limit_is_capped_by_configuration() {
    let mut config = DispatcherConfig::default();
    config.pagination.default_limit = 2;
    config.pagination.max_limit = 3;
    let harness = TestHarness::with_config(config);
    let action = harness.action().await;
    harness.execution(&action, &[1, 2, 3, 4, 5]).await;

    let defaulted = harness
        .dispatcher
        .list_jobs(JobFilter::default(), ListOpts::new())
        .await
        .unwrap();
    let capped = harness
        .dispatcher
        .list_jobs(JobFilter::default(), ListOpts::limit_only(500))
        .await
        .unwrap();

    assert_eq!(defaulted.nodes.len(), 2);
    assert_eq!(capped.nodes.len(), 3);
    assert_eq!(capped.total_count, 5);
}

#[tokio::test]
async fn test_list_executions_by_action() {
    let harness = TestHarness::new();
    let first_action = harness.action().await;
    let second_action = harness.action().await;
    harness.execution(&first_action, &[1]).await;
    harness.execution(&second_action, &[1]).await;
    harness.execution(&first_action, &[2]).await;

    let page = harness
        .dispatcher
        .list_executions(ExecutionFilter::for_action(first_action.id), ListOpts::new())
        .await
        .unwrap();

    assert_eq!(page.total_count, 2);
    assert!(page
        .nodes
        .iter()
        .all(|execution| execution.action_id == first_action.id));

    let all = harness
        .dispatcher
        .list_executions(ExecutionFilter::default(), ListOpts::new())
        .await
        .unwrap();
    assert_eq!(all.total_count, 3);
}
