//! # Job Lifecycle Integration Tests
//!
//! Reports, log heartbeats, retries and watchdog timeouts.

use crate::common::*;
use actions_core::orchestration::ReportRequest;
use actions_core::state_machine::ActionJobState;
use actions_core::DispatchError;

#[tokio::test]
async fn test_completed_report_stores_patch_and_stamps_end() {
    let harness = TestHarness::new();
    let action = harness.action().await;
    harness.execution(&action, &[1, 2]).await;
    let job = harness.claim("runner-a").await;

    let report = harness
        .dispatcher
        .report_job(
            ReportRequest::new(job.id, ActionJobState::Completed)
                .with_patch(VALID_DIFF)
                .with_log("done\n"),
        )
        .await
        .unwrap();

    assert_eq!(report.job.state, ActionJobState::Completed);
    assert_eq!(report.job.patch.as_deref(), Some(VALID_DIFF));
    assert_eq!(report.job.log.as_deref(), Some("done\n"));
    assert!(report.job.execution_end.is_some());
    // The sibling job is still pending
    assert!(report.plan_id().is_none());
}

#[tokio::test]
async fn test_progress_report_keeps_job_running() {
    let harness = TestHarness::new();
    let action = harness.action().await;
    harness.execution(&action, &[1]).await;
    let job = harness.claim("runner-a").await;

    let report = harness
        .dispatcher
        .report_job(ReportRequest::new(job.id, ActionJobState::Running).with_log("step 1\n"))
        .await
        .unwrap();

    assert_eq!(report.job.state, ActionJobState::Running);
    assert!(report.job.execution_end.is_none());
    assert!(report.aggregation.is_none());
}

#[tokio::test]
async fn test_report_on_job_that_is_not_running_is_rejected() {
    let harness = TestHarness::new();
    let action = harness.action().await;
    let created = harness.execution(&action, &[1]).await;
    let pending = created.jobs[0].clone();

    let err = harness
        .dispatcher
        .report_job(ReportRequest::new(pending.id, ActionJobState::Completed).with_patch(VALID_DIFF))
        .await
        .unwrap_err();

    assert!(err.is_invalid_transition());
    assert_eq!(harness.dispatcher.get_job(pending.id).await.unwrap(), pending);
}

#[tokio::test]
async fn test_stale_report_against_terminal_job_changes_nothing() {
    let harness = TestHarness::new();
    let action = harness.action().await;
    harness.execution(&action, &[1]).await;
    let finished = harness
        .finish_next(ActionJobState::Completed, Some(VALID_DIFF))
        .await;

    let err = harness
        .dispatcher
        .report_job(ReportRequest::new(finished.id, ActionJobState::Failed).with_patch(OTHER_DIFF))
        .await
        .unwrap_err();

    assert!(matches!(err, DispatchError::InvalidTransition { job_id, .. } if job_id == finished.id));
    assert_eq!(harness.dispatcher.get_job(finished.id).await.unwrap(), finished);
}

#[tokio::test]
async fn test_report_back_to_pending_is_rejected() {
    let harness = TestHarness::new();
    let action = harness.action().await;
    harness.execution(&action, &[1]).await;
    let job = harness.claim("runner-a").await;

    let err = harness
        .dispatcher
        .report_job(ReportRequest::new(job.id, ActionJobState::Pending))
        .await
        .unwrap_err();

    assert!(err.is_invalid_transition());
    assert_eq!(
        harness.dispatcher.get_job(job.id).await.unwrap().state,
        ActionJobState::Running
    );
}

#[tokio::test]
async fn test_invalid_patch_is_rejected_and_job_stays_running() {
    let harness = TestHarness::new();
    let action = harness.action().await;
    harness.execution(&action, &[1]).await;
    let job = harness.claim("runner-a").await;

    let err = harness
        .dispatcher
        .report_job(
            ReportRequest::new(job.id, ActionJobState::Completed).with_patch("this is not a diff"),
        )
        .await
        .unwrap_err();

    assert!(err.is_invalid_patch());
    let stored = harness.dispatcher.get_job(job.id).await.unwrap();
    assert_eq!(stored.state, ActionJobState::Running);
    assert!(stored.patch.is_none());
    assert_eq!(harness.store.plan_count().await, 0);
}

#[tokio::test]
async fn test_blank_patch_counts_as_no_patch() {
    let harness = TestHarness::new();
    let action = harness.action().await;
    harness.execution(&action, &[1]).await;
    let job = harness.claim("runner-a").await;

    let report = harness
        .dispatcher
        .report_job(ReportRequest::new(job.id, ActionJobState::Completed).with_patch("  \n"))
        .await
        .unwrap();

    assert_eq!(report.job.state, ActionJobState::Completed);
    assert!(report.job.patch.is_none());
    let plan = report.aggregation.unwrap().created_plan().cloned().unwrap();
    assert_eq!(plan.patch_count(), 0);
}

#[tokio::test]
async fn test_failed_report_discards_progress_patch() {
    let harness = TestHarness::new();
    let action = harness.action().await;
    harness.execution(&action, &[1]).await;
    let job = harness.claim("runner-a").await;

    harness
        .dispatcher
        .report_job(ReportRequest::new(job.id, ActionJobState::Running).with_patch(VALID_DIFF))
        .await
        .unwrap();
    assert_eq!(
        harness.dispatcher.get_job(job.id).await.unwrap().patch.as_deref(),
        Some(VALID_DIFF)
    );

    let report = harness
        .dispatcher
        .report_job(ReportRequest::new(job.id, ActionJobState::Failed))
        .await
        .unwrap();

    assert_eq!(report.job.state, ActionJobState::Failed);
    assert!(report.job.patch.is_none());
    let plan = report.aggregation.unwrap().created_plan().cloned().unwrap();
    assert_eq!(plan.patch_count(), 0);
}

#[tokio::test]
async fn test_time_out_discards_progress_patch() {
    let harness = TestHarness::new();
    let action = harness.action().await;
    harness.execution(&action, &[1]).await;
    let job = harness.claim("runner-a").await;

    harness
        .dispatcher
        .report_job(ReportRequest::new(job.id, ActionJobState::Running).with_patch(VALID_DIFF))
        .await
        .unwrap();

    let report = harness.dispatcher.time_out_job(job.id).await.unwrap();

    assert_eq!(report.job.state, ActionJobState::TimedOut);
    assert!(report.job.patch.is_none());
    let stored = harness.dispatcher.get_job(job.id).await.unwrap();
    assert!(stored.patch.is_none());
}

#[tokio::test]
async fn test_report_for_unknown_job_is_not_found() {
    let harness = TestHarness::new();

    let err = harness
        .dispatcher
        .report_job(ReportRequest::new(404, ActionJobState::Completed))
        .await
        .unwrap_err();

    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_store_failure_during_report_rolls_back_transition() {
    let harness = TestHarness::new();
    let action = harness.action().await;
    harness.execution(&action, &[1]).await;
    let job = harness.claim("runner-a").await;

    harness.store.fail_next("create_plan");
    let err = harness
        .dispatcher
        .report_job(ReportRequest::new(job.id, ActionJobState::Completed).with_patch(VALID_DIFF))
        .await
        .unwrap_err();

    assert!(err.is_store());
    let stored = harness.dispatcher.get_job(job.id).await.unwrap();
    assert_eq!(stored.state, ActionJobState::Running);
    assert_eq!(harness.store.plan_count().await, 0);

    // The runner can report again once the store recovers
    let report = harness
        .dispatcher
        .report_job(ReportRequest::new(job.id, ActionJobState::Completed).with_patch(VALID_DIFF))
        .await
        .unwrap();
    assert!(report.plan_id().is_some());
}

#[tokio::test]
async fn test_append_log_is_allowed_in_any_state() {
    let harness = TestHarness::new();
    let action = harness.action().await;
    let created = harness.execution(&action, &[1]).await;
    let job_id = created.jobs[0].id;

    let pending = harness.dispatcher.append_log(job_id, "queued\n").await.unwrap();
    assert_eq!(pending.state, ActionJobState::Pending);
    assert!(pending.runner_seen_at.is_some());

    harness.claim("runner-a").await;
    harness.dispatcher.append_log(job_id, "cloning\n").await.unwrap();

    harness
        .dispatcher
        .report_job(ReportRequest::new(job_id, ActionJobState::Failed))
        .await
        .unwrap();
    let failed = harness.dispatcher.append_log(job_id, "cleanup\n").await.unwrap();

    assert_eq!(failed.state, ActionJobState::Failed);
    assert_eq!(failed.log.as_deref(), Some("queued\ncloning\ncleanup\n"));
}

#[tokio::test]
async fn test_append_log_for_unknown_job_is_not_found() {
    let harness = TestHarness::new();

    let err = harness.dispatcher.append_log(404, "x").await.unwrap_err();

    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_retry_resets_job_from_every_state() {
    let harness = TestHarness::new();
    let action = harness.action().await;
    let created = harness.execution(&action, &[1, 2, 3, 4, 5]).await;

    // Pending
    let pending_id = created.jobs[4].id;

    // Running
    let running = harness.claim("runner-a").await;
    harness.dispatcher.append_log(running.id, "working\n").await.unwrap();

    // Completed, Failed, TimedOut
    let completed = harness
        .finish_next(ActionJobState::Completed, Some(VALID_DIFF))
        .await;
    let failed = harness.finish_next(ActionJobState::Failed, None).await;
    let timed_out = harness.claim("runner-b").await;
    harness.dispatcher.time_out_job(timed_out.id).await.unwrap();

    for job_id in [pending_id, running.id, completed.id, failed.id, timed_out.id] {
        harness.dispatcher.retry_job(job_id).await.unwrap();

        let job = harness.dispatcher.get_job(job_id).await.unwrap();
        assert_eq!(job.state, ActionJobState::Pending, "job {job_id}");
        assert!(job.patch.is_none());
        assert!(job.log.is_none());
        assert!(job.runner_id.is_none());
        assert!(job.runner_seen_at.is_none());
        assert!(job.execution_start.is_none());
        assert!(job.execution_end.is_none());
    }
}

#[tokio::test]
async fn test_retried_job_can_be_claimed_again() {
    let harness = TestHarness::new();
    let action = harness.action().await;
    harness.execution(&action, &[1]).await;
    let failed = harness.finish_next(ActionJobState::Failed, None).await;

    harness.dispatcher.retry_job(failed.id).await.unwrap();
    let reclaimed = harness.claim("runner-b").await;

    assert_eq!(reclaimed.id, failed.id);
    assert_eq!(reclaimed.runner_id.as_deref(), Some("runner-b"));
}

#[tokio::test]
async fn test_report_from_abandoned_attempt_is_rejected_after_retry() {
    let harness = TestHarness::new();
    let action = harness.action().await;
    harness.execution(&action, &[1]).await;
    let job = harness.claim("runner-a").await;

    harness.dispatcher.retry_job(job.id).await.unwrap();

    let err = harness
        .dispatcher
        .report_job(ReportRequest::new(job.id, ActionJobState::Completed))
        .await
        .unwrap_err();
    assert!(err.is_invalid_transition());
}

#[tokio::test]
async fn test_time_out_only_applies_to_running_jobs() {
    let harness = TestHarness::new();
    let action = harness.action().await;
    let created = harness.execution(&action, &[1, 2]).await;

    let err = harness
        .dispatcher
        .time_out_job(created.jobs[0].id)
        .await
        .unwrap_err();
    assert!(err.is_invalid_transition());

    let running = harness.claim("runner-a").await;
    let report = harness.dispatcher.time_out_job(running.id).await.unwrap();

    assert_eq!(report.job.state, ActionJobState::TimedOut);
    assert!(report.job.execution_end.is_some());
}

#[tokio::test]
async fn test_job_events_are_published_in_order() {
    let harness = TestHarness::new();
    let action = harness.action().await;
    harness.execution(&action, &[1, 2]).await;
    let mut events = harness.dispatcher.events().subscribe();

    let job = harness.claim("runner-a").await;
    harness.dispatcher.append_log(job.id, "hi\n").await.unwrap();
    harness
        .dispatcher
        .report_job(ReportRequest::new(job.id, ActionJobState::Failed))
        .await
        .unwrap();
    harness.dispatcher.retry_job(job.id).await.unwrap();

    let mut names = Vec::new();
    while let Ok(event) = events.try_recv() {
        names.push(event.name);
    }

    assert_eq!(
        names,
        vec!["job.claimed", "job.log_appended", "job.reported", "job.retried"]
    );
}
