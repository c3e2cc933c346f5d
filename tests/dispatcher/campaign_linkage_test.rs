//! # Campaign Linkage Integration Tests
//!
//! Plans of campaign-bound actions are pushed into the owning campaign after
//! commit. Linkage failures never undo the plan.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use actions_core::config::DispatcherConfig;
use actions_core::database::{InMemoryStore, Store};
use actions_core::orchestration::{
    ActionDispatcher, CampaignUpdater, LinkageOutcome, ReportRequest,
};
use actions_core::state_machine::ActionJobState;
use actions_core::{DispatchError, Result};
use async_trait::async_trait;

use crate::common::*;

/// Fails the first `failures` attach calls, then records plan ids
#[derive(Default)]
struct FlakyCampaign {
    failures: AtomicUsize,
    attached: parking_lot::Mutex<Vec<(i64, i64)>>,
}

impl FlakyCampaign {
    fn failing(times: usize) -> Self {
        Self {
            failures: AtomicUsize::new(times),
            attached: parking_lot::Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl CampaignUpdater for FlakyCampaign {
    async fn attach_plan(&self, campaign_id: i64, plan_id: i64) -> Result<()> {
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(DispatchError::store("campaign service unavailable"));
        }
        self.attached.lock().push((campaign_id, plan_id));
        Ok(())
    }
}

fn dispatcher_with(store: &InMemoryStore, updater: Arc<dyn CampaignUpdater>) -> ActionDispatcher {
    ActionDispatcher::builder(Arc::new(store.clone()))
        .config(DispatcherConfig::default())
        .campaign_updater(updater)
        .build()
}

#[tokio::test]
async fn test_plan_is_attached_to_owning_campaign() {
    let harness = TestHarness::new();
    let action = harness.campaign_action().await;
    harness.execution(&action, &[1]).await;
    let job = harness.claim("runner-a").await;

    let report = harness
        .dispatcher
        .report_job(ReportRequest::new(job.id, ActionJobState::Completed).with_patch(VALID_DIFF))
        .await
        .unwrap();

    let plan_id = report.plan_id().unwrap();
    assert_eq!(
        report.linkage,
        Some(LinkageOutcome::Linked {
            campaign_id: CAMPAIGN_ID,
            plan_id
        })
    );
    assert_eq!(harness.campaigns.plan_for(CAMPAIGN_ID), Some(plan_id));
}

#[tokio::test]
async fn test_standalone_action_is_not_linked() {
    let harness = TestHarness::new();
    let action = harness.action().await;
    harness.execution(&action, &[1]).await;

    let job = harness.claim("runner-a").await;
    let report = harness
        .dispatcher
        .report_job(ReportRequest::new(job.id, ActionJobState::Completed).with_patch(VALID_DIFF))
        .await
        .unwrap();

    assert!(report.plan_id().is_some());
    assert_eq!(report.linkage, Some(LinkageOutcome::NotCampaignBound));
    assert_eq!(harness.campaigns.plan_for(CAMPAIGN_ID), None);
}

#[tokio::test]
async fn test_linkage_only_runs_when_plan_is_created() {
    let harness = TestHarness::new();
    let action = harness.campaign_action().await;
    harness.execution(&action, &[1, 2]).await;
    let job = harness.claim("runner-a").await;

    let report = harness
        .dispatcher
        .report_job(ReportRequest::new(job.id, ActionJobState::Completed).with_patch(VALID_DIFF))
        .await
        .unwrap();

    assert!(report.linkage.is_none());
    assert_eq!(harness.campaigns.plan_for(CAMPAIGN_ID), None);
}

#[tokio::test]
async fn test_linkage_failure_keeps_plan_and_relink_recovers() {
    let store = InMemoryStore::new();
    let campaign = Arc::new(FlakyCampaign::failing(1));
    let dispatcher = dispatcher_with(&store, campaign.clone());

    let action = dispatcher
        .create_action(ActionBuilder::new().with_campaign(CAMPAIGN_ID).build())
        .await
        .unwrap();
    let created = dispatcher
        .create_execution_for_targets(
            action.id,
            &targets(&[1]),
            actions_core::InvocationReason::Manual,
        )
        .await
        .unwrap();
    let job = dispatcher.claim_job("runner-a").await.unwrap().unwrap();

    let report = dispatcher
        .report_job(ReportRequest::new(job.id, ActionJobState::Completed).with_patch(VALID_DIFF))
        .await
        .unwrap();

    let plan_id = report.plan_id().unwrap();
    let linkage = report.linkage.unwrap();
    assert!(linkage.is_failed());
    assert!(matches!(
        linkage,
        LinkageOutcome::Failed { error: DispatchError::CampaignLink { .. }, .. }
    ));

    // The job transition and the plan both stand
    assert_eq!(report.job.state, ActionJobState::Completed);
    let execution = dispatcher.get_execution(created.execution.id).await.unwrap();
    assert_eq!(execution.campaign_plan_id, Some(plan_id));
    assert!(campaign.attached.lock().is_empty());

    let relinked = dispatcher
        .relink_execution_plan(created.execution.id)
        .await
        .unwrap();

    assert!(relinked.is_linked());
    assert_eq!(*campaign.attached.lock(), vec![(CAMPAIGN_ID, plan_id)]);
}

#[tokio::test]
async fn test_unregistered_campaign_reports_failed_linkage() {
    let harness = TestHarness::new();
    let action = harness
        .dispatcher
        .create_action(ActionBuilder::new().with_campaign(99).build())
        .await
        .unwrap();
    harness.execution(&action, &[1]).await;

    let job = harness.claim("runner-a").await;
    let report = harness
        .dispatcher
        .report_job(ReportRequest::new(job.id, ActionJobState::Completed).with_patch(VALID_DIFF))
        .await
        .unwrap();

    assert!(report.linkage.as_ref().unwrap().is_failed());
    assert!(report.plan_id().is_some());
}

#[tokio::test]
async fn test_missing_updater_reports_failed_linkage() {
    let store = InMemoryStore::new();
    let dispatcher = ActionDispatcher::builder(Arc::new(store.clone())).build();

    let action = dispatcher
        .create_action(ActionBuilder::new().with_campaign(CAMPAIGN_ID).build())
        .await
        .unwrap();
    dispatcher
        .create_execution_for_targets(
            action.id,
            &targets(&[1]),
            actions_core::InvocationReason::Manual,
        )
        .await
        .unwrap();
    let job = dispatcher.claim_job("runner-a").await.unwrap().unwrap();

    let report = dispatcher
        .report_job(ReportRequest::new(job.id, ActionJobState::Failed))
        .await
        .unwrap();

    assert!(matches!(report.linkage, Some(LinkageOutcome::Failed { .. })));
    assert_eq!(store.plan_count().await, 1);
}

#[tokio::test]
async fn test_on_demand_aggregation_reports_failed_linkage() {
    let store = InMemoryStore::new();
    let campaign = Arc::new(FlakyCampaign::failing(1));
    let dispatcher = dispatcher_with(&store, campaign.clone());

    let action = dispatcher
        .create_action(ActionBuilder::new().with_campaign(CAMPAIGN_ID).build())
        .await
        .unwrap();
    let created = dispatcher
        .create_execution_for_targets(
            action.id,
            &targets(&[1]),
            actions_core::InvocationReason::Manual,
        )
        .await
        .unwrap();
    let job = dispatcher.claim_job("runner-a").await.unwrap().unwrap();

    // Finish the job outside the report path so no plan exists yet
    let mut tx = store.begin().await.unwrap();
    let mut finished = tx.get_job(job.id).await.unwrap().unwrap();
    finished.state = ActionJobState::Completed;
    finished.patch = Some(VALID_DIFF.to_string());
    tx.update_job(&finished).await.unwrap();
    tx.commit().await.unwrap();

    let report = dispatcher
        .check_and_aggregate(created.execution.id)
        .await
        .unwrap();

    let plan_id = report.plan_id().unwrap();
    assert!(matches!(
        report.linkage,
        Some(LinkageOutcome::Failed { plan_id: failed_plan, .. }) if failed_plan == plan_id
    ));
    assert!(campaign.attached.lock().is_empty());

    let relinked = dispatcher
        .relink_execution_plan(created.execution.id)
        .await
        .unwrap();
    assert!(relinked.is_linked());
    assert_eq!(*campaign.attached.lock(), vec![(CAMPAIGN_ID, plan_id)]);
}

#[tokio::test]
async fn test_relink_without_plan_is_not_found() {
    let harness = TestHarness::new();
    let action = harness.campaign_action().await;
    let created = harness.execution(&action, &[1]).await;

    let err = harness
        .dispatcher
        .relink_execution_plan(created.execution.id)
        .await
        .unwrap_err();

    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_link_events_are_published() {
    let harness = TestHarness::new();
    let action = harness.campaign_action().await;
    harness.execution(&action, &[1]).await;
    let job = harness.claim("runner-a").await;
    let mut events = harness.dispatcher.events().subscribe();

    harness
        .dispatcher
        .report_job(ReportRequest::new(job.id, ActionJobState::Completed).with_patch(VALID_DIFF))
        .await
        .unwrap();

    let mut names = Vec::new();
    while let Ok(event) = events.try_recv() {
        names.push(event.name);
    }
    assert_eq!(
        names,
        vec!["job.reported", "execution.aggregated", "campaign.linked"]
    );
}
