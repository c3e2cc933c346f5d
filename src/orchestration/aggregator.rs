//! # Aggregator
//!
//! Turns a fully terminal execution into a campaign plan, exactly once.
//!
//! ## Overview
//!
//! The check runs after every transition into a terminal state, inside the
//! transaction that made the transition. The caller has already locked the
//! execution row, so of two jobs finishing concurrently the second one waits,
//! then sees the plan the first one attached and does nothing.
//!
//! Only completed jobs with a non-blank patch contribute. Failed and timed
//! out jobs count as terminal but are left out of the plan.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::constants::events;
use crate::database::{Store, StoreTransaction};
use crate::error::{DispatchError, Result};
use crate::events::EventPublisher;
use crate::logging::log_execution_operation;
use crate::models::{ActionExecution, CampaignPlan, CampaignPlanPatch};

/// What a completeness check did
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AggregationOutcome {
    /// Some jobs are still pending or running
    Incomplete { outstanding_jobs: usize },
    /// A plan was attached earlier; nothing was written
    AlreadyAggregated { plan_id: i64 },
    /// This call created the plan and attached it to the execution
    Created {
        execution: ActionExecution,
        plan: CampaignPlan,
    },
}

impl AggregationOutcome {
    /// The plan created by this call, if any
    pub fn created_plan(&self) -> Option<&CampaignPlan> {
        match self {
            Self::Created { plan, .. } => Some(plan),
            _ => None,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, Self::Created { .. })
    }
}

/// Completeness check and plan creation for executions
#[derive(Clone)]
pub struct Aggregator {
    store: Arc<dyn Store>,
    event_publisher: EventPublisher,
}

impl Aggregator {
    pub fn new(store: Arc<dyn Store>, event_publisher: EventPublisher) -> Self {
        Self {
            store,
            event_publisher,
        }
    }

    /// Run the check in its own transaction
    #[instrument(skip(self))]
    pub async fn check_and_aggregate(&self, execution_id: i64) -> Result<AggregationOutcome> {
        let mut tx = self.store.begin().await?;
        let outcome = self.check_and_aggregate_in_tx(tx.as_mut(), execution_id).await?;
        tx.commit().await?;

        self.publish(&outcome);
        Ok(outcome)
    }

    /// Run the check inside the caller's transaction.
    ///
    /// Takes the execution row lock if the caller does not hold it yet.
    /// Events for a created plan are left to the caller, which publishes them
    /// once the transaction has committed.
    pub async fn check_and_aggregate_in_tx(
        &self,
        tx: &mut dyn StoreTransaction,
        execution_id: i64,
    ) -> Result<AggregationOutcome> {
        let execution = tx
            .get_execution_for_update(execution_id)
            .await?
            .ok_or_else(|| DispatchError::not_found("ActionExecution", execution_id))?;

        let jobs = tx.list_all_jobs(execution_id).await?;
        let outstanding_jobs = jobs.iter().filter(|job| !job.state.is_terminal()).count();
        if outstanding_jobs > 0 {
            debug!(execution_id, outstanding_jobs, "Execution not complete yet");
            return Ok(AggregationOutcome::Incomplete { outstanding_jobs });
        }

        if let Some(plan_id) = execution.campaign_plan_id {
            debug!(execution_id, plan_id, "Execution already aggregated");
            return Ok(AggregationOutcome::AlreadyAggregated { plan_id });
        }

        // Job order is creation order, which is the order patches appear in the plan
        let patches: Vec<CampaignPlanPatch> =
            jobs.iter().filter_map(|job| job.plan_patch()).collect();

        let plan = tx.create_plan(&patches).await?;

        if !tx.set_execution_plan(execution_id, plan.id).await? {
            // Unreachable while the execution row is locked; treated as a no-op
            let current = tx
                .get_execution(execution_id)
                .await?
                .and_then(|e| e.campaign_plan_id)
                .unwrap_or(plan.id);
            let guard = DispatchError::AlreadyLinked {
                execution_id,
                plan_id: current,
            };
            debug!(error = %guard, "Plan already attached, skipping");
            return Ok(AggregationOutcome::AlreadyAggregated { plan_id: current });
        }

        let execution = ActionExecution {
            campaign_plan_id: Some(plan.id),
            ..execution
        };

        info!(
            execution_id,
            plan_id = plan.id,
            patch_count = plan.patch_count(),
            job_count = jobs.len(),
            "Campaign plan created"
        );

        Ok(AggregationOutcome::Created { execution, plan })
    }

    /// Publish the lifecycle event for an outcome that created a plan
    pub fn publish(&self, outcome: &AggregationOutcome) {
        if let AggregationOutcome::Created { execution, plan } = outcome {
            log_execution_operation(
                "aggregate",
                Some(execution.id),
                Some(execution.action_id),
                Some(plan.id),
                "created",
                None,
            );
            self.event_publisher.publish(
                events::EXECUTION_AGGREGATED,
                serde_json::json!({
                    "execution_id": execution.id,
                    "action_id": execution.action_id,
                    "campaign_plan_id": plan.id,
                    "patch_count": plan.patch_count(),
                    "repo_ids": plan.repo_ids(),
                }),
            );
        }
    }
}
