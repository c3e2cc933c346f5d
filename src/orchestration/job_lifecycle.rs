//! # Job Lifecycle
//!
//! Runner reports, log heartbeats, operator retries and watchdog timeouts.
//!
//! ## Overview
//!
//! Every state change re-reads the job under lock, checks the transition
//! against the state machine, writes the result and, when the job became
//! terminal, runs the aggregation check, all in one transaction. Terminal
//! transitions lock the execution row before the job row, so completions of
//! sibling jobs serialize and exactly one of them creates the plan.
//!
//! Campaign linkage and event publishing happen after commit. A linkage
//! failure never undoes the plan.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use super::aggregator::{AggregationOutcome, Aggregator};
use super::campaign_linkage::{CampaignLinkage, LinkageOutcome};
use crate::constants::events;
use crate::database::{Store, StoreTransaction};
use crate::error::{DispatchError, Result};
use crate::events::EventPublisher;
use crate::logging::log_job_operation;
use crate::models::ActionJob;
use crate::state_machine::{ActionJobState, JobEvent, JobStateMachine};
use crate::validation::{normalize_patch, PatchValidator};

/// Result of a state-changing job call
#[derive(Debug, Clone, PartialEq)]
pub struct JobReport {
    /// The job as committed
    pub job: ActionJob,
    /// Set when the job became terminal
    pub aggregation: Option<AggregationOutcome>,
    /// Set when this call created a plan for a campaign-bound action
    pub linkage: Option<LinkageOutcome>,
}

impl JobReport {
    pub fn plan_id(&self) -> Option<i64> {
        self.aggregation
            .as_ref()
            .and_then(|a| a.created_plan())
            .map(|plan| plan.id)
    }
}

/// A runner's report on a job it holds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportRequest {
    pub job_id: i64,
    pub state: ActionJobState,
    pub patch: Option<String>,
    pub log: Option<String>,
}

impl ReportRequest {
    pub fn new(job_id: i64, state: ActionJobState) -> Self {
        Self {
            job_id,
            state,
            patch: None,
            log: None,
        }
    }

    pub fn with_patch(mut self, patch: impl Into<String>) -> Self {
        self.patch = Some(patch.into());
        self
    }

    pub fn with_log(mut self, log: impl Into<String>) -> Self {
        self.log = Some(log.into());
        self
    }
}

/// Applies job events and triggers aggregation
#[derive(Clone)]
pub struct JobLifecycle {
    store: Arc<dyn Store>,
    patch_validator: Arc<dyn PatchValidator>,
    aggregator: Aggregator,
    linkage: CampaignLinkage,
    event_publisher: EventPublisher,
}

impl JobLifecycle {
    pub fn new(
        store: Arc<dyn Store>,
        patch_validator: Arc<dyn PatchValidator>,
        aggregator: Aggregator,
        linkage: CampaignLinkage,
        event_publisher: EventPublisher,
    ) -> Self {
        Self {
            store,
            patch_validator,
            aggregator,
            linkage,
            event_publisher,
        }
    }

    /// Record a runner's report.
    ///
    /// The job must be running. A supplied patch must be a valid unified
    /// diff; blank patch text counts as no patch. Rejected reports change
    /// nothing.
    #[instrument(skip(self, request), fields(job_id = request.job_id, state = %request.state))]
    pub async fn report(&self, request: ReportRequest) -> Result<JobReport> {
        let ReportRequest {
            job_id,
            state,
            patch,
            log,
        } = request;
        let patch = normalize_patch(patch);

        let mut tx = self.store.begin().await?;
        let mut job = lock_job(tx.as_mut(), job_id).await?;

        let mut machine = JobStateMachine::new(&mut job);
        if let Err(e) = machine.determine_target_state(&JobEvent::Report(state)) {
            warn!(job_id, error = %e, "Rejected report");
            return Err(e.into());
        }

        if let Some(patch) = patch.as_deref() {
            if let Err(parse_error) = self.patch_validator.validate(patch) {
                warn!(job_id, error = %parse_error, "Rejected report with invalid patch");
                return Err(DispatchError::InvalidPatch(parse_error.to_string()));
            }
        }

        machine.report(state, patch, log.as_deref(), Utc::now())?;
        let job = tx.update_job(&job).await?;

        self.finish(tx, job, events::JOB_REPORTED).await
    }

    /// Move a running job to timed out.
    ///
    /// Entry point for an external watchdog; aggregates like a failure.
    #[instrument(skip(self))]
    pub async fn time_out(&self, job_id: i64) -> Result<JobReport> {
        let mut tx = self.store.begin().await?;
        let mut job = lock_job(tx.as_mut(), job_id).await?;

        if let Err(e) = JobStateMachine::new(&mut job).time_out(Utc::now()) {
            warn!(job_id, error = %e, "Rejected timeout");
            return Err(e.into());
        }
        let job = tx.update_job(&job).await?;

        self.finish(tx, job, events::JOB_TIMED_OUT).await
    }

    /// Append to a job's log and stamp the heartbeat. Allowed in any state.
    #[instrument(skip(self, content), fields(bytes = content.len()))]
    pub async fn append_log(&self, job_id: i64, content: &str) -> Result<ActionJob> {
        let mut tx = self.store.begin().await?;
        let job = tx.append_job_log(job_id, content, Utc::now()).await?;
        tx.commit().await?;

        debug!(job_id, execution_id = job.execution_id, "Log appended");
        self.event_publisher.publish_job(events::JOB_LOG_APPENDED, &job);

        Ok(job)
    }

    /// Reset a job to pending from any state, clearing its result and
    /// runner fields.
    #[instrument(skip(self))]
    pub async fn retry(&self, job_id: i64) -> Result<ActionJob> {
        let mut tx = self.store.begin().await?;

        let mut job = tx
            .get_job_for_update(job_id)
            .await?
            .ok_or_else(|| DispatchError::not_found("ActionJob", job_id))?;
        let previous = job.state;

        let now = Utc::now();
        JobStateMachine::new(&mut job).retry(now)?;
        let job = tx.reset_job(job_id, now).await?;
        tx.commit().await?;

        info!(job_id, execution_id = job.execution_id, from = %previous, "Job reset for retry");
        log_job_operation(
            "retry",
            Some(job.id),
            Some(job.execution_id),
            None,
            job.state.as_str(),
            Some(previous.as_str()),
        );
        self.event_publisher.publish_job(events::JOB_RETRIED, &job);

        Ok(job)
    }

    /// Aggregate if the job became terminal, commit, then link and publish
    async fn finish(
        &self,
        mut tx: Box<dyn StoreTransaction>,
        job: ActionJob,
        event_name: &str,
    ) -> Result<JobReport> {
        let aggregation = if job.state.is_terminal() {
            Some(
                self.aggregator
                    .check_and_aggregate_in_tx(tx.as_mut(), job.execution_id)
                    .await?,
            )
        } else {
            None
        };

        // The owning action decides whether a new plan goes to a campaign
        let owning_action = match aggregation.as_ref() {
            Some(AggregationOutcome::Created { execution, .. }) => {
                tx.get_action(execution.action_id).await?
            }
            _ => None,
        };

        tx.commit().await?;

        info!(
            job_id = job.id,
            execution_id = job.execution_id,
            state = %job.state,
            "Job transition committed"
        );
        log_job_operation(
            event_name,
            Some(job.id),
            Some(job.execution_id),
            job.runner_id.as_deref(),
            job.state.as_str(),
            None,
        );
        self.event_publisher.publish_job(event_name, &job);

        let mut linkage = None;
        if let Some(outcome) = aggregation.as_ref() {
            self.aggregator.publish(outcome);
            if let (Some(plan), Some(action)) = (outcome.created_plan(), owning_action.as_ref()) {
                linkage = Some(self.linkage.link(action, plan.id).await);
            }
        }

        Ok(JobReport {
            job,
            aggregation,
            linkage,
        })
    }
}

/// Lock the owning execution, then the job.
///
/// The execution lock comes first so that terminal transitions of sibling
/// jobs serialize before the aggregation check.
async fn lock_job(tx: &mut dyn StoreTransaction, job_id: i64) -> Result<ActionJob> {
    let execution_id = tx
        .get_job(job_id)
        .await?
        .ok_or_else(|| DispatchError::not_found("ActionJob", job_id))?
        .execution_id;

    tx.get_execution_for_update(execution_id)
        .await?
        .ok_or_else(|| DispatchError::not_found("ActionExecution", execution_id))?;

    tx.get_job_for_update(job_id)
        .await?
        .ok_or_else(|| DispatchError::not_found("ActionJob", job_id))
}
