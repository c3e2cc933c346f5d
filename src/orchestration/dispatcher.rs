//! # Action Dispatcher
//!
//! The caller-facing surface of the dispatcher: action management, execution
//! creation, the runner protocol (claim, report, log, retry) and paginated
//! reads. Transport layers sit on top of this type.
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use actions_core::config::DispatcherConfig;
//! use actions_core::database::InMemoryStore;
//! use actions_core::models::{ActionDefinition, ActionStep, NewAction, TargetRepo};
//! use actions_core::models::InvocationReason;
//! use actions_core::orchestration::{ActionDispatcher, ReportRequest};
//! use actions_core::state_machine::ActionJobState;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let dispatcher = ActionDispatcher::builder(Arc::new(InMemoryStore::new()))
//!     .config(DispatcherConfig::default())
//!     .build();
//!
//! let action = dispatcher
//!     .create_action(NewAction::new(
//!         "bump-deps",
//!         ActionDefinition::new(vec![ActionStep::new("./bump.sh", "alpine:3")]),
//!     ))
//!     .await?;
//!
//! let targets = vec![TargetRepo::new(1, "4f2a9c1", "refs/heads/main")];
//! dispatcher
//!     .create_execution_for_targets(action.id, &targets, InvocationReason::Manual)
//!     .await?;
//!
//! if let Some(job) = dispatcher.claim_job("runner-1").await? {
//!     dispatcher
//!         .report_job(ReportRequest::new(job.id, ActionJobState::Failed))
//!         .await?;
//! }
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use futures::future::try_join_all;
use tracing::{info, instrument, warn};

use super::aggregator::{AggregationOutcome, Aggregator};
use super::campaign_linkage::{CampaignLinkage, CampaignUpdater, LinkageOutcome};
use super::execution_coordinator::{ExecutionCoordinator, ExecutionCreationResult};
use super::job_lifecycle::{JobLifecycle, JobReport, ReportRequest};
use super::job_queue::JobQueue;
use super::repo_resolver::{RepoResolver, StaticRepoResolver};
use crate::config::{DispatcherConfig, PaginationConfig};
use crate::database::{ExecutionFilter, JobFilter, ListOpts, Page, Store};
use crate::error::{DispatchError, Result};
use crate::events::EventPublisher;
use crate::models::{
    Action, ActionExecution, ActionJob, CampaignPlan, CampaignPlanPatch, InvocationReason,
    NewAction, TargetRepo,
};
use crate::validation::{validate_action_definition, PatchValidator, UnifiedDiffValidator};

/// Builder for [`ActionDispatcher`]
pub struct ActionDispatcherBuilder {
    store: Arc<dyn Store>,
    config: DispatcherConfig,
    patch_validator: Arc<dyn PatchValidator>,
    campaign_updater: Option<Arc<dyn CampaignUpdater>>,
    repo_resolver: Arc<dyn RepoResolver>,
    event_publisher: Option<EventPublisher>,
}

impl ActionDispatcherBuilder {
    pub fn config(mut self, config: DispatcherConfig) -> Self {
        self.config = config;
        self
    }

    pub fn patch_validator(mut self, validator: Arc<dyn PatchValidator>) -> Self {
        self.patch_validator = validator;
        self
    }

    pub fn campaign_updater(mut self, updater: Arc<dyn CampaignUpdater>) -> Self {
        self.campaign_updater = Some(updater);
        self
    }

    pub fn repo_resolver(mut self, resolver: Arc<dyn RepoResolver>) -> Self {
        self.repo_resolver = resolver;
        self
    }

    /// Share an existing publisher instead of building one from configuration
    pub fn event_publisher(mut self, publisher: EventPublisher) -> Self {
        self.event_publisher = Some(publisher);
        self
    }

    pub fn build(self) -> ActionDispatcher {
        let events = self.event_publisher.unwrap_or_else(|| {
            if self.config.events.enabled {
                EventPublisher::new(self.config.events.channel_capacity)
            } else {
                EventPublisher::disabled()
            }
        });

        let aggregator = Aggregator::new(self.store.clone(), events.clone());
        let linkage = CampaignLinkage::new(self.campaign_updater, events.clone());

        ActionDispatcher {
            coordinator: ExecutionCoordinator::new(self.store.clone(), events.clone()),
            queue: JobQueue::new(self.store.clone(), self.config.queue.clone(), events.clone()),
            lifecycle: JobLifecycle::new(
                self.store.clone(),
                self.patch_validator.clone(),
                aggregator.clone(),
                linkage.clone(),
                events.clone(),
            ),
            aggregator,
            linkage,
            patch_validator: self.patch_validator,
            repo_resolver: self.repo_resolver,
            pagination: self.config.pagination.clone(),
            instance_id: self.config.instance_id,
            store: self.store,
            events,
        }
    }
}

/// Result of an on-demand completeness check
#[derive(Debug, Clone, PartialEq)]
pub struct AggregationReport {
    pub outcome: AggregationOutcome,
    /// Set when this call created a plan for a campaign-bound action
    pub linkage: Option<LinkageOutcome>,
}

impl AggregationReport {
    pub fn plan_id(&self) -> Option<i64> {
        self.outcome.created_plan().map(|plan| plan.id)
    }
}

/// Dispatcher facade
#[derive(Clone)]
pub struct ActionDispatcher {
    store: Arc<dyn Store>,
    coordinator: ExecutionCoordinator,
    queue: JobQueue,
    lifecycle: JobLifecycle,
    aggregator: Aggregator,
    linkage: CampaignLinkage,
    patch_validator: Arc<dyn PatchValidator>,
    repo_resolver: Arc<dyn RepoResolver>,
    pagination: PaginationConfig,
    instance_id: String,
    events: EventPublisher,
}

impl ActionDispatcher {
    pub fn builder(store: Arc<dyn Store>) -> ActionDispatcherBuilder {
        ActionDispatcherBuilder {
            store,
            config: DispatcherConfig::default(),
            patch_validator: Arc::new(UnifiedDiffValidator),
            campaign_updater: None,
            repo_resolver: Arc::new(StaticRepoResolver::default()),
            event_publisher: None,
        }
    }

    /// Lifecycle events published by this dispatcher
    pub fn events(&self) -> &EventPublisher {
        &self.events
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    // --- Actions ---

    #[instrument(skip(self, new_action), fields(instance = %self.instance_id, name = %new_action.name))]
    pub async fn create_action(&self, new_action: NewAction) -> Result<Action> {
        validate_action_definition(&new_action.definition)?;

        let mut tx = self.store.begin().await?;
        let action = tx.create_action(&new_action).await?;
        tx.commit().await?;

        info!(action_id = action.id, steps = action.steps().len(), "Action created");
        Ok(action)
    }

    /// Parse a JSON action definition and create the action
    pub async fn create_action_from_json(&self, name: &str, definition: &str) -> Result<Action> {
        let definition = crate::models::ActionDefinition::from_json(definition)
            .map_err(|e| DispatchError::validation(format!("Invalid action definition: {e}")))?;
        self.create_action(NewAction::new(name, definition)).await
    }

    /// Replace an action's definition; bumps its version
    #[instrument(skip(self, update), fields(instance = %self.instance_id))]
    pub async fn update_action(&self, action_id: i64, update: NewAction) -> Result<Action> {
        validate_action_definition(&update.definition)?;

        let mut tx = self.store.begin().await?;
        let action = tx.update_action(action_id, &update).await?;
        tx.commit().await?;

        info!(action_id, version = action.version, "Action updated");
        Ok(action)
    }

    pub async fn get_action(&self, action_id: i64) -> Result<Action> {
        self.store
            .get_action(action_id)
            .await?
            .ok_or_else(|| DispatchError::not_found("Action", action_id))
    }

    pub async fn list_actions(&self, opts: ListOpts) -> Result<Page<Action>> {
        let opts = opts.resolve(&self.pagination);
        let mut tx = self.store.begin().await?;
        let page = tx.list_actions(&opts).await?;
        tx.commit().await?;
        Ok(page)
    }

    // --- Executions ---

    /// Create an execution over the repositories the resolver picks
    #[instrument(skip(self), fields(instance = %self.instance_id))]
    pub async fn create_execution(
        &self,
        action_id: i64,
        reason: InvocationReason,
    ) -> Result<ExecutionCreationResult> {
        let action = self.get_action(action_id).await?;
        let targets = self.repo_resolver.resolve(&action).await?;
        self.coordinator
            .create_execution(action.id, &targets, reason)
            .await
    }

    /// Create an execution over an explicit repository set
    pub async fn create_execution_for_targets(
        &self,
        action_id: i64,
        targets: &[TargetRepo],
        reason: InvocationReason,
    ) -> Result<ExecutionCreationResult> {
        self.coordinator
            .create_execution(action_id, targets, reason)
            .await
    }

    /// One saved-search execution per action watching `query`.
    ///
    /// Targets for every watcher are resolved up front. Creation stops at the
    /// first failure; executions created before it stay.
    #[instrument(skip(self), fields(instance = %self.instance_id))]
    pub async fn create_executions_for_saved_search(
        &self,
        query: &str,
    ) -> Result<Vec<ExecutionCreationResult>> {
        let mut tx = self.store.begin().await?;
        let actions = tx.list_actions_by_saved_search_query(query).await?;
        tx.commit().await?;

        let resolved = try_join_all(actions.iter().map(|action| self.repo_resolver.resolve(action)))
            .await?;

        let mut created = Vec::with_capacity(actions.len());
        for (action, targets) in actions.iter().zip(resolved) {
            let result = self
                .coordinator
                .create_execution(action.id, &targets, InvocationReason::SavedSearch)
                .await
                .map_err(|e| {
                    warn!(action_id = action.id, error = %e, "Saved search fan-out stopped");
                    e
                })?;
            created.push(result);
        }

        info!(query, executions = created.len(), "Saved search executions created");
        Ok(created)
    }

    pub async fn get_execution(&self, execution_id: i64) -> Result<ActionExecution> {
        self.store
            .get_execution(execution_id)
            .await?
            .ok_or_else(|| DispatchError::not_found("ActionExecution", execution_id))
    }

    pub async fn list_executions(
        &self,
        filter: ExecutionFilter,
        opts: ListOpts,
    ) -> Result<Page<ActionExecution>> {
        let opts = opts.resolve(&self.pagination);
        let mut tx = self.store.begin().await?;
        let page = tx.list_executions(&filter, &opts).await?;
        tx.commit().await?;
        Ok(page)
    }

    /// Run the completeness check for an execution on demand.
    ///
    /// A plan created here is pushed into the action's campaign and the
    /// linkage result is returned alongside the outcome.
    pub async fn check_and_aggregate(&self, execution_id: i64) -> Result<AggregationReport> {
        let outcome = self.aggregator.check_and_aggregate(execution_id).await?;

        let linkage = match &outcome {
            AggregationOutcome::Created { execution, plan } => {
                let action = self.get_action(execution.action_id).await?;
                Some(self.linkage.link(&action, plan.id).await)
            }
            _ => None,
        };

        Ok(AggregationReport { outcome, linkage })
    }

    /// Build a plan directly from operator-supplied patches.
    ///
    /// Every patch must pass the diff check; the first failure names its
    /// repository and nothing is written. The plan is not attached to any
    /// execution.
    #[instrument(skip(self, patches), fields(instance = %self.instance_id, patches = patches.len()))]
    pub async fn create_plan_from_patches(
        &self,
        patches: Vec<CampaignPlanPatch>,
    ) -> Result<CampaignPlan> {
        for patch in &patches {
            if let Err(parse_error) = self.patch_validator.validate(&patch.patch) {
                return Err(DispatchError::InvalidPatch(format!(
                    "patch for repository {} (base revision {:?}): {parse_error}",
                    patch.repo_id, patch.base_revision
                )));
            }
        }

        let mut tx = self.store.begin().await?;
        let plan = tx.create_plan(&patches).await?;
        tx.commit().await?;

        info!(plan_id = plan.id, patches = plan.patch_count(), "Campaign plan created from patches");
        Ok(plan)
    }

    /// Push an execution's existing plan into its campaign again
    #[instrument(skip(self), fields(instance = %self.instance_id))]
    pub async fn relink_execution_plan(&self, execution_id: i64) -> Result<LinkageOutcome> {
        let execution = self.get_execution(execution_id).await?;
        let plan_id = execution.campaign_plan_id.ok_or_else(|| {
            DispatchError::not_found("CampaignPlan", format!("for execution {execution_id}"))
        })?;

        let action = self.get_action(execution.action_id).await?;
        Ok(self.linkage.link(&action, plan_id).await)
    }

    pub async fn get_plan(&self, plan_id: i64) -> Result<CampaignPlan> {
        self.store
            .get_plan(plan_id)
            .await?
            .ok_or_else(|| DispatchError::not_found("CampaignPlan", plan_id))
    }

    // --- Runner protocol ---

    /// Claim the oldest pending job, or `None` when the queue is empty
    pub async fn claim_job(&self, runner_id: &str) -> Result<Option<ActionJob>> {
        self.queue.claim(runner_id).await
    }

    pub async fn report_job(&self, request: ReportRequest) -> Result<JobReport> {
        self.lifecycle.report(request).await
    }

    pub async fn append_log(&self, job_id: i64, content: &str) -> Result<ActionJob> {
        self.lifecycle.append_log(job_id, content).await
    }

    pub async fn retry_job(&self, job_id: i64) -> Result<()> {
        self.lifecycle.retry(job_id).await.map(|_| ())
    }

    /// Watchdog entry point: running job to timed out
    pub async fn time_out_job(&self, job_id: i64) -> Result<JobReport> {
        self.lifecycle.time_out(job_id).await
    }

    pub async fn get_job(&self, job_id: i64) -> Result<ActionJob> {
        self.store
            .get_job(job_id)
            .await?
            .ok_or_else(|| DispatchError::not_found("ActionJob", job_id))
    }

    pub async fn list_jobs(&self, filter: JobFilter, opts: ListOpts) -> Result<Page<ActionJob>> {
        let opts = opts.resolve(&self.pagination);
        let mut tx = self.store.begin().await?;
        let page = tx.list_jobs(&filter, &opts).await?;
        tx.commit().await?;
        Ok(page)
    }
}
