//! In-memory store for tests and embedded use.
//!
//! A transaction holds the store-wide lock from `begin` until it ends and
//! works on a private copy of the data. Commit publishes the copy; rollback or
//! drop throws it away. Transactions are therefore fully serialized.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::pagination::{ExecutionFilter, JobFilter, ListOpts, Page};
use super::store::{Store, StoreTransaction};
use crate::error::{DispatchError, Result};
use crate::models::{
    Action, ActionExecution, ActionJob, CampaignPlan, CampaignPlanPatch, InvocationReason,
    NewAction, TargetRepo,
};
use crate::state_machine::{ActionJobState, JobStateMachine};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    actions: BTreeMap<i64, Action>,
    executions: BTreeMap<i64, ActionExecution>,
    jobs: BTreeMap<i64, ActionJob>,
    plans: BTreeMap<i64, CampaignPlan>,
    last_action_id: i64,
    last_execution_id: i64,
    last_job_id: i64,
    last_plan_id: i64,
}

/// In-memory store.
///
/// Cloning is cheap and every clone shares the same data.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<MemoryState>>,
    failures: Arc<parking_lot::Mutex<HashSet<&'static str>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next call of the named store operation fail with a store
    /// error, e.g. `"create_plan"`.
    pub fn fail_next(&self, operation: &'static str) {
        self.failures.lock().insert(operation);
    }

    /// Number of executions currently stored
    pub async fn execution_count(&self) -> usize {
        self.state.lock().await.executions.len()
    }

    /// Number of jobs currently stored
    pub async fn job_count(&self) -> usize {
        self.state.lock().await.jobs.len()
    }

    /// Number of plans currently stored
    pub async fn plan_count(&self) -> usize {
        self.state.lock().await.plans.len()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();

        Ok(Box::new(InMemoryTransaction {
            guard,
            working,
            failures: self.failures.clone(),
        }))
    }
}

/// Open transaction over an [`InMemoryStore`]
pub struct InMemoryTransaction {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
    failures: Arc<parking_lot::Mutex<HashSet<&'static str>>>,
}

impl InMemoryTransaction {
    fn check(&self, operation: &'static str) -> Result<()> {
        if self.failures.lock().remove(operation) {
            return Err(DispatchError::store(format!(
                "injected failure in {operation}"
            )));
        }
        Ok(())
    }

    fn job_mut(&mut self, job_id: i64) -> Result<&mut ActionJob> {
        self.working
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| DispatchError::not_found("ActionJob", job_id))
    }
}

fn paginate<T: Clone>(
    rows: impl Iterator<Item = (i64, T)>,
    opts: &ListOpts,
) -> Page<T> {
    let matching: Vec<(i64, T)> = rows.collect();
    let total_count = matching.len() as i64;
    let limit = opts.effective_limit();

    let window: Vec<(i64, T)> = matching
        .into_iter()
        .filter(|(id, _)| opts.cursor.map_or(true, |cursor| *id > cursor))
        .take(limit + 1)
        .collect();

    let page = Page::from_overfetch(window, limit, total_count, |(id, _)| *id);
    Page {
        nodes: page.nodes.into_iter().map(|(_, row)| row).collect(),
        total_count: page.total_count,
        next_cursor: page.next_cursor,
    }
}

#[async_trait]
impl StoreTransaction for InMemoryTransaction {
    async fn create_action(&mut self, new_action: &NewAction) -> Result<Action> {
        self.check("create_action")?;

        let now = Utc::now();
        self.working.last_action_id += 1;
        let action = Action {
            id: self.working.last_action_id,
            name: new_action.name.clone(),
            definition: new_action.definition.clone(),
            campaign_id: new_action.campaign_id,
            saved_search_query: new_action.saved_search_query.clone(),
            version: 1,
            created_at: now,
            updated_at: now,
        };
        self.working.actions.insert(action.id, action.clone());

        Ok(action)
    }

    async fn update_action(&mut self, action_id: i64, update: &NewAction) -> Result<Action> {
        self.check("update_action")?;

        let action = self
            .working
            .actions
            .get_mut(&action_id)
            .ok_or_else(|| DispatchError::not_found("Action", action_id))?;

        action.name = update.name.clone();
        action.definition = update.definition.clone();
        action.campaign_id = update.campaign_id;
        action.saved_search_query = update.saved_search_query.clone();
        action.version += 1;
        action.updated_at = Utc::now();

        Ok(action.clone())
    }

    async fn get_action(&mut self, action_id: i64) -> Result<Option<Action>> {
        self.check("get_action")?;
        Ok(self.working.actions.get(&action_id).cloned())
    }

    async fn list_actions(&mut self, opts: &ListOpts) -> Result<Page<Action>> {
        self.check("list_actions")?;
        Ok(paginate(
            self.working.actions.iter().map(|(id, a)| (*id, a.clone())),
            opts,
        ))
    }

    async fn list_actions_by_saved_search_query(&mut self, query: &str) -> Result<Vec<Action>> {
        self.check("list_actions_by_saved_search_query")?;
        Ok(self
            .working
            .actions
            .values()
            .filter(|action| action.saved_search_query.as_deref() == Some(query))
            .cloned()
            .collect())
    }

    async fn create_execution(
        &mut self,
        action_id: i64,
        reason: InvocationReason,
        targets: &[TargetRepo],
    ) -> Result<(ActionExecution, Vec<ActionJob>)> {
        self.check("create_execution")?;

        if !self.working.actions.contains_key(&action_id) {
            return Err(DispatchError::not_found("Action", action_id));
        }

        let now = Utc::now();
        self.working.last_execution_id += 1;
        let execution = ActionExecution {
            id: self.working.last_execution_id,
            action_id,
            invocation_reason: reason,
            campaign_plan_id: None,
            created_at: now,
            updated_at: now,
        };
        self.working
            .executions
            .insert(execution.id, execution.clone());

        let mut jobs = Vec::with_capacity(targets.len());
        for target in targets {
            self.check("create_job")?;

            self.working.last_job_id += 1;
            let job = ActionJob {
                id: self.working.last_job_id,
                execution_id: execution.id,
                repo_id: target.repo_id,
                base_revision: target.base_revision.clone(),
                base_reference: target.base_reference.clone(),
                state: ActionJobState::Pending,
                patch: None,
                log: None,
                runner_id: None,
                runner_seen_at: None,
                execution_start: None,
                execution_end: None,
                created_at: now,
                updated_at: now,
            };
            self.working.jobs.insert(job.id, job.clone());
            jobs.push(job);
        }

        Ok((execution, jobs))
    }

    async fn get_execution(&mut self, execution_id: i64) -> Result<Option<ActionExecution>> {
        self.check("get_execution")?;
        Ok(self.working.executions.get(&execution_id).cloned())
    }

    async fn get_execution_for_update(
        &mut self,
        execution_id: i64,
    ) -> Result<Option<ActionExecution>> {
        // The transaction already holds the store-wide lock
        self.check("get_execution_for_update")?;
        Ok(self.working.executions.get(&execution_id).cloned())
    }

    async fn set_execution_plan(&mut self, execution_id: i64, plan_id: i64) -> Result<bool> {
        self.check("set_execution_plan")?;

        let execution = self
            .working
            .executions
            .get_mut(&execution_id)
            .ok_or_else(|| DispatchError::not_found("ActionExecution", execution_id))?;

        if execution.campaign_plan_id.is_some() {
            return Ok(false);
        }

        execution.campaign_plan_id = Some(plan_id);
        execution.updated_at = Utc::now();
        Ok(true)
    }

    async fn list_executions(
        &mut self,
        filter: &ExecutionFilter,
        opts: &ListOpts,
    ) -> Result<Page<ActionExecution>> {
        self.check("list_executions")?;
        Ok(paginate(
            self.working
                .executions
                .iter()
                .filter(|(_, e)| filter.action_id.map_or(true, |id| e.action_id == id))
                .map(|(id, e)| (*id, e.clone())),
            opts,
        ))
    }

    async fn claim_job(
        &mut self,
        runner_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Option<ActionJob>> {
        self.check("claim_job")?;

        let Some(job) = self
            .working
            .jobs
            .values_mut()
            .find(|job| job.state == ActionJobState::Pending)
        else {
            return Ok(None);
        };

        JobStateMachine::new(job).claim(runner_id, now)?;

        Ok(Some(job.clone()))
    }

    async fn get_job(&mut self, job_id: i64) -> Result<Option<ActionJob>> {
        self.check("get_job")?;
        Ok(self.working.jobs.get(&job_id).cloned())
    }

    async fn get_job_for_update(&mut self, job_id: i64) -> Result<Option<ActionJob>> {
        self.check("get_job_for_update")?;
        Ok(self.working.jobs.get(&job_id).cloned())
    }

    async fn update_job(&mut self, job: &ActionJob) -> Result<ActionJob> {
        self.check("update_job")?;

        let stored = self.job_mut(job.id)?;
        *stored = job.clone();
        Ok(stored.clone())
    }

    async fn append_job_log(
        &mut self,
        job_id: i64,
        content: &str,
        now: DateTime<Utc>,
    ) -> Result<ActionJob> {
        self.check("append_job_log")?;

        let job = self.job_mut(job_id)?;
        job.append_log(content);
        job.runner_seen_at = Some(now);
        job.updated_at = now;
        Ok(job.clone())
    }

    async fn list_jobs(&mut self, filter: &JobFilter, opts: &ListOpts) -> Result<Page<ActionJob>> {
        self.check("list_jobs")?;
        Ok(paginate(
            self.working
                .jobs
                .iter()
                .filter(|(_, j)| filter.execution_id.map_or(true, |id| j.execution_id == id))
                .filter(|(_, j)| filter.state.map_or(true, |state| j.state == state))
                .map(|(id, j)| (*id, j.clone())),
            opts,
        ))
    }

    async fn list_all_jobs(&mut self, execution_id: i64) -> Result<Vec<ActionJob>> {
        self.check("list_all_jobs")?;
        Ok(self
            .working
            .jobs
            .values()
            .filter(|job| job.execution_id == execution_id)
            .cloned()
            .collect())
    }

    async fn reset_job(&mut self, job_id: i64, now: DateTime<Utc>) -> Result<ActionJob> {
        self.check("reset_job")?;

        let job = self.job_mut(job_id)?;
        job.state = ActionJobState::Pending;
        job.patch = None;
        job.log = None;
        job.runner_id = None;
        job.runner_seen_at = None;
        job.execution_start = None;
        job.execution_end = None;
        job.updated_at = now;
        Ok(job.clone())
    }

    async fn create_plan(&mut self, patches: &[CampaignPlanPatch]) -> Result<CampaignPlan> {
        self.check("create_plan")?;

        self.working.last_plan_id += 1;
        let plan = CampaignPlan {
            id: self.working.last_plan_id,
            patches: patches.to_vec(),
            created_at: Utc::now(),
        };
        self.working.plans.insert(plan.id, plan.clone());
        Ok(plan)
    }

    async fn get_plan(&mut self, plan_id: i64) -> Result<Option<CampaignPlan>> {
        self.check("get_plan")?;
        Ok(self.working.plans.get(&plan_id).cloned())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.check("commit")?;

        let InMemoryTransaction {
            mut guard, working, ..
        } = *self;
        *guard = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}
