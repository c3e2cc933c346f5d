//! Transactional persistence for actions, executions, jobs and plans.
//!
//! Every dispatcher operation opens one [`StoreTransaction`], re-reads the
//! rows it needs under that transaction, and commits its effects back in a
//! single unit. A transaction dropped without `commit` is rolled back.
//!
//! ## Locking
//!
//! - `claim_job` selects and transitions one pending job atomically; two
//!   concurrent claims never return the same job.
//! - `get_execution_for_update` and `get_job_for_update` take row locks held
//!   until the transaction ends. Terminal job transitions lock the owning
//!   execution first, so the completeness check of one execution always sees
//!   every sibling transition committed before it.
//! - `set_execution_plan` only writes when no plan is set yet.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::pagination::{ExecutionFilter, JobFilter, ListOpts, Page};
use crate::error::Result;
use crate::models::{
    Action, ActionExecution, ActionJob, CampaignPlan, CampaignPlanPatch, InvocationReason,
    NewAction, TargetRepo,
};

/// Entry point into the store.
#[async_trait]
pub trait Store: Send + Sync {
    /// Open a new transaction
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>>;

    // --- Read helpers, each in its own short transaction ---

    async fn get_action(&self, action_id: i64) -> Result<Option<Action>> {
        let mut tx = self.begin().await?;
        let action = tx.get_action(action_id).await?;
        tx.commit().await?;
        Ok(action)
    }

    async fn get_execution(&self, execution_id: i64) -> Result<Option<ActionExecution>> {
        let mut tx = self.begin().await?;
        let execution = tx.get_execution(execution_id).await?;
        tx.commit().await?;
        Ok(execution)
    }

    async fn get_job(&self, job_id: i64) -> Result<Option<ActionJob>> {
        let mut tx = self.begin().await?;
        let job = tx.get_job(job_id).await?;
        tx.commit().await?;
        Ok(job)
    }

    async fn get_plan(&self, plan_id: i64) -> Result<Option<CampaignPlan>> {
        let mut tx = self.begin().await?;
        let plan = tx.get_plan(plan_id).await?;
        tx.commit().await?;
        Ok(plan)
    }

    async fn list_all_jobs(&self, execution_id: i64) -> Result<Vec<ActionJob>> {
        let mut tx = self.begin().await?;
        let jobs = tx.list_all_jobs(execution_id).await?;
        tx.commit().await?;
        Ok(jobs)
    }
}

/// One open unit of work against the store.
#[async_trait]
pub trait StoreTransaction: Send {
    // --- Actions ---

    async fn create_action(&mut self, new_action: &NewAction) -> Result<Action>;

    /// Replace an action's definition and bump its version.
    ///
    /// Fails with `NotFound` when the action does not exist.
    async fn update_action(&mut self, action_id: i64, update: &NewAction) -> Result<Action>;

    async fn get_action(&mut self, action_id: i64) -> Result<Option<Action>>;

    async fn list_actions(&mut self, opts: &ListOpts) -> Result<Page<Action>>;

    /// Actions whose saved search query equals `query`, oldest first
    async fn list_actions_by_saved_search_query(&mut self, query: &str) -> Result<Vec<Action>>;

    // --- Executions ---

    /// Insert an execution and one pending job per target, in target order
    async fn create_execution(
        &mut self,
        action_id: i64,
        reason: InvocationReason,
        targets: &[TargetRepo],
    ) -> Result<(ActionExecution, Vec<ActionJob>)>;

    async fn get_execution(&mut self, execution_id: i64) -> Result<Option<ActionExecution>>;

    /// Load an execution and hold its row lock until the transaction ends
    async fn get_execution_for_update(
        &mut self,
        execution_id: i64,
    ) -> Result<Option<ActionExecution>>;

    /// Point the execution at its plan if it has none yet.
    ///
    /// Returns `false` and writes nothing when a plan is already set.
    async fn set_execution_plan(&mut self, execution_id: i64, plan_id: i64) -> Result<bool>;

    async fn list_executions(
        &mut self,
        filter: &ExecutionFilter,
        opts: &ListOpts,
    ) -> Result<Page<ActionExecution>>;

    // --- Jobs ---

    /// Atomically move the oldest pending job to running and return it.
    ///
    /// Stamps `runner_seen_at` and `execution_start` with `now` and records
    /// `runner_id` when given. Returns `None` when no job is pending.
    async fn claim_job(
        &mut self,
        runner_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Option<ActionJob>>;

    async fn get_job(&mut self, job_id: i64) -> Result<Option<ActionJob>>;

    /// Load a job and hold its row lock until the transaction ends
    async fn get_job_for_update(&mut self, job_id: i64) -> Result<Option<ActionJob>>;

    /// Write back every mutable field of a job
    async fn update_job(&mut self, job: &ActionJob) -> Result<ActionJob>;

    /// Append to the job log and stamp the heartbeat
    async fn append_job_log(
        &mut self,
        job_id: i64,
        content: &str,
        now: DateTime<Utc>,
    ) -> Result<ActionJob>;

    async fn list_jobs(&mut self, filter: &JobFilter, opts: &ListOpts) -> Result<Page<ActionJob>>;

    /// Every job of an execution in creation order
    async fn list_all_jobs(&mut self, execution_id: i64) -> Result<Vec<ActionJob>>;

    /// Return a job to pending and clear its patch, log and runner fields
    async fn reset_job(&mut self, job_id: i64, now: DateTime<Utc>) -> Result<ActionJob>;

    // --- Plans ---

    async fn create_plan(&mut self, patches: &[CampaignPlanPatch]) -> Result<CampaignPlan>;

    async fn get_plan(&mut self, plan_id: i64) -> Result<Option<CampaignPlan>>;

    // --- Demarcation ---

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}
