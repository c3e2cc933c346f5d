//! PostgreSQL store on sqlx.
//!
//! Each [`PgTransaction`] wraps one `sqlx::Transaction`. Claims use
//! `FOR UPDATE SKIP LOCKED` so concurrent runners never wait on each other
//! and never see the same job; plan attachment is a conditional update on the
//! execution's nullable plan reference.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use tracing::debug;

use super::pagination::{ExecutionFilter, JobFilter, ListOpts, Page};
use super::store::{Store, StoreTransaction};
use crate::error::{DispatchError, Result};
use crate::models::{
    Action, ActionDefinition, ActionExecution, ActionJob, CampaignPlan, CampaignPlanPatch,
    InvocationReason, NewAction, TargetRepo,
};
use crate::state_machine::ActionJobState;

const ACTION_COLUMNS: &str =
    "id, name, definition, campaign_id, saved_search_query, version, created_at, updated_at";

const EXECUTION_COLUMNS: &str =
    "id, action_id, invocation_reason, campaign_plan_id, created_at, updated_at";

const JOB_COLUMNS: &str = "id, execution_id, repo_id, base_revision, base_reference, state, \
     patch, log, runner_id, runner_seen_at, execution_start, execution_end, created_at, updated_at";

const PLAN_COLUMNS: &str = "id, patches, created_at";

#[derive(Debug, FromRow)]
struct ActionRow {
    id: i64,
    name: String,
    definition: Json<ActionDefinition>,
    campaign_id: Option<i64>,
    saved_search_query: Option<String>,
    version: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<ActionRow> for Action {
    fn from(row: ActionRow) -> Self {
        Action {
            id: row.id,
            name: row.name,
            definition: row.definition.0,
            campaign_id: row.campaign_id,
            saved_search_query: row.saved_search_query,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct ExecutionRow {
    id: i64,
    action_id: i64,
    invocation_reason: String,
    campaign_plan_id: Option<i64>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ExecutionRow> for ActionExecution {
    type Error = DispatchError;

    fn try_from(row: ExecutionRow) -> Result<Self> {
        let invocation_reason = row
            .invocation_reason
            .parse::<InvocationReason>()
            .map_err(|e| DispatchError::store(format!("execution {}: {e}", row.id)))?;

        Ok(ActionExecution {
            id: row.id,
            action_id: row.action_id,
            invocation_reason,
            campaign_plan_id: row.campaign_plan_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct JobRow {
    id: i64,
    execution_id: i64,
    repo_id: i64,
    base_revision: String,
    base_reference: String,
    state: String,
    patch: Option<String>,
    log: Option<String>,
    runner_id: Option<String>,
    runner_seen_at: Option<DateTime<Utc>>,
    execution_start: Option<DateTime<Utc>>,
    execution_end: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<JobRow> for ActionJob {
    type Error = DispatchError;

    fn try_from(row: JobRow) -> Result<Self> {
        let state = row
            .state
            .parse::<ActionJobState>()
            .map_err(|e| DispatchError::store(format!("job {}: {e}", row.id)))?;

        Ok(ActionJob {
            id: row.id,
            execution_id: row.execution_id,
            repo_id: row.repo_id,
            base_revision: row.base_revision,
            base_reference: row.base_reference,
            state,
            patch: row.patch,
            log: row.log,
            runner_id: row.runner_id,
            runner_seen_at: row.runner_seen_at,
            execution_start: row.execution_start,
            execution_end: row.execution_end,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct PlanRow {
    id: i64,
    patches: Json<Vec<CampaignPlanPatch>>,
    created_at: DateTime<Utc>,
}

impl From<PlanRow> for CampaignPlan {
    fn from(row: PlanRow) -> Self {
        CampaignPlan {
            id: row.id,
            patches: row.patches.0,
            created_at: row.created_at,
        }
    }
}

fn limit_param(opts: &ListOpts) -> (usize, i64) {
    let limit = opts.effective_limit();
    // One extra row tells us whether another page exists
    (limit, limit as i64 + 1)
}

/// PostgreSQL-backed store
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTransaction { tx }))
    }
}

/// Open PostgreSQL transaction
pub struct PgTransaction {
    tx: Transaction<'static, Postgres>,
}

impl PgTransaction {
    async fn fetch_job(&mut self, sql: &str, job_id: i64) -> Result<Option<ActionJob>> {
        sqlx::query_as::<_, JobRow>(sql)
            .bind(job_id)
            .fetch_optional(&mut *self.tx)
            .await?
            .map(ActionJob::try_from)
            .transpose()
    }

    async fn fetch_execution(&mut self, sql: &str, id: i64) -> Result<Option<ActionExecution>> {
        sqlx::query_as::<_, ExecutionRow>(sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?
            .map(ActionExecution::try_from)
            .transpose()
    }
}

#[async_trait]
impl StoreTransaction for PgTransaction {
    async fn create_action(&mut self, new_action: &NewAction) -> Result<Action> {
        let sql = format!(
            "INSERT INTO actions (name, definition, campaign_id, saved_search_query, version, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, 1, NOW(), NOW()) \
             RETURNING {ACTION_COLUMNS}"
        );

        let row = sqlx::query_as::<_, ActionRow>(&sql)
            .bind(&new_action.name)
            .bind(Json(&new_action.definition))
            .bind(new_action.campaign_id)
            .bind(&new_action.saved_search_query)
            .fetch_one(&mut *self.tx)
            .await?;

        Ok(row.into())
    }

    async fn update_action(&mut self, action_id: i64, update: &NewAction) -> Result<Action> {
        let sql = format!(
            "UPDATE actions \
             SET name = $2, definition = $3, campaign_id = $4, saved_search_query = $5, \
                 version = version + 1, updated_at = NOW() \
             WHERE id = $1 \
             RETURNING {ACTION_COLUMNS}"
        );

        let row = sqlx::query_as::<_, ActionRow>(&sql)
            .bind(action_id)
            .bind(&update.name)
            .bind(Json(&update.definition))
            .bind(update.campaign_id)
            .bind(&update.saved_search_query)
            .fetch_optional(&mut *self.tx)
            .await?
            .ok_or_else(|| DispatchError::not_found("Action", action_id))?;

        Ok(row.into())
    }

    async fn get_action(&mut self, action_id: i64) -> Result<Option<Action>> {
        let sql = format!("SELECT {ACTION_COLUMNS} FROM actions WHERE id = $1");

        let row = sqlx::query_as::<_, ActionRow>(&sql)
            .bind(action_id)
            .fetch_optional(&mut *self.tx)
            .await?;

        Ok(row.map(Action::from))
    }

    async fn list_actions(&mut self, opts: &ListOpts) -> Result<Page<Action>> {
        let (limit, fetch) = limit_param(opts);
        let sql = format!(
            "SELECT {ACTION_COLUMNS} FROM actions \
             WHERE ($1::BIGINT IS NULL OR id > $1) \
             ORDER BY id LIMIT $2"
        );

        let rows = sqlx::query_as::<_, ActionRow>(&sql)
            .bind(opts.cursor)
            .bind(fetch)
            .fetch_all(&mut *self.tx)
            .await?;

        let total_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM actions")
            .fetch_one(&mut *self.tx)
            .await?;

        let actions = rows.into_iter().map(Action::from).collect();
        Ok(Page::from_overfetch(actions, limit, total_count, |a| a.id))
    }

    async fn list_actions_by_saved_search_query(&mut self, query: &str) -> Result<Vec<Action>> {
        let sql = format!(
            "SELECT {ACTION_COLUMNS} FROM actions WHERE saved_search_query = $1 ORDER BY id"
        );

        let rows = sqlx::query_as::<_, ActionRow>(&sql)
            .bind(query)
            .fetch_all(&mut *self.tx)
            .await?;

        Ok(rows.into_iter().map(Action::from).collect())
    }

    async fn create_execution(
        &mut self,
        action_id: i64,
        reason: InvocationReason,
        targets: &[TargetRepo],
    ) -> Result<(ActionExecution, Vec<ActionJob>)> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM actions WHERE id = $1)")
            .bind(action_id)
            .fetch_one(&mut *self.tx)
            .await?;
        if !exists {
            return Err(DispatchError::not_found("Action", action_id));
        }

        let sql = format!(
            "INSERT INTO action_executions (action_id, invocation_reason, created_at, updated_at) \
             VALUES ($1, $2, NOW(), NOW()) \
             RETURNING {EXECUTION_COLUMNS}"
        );
        let execution: ActionExecution = sqlx::query_as::<_, ExecutionRow>(&sql)
            .bind(action_id)
            .bind(reason.as_str())
            .fetch_one(&mut *self.tx)
            .await?
            .try_into()?;

        let job_sql = format!(
            "INSERT INTO action_jobs (execution_id, repo_id, base_revision, base_reference, state, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, 'pending', NOW(), NOW()) \
             RETURNING {JOB_COLUMNS}"
        );

        let mut jobs = Vec::with_capacity(targets.len());
        for target in targets {
            let job: ActionJob = sqlx::query_as::<_, JobRow>(&job_sql)
                .bind(execution.id)
                .bind(target.repo_id)
                .bind(&target.base_revision)
                .bind(&target.base_reference)
                .fetch_one(&mut *self.tx)
                .await?
                .try_into()?;
            jobs.push(job);
        }

        debug!(execution_id = execution.id, job_count = jobs.len(), "Inserted execution and jobs");

        Ok((execution, jobs))
    }

    async fn get_execution(&mut self, execution_id: i64) -> Result<Option<ActionExecution>> {
        let sql = format!("SELECT {EXECUTION_COLUMNS} FROM action_executions WHERE id = $1");
        self.fetch_execution(&sql, execution_id).await
    }

    async fn get_execution_for_update(
        &mut self,
        execution_id: i64,
    ) -> Result<Option<ActionExecution>> {
        let sql = format!(
            "SELECT {EXECUTION_COLUMNS} FROM action_executions WHERE id = $1 FOR UPDATE"
        );
        self.fetch_execution(&sql, execution_id).await
    }

    async fn set_execution_plan(&mut self, execution_id: i64, plan_id: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE action_executions \
             SET campaign_plan_id = $2, updated_at = NOW() \
             WHERE id = $1 AND campaign_plan_id IS NULL",
        )
        .bind(execution_id)
        .bind(plan_id)
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn list_executions(
        &mut self,
        filter: &ExecutionFilter,
        opts: &ListOpts,
    ) -> Result<Page<ActionExecution>> {
        let (limit, fetch) = limit_param(opts);
        let sql = format!(
            "SELECT {EXECUTION_COLUMNS} FROM action_executions \
             WHERE ($1::BIGINT IS NULL OR action_id = $1) \
               AND ($2::BIGINT IS NULL OR id > $2) \
             ORDER BY id LIMIT $3"
        );

        let rows = sqlx::query_as::<_, ExecutionRow>(&sql)
            .bind(filter.action_id)
            .bind(opts.cursor)
            .bind(fetch)
            .fetch_all(&mut *self.tx)
            .await?;

        let total_count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM action_executions WHERE ($1::BIGINT IS NULL OR action_id = $1)",
        )
        .bind(filter.action_id)
        .fetch_one(&mut *self.tx)
        .await?;

        let executions = rows
            .into_iter()
            .map(ActionExecution::try_from)
            .collect::<Result<Vec<_>>>()?;
        Ok(Page::from_overfetch(executions, limit, total_count, |e| e.id))
    }

    async fn claim_job(
        &mut self,
        runner_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Option<ActionJob>> {
        let sql = format!(
            "UPDATE action_jobs \
             SET state = 'running', runner_id = $1, runner_seen_at = $2, \
                 execution_start = $2, updated_at = $2 \
             WHERE id = ( \
                 SELECT id FROM action_jobs \
                 WHERE state = 'pending' \
                 ORDER BY id \
                 LIMIT 1 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING {JOB_COLUMNS}"
        );

        sqlx::query_as::<_, JobRow>(&sql)
            .bind(runner_id)
            .bind(now)
            .fetch_optional(&mut *self.tx)
            .await?
            .map(ActionJob::try_from)
            .transpose()
    }

    async fn get_job(&mut self, job_id: i64) -> Result<Option<ActionJob>> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM action_jobs WHERE id = $1");
        self.fetch_job(&sql, job_id).await
    }

    async fn get_job_for_update(&mut self, job_id: i64) -> Result<Option<ActionJob>> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM action_jobs WHERE id = $1 FOR UPDATE");
        self.fetch_job(&sql, job_id).await
    }

    async fn update_job(&mut self, job: &ActionJob) -> Result<ActionJob> {
        let sql = format!(
            "UPDATE action_jobs \
             SET state = $2, patch = $3, log = $4, runner_id = $5, runner_seen_at = $6, \
                 execution_start = $7, execution_end = $8, updated_at = $9 \
             WHERE id = $1 \
             RETURNING {JOB_COLUMNS}"
        );

        sqlx::query_as::<_, JobRow>(&sql)
            .bind(job.id)
            .bind(job.state.as_str())
            .bind(&job.patch)
            .bind(&job.log)
            .bind(&job.runner_id)
            .bind(job.runner_seen_at)
            .bind(job.execution_start)
            .bind(job.execution_end)
            .bind(job.updated_at)
            .fetch_optional(&mut *self.tx)
            .await?
            .ok_or_else(|| DispatchError::not_found("ActionJob", job.id))?
            .try_into()
    }

    async fn append_job_log(
        &mut self,
        job_id: i64,
        content: &str,
        now: DateTime<Utc>,
    ) -> Result<ActionJob> {
        let sql = format!(
            "UPDATE action_jobs \
             SET log = COALESCE(log, '') || $2, runner_seen_at = $3, updated_at = $3 \
             WHERE id = $1 \
             RETURNING {JOB_COLUMNS}"
        );

        sqlx::query_as::<_, JobRow>(&sql)
            .bind(job_id)
            .bind(content)
            .bind(now)
            .fetch_optional(&mut *self.tx)
            .await?
            .ok_or_else(|| DispatchError::not_found("ActionJob", job_id))?
            .try_into()
    }

    async fn list_jobs(&mut self, filter: &JobFilter, opts: &ListOpts) -> Result<Page<ActionJob>> {
        let (limit, fetch) = limit_param(opts);
        let state = filter.state.map(|s| s.as_str());
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM action_jobs \
             WHERE ($1::BIGINT IS NULL OR execution_id = $1) \
               AND ($2::TEXT IS NULL OR state = $2) \
               AND ($3::BIGINT IS NULL OR id > $3) \
             ORDER BY id LIMIT $4"
        );

        let rows = sqlx::query_as::<_, JobRow>(&sql)
            .bind(filter.execution_id)
            .bind(state)
            .bind(opts.cursor)
            .bind(fetch)
            .fetch_all(&mut *self.tx)
            .await?;

        let total_count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM action_jobs \
             WHERE ($1::BIGINT IS NULL OR execution_id = $1) \
               AND ($2::TEXT IS NULL OR state = $2)",
        )
        .bind(filter.execution_id)
        .bind(state)
        .fetch_one(&mut *self.tx)
        .await?;

        let jobs = rows
            .into_iter()
            .map(ActionJob::try_from)
            .collect::<Result<Vec<_>>>()?;
        Ok(Page::from_overfetch(jobs, limit, total_count, |j| j.id))
    }

    async fn list_all_jobs(&mut self, execution_id: i64) -> Result<Vec<ActionJob>> {
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM action_jobs WHERE execution_id = $1 ORDER BY id"
        );

        sqlx::query_as::<_, JobRow>(&sql)
            .bind(execution_id)
            .fetch_all(&mut *self.tx)
            .await?
            .into_iter()
            .map(ActionJob::try_from)
            .collect()
    }

    async fn reset_job(&mut self, job_id: i64, now: DateTime<Utc>) -> Result<ActionJob> {
        let sql = format!(
            "UPDATE action_jobs \
             SET state = 'pending', patch = NULL, log = NULL, runner_id = NULL, \
                 runner_seen_at = NULL, execution_start = NULL, execution_end = NULL, \
                 updated_at = $2 \
             WHERE id = $1 \
             RETURNING {JOB_COLUMNS}"
        );

        sqlx::query_as::<_, JobRow>(&sql)
            .bind(job_id)
            .bind(now)
            .fetch_optional(&mut *self.tx)
            .await?
            .ok_or_else(|| DispatchError::not_found("ActionJob", job_id))?
            .try_into()
    }

    async fn create_plan(&mut self, patches: &[CampaignPlanPatch]) -> Result<CampaignPlan> {
        let sql = format!(
            "INSERT INTO campaign_plans (patches, created_at) VALUES ($1, NOW()) \
             RETURNING {PLAN_COLUMNS}"
        );

        let row = sqlx::query_as::<_, PlanRow>(&sql)
            .bind(Json(patches))
            .fetch_one(&mut *self.tx)
            .await?;

        Ok(row.into())
    }

    async fn get_plan(&mut self, plan_id: i64) -> Result<Option<CampaignPlan>> {
        let sql = format!("SELECT {PLAN_COLUMNS} FROM campaign_plans WHERE id = $1");

        let row = sqlx::query_as::<_, PlanRow>(&sql)
            .bind(plan_id)
            .fetch_optional(&mut *self.tx)
            .await?;

        Ok(row.map(CampaignPlan::from))
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
