//! # Action Job Model
//!
//! The unit of work for one (execution, repository) pair.
//!
//! ## Overview
//!
//! Jobs are handed to remote runners through the claim queue. The runner that
//! holds a job reports its result (a unified diff on success) and streams its
//! log through heartbeats. A job's state only moves along the transitions in
//! [`crate::state_machine::JobStateMachine`].
//!
//! ## Database Schema
//!
//! Maps to `action_jobs` table:
//! ```sql
//! CREATE TABLE action_jobs (
//!   id BIGSERIAL PRIMARY KEY,
//!   execution_id BIGINT NOT NULL REFERENCES action_executions(id),
//!   repo_id BIGINT NOT NULL,
//!   base_revision TEXT NOT NULL,
//!   base_reference TEXT NOT NULL,
//!   state TEXT NOT NULL DEFAULT 'pending',
//!   patch TEXT,
//!   log TEXT,
//!   runner_id TEXT,
//!   runner_seen_at TIMESTAMPTZ,
//!   execution_start TIMESTAMPTZ,
//!   execution_end TIMESTAMPTZ,
//!   -- timestamps
//! );
//! ```
//!
//! Jobs are claimed oldest first, so `id` order is both creation order and
//! queue order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::core::campaign_plan::CampaignPlanPatch;
use crate::state_machine::ActionJobState;

/// A repository revision an execution targets
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetRepo {
    pub repo_id: i64,
    pub base_revision: String,
    pub base_reference: String,
}

impl TargetRepo {
    pub fn new(
        repo_id: i64,
        base_revision: impl Into<String>,
        base_reference: impl Into<String>,
    ) -> Self {
        Self {
            repo_id,
            base_revision: base_revision.into(),
            base_reference: base_reference.into(),
        }
    }
}

/// A persisted action job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionJob {
    pub id: i64,
    pub execution_id: i64,
    pub repo_id: i64,
    pub base_revision: String,
    pub base_reference: String,
    pub state: ActionJobState,
    pub patch: Option<String>,
    pub log: Option<String>,
    /// Identity of the runner that most recently claimed the job
    pub runner_id: Option<String>,
    /// Last heartbeat from the runner
    pub runner_seen_at: Option<DateTime<Utc>>,
    pub execution_start: Option<DateTime<Utc>>,
    pub execution_end: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ActionJob {
    pub fn target(&self) -> TargetRepo {
        TargetRepo::new(self.repo_id, &self.base_revision, &self.base_reference)
    }

    /// Append a chunk to the job log
    pub fn append_log(&mut self, content: &str) {
        match self.log.as_mut() {
            Some(log) => log.push_str(content),
            None => self.log = Some(content.to_string()),
        }
    }

    /// The plan entry this job contributes, if any.
    ///
    /// Only completed jobs with a non-blank patch contribute; failed, timed
    /// out and no-change jobs are left out of the plan.
    pub fn plan_patch(&self) -> Option<CampaignPlanPatch> {
        if !self.state.contributes_patch() {
            return None;
        }

        let patch = self.patch.as_deref()?;
        if patch.trim().is_empty() {
            return None;
        }

        Some(CampaignPlanPatch {
            repo_id: self.repo_id,
            base_revision: self.base_revision.clone(),
            base_reference: self.base_reference.clone(),
            patch: patch.to_string(),
        })
    }
}
