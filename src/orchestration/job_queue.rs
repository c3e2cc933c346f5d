//! # Job Queue
//!
//! Pull-based claim protocol for remote runners.
//!
//! ## Overview
//!
//! Runners poll; the dispatcher never pushes. A claim selects the oldest
//! pending job across all executions, moves it to running and returns it,
//! all in one store transaction. On PostgreSQL this is a single
//! `UPDATE ... WHERE id = (SELECT ... FOR UPDATE SKIP LOCKED)`, so concurrent
//! runners neither block each other nor receive the same job.
//!
//! An empty queue is not an error: the claim returns `None`.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, instrument};

use crate::config::QueueConfig;
use crate::constants::events;
use crate::database::Store;
use crate::error::Result;
use crate::events::EventPublisher;
use crate::logging::log_job_operation;
use crate::models::ActionJob;
use crate::validation::validate_runner_id;

/// Claim queue over pending jobs
#[derive(Clone)]
pub struct JobQueue {
    store: Arc<dyn Store>,
    config: QueueConfig,
    event_publisher: EventPublisher,
}

impl JobQueue {
    pub fn new(store: Arc<dyn Store>, config: QueueConfig, event_publisher: EventPublisher) -> Self {
        Self {
            store,
            config,
            event_publisher,
        }
    }

    /// Claim the oldest pending job for `runner_id`
    #[instrument(skip(self))]
    pub async fn claim(&self, runner_id: &str) -> Result<Option<ActionJob>> {
        validate_runner_id(runner_id, self.config.runner_id_max_length)?;

        let identity = self.config.record_runner_identity.then_some(runner_id);

        let mut tx = self.store.begin().await?;
        let claimed = tx.claim_job(identity, Utc::now()).await?;
        tx.commit().await?;

        let Some(job) = claimed else {
            debug!(runner_id, "No pending jobs available");
            return Ok(None);
        };

        info!(
            job_id = job.id,
            execution_id = job.execution_id,
            runner_id,
            "Job claimed"
        );
        log_job_operation(
            "claim",
            Some(job.id),
            Some(job.execution_id),
            Some(runner_id),
            job.state.as_str(),
            None,
        );
        self.event_publisher.publish_job(events::JOB_CLAIMED, &job);

        Ok(Some(job))
    }
}
