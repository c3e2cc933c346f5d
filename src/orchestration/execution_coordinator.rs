//! # Execution Coordinator
//!
//! Atomic fan-out of an action over its target repositories.
//!
//! ## Overview
//!
//! One call persists the execution and one pending job per target in a single
//! store transaction. Either the whole job set becomes visible or nothing
//! does; a failure part-way through the fan-out rolls back the execution too.
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use actions_core::database::{InMemoryStore, Store};
//! use actions_core::events::EventPublisher;
//! use actions_core::models::{InvocationReason, TargetRepo};
//! use actions_core::orchestration::ExecutionCoordinator;
//!
//! # async fn example(action_id: i64) -> Result<(), Box<dyn std::error::Error>> {
//! let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
//! let coordinator = ExecutionCoordinator::new(store, EventPublisher::default());
//!
//! let targets = vec![TargetRepo::new(1, "4f2a9c1", "refs/heads/main")];
//! let result = coordinator
//!     .create_execution(action_id, &targets, InvocationReason::Manual)
//!     .await?;
//! println!("Created execution {} with {} jobs", result.execution.id, result.jobs.len());
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument};

use crate::constants::events;
use crate::database::Store;
use crate::error::{DispatchError, Result};
use crate::events::EventPublisher;
use crate::logging::log_execution_operation;
use crate::models::{ActionExecution, ActionJob, InvocationReason, TargetRepo};
use crate::validation::validate_target_repos;

/// Result of execution creation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionCreationResult {
    pub execution: ActionExecution,
    /// Jobs in target order
    pub jobs: Vec<ActionJob>,
}

/// Creates executions and their job sets
#[derive(Clone)]
pub struct ExecutionCoordinator {
    store: Arc<dyn Store>,
    event_publisher: EventPublisher,
}

impl ExecutionCoordinator {
    pub fn new(store: Arc<dyn Store>, event_publisher: EventPublisher) -> Self {
        Self {
            store,
            event_publisher,
        }
    }

    /// Create an execution of `action_id` with one pending job per target.
    ///
    /// Fails with `Validation` for an empty or malformed target list and with
    /// `NotFound` when the action does not exist. Nothing is written in
    /// either case.
    #[instrument(skip(self, targets), fields(target_count = targets.len(), reason = %reason))]
    pub async fn create_execution(
        &self,
        action_id: i64,
        targets: &[TargetRepo],
        reason: InvocationReason,
    ) -> Result<ExecutionCreationResult> {
        validate_target_repos(targets)?;

        let mut tx = self.store.begin().await?;

        let action = tx
            .get_action(action_id)
            .await?
            .ok_or_else(|| DispatchError::not_found("Action", action_id))?;

        let (execution, jobs) = tx
            .create_execution(action.id, reason, targets)
            .await
            .map_err(|e| {
                error!(action_id, error = %e, "Execution fan-out failed, rolling back");
                e
            })?;

        debug!(
            execution_id = execution.id,
            job_count = jobs.len(),
            "Created execution and jobs"
        );

        tx.commit().await?;

        info!(
            execution_id = execution.id,
            action_id,
            job_count = jobs.len(),
            "Execution created"
        );
        log_execution_operation(
            "create_execution",
            Some(execution.id),
            Some(action_id),
            None,
            "created",
            Some(reason.as_str()),
        );
        self.event_publisher
            .publish_execution(events::EXECUTION_CREATED, &execution, jobs.len());

        Ok(ExecutionCreationResult { execution, jobs })
    }
}
