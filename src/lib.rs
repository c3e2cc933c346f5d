#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Actions Core
//!
//! Action execution dispatcher: runs a reusable action across many
//! repositories through remote runners and aggregates the resulting patches
//! into a campaign plan.
//!
//! ## Overview
//!
//! An operator defines an action (ordered container steps) and starts an
//! execution over a set of repositories. The dispatcher fans out one job per
//! repository, hands jobs to runners through a pull-based claim queue, tracks
//! each job through its state machine and, exactly once per execution, turns
//! the finished jobs' patches into a plan.
//!
//! ## Guarantees
//!
//! - A claim never hands the same job to two runners
//! - Reports against a job that is not running are rejected and change nothing
//! - An execution gets at most one plan, and exactly one once every job is terminal
//! - Store failures roll back the whole operation
//!
//! ## Module Organization
//!
//! - [`models`] - actions, executions, jobs and plans
//! - [`database`] - the transactional store (PostgreSQL and in-memory)
//! - [`state_machine`] - job states and legal transitions
//! - [`orchestration`] - coordinator, queue, lifecycle, aggregator, linkage
//! - [`validation`] - patch gate and input validation
//! - [`config`] - layered configuration
//! - [`events`] - lifecycle event publisher
//! - [`logging`] - structured logging setup
//! - [`error`] - error taxonomy
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use actions_core::config::ConfigManager;
//! use actions_core::database::{DatabaseConnection, PgStore};
//! use actions_core::orchestration::ActionDispatcher;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! actions_core::logging::init_structured_logging_with(&manager.config().logging);
//!
//! let connection = DatabaseConnection::connect(&manager.config().database).await?;
//! let dispatcher = ActionDispatcher::builder(Arc::new(PgStore::new(connection.pool().clone())))
//!     .config(manager.config().clone())
//!     .build();
//!
//! if let Some(job) = dispatcher.claim_job("runner-1").await? {
//!     println!("Claimed job {} for repository {}", job.id, job.repo_id);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! ```bash
//! cargo test                      # Unit and in-memory integration tests
//! cargo test -- --ignored         # PostgreSQL tests (needs DATABASE_URL)
//! ```

pub mod config;
pub mod constants;
pub mod database;
pub mod error;
pub mod events;
pub mod logging;
pub mod models;
pub mod orchestration;
pub mod state_machine;
pub mod validation;

pub use config::{ConfigManager, ConfigurationError, DispatcherConfig};
pub use database::{InMemoryStore, PgStore, Store, StoreTransaction};
pub use error::{DispatchError, Result};
pub use events::EventPublisher;
pub use models::{
    Action, ActionDefinition, ActionExecution, ActionJob, ActionStep, CampaignPlan,
    CampaignPlanPatch, InvocationReason, NewAction, TargetRepo,
};
pub use orchestration::{ActionDispatcher, JobReport, ReportRequest};
pub use state_machine::{ActionJobState, JobEvent};
pub use validation::{PatchValidator, UnifiedDiffValidator};
