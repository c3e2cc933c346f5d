//! # Orchestration Engine
//!
//! The dispatcher core: fan-out, claiming, job lifecycle and aggregation.
//!
//! ## Core Components
//!
//! - **ExecutionCoordinator**: creates an execution and its job set atomically
//! - **JobQueue**: pull-based claim protocol for remote runners
//! - **JobLifecycle**: reports, log heartbeats, retries and timeouts
//! - **Aggregator**: exactly-once plan creation for fully terminal executions
//! - **CampaignLinkage**: best-effort propagation of plans into parent campaigns
//! - **ActionDispatcher**: the caller-facing facade over all of the above
//!
//! There is no background loop. Every operation is a short transaction
//! triggered by a caller or a polling runner.

pub mod aggregator;
pub mod campaign_linkage;
pub mod dispatcher;
pub mod execution_coordinator;
pub mod job_lifecycle;
pub mod job_queue;
pub mod repo_resolver;

pub use aggregator::{AggregationOutcome, Aggregator};
pub use campaign_linkage::{
    CampaignLinkage, CampaignUpdater, InMemoryCampaignDirectory, LinkageOutcome,
};
pub use dispatcher::{ActionDispatcher, ActionDispatcherBuilder, AggregationReport};
pub use execution_coordinator::{ExecutionCoordinator, ExecutionCreationResult};
pub use job_lifecycle::{JobLifecycle, JobReport, ReportRequest};
pub use job_queue::JobQueue;
pub use repo_resolver::{RepoResolver, StaticRepoResolver};
