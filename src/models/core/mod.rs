pub mod action;
pub mod action_execution;
pub mod action_job;
pub mod campaign_plan;

pub use action::{Action, ActionDefinition, ActionStep, NewAction};
pub use action_execution::{ActionExecution, InvocationReason};
pub use action_job::{ActionJob, TargetRepo};
pub use campaign_plan::{CampaignPlan, CampaignPlanPatch};
