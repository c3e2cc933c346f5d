//! # Models
//!
//! Data layer for actions, their executions and jobs, and the campaign plans
//! aggregated from finished executions.

pub mod core;

// Re-export core models for easy access
pub use self::core::{
    Action, ActionDefinition, ActionExecution, ActionJob, ActionStep, CampaignPlan,
    CampaignPlanPatch, InvocationReason, NewAction, TargetRepo,
};
