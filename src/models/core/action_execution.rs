//! # Action Execution Model
//!
//! One run of an action over a fixed set of repositories. The job set is
//! created atomically with the execution and never changes afterwards.
//! `campaign_plan_id` is written exactly once, by the aggregator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::DispatchError;

/// Why an execution was created
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvocationReason {
    /// Explicit user-triggered call
    Manual,
    /// Triggered by a change in a saved search's result set
    SavedSearch,
}

impl InvocationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "MANUAL",
            Self::SavedSearch => "SAVED_SEARCH",
        }
    }
}

impl fmt::Display for InvocationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for InvocationReason {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "MANUAL" => Ok(Self::Manual),
            "SAVED_SEARCH" => Ok(Self::SavedSearch),
            _ => Err(DispatchError::validation(format!(
                "Unknown invocation reason: {s}"
            ))),
        }
    }
}

/// A persisted action execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionExecution {
    pub id: i64,
    pub action_id: i64,
    pub invocation_reason: InvocationReason,
    pub campaign_plan_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ActionExecution {
    /// Whether the aggregator has already produced a plan for this execution
    pub fn is_aggregated(&self) -> bool {
        self.campaign_plan_id.is_some()
    }
}
