//! # Campaign Plan Model
//!
//! Immutable aggregate of the patches a completed execution produced. A new
//! execution always produces a new plan; plans are never edited.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One repository's change inside a plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignPlanPatch {
    pub repo_id: i64,
    pub base_revision: String,
    pub base_reference: String,
    /// Unified diff text
    pub patch: String,
}

/// A persisted campaign plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignPlan {
    pub id: i64,
    /// Patches in job-creation order
    pub patches: Vec<CampaignPlanPatch>,
    pub created_at: DateTime<Utc>,
}

impl CampaignPlan {
    pub fn patch_count(&self) -> usize {
        self.patches.len()
    }

    pub fn repo_ids(&self) -> Vec<i64> {
        self.patches.iter().map(|p| p.repo_id).collect()
    }
}
