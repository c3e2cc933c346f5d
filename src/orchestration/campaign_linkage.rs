//! # Campaign Linkage
//!
//! Pushes a freshly created plan into the campaign that owns the action.
//!
//! Linkage runs after the plan has committed and never undoes it. A failed
//! update is returned to the caller as [`LinkageOutcome::Failed`]; the plan
//! stays attached to its execution and can be linked again later.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{info, warn};

use crate::constants::events;
use crate::error::{DispatchError, Result};
use crate::events::EventPublisher;
use crate::models::Action;

/// Update path a campaign exposes for its plan reference
#[async_trait]
pub trait CampaignUpdater: Send + Sync {
    async fn attach_plan(&self, campaign_id: i64, plan_id: i64) -> Result<()>;
}

/// Campaign directory kept in memory.
///
/// Attaching a plan to a campaign that was never registered fails with
/// `NotFound`.
#[derive(Debug, Default)]
pub struct InMemoryCampaignDirectory {
    campaigns: RwLock<HashMap<i64, Option<i64>>>,
}

impl InMemoryCampaignDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, campaign_id: i64) {
        self.campaigns.write().entry(campaign_id).or_insert(None);
    }

    /// The plan currently referenced by a campaign
    pub fn plan_for(&self, campaign_id: i64) -> Option<i64> {
        self.campaigns.read().get(&campaign_id).copied().flatten()
    }
}

#[async_trait]
impl CampaignUpdater for InMemoryCampaignDirectory {
    async fn attach_plan(&self, campaign_id: i64, plan_id: i64) -> Result<()> {
        let mut campaigns = self.campaigns.write();
        let plan = campaigns
            .get_mut(&campaign_id)
            .ok_or_else(|| DispatchError::not_found("Campaign", campaign_id))?;
        *plan = Some(plan_id);
        Ok(())
    }
}

/// Result of a linkage attempt
#[derive(Debug, Clone, PartialEq)]
pub enum LinkageOutcome {
    /// The action has no parent campaign
    NotCampaignBound,
    Linked { campaign_id: i64, plan_id: i64 },
    /// The campaign update failed; the plan remains valid and re-attachable
    Failed {
        campaign_id: i64,
        plan_id: i64,
        error: DispatchError,
    },
}

impl LinkageOutcome {
    pub fn is_linked(&self) -> bool {
        matches!(self, Self::Linked { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// Best-effort propagation of plans into parent campaigns
#[derive(Clone)]
pub struct CampaignLinkage {
    updater: Option<Arc<dyn CampaignUpdater>>,
    event_publisher: EventPublisher,
}

impl CampaignLinkage {
    pub fn new(updater: Option<Arc<dyn CampaignUpdater>>, event_publisher: EventPublisher) -> Self {
        Self {
            updater,
            event_publisher,
        }
    }

    /// Attach `plan_id` to the action's campaign, if it has one
    pub async fn link(&self, action: &Action, plan_id: i64) -> LinkageOutcome {
        let Some(campaign_id) = action.campaign_id else {
            return LinkageOutcome::NotCampaignBound;
        };

        let result = match &self.updater {
            Some(updater) => updater.attach_plan(campaign_id, plan_id).await,
            None => Err(DispatchError::CampaignLink {
                campaign_id,
                plan_id,
                reason: "no campaign updater configured".to_string(),
            }),
        };

        match result {
            Ok(()) => {
                info!(action_id = action.id, campaign_id, plan_id, "Campaign linked to plan");
                self.event_publisher.publish(
                    events::CAMPAIGN_LINKED,
                    serde_json::json!({
                        "action_id": action.id,
                        "campaign_id": campaign_id,
                        "campaign_plan_id": plan_id,
                    }),
                );
                LinkageOutcome::Linked {
                    campaign_id,
                    plan_id,
                }
            }
            Err(error) => {
                let error = match error {
                    link @ DispatchError::CampaignLink { .. } => link,
                    other => DispatchError::CampaignLink {
                        campaign_id,
                        plan_id,
                        reason: other.to_string(),
                    },
                };
                warn!(
                    action_id = action.id,
                    campaign_id,
                    plan_id,
                    error = %error,
                    "Campaign linkage failed; plan kept for re-attachment"
                );
                self.event_publisher.publish(
                    events::CAMPAIGN_LINK_FAILED,
                    serde_json::json!({
                        "action_id": action.id,
                        "campaign_id": campaign_id,
                        "campaign_plan_id": plan_id,
                        "error": error.to_string(),
                    }),
                );
                LinkageOutcome::Failed {
                    campaign_id,
                    plan_id,
                    error,
                }
            }
        }
    }
}
