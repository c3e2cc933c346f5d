//! Resolution of the repository set an execution fans out over.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::Result;
use crate::models::{Action, TargetRepo};

/// Produces the target repositories for a new execution of an action
#[async_trait]
pub trait RepoResolver: Send + Sync {
    async fn resolve(&self, action: &Action) -> Result<Vec<TargetRepo>>;
}

/// Resolver backed by fixed repository lists.
///
/// Per-action lists win over the default list.
#[derive(Debug, Default)]
pub struct StaticRepoResolver {
    default_targets: Vec<TargetRepo>,
    per_action: RwLock<HashMap<i64, Vec<TargetRepo>>>,
}

impl StaticRepoResolver {
    pub fn new(default_targets: Vec<TargetRepo>) -> Self {
        Self {
            default_targets,
            per_action: RwLock::new(HashMap::new()),
        }
    }

    pub fn set_targets(&self, action_id: i64, targets: Vec<TargetRepo>) {
        self.per_action.write().insert(action_id, targets);
    }
}

#[async_trait]
impl RepoResolver for StaticRepoResolver {
    async fn resolve(&self, action: &Action) -> Result<Vec<TargetRepo>> {
        Ok(self
            .per_action
            .read()
            .get(&action.id)
            .cloned()
            .unwrap_or_else(|| self.default_targets.clone()))
    }
}
