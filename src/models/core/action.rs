//! # Action Model
//!
//! Reusable, named action definitions that can be executed across many
//! repositories.
//!
//! ## Overview
//!
//! An `Action` holds an ordered list of [`ActionStep`]s. Each step is a shell
//! command run inside a container image with an optional environment. Actions
//! may belong to a parent campaign, and may carry a saved search query whose
//! result changes trigger new executions.
//!
//! Actions are created and updated explicitly; they are never deleted here.
//! Every update bumps `version` so executions can be traced back to the
//! definition they ran.
//!
//! ## Database Schema
//!
//! Maps to `actions` table:
//! ```sql
//! CREATE TABLE actions (
//!   id BIGSERIAL PRIMARY KEY,
//!   name TEXT NOT NULL,
//!   definition JSONB NOT NULL,
//!   campaign_id BIGINT,
//!   saved_search_query TEXT,
//!   version INTEGER NOT NULL DEFAULT 1,
//!   -- timestamps
//! );
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single command of an action, run inside a container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionStep {
    /// Shell command (may be a multi-line script)
    pub run: String,
    /// Container image the command runs in
    pub container: String,
    /// Extra environment variables for the command
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

impl ActionStep {
    pub fn new(run: impl Into<String>, container: impl Into<String>) -> Self {
        Self {
            run: run.into(),
            container: container.into(),
            env: BTreeMap::new(),
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// The ordered step list of an action, stored as JSONB
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ActionDefinition {
    pub steps: Vec<ActionStep>,
}

impl ActionDefinition {
    pub fn new(steps: Vec<ActionStep>) -> Self {
        Self { steps }
    }

    /// Parse a definition from its JSON document form.
    ///
    /// Only the shape is checked here; see [`crate::validation::validate_action_definition`]
    /// for content rules.
    pub fn from_json(document: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(document)
    }
}

/// A persisted action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub id: i64,
    pub name: String,
    pub definition: ActionDefinition,
    pub campaign_id: Option<i64>,
    pub saved_search_query: Option<String>,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Action {
    pub fn steps(&self) -> &[ActionStep] {
        &self.definition.steps
    }

    /// Whether plans produced by this action are pushed into a parent campaign
    pub fn is_campaign_bound(&self) -> bool {
        self.campaign_id.is_some()
    }
}

/// New Action for creation (without generated fields)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAction {
    pub name: String,
    pub definition: ActionDefinition,
    pub campaign_id: Option<i64>,
    pub saved_search_query: Option<String>,
}

impl NewAction {
    pub fn new(name: impl Into<String>, definition: ActionDefinition) -> Self {
        Self {
            name: name.into(),
            definition,
            campaign_id: None,
            saved_search_query: None,
        }
    }

    pub fn with_campaign(mut self, campaign_id: i64) -> Self {
        self.campaign_id = Some(campaign_id);
        self
    }

    pub fn with_saved_search_query(mut self, query: impl Into<String>) -> Self {
        self.saved_search_query = Some(query.into());
        self
    }
}
