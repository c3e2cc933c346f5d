use crate::state_machine::errors::StateMachineError;

/// Errors surfaced by the dispatcher.
///
/// Validation and transition errors are returned before anything is written.
/// Store errors abort the enclosing transaction, so every entity touched by the
/// failed call keeps its pre-call state.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DispatchError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid transition for job {job_id}: cannot apply {event} in state {from}")]
    InvalidTransition {
        job_id: i64,
        from: String,
        event: String,
    },

    #[error("Invalid patch submitted: {0}")]
    InvalidPatch(String),

    #[error("Execution {execution_id} is already linked to campaign plan {plan_id}")]
    AlreadyLinked { execution_id: i64, plan_id: i64 },

    #[error("Store error: {0}")]
    Store(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Failed to attach plan {plan_id} to campaign {campaign_id}: {reason}")]
    CampaignLink {
        campaign_id: i64,
        plan_id: i64,
        reason: String,
    },
}

impl DispatchError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    pub fn is_invalid_transition(&self) -> bool {
        matches!(self, Self::InvalidTransition { .. })
    }

    pub fn is_invalid_patch(&self) -> bool {
        matches!(self, Self::InvalidPatch(_))
    }

    pub fn is_store(&self) -> bool {
        matches!(self, Self::Store(_))
    }
}

impl From<sqlx::Error> for DispatchError {
    fn from(err: sqlx::Error) -> Self {
        Self::Store(err.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for DispatchError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        Self::Store(format!("Migration failed: {err}"))
    }
}

impl From<serde_json::Error> for DispatchError {
    fn from(err: serde_json::Error) -> Self {
        Self::Store(format!("Serialization error: {err}"))
    }
}

impl From<StateMachineError> for DispatchError {
    fn from(err: StateMachineError) -> Self {
        match err {
            StateMachineError::InvalidTransition { job_id, from, event } => {
                Self::InvalidTransition { job_id, from, event }
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, DispatchError>;
