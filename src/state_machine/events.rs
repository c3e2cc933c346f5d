use super::states::ActionJobState;
use serde::{Deserialize, Serialize};

/// Events that can trigger action job state transitions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum JobEvent {
    /// A runner claimed the job from the queue
    Claim,
    /// The runner holding the job reported progress or a result
    Report(ActionJobState),
    /// The watchdog gave up on the runner holding the job
    TimeOut,
    /// Operator reset the job for another attempt
    Retry,
}

impl JobEvent {
    /// Get a string representation of the event type for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Claim => "claim",
            Self::Report(_) => "report",
            Self::TimeOut => "time_out",
            Self::Retry => "retry",
        }
    }

    /// Check if applying this event can leave the job in a terminal state
    pub fn is_terminal(&self) -> bool {
        match self {
            Self::Report(state) => state.is_terminal(),
            Self::TimeOut => true,
            Self::Claim | Self::Retry => false,
        }
    }
}
