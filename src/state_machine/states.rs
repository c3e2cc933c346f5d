use serde::{Deserialize, Serialize};
use std::fmt;

/// Action job state definitions
///
/// `Pending` and `Running` are the only non-terminal states. `Failed` and
/// `TimedOut` are interchangeable for aggregation purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionJobState {
    /// Created with the execution or reset by a retry, waiting for a runner
    Pending,
    /// Claimed by a runner
    Running,
    /// Runner finished successfully, optionally producing a patch
    Completed,
    /// Runner reported a failure
    Failed,
    /// Runner stopped reporting before finishing
    TimedOut,
}

impl ActionJobState {
    pub const ALL: [ActionJobState; 5] = [
        Self::Pending,
        Self::Running,
        Self::Completed,
        Self::Failed,
        Self::TimedOut,
    ];

    /// Check if this is a terminal state (only a retry leaves it)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::TimedOut)
    }

    /// Check if a job in this state can contribute a patch to a campaign plan
    pub fn contributes_patch(&self) -> bool {
        matches!(self, Self::Completed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
        }
    }
}

impl fmt::Display for ActionJobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ActionJobState {
    type Err = String;

    /// Accepts the stored snake_case names as well as the upper-case names
    /// runners send over the API (`ERRORED`/`TIMEOUT` included).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" | "errored" => Ok(Self::Failed),
            "timed_out" | "timeout" => Ok(Self::TimedOut),
            _ => Err(format!("Invalid action job state: {s}")),
        }
    }
}

impl Default for ActionJobState {
    fn default() -> Self {
        Self::Pending
    }
}
