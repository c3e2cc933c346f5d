//! # System Constants
//!
//! Event names and operational defaults shared across the
//! dispatcher.

/// Lifecycle events published after the corresponding transaction commits
pub mod events {
    // Execution lifecycle events
    pub const EXECUTION_CREATED: &str = "execution.created";
    pub const EXECUTION_AGGREGATED: &str = "execution.aggregated";

    // Job lifecycle events
    pub const JOB_CLAIMED: &str = "job.claimed";
    pub const JOB_REPORTED: &str = "job.reported";
    pub const JOB_LOG_APPENDED: &str = "job.log_appended";
    pub const JOB_RETRIED: &str = "job.retried";
    pub const JOB_TIMED_OUT: &str = "job.timed_out";

    // Campaign linkage events
    pub const CAMPAIGN_LINKED: &str = "campaign.linked";
    pub const CAMPAIGN_LINK_FAILED: &str = "campaign.link_failed";
}

/// System-wide defaults
pub mod system {
    /// Page size when a list call gives no limit
    pub const DEFAULT_LIST_LIMIT: u32 = 50;
    /// Hard cap on a single page
    pub const MAX_LIST_LIMIT: u32 = 1000;
    /// Longest runner identity the queue accepts
    pub const MAX_RUNNER_ID_LENGTH: usize = 255;
    /// Capacity of the lifecycle event channel
    pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 1000;
}
