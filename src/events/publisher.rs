use serde_json::Value;
use tokio::sync::broadcast;

use crate::models::{ActionExecution, ActionJob};

/// Lifecycle event publisher.
///
/// Publishing never fails because nobody is listening; subscribers that fall
/// behind the channel capacity lose the oldest events.
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<PublishedEvent>,
    enabled: bool,
}

/// Event that has been published
#[derive(Debug, Clone)]
pub struct PublishedEvent {
    pub name: String,
    pub context: Value,
    pub published_at: chrono::DateTime<chrono::Utc>,
}

impl EventPublisher {
    /// Create a new event publisher with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            enabled: true,
        }
    }

    /// A publisher that drops every event
    pub fn disabled() -> Self {
        let mut publisher = Self::new(1);
        publisher.enabled = false;
        publisher
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Publish an event with the given name and context
    pub fn publish(&self, event_name: impl Into<String>, context: Value) {
        if !self.enabled {
            return;
        }

        let event = PublishedEvent {
            name: event_name.into(),
            context,
            published_at: chrono::Utc::now(),
        };

        // A send error only means there are no subscribers
        if self.sender.send(event).is_err() {
            tracing::trace!("No subscribers for lifecycle event");
        }
    }

    /// Publish an event describing a job
    pub fn publish_job(&self, event_name: &str, job: &ActionJob) {
        self.publish(
            event_name,
            serde_json::json!({
                "job_id": job.id,
                "execution_id": job.execution_id,
                "repo_id": job.repo_id,
                "state": job.state,
                "runner_id": job.runner_id,
                "has_patch": job.patch.is_some(),
            }),
        );
    }

    /// Publish an event describing an execution
    pub fn publish_execution(&self, event_name: &str, execution: &ActionExecution, job_count: usize) {
        self.publish(
            event_name,
            serde_json::json!({
                "execution_id": execution.id,
                "action_id": execution.action_id,
                "invocation_reason": execution.invocation_reason,
                "campaign_plan_id": execution.campaign_plan_id,
                "job_count": job_count,
            }),
        );
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(crate::constants::system::DEFAULT_EVENT_CHANNEL_CAPACITY)
    }
}
