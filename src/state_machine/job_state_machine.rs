use chrono::{DateTime, Utc};

use super::errors::{StateMachineError, StateMachineResult};
use super::events::JobEvent;
use super::states::ActionJobState;
use crate::models::ActionJob;

/// Determine the target state for an event applied in `current_state`.
///
/// ```text
/// Pending  --claim-->             Running
/// Running  --report(running)-->   Running
/// Running  --report(terminal)-->  Completed | Failed | TimedOut
/// Running  --time_out-->          TimedOut
/// any      --retry-->             Pending
/// ```
pub fn determine_target_state(
    job_id: i64,
    current_state: ActionJobState,
    event: &JobEvent,
) -> StateMachineResult<ActionJobState> {
    let target = match (current_state, event) {
        (ActionJobState::Pending, JobEvent::Claim) => ActionJobState::Running,

        // Progress reports keep the job running; a report can never hand the job back to the queue
        (ActionJobState::Running, JobEvent::Report(target)) if *target != ActionJobState::Pending => {
            *target
        }

        (ActionJobState::Running, JobEvent::TimeOut) => ActionJobState::TimedOut,

        // Operator override, allowed from every state
        (_, JobEvent::Retry) => ActionJobState::Pending,

        (from_state, event) => {
            return Err(StateMachineError::InvalidTransition {
                job_id,
                from: from_state.to_string(),
                event: describe(event),
            })
        }
    };

    Ok(target)
}

fn describe(event: &JobEvent) -> String {
    match event {
        JobEvent::Report(target) => format!("report({target})"),
        other => other.event_type().to_string(),
    }
}

/// Applies job events to an in-memory copy of a job.
///
/// The caller loads the job under a row lock, applies the event, and writes
/// the result back inside the same transaction. Rejected events leave the job
/// untouched.
pub struct JobStateMachine<'a> {
    job: &'a mut ActionJob,
}

impl<'a> JobStateMachine<'a> {
    pub fn new(job: &'a mut ActionJob) -> Self {
        Self { job }
    }

    pub fn determine_target_state(&self, event: &JobEvent) -> StateMachineResult<ActionJobState> {
        determine_target_state(self.job.id, self.job.state, event)
    }

    /// Hand a pending job to a runner; `None` leaves the job anonymous
    pub fn claim(
        &mut self,
        runner_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> StateMachineResult<ActionJobState> {
        let target = self.determine_target_state(&JobEvent::Claim)?;

        self.job.state = target;
        self.job.runner_id = runner_id.map(str::to_string);
        self.job.runner_seen_at = Some(now);
        self.job.execution_start = Some(now);
        self.job.updated_at = now;

        Ok(target)
    }

    /// Record a runner's report.
    ///
    /// `patch` must already be validated; `None` keeps whatever patch the job
    /// holds. Only a Completed job keeps a patch. Terminal reports stamp
    /// `execution_end`.
    pub fn report(
        &mut self,
        target: ActionJobState,
        patch: Option<String>,
        log: Option<&str>,
        now: DateTime<Utc>,
    ) -> StateMachineResult<ActionJobState> {
        let target = self.determine_target_state(&JobEvent::Report(target))?;

        self.job.state = target;
        if let Some(patch) = patch {
            self.job.patch = Some(patch);
        }
        if target.is_terminal() && !target.contributes_patch() {
            self.job.patch = None;
        }
        if let Some(log) = log {
            self.job.append_log(log);
        }
        self.job.runner_seen_at = Some(now);
        if target.is_terminal() {
            self.job.execution_end = Some(now);
        }
        self.job.updated_at = now;

        Ok(target)
    }

    /// Give up on the runner holding the job
    pub fn time_out(&mut self, now: DateTime<Utc>) -> StateMachineResult<ActionJobState> {
        let target = self.determine_target_state(&JobEvent::TimeOut)?;

        self.job.state = target;
        self.job.patch = None;
        self.job.execution_end = Some(now);
        self.job.updated_at = now;

        Ok(target)
    }

    /// Reset the job so the queue hands it out again
    pub fn retry(&mut self, now: DateTime<Utc>) -> StateMachineResult<ActionJobState> {
        let target = self.determine_target_state(&JobEvent::Retry)?;

        self.job.state = target;
        self.job.patch = None;
        self.job.log = None;
        self.job.runner_id = None;
        self.job.runner_seen_at = None;
        self.job.execution_start = None;
        self.job.execution_end = None;
        self.job.updated_at = now;

        Ok(target)
    }
}
