/// Errors raised by the job transition table
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StateMachineError {
    #[error("Invalid transition for job {job_id}: cannot apply {event} in state {from}")]
    InvalidTransition {
        job_id: i64,
        from: String,
        event: String,
    },
}

pub type StateMachineResult<T> = Result<T, StateMachineError>;
