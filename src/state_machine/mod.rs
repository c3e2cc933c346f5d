// State machine module for action job lifecycle management
//
// Transitions are computed from a pure table and applied to an in-memory copy
// of the job; persistence happens in the caller's store transaction.

pub mod errors;
pub mod events;
pub mod job_state_machine;
pub mod states;

// Re-export main types for convenient access
pub use errors::{StateMachineError, StateMachineResult};
pub use events::JobEvent;
pub use job_state_machine::{determine_target_state, JobStateMachine};
pub use states::ActionJobState;
