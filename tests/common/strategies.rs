//! Proptest strategies for job states and runner outcomes.

#![allow(dead_code)]

use actions_core::state_machine::ActionJobState;
use proptest::prelude::*;

pub fn job_state_strategy() -> impl Strategy<Value = ActionJobState> {
    prop::sample::select(ActionJobState::ALL.to_vec())
}

pub fn non_running_state_strategy() -> impl Strategy<Value = ActionJobState> {
    prop::sample::select(vec![
        ActionJobState::Pending,
        ActionJobState::Completed,
        ActionJobState::Failed,
        ActionJobState::TimedOut,
    ])
}

/// How a runner finishes a job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    CompletedWithPatch,
    CompletedWithoutPatch,
    Failed,
    TimedOut,
}

impl Outcome {
    pub fn contributes_patch(self) -> bool {
        self == Self::CompletedWithPatch
    }
}

pub fn outcome_strategy() -> impl Strategy<Value = Outcome> {
    prop_oneof![
        Just(Outcome::CompletedWithPatch),
        Just(Outcome::CompletedWithoutPatch),
        Just(Outcome::Failed),
        Just(Outcome::TimedOut),
    ]
}

/// Outcomes for 1..=max jobs plus the order in which they finish
pub fn finish_plan_strategy(max_jobs: usize) -> impl Strategy<Value = (Vec<Outcome>, Vec<usize>)> {
    prop::collection::vec(outcome_strategy(), 1..=max_jobs).prop_flat_map(|outcomes| {
        let order: Vec<usize> = (0..outcomes.len()).collect();
        (Just(outcomes), Just(order).prop_shuffle())
    })
}
