//! Proptest strategies for orchestrator types

#![allow(dead_code)]

use proptest::prelude::*;

use collab_orchestrator::state_machine::{DeploymentOperation, DeploymentState};

pub fn deployment_state_strategy() -> impl Strategy<Value = DeploymentState> {
    prop_oneof![
        Just(DeploymentState::Stored),
        Just(DeploymentState::ProcessingActive),
        Just(DeploymentState::Processed),
        Just(DeploymentState::PlanDeploymentActive),
        Just(DeploymentState::PlansDeployed),
        Just(DeploymentState::Failed),
    ]
}

pub fn deployment_operation_strategy() -> impl Strategy<Value = DeploymentOperation> {
    prop::sample::select(DeploymentOperation::ALL.to_vec())
}

/// Per-run operation durations in milliseconds, keyed by operation index
pub fn execution_history_strategy(
    operations: usize,
) -> impl Strategy<Value = Vec<Vec<(usize, u64)>>> {
    prop::collection::vec(
        prop::collection::vec((0..operations, 0u64..100_000), 0..6),
        0..12,
    )
}
