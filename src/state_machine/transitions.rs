//! Deployment-process transition table.
//!
//! Pure functions over `(state, operation[, outcome])`; everything that touches
//! storage lives in [`super::deployment_state_machine`].

use std::collections::BTreeSet;

use super::errors::{StateMachineError, StateMachineResult};
use super::operations::{DeploymentOperation, OperationOutcome};
use super::states::DeploymentState;

/// Where a finished operation leaves the package
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetState {
    /// State is left as it was before the operation
    Unchanged,
    Set(DeploymentState),
    /// Deployment state of the package is dropped entirely
    Removed,
}

/// Whether `operation` may be started while the package is in `state`
pub fn is_allowed(state: DeploymentState, operation: DeploymentOperation) -> bool {
    use DeploymentOperation as Op;
    use DeploymentState as S;

    match (state, operation) {
        (s, _) if s.is_active() => false,
        (_, Op::Delete) => true,
        (S::Stored | S::Failed, Op::ProcessPackage) => true,
        (S::Processed, Op::DeployPlans) => true,
        (S::Processed | S::PlansDeployed, Op::InvokePlan) => true,
        (S::PlansDeployed, Op::UndeployPlans) => true,
        _ => false,
    }
}

/// Operations a caller may request next.
///
/// `Delete` is administrative and never part of this set even though
/// [`is_allowed`] admits it from every non-active state.
pub fn executable_operations(state: DeploymentState) -> BTreeSet<DeploymentOperation> {
    DeploymentOperation::ALL
        .into_iter()
        .filter(|op| *op != DeploymentOperation::Delete && is_allowed(state, *op))
        .collect()
}

/// Transitional state held while `operation` runs, if it holds one
pub fn active_state(
    state: DeploymentState,
    operation: DeploymentOperation,
) -> StateMachineResult<Option<DeploymentState>> {
    if !is_allowed(state, operation) {
        return Err(StateMachineError::invalid_transition(state, operation));
    }

    Ok(match operation {
        DeploymentOperation::ProcessPackage => Some(DeploymentState::ProcessingActive),
        DeploymentOperation::DeployPlans
        | DeploymentOperation::UndeployPlans
        | DeploymentOperation::Delete => Some(DeploymentState::PlanDeploymentActive),
        DeploymentOperation::InvokePlan => None,
    })
}

/// Target state once `operation`, started from `state`, finished with `outcome`
pub fn next_state(
    state: DeploymentState,
    operation: DeploymentOperation,
    outcome: OperationOutcome,
) -> StateMachineResult<TargetState> {
    use DeploymentOperation as Op;
    use DeploymentState as S;
    use OperationOutcome as O;

    if !is_allowed(state, operation) {
        return Err(StateMachineError::invalid_transition(state, operation));
    }

    let target = match (operation, outcome) {
        // Processing failures still leave the package processed; the caller sees the error
        (Op::ProcessPackage, _) => TargetState::Set(S::Processed),
        (Op::DeployPlans, O::Success) => TargetState::Set(S::PlansDeployed),
        (Op::DeployPlans, O::Failure) => TargetState::Set(S::Processed),
        (Op::UndeployPlans, _) => TargetState::Set(S::Processed),
        (Op::InvokePlan, _) => TargetState::Unchanged,
        (Op::Delete, O::Success) => TargetState::Removed,
        // Undeploy failures pin the package where redeployment can be retried
        (Op::Delete, O::Failure) => TargetState::Set(S::Processed),
    };

    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use DeploymentOperation as Op;
    use DeploymentState as S;

    const ALL_STATES: [DeploymentState; 6] = [
        S::Stored,
        S::ProcessingActive,
        S::Processed,
        S::PlanDeploymentActive,
        S::PlansDeployed,
        S::Failed,
    ];

    #[test]
    fn test_stored_only_allows_processing() {
        assert_eq!(
            executable_operations(S::Stored),
            BTreeSet::from([Op::ProcessPackage])
        );
    }

    #[test]
    fn test_active_states_allow_nothing() {
        for state in [S::ProcessingActive, S::PlanDeploymentActive] {
            assert!(executable_operations(state).is_empty());
            for op in DeploymentOperation::ALL {
                assert!(!is_allowed(state, op), "{op} admitted in {state}");
            }
        }
    }

    #[test]
    fn test_invoke_only_in_processed_or_deployed() {
        for state in ALL_STATES {
            assert_eq!(
                executable_operations(state).contains(&Op::InvokePlan),
                matches!(state, S::Processed | S::PlansDeployed)
            );
        }
    }

    #[test]
    fn test_processing_never_offered_after_processing() {
        for state in [S::Processed, S::PlansDeployed] {
            assert!(!executable_operations(state).contains(&Op::ProcessPackage));
        }
    }

    #[test]
    fn test_deploy_transitions() {
        assert_eq!(
            active_state(S::Processed, Op::DeployPlans).unwrap(),
            Some(S::PlanDeploymentActive)
        );
        assert_eq!(
            next_state(S::Processed, Op::DeployPlans, OperationOutcome::Success).unwrap(),
            TargetState::Set(S::PlansDeployed)
        );
        assert_eq!(
            next_state(S::Processed, Op::DeployPlans, OperationOutcome::Failure).unwrap(),
            TargetState::Set(S::Processed)
        );
    }

    #[test]
    fn test_process_failure_still_marks_processed() {
        assert_eq!(
            next_state(S::Stored, Op::ProcessPackage, OperationOutcome::Failure).unwrap(),
            TargetState::Set(S::Processed)
        );
    }

    #[test]
    fn test_invocation_leaves_state_unchanged() {
        assert_eq!(active_state(S::PlansDeployed, Op::InvokePlan).unwrap(), None);
        assert_eq!(
            next_state(S::PlansDeployed, Op::InvokePlan, OperationOutcome::Success).unwrap(),
            TargetState::Unchanged
        );
    }

    #[test]
    fn test_delete_outcomes() {
        assert_eq!(
            next_state(S::PlansDeployed, Op::Delete, OperationOutcome::Success).unwrap(),
            TargetState::Removed
        );
        assert_eq!(
            next_state(S::PlansDeployed, Op::Delete, OperationOutcome::Failure).unwrap(),
            TargetState::Set(S::Processed)
        );
    }

    #[test]
    fn test_invalid_transitions() {
        assert!(active_state(S::Stored, Op::DeployPlans).is_err());
        assert!(next_state(S::Stored, Op::InvokePlan, OperationOutcome::Success).is_err());
        assert!(active_state(S::Processed, Op::ProcessPackage).is_err());
        assert!(active_state(S::ProcessingActive, Op::Delete).is_err());
    }
}
