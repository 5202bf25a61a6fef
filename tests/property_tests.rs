mod common;

use std::collections::HashMap;
use std::time::Duration;

use collab_orchestrator::models::{
    CorrelationId, Plan, PlanInstanceEvent, PlanInstanceRecord, QualifiedName,
};
use collab_orchestrator::registry::PlanRegistry;
use collab_orchestrator::state_machine::transitions::{
    active_state, executable_operations, is_allowed, next_state,
};
use collab_orchestrator::state_machine::{DeploymentOperation, OperationOutcome, TargetState};
use common::strategies::*;
use proptest::prelude::*;

const OPERATIONS: [&str; 4] = ["provision", "configure", "attach", "verify"];

proptest! {
    /// Property: an active package never admits anything
    #[test]
    fn active_states_admit_no_operation(
        state in deployment_state_strategy(),
        operation in deployment_operation_strategy(),
    ) {
        if state.is_active() {
            prop_assert!(!is_allowed(state, operation));
            prop_assert!(executable_operations(state).is_empty());
        }
    }

    /// Property: offered operations are admitted and never include Delete
    #[test]
    fn executable_operations_are_admitted(state in deployment_state_strategy()) {
        let offered = executable_operations(state);
        prop_assert!(!offered.contains(&DeploymentOperation::Delete));
        for operation in offered {
            prop_assert!(is_allowed(state, operation));
            prop_assert!(active_state(state, operation).is_ok());
        }
    }

    /// Property: every admitted operation ends outside the transitional states
    #[test]
    fn finished_operations_leave_no_active_state(
        state in deployment_state_strategy(),
        operation in deployment_operation_strategy(),
        success in any::<bool>(),
    ) {
        if is_allowed(state, operation) {
            match next_state(state, operation, OperationOutcome::from_success(success)).unwrap() {
                TargetState::Set(next) => prop_assert!(!next.is_active()),
                TargetState::Unchanged => prop_assert_eq!(operation, DeploymentOperation::InvokePlan),
                TargetState::Removed => prop_assert!(success && operation == DeploymentOperation::Delete),
            }
        } else {
            prop_assert!(next_state(state, operation, OperationOutcome::Success).is_err());
        }
    }

    /// Property: WCET equals the sum of the per-operation maxima
    #[test]
    fn wcet_is_sum_of_per_operation_maxima(
        history in execution_history_strategy(OPERATIONS.len()),
        catalogued in prop::sample::subsequence(OPERATIONS.to_vec(), 0..=OPERATIONS.len()),
    ) {
        let plan_id = QualifiedName::new("http://example.org/plans", "Shop_scale");
        let registry = PlanRegistry::new();
        registry.register_plan_operations("Shop_scale", catalogued.iter().copied());

        let mut expected: HashMap<&str, u64> = HashMap::new();
        for run in &history {
            let mut record = PlanInstanceRecord::new(CorrelationId::generate(), plan_id.clone());
            for (index, ms) in run {
                let operation = OPERATIONS[*index];
                record = record.with_event(PlanInstanceEvent::operation(operation, Duration::from_millis(*ms)));
                if catalogued.contains(&operation) {
                    let slot = expected.entry(operation).or_insert(0);
                    *slot = (*slot).max(*ms);
                }
            }
            registry.record_execution(record);
        }

        prop_assert_eq!(
            registry.estimate_wcet(&Plan::new(plan_id)),
            Duration::from_millis(expected.values().sum())
        );
    }
}
