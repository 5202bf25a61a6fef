use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, warn};

use super::{
    errors::{StateMachineError, StateMachineResult},
    operations::{DeploymentOperation, OperationOutcome},
    persistence::{DeploymentStateStore, DeploymentTransition},
    states::DeploymentState,
    transitions::{self, TargetState},
};
use crate::logging::log_deployment_operation;
use crate::models::PackageId;

/// A top-level operation that has been admitted for a package.
///
/// Holds the transitional state claimed for the package until it is handed
/// back to [`DeploymentStateMachine::finish`].
#[derive(Debug)]
#[must_use = "an admitted operation must be finished or the package stays active"]
pub struct ActiveOperation {
    package_id: PackageId,
    operation: DeploymentOperation,
    origin: DeploymentState,
    active: Option<DeploymentState>,
}

impl ActiveOperation {
    pub fn package_id(&self) -> &PackageId {
        &self.package_id
    }

    pub fn operation(&self) -> DeploymentOperation {
        self.operation
    }

    /// State the package was in when the operation was admitted
    pub fn origin(&self) -> DeploymentState {
        self.origin
    }
}

/// Admission control over the deployment-process state of packages
#[derive(Clone)]
pub struct DeploymentStateMachine {
    store: Arc<dyn DeploymentStateStore>,
}

impl std::fmt::Debug for DeploymentStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeploymentStateMachine").finish_non_exhaustive()
    }
}

impl DeploymentStateMachine {
    pub fn new(store: Arc<dyn DeploymentStateStore>) -> Self {
        Self { store }
    }

    pub async fn current_state(
        &self,
        package_id: &PackageId,
    ) -> StateMachineResult<Option<DeploymentState>> {
        self.store.current_state(package_id).await
    }

    /// Operations that may legally be requested next; empty for unknown packages
    pub async fn executable_operations(
        &self,
        package_id: &PackageId,
    ) -> StateMachineResult<BTreeSet<DeploymentOperation>> {
        Ok(self
            .current_state(package_id)
            .await?
            .map(transitions::executable_operations)
            .unwrap_or_default())
    }

    /// Verify that `operation` is admitted without claiming anything
    pub async fn check(
        &self,
        package_id: &PackageId,
        operation: DeploymentOperation,
    ) -> StateMachineResult<DeploymentState> {
        match self.current_state(package_id).await? {
            Some(state) if transitions::is_allowed(state, operation) => Ok(state),
            state => Err(StateMachineError::admission_rejected(
                package_id, operation, state,
            )),
        }
    }

    /// Admit `operation` and atomically claim its transitional state
    pub async fn begin(
        &self,
        package_id: &PackageId,
        operation: DeploymentOperation,
    ) -> StateMachineResult<ActiveOperation> {
        let origin = self.check(package_id, operation).await?;
        let active = transitions::active_state(origin, operation)?;

        if let Some(active_state) = active {
            let claimed = self
                .store
                .compare_and_set(package_id, Some(origin), active_state, Some(operation))
                .await?;
            if !claimed {
                // Another caller moved the package between check and claim
                let current = self.current_state(package_id).await?;
                return Err(StateMachineError::admission_rejected(
                    package_id, operation, current,
                ));
            }
        }

        log_deployment_operation(
            operation.operation_type(),
            package_id,
            Some(origin),
            active,
            "started",
        );

        Ok(ActiveOperation {
            package_id: package_id.clone(),
            operation,
            origin,
            active,
        })
    }

    /// Release the transitional state of an admitted operation
    pub async fn finish(
        &self,
        active: ActiveOperation,
        outcome: OperationOutcome,
    ) -> StateMachineResult<TargetState> {
        let target = transitions::next_state(active.origin, active.operation, outcome)?;
        let package_id = &active.package_id;

        match (active.active, target) {
            (_, TargetState::Unchanged) => {}
            (Some(active_state), TargetState::Set(next)) => {
                let applied = self
                    .store
                    .compare_and_set(package_id, Some(active_state), next, Some(active.operation))
                    .await?;
                if !applied {
                    warn!(
                        package_id = %package_id,
                        operation = %active.operation,
                        "Deployment state changed while operation was running, keeping forced state"
                    );
                    return Err(StateMachineError::persistence_failed(format!(
                        "state of {package_id} was modified concurrently"
                    )));
                }
            }
            (None, TargetState::Set(next)) => {
                self.store.force_state(package_id, next).await?;
            }
            (_, TargetState::Removed) => {
                self.store
                    .remove(package_id, Some(active.operation))
                    .await?;
            }
        }

        let to_state = match target {
            TargetState::Unchanged => Some(active.origin),
            TargetState::Set(state) => Some(state),
            TargetState::Removed => None,
        };
        log_deployment_operation(
            active.operation.operation_type(),
            package_id,
            active.active,
            to_state,
            match outcome {
                OperationOutcome::Success => "succeeded",
                OperationOutcome::Failure => "failed",
            },
        );

        Ok(target)
    }

    /// Force a state without validating the transition (administrative recovery)
    pub async fn declare_forced(
        &self,
        package_id: &PackageId,
        state: DeploymentState,
    ) -> StateMachineResult<()> {
        debug!(package_id = %package_id, state = %state, "Forcibly declaring deployment state");
        self.store.force_state(package_id, state).await
    }

    pub async fn transitions(
        &self,
        package_id: &PackageId,
    ) -> StateMachineResult<Vec<DeploymentTransition>> {
        self.store.transitions(package_id).await
    }
}
