use thiserror::Error;

use super::operations::DeploymentOperation;
use super::states::DeploymentState;
use crate::models::PackageId;

/// Error types for deployment state machine operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StateMachineError {
    #[error("Invalid state transition: {operation} is not allowed from {from}")]
    InvalidTransition {
        from: DeploymentState,
        operation: DeploymentOperation,
    },

    #[error("Operation {operation} rejected for package {package_id}: current state is {state:?}")]
    AdmissionRejected {
        package_id: PackageId,
        operation: DeploymentOperation,
        state: Option<DeploymentState>,
    },

    #[error("No deployment state recorded for package {package_id}")]
    UnknownPackage { package_id: PackageId },

    #[error("Persistence operation failed: {reason}")]
    PersistenceFailed { reason: String },
}

pub type StateMachineResult<T> = Result<T, StateMachineError>;

impl StateMachineError {
    pub fn invalid_transition(from: DeploymentState, operation: DeploymentOperation) -> Self {
        Self::InvalidTransition { from, operation }
    }

    pub fn admission_rejected(
        package_id: &PackageId,
        operation: DeploymentOperation,
        state: Option<DeploymentState>,
    ) -> Self {
        Self::AdmissionRejected {
            package_id: package_id.clone(),
            operation,
            state,
        }
    }

    pub fn persistence_failed(reason: impl Into<String>) -> Self {
        Self::PersistenceFailed {
            reason: reason.into(),
        }
    }
}
