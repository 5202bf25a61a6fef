//! Error types for the orchestrator core.
//!
//! Every subsystem owns a `thiserror` enum; [`OrchestratorError`] aggregates them
//! for callers that only need a single error type.

use thiserror::Error;

use crate::config::ConfigurationError;
use crate::messaging::MessagingError;
use crate::models::{CorrelationId, PackageId, QualifiedName};
use crate::orchestration::SchedulerError;
use crate::registry::RegistryError;
use crate::state_machine::StateMachineError;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
    #[error("State machine error: {0}")]
    StateMachine(#[from] StateMachineError),
    #[error("Messaging error: {0}")]
    Messaging(#[from] MessagingError),
    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),
    #[error("Orchestration error: {0}")]
    Orchestration(#[from] OrchestrationError),
    #[error("Internal error: {0}")]
    Internal(String),
}

pub type OrchestratorResult<T> = std::result::Result<T, OrchestratorError>;

/// Errors surfaced by the caller-facing control surface
#[derive(Debug, Error)]
pub enum OrchestrationError {
    /// The package's current state does not admit the requested operation
    #[error("Operation {operation} rejected for package {package_id} in state {state}")]
    AdmissionRejected {
        package_id: PackageId,
        operation: String,
        state: String,
    },

    #[error("Package {package_id} not found")]
    PackageNotFound { package_id: PackageId },

    #[error("Topology template {template} not found in package {package_id}")]
    TemplateNotFound {
        package_id: PackageId,
        template: QualifiedName,
    },

    #[error("No invocation with correlation id {correlation_id} is being tracked")]
    UnknownInvocation { correlation_id: CorrelationId },

    /// Recording the outcome of a delete failed; `undeploy_errors` lists what
    /// went wrong before that
    #[error("Deleting package {package_id} failed: {source} (undeploy errors: {undeploy_errors:?})")]
    DeletionIncomplete {
        package_id: PackageId,
        undeploy_errors: Vec<String>,
        #[source]
        source: StateMachineError,
    },

    #[error("State machine error: {0}")]
    StateMachine(#[from] StateMachineError),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),
}

pub type OrchestrationResult<T> = std::result::Result<T, OrchestrationError>;

impl OrchestrationError {
    pub fn admission_rejected(
        package_id: &PackageId,
        operation: impl ToString,
        state: impl ToString,
    ) -> Self {
        Self::AdmissionRejected {
            package_id: package_id.clone(),
            operation: operation.to_string(),
            state: state.to_string(),
        }
    }

    /// Whether this error is a deliberate negative admission decision
    pub fn is_admission_rejection(&self) -> bool {
        matches!(
            self,
            Self::AdmissionRejected { .. }
                | Self::StateMachine(StateMachineError::AdmissionRejected { .. })
        )
    }
}
