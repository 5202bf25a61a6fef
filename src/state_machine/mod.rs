// State machine module for the deployment process of packages
//
// The transition table is a set of pure functions; the state machine wraps them
// around a pluggable state store and enforces that only one top-level operation
// is active per package.

pub mod deployment_state_machine;
pub mod errors;
pub mod operations;
pub mod persistence;
pub mod states;
pub mod transitions;

// Re-export main types for convenient access
pub use deployment_state_machine::{ActiveOperation, DeploymentStateMachine};
pub use errors::{StateMachineError, StateMachineResult};
pub use operations::{DeploymentOperation, OperationOutcome};
pub use persistence::{DeploymentStateStore, DeploymentTransition, InMemoryDeploymentStateStore};
pub use states::DeploymentState;
pub use transitions::TargetState;
