//! Collaborators that actually deploy and run plans.
//!
//! The orchestrator core never compiles or executes workflow bodies itself; it
//! hands plans to a [`PlanEngine`] for (un)deployment and to a [`PlanExecutor`]
//! for invocation, then tracks the outcome.

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{CorrelationId, InvocationRequest, PackageId, ParameterBinding, Plan};

/// Deploys plan bodies to, and removes them from, the workflow runtime
#[async_trait]
pub trait PlanEngine: Send + Sync + 'static {
    /// Deploy `plan` under `plans_namespace`; false when the runtime refused it
    async fn deploy_plan(&self, package_id: &PackageId, plans_namespace: &str, plan: &Plan) -> bool;

    async fn undeploy_plan(&self, package_id: &PackageId, plans_namespace: &str, plan: &Plan)
        -> bool;
}

/// Progress of a plan instance started through a [`PlanExecutor`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionStatus {
    Running,
    Finished(Vec<ParameterBinding>),
    Failed(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanExecutionError {
    #[error("Plan invocation rejected: {0}")]
    Rejected(String),
    #[error("Plan runtime unavailable: {0}")]
    Unavailable(String),
}

/// Starts plan instances on the local workflow runtime and reports their progress
#[async_trait]
pub trait PlanExecutor: Send + Sync + 'static {
    async fn start(&self, request: &InvocationRequest, plan: &Plan) -> Result<(), PlanExecutionError>;

    async fn poll(&self, correlation_id: &CorrelationId) -> ExecutionStatus;
}
