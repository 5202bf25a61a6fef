use thiserror::Error;

use crate::models::{CorrelationId, PackageId, QualifiedName};

/// Failures of the invocation scheduler.
///
/// A plan that cannot finish within its budget is not an error; it is reported
/// as `InvocationOutcome::Infeasible`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("Plan {plan} not found in package {package_id}")]
    PlanNotFound {
        package_id: PackageId,
        plan: QualifiedName,
    },

    #[error("Dispatch of invocation {correlation_id} failed: {reason}")]
    Dispatch {
        correlation_id: CorrelationId,
        reason: String,
    },

    #[error("Invocation {correlation_id} could not be delivered to a peer: {reason}")]
    Undeliverable {
        correlation_id: CorrelationId,
        reason: String,
    },

    #[error("Invocation {correlation_id} expired before a response arrived")]
    Expired { correlation_id: CorrelationId },

    #[error("Invocation task was cancelled")]
    Cancelled,
}

impl SchedulerError {
    pub fn plan_not_found(package_id: &PackageId, plan: &QualifiedName) -> Self {
        Self::PlanNotFound {
            package_id: package_id.clone(),
            plan: plan.clone(),
        }
    }

    pub fn dispatch(correlation_id: &CorrelationId, reason: impl ToString) -> Self {
        Self::Dispatch {
            correlation_id: correlation_id.clone(),
            reason: reason.to_string(),
        }
    }

    pub fn undeliverable(correlation_id: &CorrelationId, reason: impl ToString) -> Self {
        Self::Undeliverable {
            correlation_id: correlation_id.clone(),
            reason: reason.to_string(),
        }
    }
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
