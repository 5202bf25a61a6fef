use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use super::identifiers::{CorrelationId, InstanceId, PackageId, QualifiedName};
use super::plan::ParameterBinding;

/// Request to run a plan against a running application instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationRequest {
    pub package_id: PackageId,
    /// Orchestrator instance that has to execute the plan
    pub target_instance: InstanceId,
    pub template_id: QualifiedName,
    pub plan: QualifiedName,
    pub service_instance_id: i64,
    #[serde(default)]
    pub inputs: Vec<ParameterBinding>,
    pub correlation_id: CorrelationId,
}

impl InvocationRequest {
    pub fn input(&self, name: &str) -> Option<&str> {
        self.inputs
            .iter()
            .find(|b| b.name == name)
            .map(|b| b.value.as_str())
    }
}

/// Result of a plan invocation, possibly partial
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationResponse {
    pub correlation_id: CorrelationId,
    #[serde(default)]
    pub outputs: Vec<ParameterBinding>,
    pub completed: bool,
    /// Reason the executing side rejected or failed the invocation; terminal when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl InvocationResponse {
    pub fn completed(correlation_id: CorrelationId, outputs: Vec<ParameterBinding>) -> Self {
        Self {
            correlation_id,
            outputs,
            completed: true,
            failure: None,
        }
    }

    pub fn in_progress(correlation_id: CorrelationId) -> Self {
        Self {
            correlation_id,
            outputs: Vec::new(),
            completed: false,
            failure: None,
        }
    }

    pub fn failed(correlation_id: CorrelationId, reason: impl Into<String>) -> Self {
        Self {
            correlation_id,
            outputs: Vec::new(),
            completed: true,
            failure: Some(reason.into()),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.completed || self.failure.is_some()
    }
}

/// Externally imposed upper bound on how long a plan may run
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimeBudget(Duration);

impl TimeBudget {
    pub fn new(duration: Duration) -> Self {
        Self(duration)
    }

    pub fn from_secs(seconds: u64) -> Self {
        Self(Duration::from_secs(seconds))
    }

    pub fn from_millis(millis: u64) -> Self {
        Self(Duration::from_millis(millis))
    }

    pub fn as_duration(&self) -> Duration {
        self.0
    }

    /// Whether an estimated execution time fits into this budget
    pub fn admits(&self, estimate: Duration) -> bool {
        estimate <= self.0
    }
}

impl fmt::Display for TimeBudget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0.as_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_admits_equal_estimate() {
        let budget = TimeBudget::from_secs(5);
        assert!(budget.admits(Duration::from_millis(5000)));
        assert!(!budget.admits(Duration::from_millis(5001)));
    }

    #[test]
    fn test_failed_response_is_terminal() {
        let id = CorrelationId::new("c-1");
        assert!(InvocationResponse::failed(id.clone(), "rejected").is_terminal());
        assert!(!InvocationResponse::in_progress(id).is_terminal());
    }
}
