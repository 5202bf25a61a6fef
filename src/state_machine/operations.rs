use serde::{Deserialize, Serialize};
use std::fmt;

/// Top-level management operations that can be requested for a package
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentOperation {
    ProcessPackage,
    DeployPlans,
    InvokePlan,
    UndeployPlans,
    Delete,
}

impl DeploymentOperation {
    pub const ALL: [DeploymentOperation; 5] = [
        Self::ProcessPackage,
        Self::DeployPlans,
        Self::InvokePlan,
        Self::UndeployPlans,
        Self::Delete,
    ];

    /// Get a string representation of the operation for logging
    pub fn operation_type(&self) -> &'static str {
        match self {
            Self::ProcessPackage => "process_package",
            Self::DeployPlans => "deploy_plans",
            Self::InvokePlan => "invoke_plan",
            Self::UndeployPlans => "undeploy_plans",
            Self::Delete => "delete",
        }
    }

    /// Operations that change the deployment state of a package
    pub fn mutates_state(&self) -> bool {
        !matches!(self, Self::InvokePlan)
    }
}

impl fmt::Display for DeploymentOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.operation_type())
    }
}

/// Outcome of a finished top-level operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationOutcome {
    Success,
    Failure,
}

impl OperationOutcome {
    pub fn from_success(success: bool) -> Self {
        if success {
            Self::Success
        } else {
            Self::Failure
        }
    }
}
