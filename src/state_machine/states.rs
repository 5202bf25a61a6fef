use serde::{Deserialize, Serialize};
use std::fmt;

/// Deployment-process state of a package
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentState {
    /// Package has been stored but not processed yet
    Stored,
    /// Package definitions are being processed
    ProcessingActive,
    /// Package has been processed; plans can be deployed
    Processed,
    /// Plans are being deployed or undeployed
    PlanDeploymentActive,
    /// All plans of the package are deployed
    PlansDeployed,
    /// Processing could not be completed; package may be reprocessed
    Failed,
}

impl DeploymentState {
    /// Check if an operation is currently running for the package
    pub fn is_active(&self) -> bool {
        matches!(self, Self::ProcessingActive | Self::PlanDeploymentActive)
    }

    /// Check if plans of the package may be invoked
    pub fn permits_invocation(&self) -> bool {
        matches!(self, Self::Processed | Self::PlansDeployed)
    }
}

impl fmt::Display for DeploymentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stored => write!(f, "stored"),
            Self::ProcessingActive => write!(f, "processing_active"),
            Self::Processed => write!(f, "processed"),
            Self::PlanDeploymentActive => write!(f, "plan_deployment_active"),
            Self::PlansDeployed => write!(f, "plans_deployed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for DeploymentState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stored" => Ok(Self::Stored),
            "processing_active" => Ok(Self::ProcessingActive),
            "processed" => Ok(Self::Processed),
            "plan_deployment_active" => Ok(Self::PlanDeploymentActive),
            "plans_deployed" => Ok(Self::PlansDeployed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid deployment state: {s}")),
        }
    }
}

/// Default state for newly stored packages
impl Default for DeploymentState {
    fn default() -> Self {
        Self::Stored
    }
}
