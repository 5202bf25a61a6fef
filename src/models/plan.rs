use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::identifiers::{CorrelationId, QualifiedName};

/// Declared input or output parameter of a plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanParameter {
    pub name: String,
    #[serde(default = "default_parameter_type")]
    pub parameter_type: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub value: Option<String>,
}

fn default_parameter_type() -> String {
    "String".to_string()
}

impl PlanParameter {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameter_type: default_parameter_type(),
            required: false,
            value: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }
}

/// A concrete name/value pair passed into or returned from a plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterBinding {
    pub name: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameter_type: Option<String>,
}

impl ParameterBinding {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            parameter_type: None,
        }
    }
}

/// Executable management workflow bound to a package
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    /// Namespace plus an identifier unique within it
    pub id: QualifiedName,
    pub name: String,
    #[serde(default)]
    pub plan_type: String,
    #[serde(default)]
    pub interface_name: Option<String>,
    #[serde(default)]
    pub operation_name: Option<String>,
    #[serde(default)]
    pub input_parameters: Vec<PlanParameter>,
    #[serde(default)]
    pub output_parameters: Vec<PlanParameter>,
    /// Worst-case execution time calculated from previous executions
    #[serde(default)]
    pub calculated_wcet_ms: Option<u64>,
}

impl Plan {
    pub fn new(id: QualifiedName) -> Self {
        let name = id.local_part.clone();
        Self {
            id,
            name,
            plan_type: String::new(),
            interface_name: None,
            operation_name: None,
            input_parameters: Vec::new(),
            output_parameters: Vec::new(),
            calculated_wcet_ms: None,
        }
    }

    /// Bind this plan as the boundary implementation of an interface operation
    pub fn with_boundary(
        mut self,
        interface_name: impl Into<String>,
        operation_name: impl Into<String>,
    ) -> Self {
        self.interface_name = Some(interface_name.into());
        self.operation_name = Some(operation_name.into());
        self
    }

    pub fn with_input(mut self, parameter: PlanParameter) -> Self {
        self.input_parameters.push(parameter);
        self
    }

    pub fn with_output(mut self, parameter: PlanParameter) -> Self {
        self.output_parameters.push(parameter);
        self
    }

    pub fn implements(&self, interface_name: &str, operation_name: &str) -> bool {
        self.interface_name.as_deref() == Some(interface_name)
            && self.operation_name.as_deref() == Some(operation_name)
    }

    pub fn calculated_wcet(&self) -> Option<Duration> {
        self.calculated_wcet_ms.map(Duration::from_millis)
    }
}

/// A single operation executed while a plan instance was running
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanInstanceEvent {
    #[serde(default)]
    pub operation_name: Option<String>,
    #[serde(default)]
    pub execution_duration_ms: Option<u64>,
    #[serde(default)]
    pub status: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl PlanInstanceEvent {
    pub fn operation(operation_name: impl Into<String>, duration: Duration) -> Self {
        Self {
            operation_name: Some(operation_name.into()),
            execution_duration_ms: Some(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)),
            status: None,
            occurred_at: Utc::now(),
        }
    }
}

/// Historical record of one executed plan instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanInstanceRecord {
    pub correlation_id: CorrelationId,
    /// Template id of the executed workflow; its local part matches `Plan::id.local_part`
    pub template_id: QualifiedName,
    #[serde(default)]
    pub events: Vec<PlanInstanceEvent>,
}

impl PlanInstanceRecord {
    pub fn new(correlation_id: CorrelationId, template_id: QualifiedName) -> Self {
        Self {
            correlation_id,
            template_id,
            events: Vec::new(),
        }
    }

    pub fn with_event(mut self, event: PlanInstanceEvent) -> Self {
        self.events.push(event);
        self
    }
}
