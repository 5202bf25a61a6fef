//! # Situation Trigger Observer
//!
//! Runs the management operation attached to a situation trigger: resolves the
//! boundary plan implementing the trigger's interface operation, binds the
//! trigger inputs to the plan's input parameters and schedules it within the
//! trigger's time budget. Outputs of the finished plan are recorded into the
//! trigger instance.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::scheduler::{InvocationOutcome, InvocationScheduler};
use crate::constants::plan_parameters::{CORRELATION_ID, INSTANCE_DATA_API_URL};
use crate::models::{
    CorrelationId, InstanceId, InvocationRequest, PackageId, ParameterBinding, Plan,
    QualifiedName, TimeBudget,
};
use crate::registry::PlanRegistry;
use crate::state_machine::{DeploymentOperation, DeploymentStateMachine};

/// Management operation to run when a situation becomes active
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SituationTrigger {
    pub id: String,
    pub package_id: PackageId,
    pub template_id: QualifiedName,
    pub service_instance_id: i64,
    pub interface_name: String,
    pub operation_name: String,
    #[serde(default)]
    pub inputs: Vec<ParameterBinding>,
    /// Time the situation leaves for the operation to finish
    #[serde(default)]
    pub time_available: Option<TimeBudget>,
    #[serde(default)]
    pub target_instance: Option<InstanceId>,
}

impl SituationTrigger {
    pub fn input(&self, name: &str) -> Option<&str> {
        self.inputs
            .iter()
            .find(|binding| binding.name == name)
            .map(|binding| binding.value.as_str())
    }
}

/// How a trigger run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerOutcome {
    Completed,
    /// The plan would not finish within the time available, so it never ran
    Infeasible { estimated: Duration, budget: TimeBudget },
    /// No plan implements the trigger's interface operation
    PlanNotFound,
    /// The package's deployment state does not allow invocations
    Rejected(String),
    Failed(String),
}

/// Record of one trigger run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerInstance {
    pub trigger_id: String,
    pub correlation_id: CorrelationId,
    pub started: bool,
    pub finished: bool,
    pub outputs: Vec<ParameterBinding>,
    pub outcome: Option<TriggerOutcome>,
}

impl TriggerInstance {
    fn new(trigger_id: String, correlation_id: CorrelationId) -> Self {
        Self {
            trigger_id,
            correlation_id,
            started: false,
            finished: false,
            outputs: Vec::new(),
            outcome: None,
        }
    }
}

/// Handle of a trigger running on its own task
#[derive(Debug)]
pub struct TriggerHandle {
    instance: Arc<RwLock<TriggerInstance>>,
    task: JoinHandle<()>,
}

impl TriggerHandle {
    /// Snapshot of the trigger instance
    pub fn instance(&self) -> TriggerInstance {
        self.instance.read().clone()
    }

    pub fn abort(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the run to end and return the final instance
    pub async fn join(self) -> TriggerInstance {
        if let Err(e) = self.task.await {
            let mut instance = self.instance.write();
            if instance.outcome.is_none() {
                instance.outcome = Some(TriggerOutcome::Failed(format!("trigger task ended: {e}")));
            }
        }
        let instance = self.instance.read().clone();
        instance
    }
}

#[derive(Debug, Clone)]
pub struct TriggerObserver {
    instance_id: InstanceId,
    plans: Arc<PlanRegistry>,
    state_machine: DeploymentStateMachine,
    scheduler: InvocationScheduler,
    instance_data_api: String,
}

impl TriggerObserver {
    pub fn new(
        instance_id: InstanceId,
        plans: Arc<PlanRegistry>,
        state_machine: DeploymentStateMachine,
        scheduler: InvocationScheduler,
        instance_data_api: impl Into<String>,
    ) -> Self {
        Self {
            instance_id,
            plans,
            state_machine,
            scheduler,
            instance_data_api: instance_data_api.into(),
        }
    }

    /// Run `trigger` on a dedicated task
    pub fn spawn(&self, trigger: SituationTrigger) -> TriggerHandle {
        let instance = Arc::new(RwLock::new(TriggerInstance::new(
            trigger.id.clone(),
            CorrelationId::generate(),
        )));
        let observer = self.clone();
        let shared = Arc::clone(&instance);
        let task = tokio::spawn(async move {
            observer.run(trigger, shared).await;
        });
        TriggerHandle { instance, task }
    }

    async fn run(&self, trigger: SituationTrigger, instance: Arc<RwLock<TriggerInstance>>) {
        let correlation_id = {
            let mut guard = instance.write();
            guard.started = true;
            guard.correlation_id.clone()
        };
        info!(
            trigger_id = %trigger.id,
            correlation_id = %correlation_id,
            interface = %trigger.interface_name,
            operation = %trigger.operation_name,
            "Situation trigger fired"
        );

        let outcome = self.execute(&trigger, correlation_id).await;

        let mut guard = instance.write();
        match outcome {
            Ok(InvocationOutcome::Completed { outputs, .. }) => {
                guard.outputs = outputs;
                guard.outcome = Some(TriggerOutcome::Completed);
            }
            Ok(InvocationOutcome::Failed { reason, .. }) => {
                guard.outcome = Some(TriggerOutcome::Failed(reason));
            }
            Ok(InvocationOutcome::Infeasible { estimated, budget }) => {
                guard.outcome = Some(TriggerOutcome::Infeasible { estimated, budget });
            }
            Err(outcome) => guard.outcome = Some(outcome),
        }
        guard.finished = true;
        debug!(trigger_id = %trigger.id, outcome = ?guard.outcome, "Situation trigger finished");
    }

    async fn execute(
        &self,
        trigger: &SituationTrigger,
        correlation_id: CorrelationId,
    ) -> Result<InvocationOutcome, TriggerOutcome> {
        if let Err(e) = self
            .state_machine
            .check(&trigger.package_id, DeploymentOperation::InvokePlan)
            .await
        {
            warn!(trigger_id = %trigger.id, error = %e, "Trigger rejected by admission control");
            return Err(TriggerOutcome::Rejected(e.to_string()));
        }

        let Some(plan) = self.plans.resolve_plan(
            &trigger.package_id,
            &trigger.template_id,
            &trigger.interface_name,
            &trigger.operation_name,
        ) else {
            error!(
                trigger_id = %trigger.id,
                interface = %trigger.interface_name,
                operation = %trigger.operation_name,
                "No plan implements the trigger operation"
            );
            return Err(TriggerOutcome::PlanNotFound);
        };

        let request = InvocationRequest {
            package_id: trigger.package_id.clone(),
            target_instance: trigger
                .target_instance
                .clone()
                .unwrap_or_else(|| self.instance_id.clone()),
            template_id: trigger.template_id.clone(),
            plan: plan.id.clone(),
            service_instance_id: trigger.service_instance_id,
            inputs: self.bind_inputs(trigger, &plan, &correlation_id),
            correlation_id,
        };

        self.scheduler
            .schedule(request, trigger.time_available)
            .await
            .map_err(|e| TriggerOutcome::Failed(e.to_string()))
    }

    /// Input bindings for `plan`, in the order the plan declares its parameters
    pub fn bind_inputs(
        &self,
        trigger: &SituationTrigger,
        plan: &Plan,
        correlation_id: &CorrelationId,
    ) -> Vec<ParameterBinding> {
        let mut bindings = Vec::with_capacity(plan.input_parameters.len());

        for parameter in &plan.input_parameters {
            let value = match parameter.name.as_str() {
                INSTANCE_DATA_API_URL => Some(self.instance_data_url(trigger)),
                CORRELATION_ID => Some(correlation_id.to_string()),
                name => parameter
                    .value
                    .clone()
                    .or_else(|| trigger.input(name).map(str::to_string)),
            };

            match value {
                Some(value) => bindings.push(ParameterBinding {
                    name: parameter.name.clone(),
                    value,
                    parameter_type: Some(parameter.parameter_type.clone()),
                }),
                None if parameter.required => warn!(
                    trigger_id = %trigger.id,
                    parameter = %parameter.name,
                    "No value for required plan input"
                ),
                None => {}
            }
        }

        bindings
    }

    fn instance_data_url(&self, trigger: &SituationTrigger) -> String {
        let base = self
            .instance_data_api
            .replace("{package}", &encode_path_segment(trigger.package_id.as_str()))
            .replace(
                "{template}",
                &encode_path_segment(&trigger.template_id.to_string()),
            );
        format!(
            "{}/{}",
            base.trim_end_matches('/'),
            trigger.service_instance_id
        )
    }
}

/// Percent-encode everything except RFC 3986 unreserved characters
fn encode_path_segment(segment: &str) -> String {
    let mut encoded = String::with_capacity(segment.len());
    for byte in segment.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'.' | b'_' | b'~') {
            encoded.push(byte as char);
        } else {
            encoded.push_str(&format!("%{byte:02X}"));
        }
    }
    encoded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_path_segment() {
        assert_eq!(encode_path_segment("shop.csar"), "shop.csar");
        assert_eq!(
            encode_path_segment("{http://example.org}Shop"),
            "%7Bhttp%3A%2F%2Fexample.org%7DShop"
        );
        assert_eq!(encode_path_segment("a b"), "a%20b");
    }
}
