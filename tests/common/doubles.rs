//! Collaborator doubles shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashSet;

use collab_orchestrator::models::{
    CorrelationId, InvocationRequest, PackageId, ParameterBinding, Plan, QualifiedName,
};
use collab_orchestrator::orchestration::{
    ExecutionStatus, PlanEngine, PlanExecutionError, PlanExecutor,
};

/// Plan engine that records every call and fails the plans it is told to
#[derive(Debug, Default)]
pub struct RecordingPlanEngine {
    failing_deploys: Mutex<HashSet<QualifiedName>>,
    failing_undeploys: Mutex<HashSet<QualifiedName>>,
    deployed: Mutex<Vec<(PackageId, String, QualifiedName)>>,
    undeployed: Mutex<Vec<(PackageId, String, QualifiedName)>>,
}

impl RecordingPlanEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_deploy_of(&self, plan: QualifiedName) {
        self.failing_deploys.lock().insert(plan);
    }

    pub fn fail_undeploy_of(&self, plan: QualifiedName) {
        self.failing_undeploys.lock().insert(plan);
    }

    pub fn heal(&self) {
        self.failing_deploys.lock().clear();
        self.failing_undeploys.lock().clear();
    }

    pub fn deployed(&self) -> Vec<(PackageId, String, QualifiedName)> {
        self.deployed.lock().clone()
    }

    pub fn undeployed(&self) -> Vec<(PackageId, String, QualifiedName)> {
        self.undeployed.lock().clone()
    }
}

#[async_trait]
impl PlanEngine for RecordingPlanEngine {
    async fn deploy_plan(&self, package_id: &PackageId, plans_namespace: &str, plan: &Plan) -> bool {
        if self.failing_deploys.lock().contains(&plan.id) {
            return false;
        }
        self.deployed
            .lock()
            .push((package_id.clone(), plans_namespace.to_string(), plan.id.clone()));
        true
    }

    async fn undeploy_plan(&self, package_id: &PackageId, plans_namespace: &str, plan: &Plan) -> bool {
        if self.failing_undeploys.lock().contains(&plan.id) {
            return false;
        }
        self.undeployed
            .lock()
            .push((package_id.clone(), plans_namespace.to_string(), plan.id.clone()));
        true
    }
}

/// How a scripted plan run behaves
#[derive(Debug, Clone)]
pub enum Script {
    /// Report running for this many polls, then finish with the outputs
    FinishAfter(usize, Vec<ParameterBinding>),
    FailAfter(usize, String),
    /// Refuse to start
    Reject(String),
}

/// Plan executor whose behaviour per plan is scripted up front
#[derive(Debug, Default)]
pub struct ScriptedPlanExecutor {
    scripts: DashMap<QualifiedName, Script>,
    runs: DashMap<CorrelationId, (Script, usize)>,
    started: Mutex<Vec<InvocationRequest>>,
}

impl ScriptedPlanExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, plan: QualifiedName, script: Script) {
        self.scripts.insert(plan, script);
    }

    pub fn started(&self) -> Vec<InvocationRequest> {
        self.started.lock().clone()
    }
}

#[async_trait]
impl PlanExecutor for ScriptedPlanExecutor {
    async fn start(&self, request: &InvocationRequest, plan: &Plan) -> Result<(), PlanExecutionError> {
        let script = self
            .scripts
            .get(&plan.id)
            .map(|entry| entry.value().clone())
            .unwrap_or(Script::FinishAfter(0, Vec::new()));

        if let Script::Reject(reason) = &script {
            return Err(PlanExecutionError::Rejected(reason.clone()));
        }

        self.started.lock().push(request.clone());
        self.runs.insert(request.correlation_id.clone(), (script, 0));
        Ok(())
    }

    async fn poll(&self, correlation_id: &CorrelationId) -> ExecutionStatus {
        let Some(mut run) = self.runs.get_mut(correlation_id) else {
            return ExecutionStatus::Failed(format!("unknown run {correlation_id}"));
        };
        let (script, polls) = &mut *run;
        *polls += 1;

        match script {
            Script::FinishAfter(running, outputs) if *polls > *running => {
                ExecutionStatus::Finished(outputs.clone())
            }
            Script::FailAfter(running, reason) if *polls > *running => {
                ExecutionStatus::Failed(reason.clone())
            }
            _ => ExecutionStatus::Running,
        }
    }
}
