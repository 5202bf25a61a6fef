//! # Deployment Admission Controller
//!
//! Caller-facing surface for managing packages. Every operation is admitted by
//! the [`DeploymentStateMachine`] first; the controller then drives the
//! collaborators (package storage, plan engine, invocation scheduler) and
//! reports the outcome back so the package lands in the right state.
//!
//! Failures of individual plans are collected rather than aborting the whole
//! operation, so callers always see every plan that went wrong.
//!
//! Which plans to undeploy is always derived from the package's templates,
//! never from what this controller happens to remember, so a restarted
//! instance over a persistent state store cleans up the same plans.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::engines::PlanEngine;
use super::scheduler::{InvocationOutcome, InvocationScheduler, InvocationTask};
use crate::errors::{OrchestrationError, OrchestrationResult};
use crate::messaging::InboundRequestHandler;
use crate::models::{
    CorrelationId, InstanceId, InvocationRequest, InvocationResponse, PackageId, PackageStore,
    ParameterBinding, Plan, QualifiedName, TimeBudget,
};
use crate::registry::PlanRegistry;
use crate::state_machine::{
    DeploymentOperation, DeploymentState, DeploymentStateMachine, DeploymentTransition,
    OperationOutcome, StateMachineError,
};

/// Parameters of a single plan invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanInvocation {
    pub template_id: QualifiedName,
    pub service_instance_id: i64,
    pub plan: QualifiedName,
    pub inputs: Vec<ParameterBinding>,
    /// Instance that has to run the plan; this instance when unset
    pub target_instance: Option<InstanceId>,
    pub time_budget: Option<TimeBudget>,
}

impl PlanInvocation {
    pub fn new(template_id: QualifiedName, service_instance_id: i64, plan: QualifiedName) -> Self {
        Self {
            template_id,
            service_instance_id,
            plan,
            inputs: Vec::new(),
            target_instance: None,
            time_budget: None,
        }
    }

    pub fn with_input(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.inputs.push(ParameterBinding::new(name, value));
        self
    }

    pub fn on_instance(mut self, target: InstanceId) -> Self {
        self.target_instance = Some(target);
        self
    }

    pub fn within(mut self, budget: TimeBudget) -> Self {
        self.time_budget = Some(budget);
        self
    }
}

/// An invocation started through the controller and not collected yet
#[derive(Debug)]
struct TrackedInvocation {
    task: InvocationTask,
    /// First sweep that saw the task finished
    finished_since: Option<Instant>,
}

pub struct DeploymentAdmissionController {
    instance_id: InstanceId,
    state_machine: DeploymentStateMachine,
    packages: Arc<dyn PackageStore>,
    plans: Arc<PlanRegistry>,
    engine: Arc<dyn PlanEngine>,
    scheduler: InvocationScheduler,
    invocations: DashMap<CorrelationId, TrackedInvocation>,
}

impl std::fmt::Debug for DeploymentAdmissionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeploymentAdmissionController")
            .field("instance_id", &self.instance_id)
            .field("invocations", &self.invocations.len())
            .finish_non_exhaustive()
    }
}

impl DeploymentAdmissionController {
    pub fn new(
        instance_id: InstanceId,
        state_machine: DeploymentStateMachine,
        packages: Arc<dyn PackageStore>,
        plans: Arc<PlanRegistry>,
        engine: Arc<dyn PlanEngine>,
        scheduler: InvocationScheduler,
    ) -> Self {
        Self {
            instance_id,
            state_machine,
            packages,
            plans,
            engine,
            scheduler,
            invocations: DashMap::new(),
        }
    }

    pub fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }

    /// Hook for the storage layer once a package has been stored
    pub async fn declare_stored(&self, package_id: &PackageId) -> OrchestrationResult<()> {
        self.state_machine
            .declare_forced(package_id, DeploymentState::Stored)
            .await?;
        info!(package_id = %package_id, "Package stored");
        Ok(())
    }

    /// Administrative recovery; bypasses the transition table
    pub async fn declare_forced(
        &self,
        package_id: &PackageId,
        state: DeploymentState,
    ) -> OrchestrationResult<()> {
        warn!(package_id = %package_id, state = %state, "Forcing deployment state");
        Ok(self.state_machine.declare_forced(package_id, state).await?)
    }

    pub async fn current_state(
        &self,
        package_id: &PackageId,
    ) -> OrchestrationResult<Option<DeploymentState>> {
        Ok(self.state_machine.current_state(package_id).await?)
    }

    pub async fn executable_operations(
        &self,
        package_id: &PackageId,
    ) -> OrchestrationResult<BTreeSet<DeploymentOperation>> {
        Ok(self.state_machine.executable_operations(package_id).await?)
    }

    pub async fn transitions(
        &self,
        package_id: &PackageId,
    ) -> OrchestrationResult<Vec<DeploymentTransition>> {
        Ok(self.state_machine.transitions(package_id).await?)
    }

    /// Read the stored package and index its templates and plans.
    ///
    /// A package that cannot be read still ends up `Processed`; the failure is
    /// reported through the return value.
    pub async fn process_package(&self, package_id: &PackageId) -> OrchestrationResult<bool> {
        let active = self
            .state_machine
            .begin(package_id, DeploymentOperation::ProcessPackage)
            .await?;

        let success = match self.packages.find(package_id).await {
            Some(package) => {
                let plan_count: usize = package.templates.iter().map(|t| t.plans.len()).sum();
                self.plans.register_package(package);
                info!(package_id = %package_id, plans = plan_count, "Package processed");
                true
            }
            None => {
                error!(package_id = %package_id, "Package missing from storage, cannot process");
                false
            }
        };

        self.state_machine
            .finish(active, OperationOutcome::from_success(success))
            .await?;
        Ok(success)
    }

    /// Deploy every plan of a topology template.
    ///
    /// Returns false if any plan failed; the package then stays `Processed` so
    /// the deployment can be retried.
    pub async fn deploy_plans(
        &self,
        package_id: &PackageId,
        template_id: &QualifiedName,
    ) -> OrchestrationResult<bool> {
        let active = self
            .state_machine
            .begin(package_id, DeploymentOperation::DeployPlans)
            .await?;

        let template = self
            .plans
            .package(package_id)
            .and_then(|package| package.template(template_id).cloned());
        let Some(template) = template else {
            self.state_machine
                .finish(active, OperationOutcome::Failure)
                .await?;
            return Err(OrchestrationError::TemplateNotFound {
                package_id: package_id.clone(),
                template: template_id.clone(),
            });
        };

        let plans_namespace = template.effective_plans_namespace();
        let mut failed = Vec::new();

        for plan in &template.plans {
            if !self
                .engine
                .deploy_plan(package_id, plans_namespace, plan)
                .await
            {
                failed.push(plan.id.to_string());
            }
        }

        let deployed_count = template.plans.len() - failed.len();

        let success = failed.is_empty();
        if success {
            info!(
                package_id = %package_id,
                template = %template_id,
                plans = deployed_count,
                "Plans deployed"
            );
        } else {
            error!(
                package_id = %package_id,
                template = %template_id,
                failed_plans = ?failed,
                "Plan deployment failed"
            );
        }

        self.state_machine
            .finish(active, OperationOutcome::from_success(success))
            .await?;
        Ok(success)
    }

    /// Every plan of every template, with the namespace it is deployed to
    async fn package_plans(&self, package_id: &PackageId) -> Vec<(String, Plan)> {
        let package = match self.plans.package(package_id) {
            Some(package) => Some(package),
            None => self.packages.find(package_id).await,
        };
        let Some(package) = package else {
            warn!(package_id = %package_id, "Package unknown to registry and storage, no plans to undeploy");
            return Vec::new();
        };

        package
            .templates
            .iter()
            .flat_map(|template| {
                let namespace = template.effective_plans_namespace();
                template
                    .plans
                    .iter()
                    .map(move |plan| (namespace.to_string(), plan.clone()))
            })
            .collect()
    }

    /// Undeploy every plan of the package, continuing past failures
    async fn undeploy_all(&self, package_id: &PackageId) -> Vec<String> {
        let mut errors = Vec::new();
        for (plans_namespace, plan) in self.package_plans(package_id).await {
            if self
                .engine
                .undeploy_plan(package_id, &plans_namespace, &plan)
                .await
            {
                debug!(package_id = %package_id, plan = %plan.id, "Plan undeployed");
            } else {
                errors.push(format!("Failed to undeploy plan {}", plan.id));
            }
        }
        errors
    }

    pub async fn undeploy_plans(&self, package_id: &PackageId) -> OrchestrationResult<bool> {
        let active = self
            .state_machine
            .begin(package_id, DeploymentOperation::UndeployPlans)
            .await?;

        let errors = self.undeploy_all(package_id).await;
        for error in &errors {
            error!(package_id = %package_id, error = %error, "Undeployment failure");
        }

        let success = errors.is_empty();
        self.state_machine
            .finish(active, OperationOutcome::from_success(success))
            .await?;
        Ok(success)
    }

    /// Undeploy all plans and remove the package.
    ///
    /// Returns every problem encountered. With no undeployment failure the
    /// deployment state is dropped and the package deleted from storage;
    /// otherwise the package is pinned to `Processed`.
    pub async fn delete_package(&self, package_id: &PackageId) -> OrchestrationResult<Vec<String>> {
        let active = self
            .state_machine
            .begin(package_id, DeploymentOperation::Delete)
            .await?;

        let mut errors = self.undeploy_all(package_id).await;
        let success = errors.is_empty();

        if let Err(source) = self
            .state_machine
            .finish(active, OperationOutcome::from_success(success))
            .await
        {
            error!(
                package_id = %package_id,
                error = %source,
                undeploy_errors = errors.len(),
                "Unable to record outcome of package deletion"
            );
            return Err(OrchestrationError::DeletionIncomplete {
                package_id: package_id.clone(),
                undeploy_errors: errors,
                source,
            });
        }

        if success {
            self.plans.unregister_package(package_id);
            if let Err(e) = self.packages.delete(package_id).await {
                errors.push(e.to_string());
            }
            info!(package_id = %package_id, "Package deleted");
        } else {
            warn!(
                package_id = %package_id,
                errors = errors.len(),
                "Package could not be deleted completely"
            );
        }

        Ok(errors)
    }

    /// Start a plan invocation on its own task and return its correlation id
    pub async fn invoke_plan(
        &self,
        package_id: &PackageId,
        invocation: PlanInvocation,
    ) -> OrchestrationResult<CorrelationId> {
        self.state_machine
            .check(package_id, DeploymentOperation::InvokePlan)
            .await?;

        let package = self
            .plans
            .package(package_id)
            .ok_or_else(|| OrchestrationError::PackageNotFound {
                package_id: package_id.clone(),
            })?;
        if package.template(&invocation.template_id).is_none() {
            return Err(OrchestrationError::TemplateNotFound {
                package_id: package_id.clone(),
                template: invocation.template_id,
            });
        }

        let correlation_id = CorrelationId::generate();
        let request = InvocationRequest {
            package_id: package_id.clone(),
            target_instance: invocation
                .target_instance
                .unwrap_or_else(|| self.instance_id.clone()),
            template_id: invocation.template_id,
            plan: invocation.plan,
            service_instance_id: invocation.service_instance_id,
            inputs: invocation.inputs,
            correlation_id: correlation_id.clone(),
        };

        info!(
            package_id = %package_id,
            correlation_id = %correlation_id,
            plan = %request.plan,
            target = %request.target_instance,
            "Invoking plan"
        );

        let task = self.scheduler.spawn(request, invocation.time_budget);
        self.invocations.insert(
            correlation_id.clone(),
            TrackedInvocation {
                task,
                finished_since: None,
            },
        );
        Ok(correlation_id)
    }

    /// Wait for an invocation started by [`Self::invoke_plan`]
    pub async fn await_invocation(
        &self,
        correlation_id: &CorrelationId,
    ) -> OrchestrationResult<InvocationOutcome> {
        let (_, tracked) = self.invocations.remove(correlation_id).ok_or_else(|| {
            OrchestrationError::UnknownInvocation {
                correlation_id: correlation_id.clone(),
            }
        })?;
        Ok(tracked.task.join().await?)
    }

    /// Stop waiting for an invocation; work already dispatched is not undone
    pub fn cancel_invocation(&self, correlation_id: &CorrelationId) -> bool {
        match self.invocations.remove(correlation_id) {
            Some((_, tracked)) => {
                tracked.task.abort();
                true
            }
            None => false,
        }
    }

    pub fn running_invocations(&self) -> usize {
        self.invocations
            .iter()
            .filter(|entry| !entry.value().task.is_finished())
            .count()
    }

    /// Invocations started and not yet awaited, cancelled or pruned
    pub fn tracked_invocations(&self) -> usize {
        self.invocations.len()
    }

    /// Drop outcomes nobody collected within the retention window.
    ///
    /// The window starts at the first sweep that sees the invocation finished.
    pub fn prune_finished_invocations_at(&self, now: Instant) -> usize {
        let retention = self.scheduler.retention();
        let mut pruned = 0;
        self.invocations.retain(|correlation_id, tracked| {
            if !tracked.task.is_finished() {
                return true;
            }
            let since = *tracked.finished_since.get_or_insert(now);
            if now.saturating_duration_since(since) < retention {
                return true;
            }
            debug!(correlation_id = %correlation_id, "Dropping uncollected invocation outcome");
            pruned += 1;
            false
        });

        if pruned > 0 {
            info!(pruned, "Pruned uncollected invocations");
        }
        pruned
    }

    pub fn prune_finished_invocations(&self) -> usize {
        self.prune_finished_invocations_at(Instant::now())
    }

    /// Periodically prune uncollected invocations until the handle is aborted
    pub fn spawn_invocation_reaper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let controller = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                controller.prune_finished_invocations();
            }
        })
    }

    pub fn cancel_all(&self) {
        for entry in self.invocations.iter() {
            entry.value().task.abort();
        }
        self.invocations.clear();
    }
}

#[async_trait]
impl InboundRequestHandler for DeploymentAdmissionController {
    async fn handle_request(&self, request: InvocationRequest) -> InvocationResponse {
        let correlation_id = request.correlation_id.clone();

        if let Err(e) = self
            .state_machine
            .check(&request.package_id, DeploymentOperation::InvokePlan)
            .await
        {
            let reason = match e {
                StateMachineError::AdmissionRejected { .. } => e.to_string(),
                other => format!("Admission check failed: {other}"),
            };
            warn!(
                correlation_id = %correlation_id,
                package_id = %request.package_id,
                reason = %reason,
                "Rejecting collaboration request"
            );
            return InvocationResponse::failed(correlation_id, reason);
        }

        self.scheduler.execute_locally(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CollaborationConfig, InstanceConfig};
    use crate::messaging::{CollaborationBus, InMemoryBrokerNetwork};
    use crate::models::{InMemoryPackageStore, Package, TopologyTemplate};
    use crate::orchestration::engines::{ExecutionStatus, PlanExecutionError, PlanExecutor};
    use crate::registry::CorrelationRegistry;
    use crate::state_machine::{
        DeploymentStateStore, InMemoryDeploymentStateStore, StateMachineResult,
    };
    use std::collections::HashSet;

    struct AlwaysDeploys;

    #[async_trait]
    impl PlanEngine for AlwaysDeploys {
        async fn deploy_plan(&self, _: &PackageId, _: &str, _: &Plan) -> bool {
            true
        }

        async fn undeploy_plan(&self, _: &PackageId, _: &str, _: &Plan) -> bool {
            true
        }
    }

    /// Fails to undeploy the named plans
    struct RefusesUndeploy(HashSet<QualifiedName>);

    #[async_trait]
    impl PlanEngine for RefusesUndeploy {
        async fn deploy_plan(&self, _: &PackageId, _: &str, _: &Plan) -> bool {
            true
        }

        async fn undeploy_plan(&self, _: &PackageId, _: &str, plan: &Plan) -> bool {
            !self.0.contains(&plan.id)
        }
    }

    /// Loses its backend whenever a delete tries to record its outcome
    #[derive(Default)]
    struct UnrecordableDeletes(InMemoryDeploymentStateStore);

    #[async_trait]
    impl DeploymentStateStore for UnrecordableDeletes {
        async fn current_state(
            &self,
            package_id: &PackageId,
        ) -> StateMachineResult<Option<DeploymentState>> {
            self.0.current_state(package_id).await
        }

        async fn compare_and_set(
            &self,
            package_id: &PackageId,
            expected: Option<DeploymentState>,
            next: DeploymentState,
            operation: Option<DeploymentOperation>,
        ) -> StateMachineResult<bool> {
            if operation == Some(DeploymentOperation::Delete) && next == DeploymentState::Processed {
                return Err(StateMachineError::persistence_failed("state backend unavailable"));
            }
            self.0
                .compare_and_set(package_id, expected, next, operation)
                .await
        }

        async fn force_state(
            &self,
            package_id: &PackageId,
            state: DeploymentState,
        ) -> StateMachineResult<()> {
            self.0.force_state(package_id, state).await
        }

        async fn remove(
            &self,
            package_id: &PackageId,
            operation: Option<DeploymentOperation>,
        ) -> StateMachineResult<Option<DeploymentState>> {
            self.0.remove(package_id, operation).await
        }

        async fn transitions(
            &self,
            package_id: &PackageId,
        ) -> StateMachineResult<Vec<DeploymentTransition>> {
            self.0.transitions(package_id).await
        }
    }

    struct InstantExecutor;

    #[async_trait]
    impl PlanExecutor for InstantExecutor {
        async fn start(&self, _: &InvocationRequest, _: &Plan) -> Result<(), PlanExecutionError> {
            Ok(())
        }

        async fn poll(&self, _: &CorrelationId) -> ExecutionStatus {
            ExecutionStatus::Finished(Vec::new())
        }
    }

    fn template_id() -> QualifiedName {
        QualifiedName::new("http://example.org", "Shop")
    }

    fn build_plan() -> QualifiedName {
        QualifiedName::new("http://example.org", "Shop_build")
    }

    fn controller() -> (DeploymentAdmissionController, PackageId) {
        controller_with(
            Arc::new(AlwaysDeploys),
            Arc::new(InMemoryDeploymentStateStore::new()),
        )
    }

    fn controller_with(
        engine: Arc<dyn PlanEngine>,
        states: Arc<dyn DeploymentStateStore>,
    ) -> (DeploymentAdmissionController, PackageId) {
        let id = PackageId::new("shop.csar");
        let store = Arc::new(InMemoryPackageStore::new());
        store.insert(Package::new(id.clone()).with_template(
            TopologyTemplate::new(template_id())
                .with_plan(Plan::new(build_plan())),
        ));

        let plans = Arc::new(PlanRegistry::new());
        let correlations = Arc::new(CorrelationRegistry::new(Duration::from_secs(60)));
        let bus = Arc::new(CollaborationBus::new(
            &InstanceConfig::default(),
            &CollaborationConfig::default(),
            Arc::new(InMemoryBrokerNetwork::new().connector()),
            Arc::clone(&correlations),
        ));
        let scheduler = InvocationScheduler::new(
            Arc::clone(&plans),
            correlations,
            bus,
            Arc::new(InstantExecutor),
            Duration::from_millis(10),
        );

        (
            DeploymentAdmissionController::new(
                InstanceId::new("localhost"),
                DeploymentStateMachine::new(states),
                store,
                plans,
                engine,
                scheduler,
            ),
            id,
        )
    }

    #[tokio::test]
    async fn test_full_lifecycle() {
        let (controller, id) = controller();
        controller.declare_stored(&id).await.unwrap();

        assert!(controller.process_package(&id).await.unwrap());
        assert!(controller.deploy_plans(&id, &template_id()).await.unwrap());
        assert_eq!(
            controller.current_state(&id).await.unwrap(),
            Some(DeploymentState::PlansDeployed)
        );

        assert!(controller.delete_package(&id).await.unwrap().is_empty());
        assert_eq!(controller.current_state(&id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_failed_outcome_recording_keeps_undeploy_errors() {
        let (controller, id) = controller_with(
            Arc::new(RefusesUndeploy(HashSet::from([build_plan()]))),
            Arc::new(UnrecordableDeletes::default()),
        );
        controller.declare_stored(&id).await.unwrap();
        assert!(controller.process_package(&id).await.unwrap());
        assert!(controller.deploy_plans(&id, &template_id()).await.unwrap());

        match controller.delete_package(&id).await {
            Err(OrchestrationError::DeletionIncomplete {
                package_id,
                undeploy_errors,
                source,
            }) => {
                assert_eq!(package_id, id);
                assert_eq!(undeploy_errors.len(), 1);
                assert!(undeploy_errors[0].contains("Shop_build"));
                assert!(matches!(source, StateMachineError::PersistenceFailed { .. }));
            }
            other => panic!("expected incomplete deletion, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_invoke_rejected_before_processing() {
        let (controller, id) = controller();
        controller.declare_stored(&id).await.unwrap();

        let result = controller
            .invoke_plan(
                &id,
                PlanInvocation::new(template_id(), 1, build_plan()),
            )
            .await;
        assert!(result.unwrap_err().is_admission_rejection());
    }

    #[tokio::test]
    async fn test_await_unknown_invocation() {
        let (controller, _) = controller();
        assert!(matches!(
            controller
                .await_invocation(&CorrelationId::new("nothing"))
                .await,
            Err(OrchestrationError::UnknownInvocation { .. })
        ));
    }

    #[tokio::test]
    async fn test_inbound_request_for_unprocessed_package_fails() {
        let (controller, id) = controller();
        let response = controller
            .handle_request(InvocationRequest {
                package_id: id,
                target_instance: InstanceId::new("localhost"),
                template_id: template_id(),
                plan: build_plan(),
                service_instance_id: 1,
                inputs: Vec::new(),
                correlation_id: CorrelationId::new("remote-1"),
            })
            .await;

        assert!(response.is_terminal());
        assert!(response.failure.is_some());
        assert_eq!(response.correlation_id, CorrelationId::new("remote-1"));
    }
}
