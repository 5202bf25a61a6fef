//! Fixtures for wiring orchestrator components together in tests

#![allow(dead_code)]

use anyhow::{ensure, Context, Result};
use std::sync::Arc;
use std::time::Duration;

use collab_orchestrator::config::{CollaborationConfig, InstanceConfig};
use collab_orchestrator::messaging::{BrokerConnector, CollaborationBus, InMemoryBrokerNetwork};
use collab_orchestrator::models::{
    InMemoryPackageStore, InstanceId, Package, PackageId, Plan, PlanParameter, QualifiedName,
    TopologyTemplate,
};
use collab_orchestrator::orchestration::{
    DeploymentAdmissionController, InvocationScheduler, TriggerObserver,
};
use collab_orchestrator::registry::{CorrelationRegistry, PlanRegistry};
use collab_orchestrator::state_machine::{DeploymentStateMachine, InMemoryDeploymentStateStore};

use super::doubles::{RecordingPlanEngine, ScriptedPlanExecutor};

pub const PLANS_NS: &str = "http://example.org/plans";
pub const TEMPLATE_NS: &str = "http://example.org/templates";
pub const POLL_INTERVAL: Duration = Duration::from_secs(10);

pub fn template_id() -> QualifiedName {
    QualifiedName::new(TEMPLATE_NS, "WebShop")
}

pub fn build_plan() -> QualifiedName {
    QualifiedName::new(PLANS_NS, "WebShop_buildPlan")
}

pub fn scale_plan() -> QualifiedName {
    QualifiedName::new(PLANS_NS, "WebShop_scaleOut")
}

/// Package with a build plan and a boundary scale-out plan
pub fn web_shop(id: &str) -> Package {
    Package::new(PackageId::new(id)).with_template(
        TopologyTemplate::new(template_id())
            .with_plan(Plan::new(build_plan()))
            .with_plan(
                Plan::new(scale_plan())
                    .with_boundary("elasticity", "scale_out")
                    .with_input(PlanParameter::new("OpenTOSCAContainerAPIServiceInstanceURL").required())
                    .with_input(PlanParameter::new("CorrelationID"))
                    .with_input(PlanParameter::new("instances").required())
                    .with_input(PlanParameter::new("region").with_value("eu-central")),
            ),
    )
}

pub fn instance_config(id: &str, port: u16) -> InstanceConfig {
    InstanceConfig {
        instance_id: id.to_string(),
        broker_host: id.to_string(),
        broker_port: port,
    }
}

pub fn collaboration_config(peers: &[(&str, u16)]) -> CollaborationConfig {
    CollaborationConfig {
        enabled: true,
        hosts: peers.iter().map(|(host, _)| host.to_string()).collect(),
        ports: peers.iter().map(|(_, port)| port.to_string()).collect(),
        connect_timeout_ms: 500,
        ..Default::default()
    }
}

/// All components of one orchestrator instance, wired against test doubles
pub struct Harness {
    pub instance_id: InstanceId,
    pub store: Arc<InMemoryPackageStore>,
    pub plans: Arc<PlanRegistry>,
    pub correlations: Arc<CorrelationRegistry>,
    pub bus: Arc<CollaborationBus>,
    pub engine: Arc<RecordingPlanEngine>,
    pub executor: Arc<ScriptedPlanExecutor>,
    pub state_machine: DeploymentStateMachine,
    pub scheduler: InvocationScheduler,
    pub controller: Arc<DeploymentAdmissionController>,
}

impl Harness {
    /// Local-only instance
    pub fn local() -> Self {
        Self::with_bus(
            &instance_config("localhost", 1883),
            &CollaborationConfig::default(),
            &InMemoryBrokerNetwork::new(),
        )
    }

    pub fn with_bus(
        instance: &InstanceConfig,
        collaboration: &CollaborationConfig,
        network: &InMemoryBrokerNetwork,
    ) -> Self {
        Self::with_connector(
            instance,
            collaboration,
            Arc::new(network.connector()),
            POLL_INTERVAL,
        )
    }

    pub fn with_connector(
        instance: &InstanceConfig,
        collaboration: &CollaborationConfig,
        connector: Arc<dyn BrokerConnector>,
        poll_interval: Duration,
    ) -> Self {
        let store = Arc::new(InMemoryPackageStore::new());
        let plans = Arc::new(PlanRegistry::new());
        let correlations = Arc::new(CorrelationRegistry::new(Duration::from_secs(3600)));
        let bus = Arc::new(CollaborationBus::new(
            instance,
            collaboration,
            connector,
            Arc::clone(&correlations),
        ));
        let engine = Arc::new(RecordingPlanEngine::new());
        let executor = Arc::new(ScriptedPlanExecutor::new());
        let state_machine =
            DeploymentStateMachine::new(Arc::new(InMemoryDeploymentStateStore::new()));
        let scheduler = InvocationScheduler::new(
            Arc::clone(&plans),
            Arc::clone(&correlations),
            Arc::clone(&bus),
            executor.clone(),
            poll_interval,
        );
        let controller = Arc::new(DeploymentAdmissionController::new(
            instance.instance_id(),
            state_machine.clone(),
            store.clone(),
            Arc::clone(&plans),
            engine.clone(),
            scheduler.clone(),
        ));

        Self {
            instance_id: instance.instance_id(),
            store,
            plans,
            correlations,
            bus,
            engine,
            executor,
            state_machine,
            scheduler,
            controller,
        }
    }

    pub fn trigger_observer(&self) -> TriggerObserver {
        TriggerObserver::new(
            self.instance_id.clone(),
            Arc::clone(&self.plans),
            self.state_machine.clone(),
            self.scheduler.clone(),
            "http://localhost:1337/csars/{package}/servicetemplates/{template}/instances",
        )
    }

    /// Store, process and deploy `package`
    pub async fn try_deploy(&self, package: Package) -> Result<PackageId> {
        let id = package.id.clone();
        self.store.insert(package);
        self.controller
            .declare_stored(&id)
            .await
            .with_context(|| format!("declaring {id} stored"))?;
        ensure!(
            self.controller
                .process_package(&id)
                .await
                .with_context(|| format!("processing {id}"))?,
            "package {id} could not be read from storage"
        );
        ensure!(
            self.controller
                .deploy_plans(&id, &template_id())
                .await
                .with_context(|| format!("deploying plans of {id}"))?,
            "not every plan of {id} deployed"
        );
        Ok(id)
    }

    pub async fn deploy(&self, package: Package) -> PackageId {
        self.try_deploy(package).await.expect("package deploys")
    }

    /// Controller of a restarted instance: same stores and engine, nothing in memory
    pub fn restarted_controller(&self) -> DeploymentAdmissionController {
        DeploymentAdmissionController::new(
            self.instance_id.clone(),
            self.state_machine.clone(),
            self.store.clone(),
            Arc::new(PlanRegistry::new()),
            self.engine.clone(),
            self.scheduler.clone(),
        )
    }
}
