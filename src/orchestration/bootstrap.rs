//! # Orchestrator Bootstrap
//!
//! Builds every component of an orchestrator instance from its configuration,
//! owns them for the lifetime of the instance and tears them down again:
//!
//! - **Configuration**: a validated [`ConfigManager`]
//! - **Collaborators**: package storage, deployment state storage, plan engine,
//!   plan executor and broker connector are injected, with in-memory defaults
//!   for everything storage-like
//! - **Lifecycle**: `start` brings up logging, descriptor catalogs, the
//!   correlation and invocation reapers and the collaboration bus;
//!   `shutdown` stops them

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::control_service::DeploymentAdmissionController;
use super::engines::{PlanEngine, PlanExecutor};
use super::scheduler::InvocationScheduler;
use super::trigger::TriggerObserver;
use crate::config::ConfigManager;
use crate::errors::OrchestratorResult;
use crate::logging::init_structured_logging;
use crate::messaging::{BrokerConnector, BusStartReport, CollaborationBus, TcpBrokerConnector};
use crate::models::{InMemoryPackageStore, PackageStore};
use crate::registry::{ArtifactTypeCatalog, CorrelationRegistry, PlanRegistry};
use crate::state_machine::{
    DeploymentStateMachine, DeploymentStateStore, InMemoryDeploymentStateStore,
};

/// External collaborators of an orchestrator instance
#[derive(Clone)]
pub struct Collaborators {
    pub package_store: Arc<dyn PackageStore>,
    pub state_store: Arc<dyn DeploymentStateStore>,
    pub plan_engine: Arc<dyn PlanEngine>,
    pub plan_executor: Arc<dyn PlanExecutor>,
    pub broker_connector: Arc<dyn BrokerConnector>,
}

impl Collaborators {
    /// In-memory storage and a TCP broker connector around the given engines
    pub fn new(plan_engine: Arc<dyn PlanEngine>, plan_executor: Arc<dyn PlanExecutor>) -> Self {
        Self {
            package_store: Arc::new(InMemoryPackageStore::new()),
            state_store: Arc::new(InMemoryDeploymentStateStore::new()),
            plan_engine,
            plan_executor,
            broker_connector: Arc::new(TcpBrokerConnector::new()),
        }
    }

    pub fn with_package_store(mut self, store: Arc<dyn PackageStore>) -> Self {
        self.package_store = store;
        self
    }

    pub fn with_state_store(mut self, store: Arc<dyn DeploymentStateStore>) -> Self {
        self.state_store = store;
        self
    }

    pub fn with_broker_connector(mut self, connector: Arc<dyn BrokerConnector>) -> Self {
        self.broker_connector = connector;
        self
    }
}

/// A running orchestrator instance
pub struct OrchestratorSystem {
    config: Arc<ConfigManager>,
    plans: Arc<PlanRegistry>,
    correlations: Arc<CorrelationRegistry>,
    artifact_types: ArtifactTypeCatalog,
    bus: Arc<CollaborationBus>,
    scheduler: InvocationScheduler,
    controller: Arc<DeploymentAdmissionController>,
    triggers: TriggerObserver,
    bus_report: BusStartReport,
    reaper: JoinHandle<()>,
    invocation_reaper: JoinHandle<()>,
}

impl std::fmt::Debug for OrchestratorSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrchestratorSystem")
            .field("instance_id", self.controller.instance_id())
            .field("bus_report", &self.bus_report)
            .finish_non_exhaustive()
    }
}

impl OrchestratorSystem {
    /// Build and start every component of the instance
    pub async fn start(
        config: Arc<ConfigManager>,
        collaborators: Collaborators,
    ) -> OrchestratorResult<Self> {
        let settings = config.config();
        init_structured_logging(&settings.logging);

        let instance_id = settings.instance.instance_id();
        info!(
            instance_id = %instance_id,
            broker = %settings.instance.broker_endpoint(),
            collaboration = settings.collaboration.enabled,
            "Starting orchestrator instance"
        );

        let plans = Arc::new(PlanRegistry::new());
        if let Some(dir) = &settings.registry.operation_catalog_dir {
            let load = plans.load_operation_catalog(dir)?;
            for skipped in &load.skipped {
                warn!(path = %skipped.path.display(), error = %skipped.error, "Skipped plan catalog descriptor");
            }
        }

        let artifact_types = match &settings.registry.artifact_types_dir {
            Some(dir) => ArtifactTypeCatalog::load(dir)?,
            None => ArtifactTypeCatalog::new(),
        };

        let correlations = Arc::new(CorrelationRegistry::new(settings.correlation.retention()));
        let reaper = correlations.spawn_reaper(settings.correlation.sweep_interval());

        let bus = Arc::new(CollaborationBus::new(
            &settings.instance,
            &settings.collaboration,
            Arc::clone(&collaborators.broker_connector),
            Arc::clone(&correlations),
        ));

        let scheduler = InvocationScheduler::new(
            Arc::clone(&plans),
            Arc::clone(&correlations),
            Arc::clone(&bus),
            Arc::clone(&collaborators.plan_executor),
            settings.scheduler.poll_interval(),
        );

        let state_machine = DeploymentStateMachine::new(Arc::clone(&collaborators.state_store));
        let controller = Arc::new(DeploymentAdmissionController::new(
            instance_id.clone(),
            state_machine.clone(),
            Arc::clone(&collaborators.package_store),
            Arc::clone(&plans),
            Arc::clone(&collaborators.plan_engine),
            scheduler.clone(),
        ));

        let invocation_reaper =
            controller.spawn_invocation_reaper(settings.correlation.sweep_interval());

        let triggers = TriggerObserver::new(
            instance_id.clone(),
            Arc::clone(&plans),
            state_machine,
            scheduler.clone(),
            settings.triggers.instance_data_api.clone(),
        );

        let bus_report = bus.start(controller.clone()).await;

        info!(
            instance_id = %instance_id,
            request_listeners = bus_report.request_listeners.len(),
            failed_peers = bus_report.failed_peers.len(),
            artifact_types = artifact_types.supported_types().len(),
            "Orchestrator instance started"
        );

        Ok(Self {
            config,
            plans,
            correlations,
            artifact_types,
            bus,
            scheduler,
            controller,
            triggers,
            bus_report,
            reaper,
            invocation_reaper,
        })
    }

    pub fn config(&self) -> &Arc<ConfigManager> {
        &self.config
    }

    pub fn controller(&self) -> &Arc<DeploymentAdmissionController> {
        &self.controller
    }

    pub fn plans(&self) -> &Arc<PlanRegistry> {
        &self.plans
    }

    pub fn correlations(&self) -> &Arc<CorrelationRegistry> {
        &self.correlations
    }

    pub fn artifact_types(&self) -> &ArtifactTypeCatalog {
        &self.artifact_types
    }

    pub fn bus(&self) -> &Arc<CollaborationBus> {
        &self.bus
    }

    pub fn scheduler(&self) -> &InvocationScheduler {
        &self.scheduler
    }

    pub fn triggers(&self) -> &TriggerObserver {
        &self.triggers
    }

    pub fn bus_report(&self) -> &BusStartReport {
        &self.bus_report
    }

    /// Stop listeners, the reapers and every invocation still being awaited
    pub async fn shutdown(self) {
        self.invocation_reaper.abort();
        self.controller.cancel_all();
        self.bus.shutdown().await;
        self.reaper.abort();
        info!(
            instance_id = %self.controller.instance_id(),
            pending = self.correlations.len(),
            "Orchestrator instance stopped"
        );
    }
}
