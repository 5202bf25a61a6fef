#![allow(clippy::doc_markdown)] // Allow technical terms like WCET, TOSCA in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Collaborative Plan Orchestrator Core
//!
//! Deployment admission, collaborative plan routing and deadline-aware plan
//! invocation for one or more cooperating orchestrator instances.
//!
//! ## Overview
//!
//! Every orchestrator instance stores application packages, deploys the
//! management plans generated for them and invokes those plans against running
//! application instances. Instances can collaborate: a plan may be executed by
//! a peer instance, with the request and its response carried over a message
//! broker.
//!
//! ## Architecture
//!
//! ```text
//! caller ──► DeploymentAdmissionController ──► DeploymentStateMachine
//!                 │
//!                 ▼
//!            InvocationScheduler ──► PlanRegistry (plan lookup, WCET)
//!                 │
//!      ┌──────────┴──────────┐
//!      ▼                     ▼
//!  PlanExecutor        CollaborationBus ──► broker ──► peer instance
//!  (local)                   │
//!                            ▼
//!                   CorrelationRegistry ◄── responses
//! ```
//!
//! ## Module Organization
//!
//! - [`state_machine`] - Deployment-process states, transition table and admission
//! - [`models`] - Packages, plans, invocation requests/responses, execution history
//! - [`registry`] - Plan registry with WCET estimation, correlation registry, descriptor catalogs
//! - [`messaging`] - Envelopes, broker abstraction and the collaboration bus
//! - [`orchestration`] - Controller, scheduler, situation triggers and bootstrap
//! - [`config`] - Layered configuration
//! - [`logging`] - Structured logging setup
//! - [`errors`] - Error aggregation
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use collab_orchestrator::config::ConfigManager;
//! use collab_orchestrator::orchestration::{Collaborators, OrchestratorSystem, PlanEngine, PlanExecutor};
//!
//! # async fn example(
//! #     engine: Arc<dyn PlanEngine>,
//! #     executor: Arc<dyn PlanExecutor>,
//! # ) -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConfigManager::load(Some("config/orchestrator.toml"))?;
//! let system = OrchestratorSystem::start(config, Collaborators::new(engine, executor)).await?;
//!
//! let state = system
//!     .controller()
//!     .current_state(&"shop.csar".into())
//!     .await?;
//! println!("shop.csar is {state:?}");
//!
//! system.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod errors;
pub mod logging;
pub mod messaging;
pub mod models;
pub mod orchestration;
pub mod registry;
pub mod state_machine;

pub use config::{ConfigManager, ConfigurationError, OrchestratorConfig};
pub use errors::{OrchestrationError, OrchestrationResult, OrchestratorError, OrchestratorResult};
pub use messaging::{CollaborationBus, Envelope, MessagingError};
pub use models::{
    CorrelationId, InstanceId, InvocationRequest, InvocationResponse, Package, PackageId, Plan,
    QualifiedName, TimeBudget,
};
pub use orchestration::{
    Collaborators, DeploymentAdmissionController, InvocationOutcome, InvocationScheduler,
    OrchestratorSystem, PlanInvocation, SchedulerError, SituationTrigger, TriggerObserver,
};
pub use registry::{CorrelationRegistry, PlanRegistry};
pub use state_machine::{DeploymentOperation, DeploymentState, DeploymentStateMachine};
