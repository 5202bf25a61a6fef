//! # Orchestration
//!
//! Everything between a caller's request and the collaborators doing the work:
//!
//! - [`control_service`]: admission-checked package operations
//! - [`scheduler`]: WCET admission, local/remote dispatch and completion polling
//! - [`trigger`]: situation triggers running a boundary plan within a time budget
//! - [`bootstrap`]: construction and lifecycle of a whole instance
//! - [`engines`]: plan engine and plan executor collaborator traits

pub mod bootstrap;
pub mod control_service;
pub mod engines;
pub mod errors;
pub mod scheduler;
pub mod trigger;

pub use bootstrap::{Collaborators, OrchestratorSystem};
pub use control_service::{DeploymentAdmissionController, PlanInvocation};
pub use engines::{ExecutionStatus, PlanEngine, PlanExecutionError, PlanExecutor};
pub use errors::{SchedulerError, SchedulerResult};
pub use scheduler::{Dispatched, InvocationOutcome, InvocationScheduler, InvocationTask, Route};
pub use trigger::{SituationTrigger, TriggerHandle, TriggerInstance, TriggerObserver, TriggerOutcome};
