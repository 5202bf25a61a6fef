//! # Domain Models
//!
//! Packages, plans, invocation requests/responses and the historical execution
//! records the WCET estimation is computed from.

pub mod identifiers;
pub mod invocation;
pub mod package;
pub mod plan;

pub use identifiers::{CorrelationId, InstanceId, PackageId, QualifiedName};
pub use invocation::{InvocationRequest, InvocationResponse, TimeBudget};
pub use package::{InMemoryPackageStore, Package, PackageStore, StorageError, TopologyTemplate};
pub use plan::{ParameterBinding, Plan, PlanInstanceEvent, PlanInstanceRecord, PlanParameter};
