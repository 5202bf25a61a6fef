//! # Plan Registry
//!
//! Resolves which plan of a package implements a requested interface
//! operation, and estimates how long that plan will run.
//!
//! ## WCET estimation
//!
//! The worst-case execution time of a plan is the sum, over every distinct
//! operation the plan calls, of the longest duration ever observed for that
//! operation in historical runs of the same plan:
//!
//! ```text
//! wcet(plan) = Σ over op in catalog[plan]  max { event.duration | record.template == plan, event.op == op }
//! ```
//!
//! Operations without history contribute nothing. Parallel branches are not
//! modelled, so the estimate is a strict sum.

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use super::descriptors::{load_descriptors, SkippedDescriptor};
use super::RegistryResult;
use crate::models::{Package, PackageId, Plan, PlanInstanceRecord, QualifiedName};

/// Operations called by one plan, as written to a catalog descriptor file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanOperationsDescriptor {
    /// Local name of the plan
    pub plan: String,
    #[serde(default)]
    pub operations: Vec<String>,
}

/// Result of loading an operation catalog directory
#[derive(Debug, Clone, Default)]
pub struct CatalogLoad {
    /// Plans whose operations were registered
    pub available: Vec<String>,
    pub skipped: Vec<SkippedDescriptor>,
}

#[derive(Debug, Default)]
pub struct PlanRegistry {
    packages: DashMap<PackageId, Package>,
    operation_catalog: DashMap<String, BTreeSet<String>>,
    history: RwLock<Vec<PlanInstanceRecord>>,
}

impl PlanRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index a package's templates and plans, replacing an earlier registration
    pub fn register_package(&self, package: Package) {
        debug!(
            package_id = %package.id,
            templates = package.templates.len(),
            "Registering package plans"
        );
        self.packages.insert(package.id.clone(), package);
    }

    pub fn unregister_package(&self, package_id: &PackageId) -> bool {
        self.packages.remove(package_id).is_some()
    }

    pub fn package(&self, package_id: &PackageId) -> Option<Package> {
        self.packages.get(package_id).map(|entry| entry.value().clone())
    }

    /// Boundary plan implementing `interface_name`/`operation_name` of a template
    pub fn resolve_plan(
        &self,
        package_id: &PackageId,
        template_id: &QualifiedName,
        interface_name: &str,
        operation_name: &str,
    ) -> Option<Plan> {
        let package = self.packages.get(package_id)?;
        package
            .template(template_id)?
            .plans
            .iter()
            .find(|plan| plan.implements(interface_name, operation_name))
            .cloned()
    }

    /// Look a plan up by id in any template of the package
    pub fn plan(&self, package_id: &PackageId, plan_id: &QualifiedName) -> Option<Plan> {
        let package = self.packages.get(package_id)?;
        package
            .templates
            .iter()
            .flat_map(|template| template.plans.iter())
            .find(|plan| &plan.id == plan_id)
            .cloned()
    }

    /// Record which operations a plan calls; merges with earlier registrations
    pub fn register_plan_operations<I, S>(&self, plan_name: &str, operations: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.operation_catalog
            .entry(plan_name.to_string())
            .or_default()
            .extend(operations.into_iter().map(Into::into));
    }

    pub fn plan_operations(&self, plan_name: &str) -> Option<BTreeSet<String>> {
        self.operation_catalog
            .get(plan_name)
            .map(|entry| entry.value().clone())
    }

    /// Load `*.json` catalog descriptors; unusable files are skipped and reported
    pub fn load_operation_catalog(&self, dir: &Path) -> RegistryResult<CatalogLoad> {
        let load = load_descriptors::<PlanOperationsDescriptor>(dir)?;

        let mut available = Vec::with_capacity(load.available.len());
        for (_, descriptor) in load.available {
            self.register_plan_operations(&descriptor.plan, descriptor.operations);
            available.push(descriptor.plan);
        }

        info!(
            directory = %dir.display(),
            loaded = available.len(),
            skipped = load.skipped.len(),
            "Operation catalog loaded"
        );

        Ok(CatalogLoad {
            available,
            skipped: load.skipped,
        })
    }

    pub fn record_execution(&self, record: PlanInstanceRecord) {
        self.history.write().push(record);
    }

    pub fn execution_count(&self) -> usize {
        self.history.read().len()
    }

    /// Worst-case execution time of `plan` from historical data.
    ///
    /// Without a catalog entry the plan's stored estimate is used, if any.
    pub fn estimate_wcet(&self, plan: &Plan) -> Duration {
        let Some(operations) = self.plan_operations(&plan.id.local_part) else {
            return plan.calculated_wcet().unwrap_or(Duration::ZERO);
        };

        let history = self.history.read();
        let mut longest: HashMap<&str, u64> = HashMap::new();

        for record in history
            .iter()
            .filter(|record| record.template_id.local_part == plan.id.local_part)
        {
            for event in &record.events {
                let (Some(operation), Some(duration)) =
                    (event.operation_name.as_deref(), event.execution_duration_ms)
                else {
                    continue;
                };
                if operations.contains(operation) {
                    let slot = longest.entry(operation).or_insert(0);
                    *slot = (*slot).max(duration);
                }
            }
        }

        let total = longest.values().fold(0u64, |sum, ms| sum.saturating_add(*ms));
        Duration::from_millis(total)
    }
}
