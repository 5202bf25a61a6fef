use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::identifiers::{PackageId, QualifiedName};
use super::plan::Plan;

/// Topology template of a package together with the plans generated for it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyTemplate {
    pub id: QualifiedName,
    /// Target namespace of the plans block; falls back to the template namespace
    #[serde(default)]
    pub plans_namespace: Option<String>,
    #[serde(default)]
    pub plans: Vec<Plan>,
}

impl TopologyTemplate {
    pub fn new(id: QualifiedName) -> Self {
        Self {
            id,
            plans_namespace: None,
            plans: Vec::new(),
        }
    }

    pub fn with_plan(mut self, plan: Plan) -> Self {
        self.plans.push(plan);
        self
    }

    pub fn with_plans_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.plans_namespace = Some(namespace.into());
        self
    }

    /// Namespace the plans of this template are deployed under
    pub fn effective_plans_namespace(&self) -> &str {
        self.plans_namespace
            .as_deref()
            .unwrap_or(self.id.namespace.as_str())
    }
}

/// Deployable application package as far as the orchestrator core needs to know it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    pub id: PackageId,
    #[serde(default)]
    pub entry_template: Option<QualifiedName>,
    #[serde(default)]
    pub templates: Vec<TopologyTemplate>,
}

impl Package {
    pub fn new(id: PackageId) -> Self {
        Self {
            id,
            entry_template: None,
            templates: Vec::new(),
        }
    }

    /// Add a template; the first template added becomes the entry template
    pub fn with_template(mut self, template: TopologyTemplate) -> Self {
        if self.entry_template.is_none() {
            self.entry_template = Some(template.id.clone());
        }
        self.templates.push(template);
        self
    }

    pub fn template(&self, id: &QualifiedName) -> Option<&TopologyTemplate> {
        self.templates.iter().find(|t| &t.id == id)
    }

    pub fn entry(&self) -> Option<&TopologyTemplate> {
        self.entry_template.as_ref().and_then(|id| self.template(id))
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Package {0} not found in storage")]
    NotFound(PackageId),
    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Package storage collaborator
#[async_trait]
pub trait PackageStore: Send + Sync + 'static {
    async fn find(&self, package_id: &PackageId) -> Option<Package>;

    async fn delete(&self, package_id: &PackageId) -> Result<(), StorageError>;
}

/// Process-local package storage
#[derive(Debug, Default)]
pub struct InMemoryPackageStore {
    packages: DashMap<PackageId, Package>,
}

impl InMemoryPackageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, package: Package) {
        self.packages.insert(package.id.clone(), package);
    }

    pub fn contains(&self, package_id: &PackageId) -> bool {
        self.packages.contains_key(package_id)
    }
}

#[async_trait]
impl PackageStore for InMemoryPackageStore {
    async fn find(&self, package_id: &PackageId) -> Option<Package> {
        self.packages.get(package_id).map(|p| p.value().clone())
    }

    async fn delete(&self, package_id: &PackageId) -> Result<(), StorageError> {
        self.packages
            .remove(package_id)
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound(package_id.clone()))
    }
}
