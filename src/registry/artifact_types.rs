//! Artifact type definitions the orchestrator knows how to deploy.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

use super::descriptors::{load_descriptors, SkippedDescriptor};
use super::RegistryResult;
use crate::models::QualifiedName;

/// One artifact type descriptor file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactTypeDescriptor {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    /// Packages that must be installed on the target before deployment
    #[serde(default)]
    pub packages: Vec<String>,
    /// Commands run on the target to deploy an artifact of this type
    #[serde(default)]
    pub commands: Vec<String>,
}

impl ArtifactTypeDescriptor {
    pub fn qualified_name(&self) -> QualifiedName {
        QualifiedName::new(self.namespace.clone(), self.name.clone())
    }
}

#[derive(Debug, Clone, Default)]
pub struct ArtifactTypeCatalog {
    types: BTreeMap<QualifiedName, ArtifactTypeDescriptor>,
    skipped: Vec<SkippedDescriptor>,
}

impl ArtifactTypeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every descriptor of `dir`; unusable files end up in [`Self::skipped`]
    pub fn load(dir: &Path) -> RegistryResult<Self> {
        let load = load_descriptors::<ArtifactTypeDescriptor>(dir)?;
        let mut catalog = Self {
            types: BTreeMap::new(),
            skipped: load.skipped,
        };
        for (_, descriptor) in load.available {
            catalog.insert(descriptor);
        }

        info!(
            directory = %dir.display(),
            types = catalog.types.len(),
            skipped = catalog.skipped.len(),
            "Artifact types loaded"
        );
        Ok(catalog)
    }

    pub fn insert(&mut self, descriptor: ArtifactTypeDescriptor) {
        self.types.insert(descriptor.qualified_name(), descriptor);
    }

    pub fn supported_types(&self) -> Vec<QualifiedName> {
        self.types.keys().cloned().collect()
    }

    pub fn is_supported(&self, artifact_type: &QualifiedName) -> bool {
        self.types.contains_key(artifact_type)
    }

    pub fn required_packages(&self, artifact_type: &QualifiedName) -> Option<&[String]> {
        self.types
            .get(artifact_type)
            .map(|descriptor| descriptor.packages.as_slice())
    }

    pub fn commands(&self, artifact_type: &QualifiedName) -> Option<&[String]> {
        self.types
            .get(artifact_type)
            .map(|descriptor| descriptor.commands.as_slice())
    }

    pub fn skipped(&self) -> &[SkippedDescriptor] {
        &self.skipped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_catalog_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("war.json"),
            r#"{
                "name": "WAR",
                "namespace": "http://example.org/artifacttypes",
                "packages": ["tomcat9"],
                "commands": ["cp {artifact} /var/lib/tomcat9/webapps/"]
            }"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("empty.json"), "").unwrap();

        let catalog = ArtifactTypeCatalog::load(dir.path()).unwrap();
        let war = QualifiedName::new("http://example.org/artifacttypes", "WAR");

        assert_eq!(catalog.supported_types(), vec![war.clone()]);
        assert_eq!(catalog.required_packages(&war), Some(&["tomcat9".to_string()][..]));
        assert_eq!(catalog.commands(&war).map(|c| c.len()), Some(1));
        assert_eq!(catalog.skipped().len(), 1);
    }

    #[test]
    fn test_unknown_type_is_observable() {
        let catalog = ArtifactTypeCatalog::new();
        let unknown = QualifiedName::new("", "Unknown");
        assert!(!catalog.is_supported(&unknown));
        assert!(catalog.required_packages(&unknown).is_none());
        assert!(catalog.commands(&unknown).is_none());
    }
}
