//! # Registry Infrastructure
//!
//! In-process registries the orchestration core resolves against.
//!
//! ## Available Registries
//!
//! - **PlanRegistry**: packages and their plans, the plan-to-operation catalog,
//!   historical execution records and the WCET estimate derived from them
//! - **CorrelationRegistry**: pending invocations keyed by correlation id
//! - **ArtifactTypeCatalog**: artifact type definitions loaded from descriptors
//!
//! ```text
//! Registry Infrastructure
//! ├── PlanRegistry          (plan resolution & WCET estimation)
//! ├── CorrelationRegistry   (in-flight invocations & response matching)
//! ├── ArtifactTypeCatalog   (artifact type descriptors)
//! └── descriptors           (skip-and-log JSON directory loader)
//! ```
//!
//! All registries are plain owned objects; nothing here is process-global.

pub mod artifact_types;
pub mod correlation_registry;
pub mod descriptors;
pub mod plan_registry;

use std::path::PathBuf;
use thiserror::Error;

use crate::models::CorrelationId;

pub use artifact_types::{ArtifactTypeCatalog, ArtifactTypeDescriptor};
pub use correlation_registry::{CorrelationRegistry, PendingState, ResolveOutcome};
pub use descriptors::{load_descriptors, DescriptorLoad, SkippedDescriptor};
pub use plan_registry::{CatalogLoad, PlanOperationsDescriptor, PlanRegistry};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Failed to read {path}: {message}")]
    Io { path: PathBuf, message: String },

    #[error("Failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Correlation id {0} is already pending")]
    DuplicateCorrelation(CorrelationId),
}

impl RegistryError {
    pub fn io(path: impl Into<PathBuf>, error: impl ToString) -> Self {
        Self::Io {
            path: path.into(),
            message: error.to_string(),
        }
    }

    pub fn parse(path: impl Into<PathBuf>, error: impl ToString) -> Self {
        Self::Parse {
            path: path.into(),
            message: error.to_string(),
        }
    }
}

pub type RegistryResult<T> = Result<T, RegistryError>;
