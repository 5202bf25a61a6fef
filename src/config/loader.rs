//! Configuration Loader
//!
//! Layers built-in defaults, an optional configuration file and prefixed
//! environment variables through the `config` crate, then validates the result.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use config::{Config, Environment, File};
use tracing::{debug, info};

use super::error::{ConfigResult, ConfigurationError};
use super::OrchestratorConfig;
use crate::constants::system;

/// Loaded, validated configuration of one orchestrator instance
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config: OrchestratorConfig,
    source_file: Option<PathBuf>,
}

impl ConfigManager {
    /// Load configuration using the `COLLAB_` environment prefix.
    ///
    /// Nested keys use a double underscore, e.g.
    /// `COLLAB_COLLABORATION__HOSTS=peer-a,peer-b`.
    pub fn load<P: AsRef<Path>>(path: Option<P>) -> ConfigResult<Arc<ConfigManager>> {
        Self::load_with_prefix(path, system::ENV_PREFIX)
    }

    /// Load configuration reading environment overrides under `prefix`
    pub fn load_with_prefix<P: AsRef<Path>>(
        path: Option<P>,
        prefix: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let mut builder = Config::builder().add_source(Config::try_from(&OrchestratorConfig::default())?);

        let source_file = match path {
            Some(path) => {
                let path = path.as_ref();
                if !path.exists() {
                    return Err(ConfigurationError::ConfigFileNotFound {
                        path: path.to_path_buf(),
                    });
                }
                debug!(path = %path.display(), "Loading configuration file");
                builder = builder.add_source(File::from(path).required(true));
                Some(path.to_path_buf())
            }
            None => None,
        };

        builder = builder.add_source(
            Environment::with_prefix(prefix)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: OrchestratorConfig = builder.build()?.try_deserialize()?;
        config.validate()?;

        info!(
            instance_id = %config.instance.instance_id,
            collaboration = config.collaboration.enabled,
            peers = config.collaboration.hosts.len(),
            source_file = source_file.as_ref().map(|p| p.display().to_string()),
            "Configuration loaded successfully"
        );

        Ok(Arc::new(ConfigManager {
            config,
            source_file,
        }))
    }

    /// Wrap an already constructed configuration, validating it first
    pub fn from_config(config: OrchestratorConfig) -> ConfigResult<Arc<ConfigManager>> {
        config.validate()?;
        Ok(Arc::new(ConfigManager {
            config,
            source_file: None,
        }))
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// File the configuration was read from, if any
    pub fn source_file(&self) -> Option<&Path> {
        self.source_file.as_deref()
    }

    /// Configuration as JSON with credentials masked
    pub fn debug_config(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(&self.config).unwrap_or(serde_json::Value::Null);
        if let Some(collaboration) = value
            .get_mut("collaboration")
            .and_then(|c| c.as_object_mut())
        {
            if collaboration.get("password").is_some_and(|p| !p.is_null()) {
                collaboration.insert(
                    "password".to_string(),
                    serde_json::Value::String("***".to_string()),
                );
            }
        }
        value
    }
}
