//! # Orchestrator Configuration System
//!
//! Typed configuration for one orchestrator instance. Values are layered by
//! [`ConfigManager`]: built-in defaults, an optional configuration file, then
//! `COLLAB_`-prefixed environment variables.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use collab_orchestrator::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load(Some("config/orchestrator.toml"))?;
//! let poll_interval = manager.config().scheduler.poll_interval();
//! # Ok(())
//! # }
//! ```
//!
//! Durations are stored in the unit their key names and converted exactly once
//! by the accessor methods, so no call site multiplies seconds into millis.

pub mod error;
pub mod loader;

use serde::{Deserialize, Deserializer, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

use crate::constants::system;
use crate::messaging::{BrokerEndpoint, Credentials};
use crate::models::InstanceId;

/// Custom deserializer accepting either a list or a comma-separated string, so
/// peers can be configured as `hosts = ["a", "b"]` or `COLLAB_..._HOSTS=a,b`
fn deserialize_string_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;
    use serde_json::Value;

    fn scalar(value: &Value) -> Option<String> {
        match value {
            Value::String(s) => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    let value: Value = Deserialize::deserialize(deserializer)?;

    match value {
        Value::Null => Ok(Vec::new()),
        Value::String(s) => Ok(s
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(str::to_string)
            .collect()),
        Value::Number(n) => Ok(vec![n.to_string()]),
        Value::Array(items) => items
            .iter()
            .map(|item| {
                scalar(item).ok_or_else(|| D::Error::custom("list entries must be strings or numbers"))
            })
            .collect(),
        _ => Err(D::Error::custom(
            "expected a list or a comma-separated string",
        )),
    }
}

/// Root configuration of an orchestrator instance
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub instance: InstanceConfig,
    pub collaboration: CollaborationConfig,
    pub scheduler: SchedulerConfig,
    pub correlation: CorrelationConfig,
    pub registry: RegistryConfig,
    pub triggers: TriggerConfig,
    pub logging: LoggingConfig,
}

impl OrchestratorConfig {
    /// Validate values that would make the instance unusable.
    ///
    /// Peer lists are deliberately not checked here: a broken peer list only
    /// disables collaboration when the bus starts.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.instance.instance_id.trim().is_empty() {
            return Err(ConfigurationError::invalid_value(
                "instance.instance_id",
                "",
                "instance id must not be empty",
            ));
        }
        if self.scheduler.poll_interval_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "scheduler.poll_interval_ms",
                "0",
                "poll interval must be positive",
            ));
        }
        if self.collaboration.connect_timeout_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "collaboration.connect_timeout_ms",
                "0",
                "connect timeout must be positive",
            ));
        }
        if self.collaboration.reconnect_backoff_ms == 0
            || self.collaboration.max_reconnect_backoff_ms < self.collaboration.reconnect_backoff_ms
        {
            return Err(ConfigurationError::invalid_value(
                "collaboration.reconnect_backoff_ms",
                self.collaboration.reconnect_backoff_ms.to_string(),
                "reconnect backoff must be positive and not above max_reconnect_backoff_ms",
            ));
        }
        if self.correlation.retention_seconds == 0 || self.correlation.sweep_interval_seconds == 0 {
            return Err(ConfigurationError::validation_error(
                "correlation retention and sweep interval must be positive",
            ));
        }
        Ok(())
    }
}

/// Identity of this instance and the broker it owns
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InstanceConfig {
    pub instance_id: String,
    pub broker_host: String,
    pub broker_port: u16,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            instance_id: system::DEFAULT_INSTANCE_ID.to_string(),
            broker_host: system::DEFAULT_BROKER_HOST.to_string(),
            broker_port: system::DEFAULT_BROKER_PORT,
        }
    }
}

impl InstanceConfig {
    pub fn instance_id(&self) -> InstanceId {
        InstanceId::new(self.instance_id.clone())
    }

    pub fn broker_endpoint(&self) -> BrokerEndpoint {
        BrokerEndpoint::new(self.broker_host.clone(), self.broker_port)
    }
}

/// Collaboration with peer orchestrator instances
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollaborationConfig {
    /// Master switch; when off the instance works local-only
    pub enabled: bool,
    /// Hosts of peers whose requests this instance serves
    #[serde(deserialize_with = "deserialize_string_list")]
    pub hosts: Vec<String>,
    /// Broker ports of the peers, parallel to `hosts`
    #[serde(deserialize_with = "deserialize_string_list")]
    pub ports: Vec<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub connect_timeout_ms: u64,
    /// First delay before a closed listener subscription is re-established
    pub reconnect_backoff_ms: u64,
    pub max_reconnect_backoff_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for CollaborationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            hosts: Vec::new(),
            ports: Vec::new(),
            username: None,
            password: None,
            connect_timeout_ms: system::DEFAULT_CONNECT_TIMEOUT_MS,
            reconnect_backoff_ms: system::DEFAULT_RECONNECT_BACKOFF_MS,
            max_reconnect_backoff_ms: system::DEFAULT_MAX_RECONNECT_BACKOFF_MS,
            backoff_multiplier: system::DEFAULT_BACKOFF_MULTIPLIER,
        }
    }
}

impl CollaborationConfig {
    /// Pair hosts with ports; mismatched lengths or bad ports are errors
    pub fn peer_endpoints(&self) -> ConfigResult<Vec<BrokerEndpoint>> {
        if self.hosts.len() != self.ports.len() {
            return Err(ConfigurationError::PeerListMismatch {
                hosts: self.hosts.len(),
                ports: self.ports.len(),
            });
        }

        self.hosts
            .iter()
            .zip(&self.ports)
            .map(|(host, port)| {
                let port = port.parse::<u16>().map_err(|e| {
                    ConfigurationError::invalid_value("collaboration.ports", port.clone(), e.to_string())
                })?;
                Ok(BrokerEndpoint::new(host.clone(), port))
            })
            .collect()
    }

    pub fn credentials(&self) -> Credentials {
        Credentials {
            username: self.username.clone(),
            password: self.password.clone(),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Delay before the `attempt`-th resubscription, zero-based
    pub fn reconnect_delay(&self, attempt: u32) -> Duration {
        let base = self.reconnect_backoff_ms as f64;
        let delay = base * self.backoff_multiplier.max(1.0).powi(attempt.min(32) as i32);
        Duration::from_millis(delay.min(self.max_reconnect_backoff_ms as f64) as u64)
    }
}

/// Completion polling of dispatched invocations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub poll_interval_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: system::DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

impl SchedulerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Retention of pending invocations nobody collects
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelationConfig {
    pub retention_seconds: u64,
    pub sweep_interval_seconds: u64,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            retention_seconds: system::DEFAULT_RETENTION_SECONDS,
            sweep_interval_seconds: system::DEFAULT_SWEEP_INTERVAL_SECONDS,
        }
    }
}

impl CorrelationConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_seconds)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }
}

/// Descriptor directories loaded at startup
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub operation_catalog_dir: Option<PathBuf>,
    pub artifact_types_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerConfig {
    /// Instance data API template with `{package}` and `{template}` placeholders
    pub instance_data_api: String,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            instance_data_api: system::DEFAULT_INSTANCE_DATA_API.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Explicit filter directive; derived from the environment when unset
    pub level: Option<String>,
    pub json: bool,
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: None,
            json: false,
            ansi: true,
        }
    }
}
