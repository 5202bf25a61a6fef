//! # Structured Logging Module
//!
//! Environment-aware structured logging for the orchestrator core, plus helpers
//! that emit the standard structured events for deployment operations and
//! collaboration bus traffic.

use std::sync::OnceLock;

use chrono::Utc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::LoggingConfig;
use crate::models::PackageId;
use crate::state_machine::DeploymentState;

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging once per process
pub fn init_structured_logging(config: &LoggingConfig) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let log_level = config
            .level
            .clone()
            .unwrap_or_else(|| get_log_level(&environment));
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(log_level.clone()));

        let layer = if config.json {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(false)
                .json()
                .with_filter(filter)
                .boxed()
        } else {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(config.ansi)
                .with_filter(filter)
                .boxed()
        };

        // A global subscriber may already exist when embedded in a host process
        if tracing_subscriber::registry().with(layer).try_init().is_err() {
            tracing::debug!("Global tracing subscriber already initialized - continuing with existing subscriber");
        }

        tracing::info!(
            pid = std::process::id(),
            environment = %environment,
            log_level = %log_level,
            json = config.json,
            "STRUCTURED LOGGING: Initialized"
        );
    });
}

/// Get current environment from environment variables
fn get_environment() -> String {
    std::env::var("COLLAB_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

/// Get log level based on environment
fn get_log_level(environment: &str) -> String {
    match environment {
        "production" => "info".to_string(),
        _ => "debug".to_string(),
    }
}

/// Log structured data for deployment-process operations
pub fn log_deployment_operation(
    operation: &str,
    package_id: &PackageId,
    from_state: Option<DeploymentState>,
    to_state: Option<DeploymentState>,
    status: &str,
) {
    tracing::info!(
        operation = %operation,
        package_id = %package_id,
        from_state = from_state.map(|s| s.to_string()),
        to_state = to_state.map(|s| s.to_string()),
        status = %status,
        timestamp = %Utc::now().to_rfc3339(),
        "DEPLOYMENT_OPERATION"
    );
}

/// Log structured data for collaboration bus traffic
pub fn log_bus_event(
    event: &str,
    correlation_id: Option<&str>,
    message_type: Option<&str>,
    endpoint: Option<&str>,
    details: Option<&str>,
) {
    tracing::debug!(
        event = %event,
        correlation_id = correlation_id,
        message_type = message_type,
        endpoint = endpoint,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "BUS_EVENT"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_mapping() {
        assert_eq!(get_log_level("test"), "debug");
        assert_eq!(get_log_level("development"), "debug");
        assert_eq!(get_log_level("production"), "info");
    }

    #[test]
    fn test_init_is_idempotent() {
        let config = LoggingConfig::default();
        init_structured_logging(&config);
        init_structured_logging(&config);
    }
}
