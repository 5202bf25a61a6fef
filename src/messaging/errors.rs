//! # Messaging Error Types
//!
//! Structured errors for broker connections, envelope handling and the
//! collaboration bus. The bus absorbs and logs these at its boundary; callers
//! only see them through the report of what was started.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MessagingError {
    #[error("Connection to broker {endpoint} failed: {message}")]
    Connection { endpoint: String, message: String },

    #[error("Network timeout: operation {operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("Authentication failed at {endpoint}: {message}")]
    Authentication { endpoint: String, message: String },

    #[error("Publish to topic {topic} failed: {message}")]
    Publish { topic: String, message: String },

    #[error("Subscribe to topic {topic} failed: {message}")]
    Subscribe { topic: String, message: String },

    #[error("Message serialization error: {message}")]
    MessageSerialization { message: String },

    #[error("Message deserialization error: {message}")]
    MessageDeserialization { message: String },

    #[error("Invalid envelope: {message}")]
    InvalidEnvelope { message: String },

    #[error("Protocol error: {message}")]
    Protocol { message: String },

    #[error("Configuration error: {component}: {message}")]
    Configuration { component: String, message: String },

    #[error("Connection closed: {endpoint}")]
    Closed { endpoint: String },
}

impl MessagingError {
    pub fn connection(endpoint: impl ToString, message: impl Into<String>) -> Self {
        Self::Connection {
            endpoint: endpoint.to_string(),
            message: message.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    pub fn authentication(endpoint: impl ToString, message: impl Into<String>) -> Self {
        Self::Authentication {
            endpoint: endpoint.to_string(),
            message: message.into(),
        }
    }

    pub fn publish(topic: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Publish {
            topic: topic.into(),
            message: message.into(),
        }
    }

    pub fn subscribe(topic: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Subscribe {
            topic: topic.into(),
            message: message.into(),
        }
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::MessageSerialization {
            message: message.into(),
        }
    }

    pub fn deserialization(message: impl Into<String>) -> Self {
        Self::MessageDeserialization {
            message: message.into(),
        }
    }

    pub fn invalid_envelope(message: impl Into<String>) -> Self {
        Self::InvalidEnvelope {
            message: message.into(),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    pub fn configuration(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration {
            component: component.into(),
            message: message.into(),
        }
    }

    pub fn closed(endpoint: impl ToString) -> Self {
        Self::Closed {
            endpoint: endpoint.to_string(),
        }
    }

    /// Whether a later attempt against the same endpoint may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::Timeout { .. } | Self::Closed { .. } | Self::Publish { .. }
        )
    }
}

impl From<serde_json::Error> for MessagingError {
    fn from(error: serde_json::Error) -> Self {
        if error.is_data() || error.is_syntax() || error.is_eof() {
            Self::deserialization(error.to_string())
        } else {
            Self::serialization(error.to_string())
        }
    }
}

impl From<std::io::Error> for MessagingError {
    fn from(error: std::io::Error) -> Self {
        Self::protocol(error.to_string())
    }
}

pub type MessagingResult<T> = Result<T, MessagingError>;
