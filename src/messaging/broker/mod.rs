//! # Broker Abstraction
//!
//! Topic-based publish/subscribe brokers the collaboration bus talks to. One
//! broker belongs to each orchestrator instance; peers connect to each other's
//! brokers with shared credentials.
//!
//! Two implementations are provided:
//!
//! - [`in_memory`]: a process-local broker network used by tests and
//!   single-process deployments
//! - [`tcp`]: newline-delimited JSON frames over TCP, with a matching broker
//!   server

pub mod in_memory;
pub mod tcp;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::mpsc;

use super::envelope::Envelope;
use super::errors::{MessagingError, MessagingResult};

pub use in_memory::{InMemoryBroker, InMemoryBrokerNetwork, InMemoryConnector};
pub use tcp::{TcpBrokerConnector, TcpBrokerServer};

/// Network location of a broker
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BrokerEndpoint {
    pub host: String,
    pub port: u16,
}

impl BrokerEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for BrokerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for BrokerEndpoint {
    type Err = MessagingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| MessagingError::invalid_envelope(format!("'{s}' is not host:port")))?;
        if host.is_empty() {
            return Err(MessagingError::invalid_envelope(format!(
                "'{s}' has an empty host"
            )));
        }
        let port = port
            .parse::<u16>()
            .map_err(|e| MessagingError::invalid_envelope(format!("'{s}': {e}")))?;
        Ok(Self::new(host, port))
    }
}

/// Credentials shared by all peers of a collaboration
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
        }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Stream of envelopes published to one topic
#[derive(Debug)]
pub struct Subscription {
    topic: String,
    receiver: mpsc::UnboundedReceiver<Envelope>,
}

impl Subscription {
    pub fn new(topic: impl Into<String>, receiver: mpsc::UnboundedReceiver<Envelope>) -> Self {
        Self {
            topic: topic.into(),
            receiver,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Next envelope; `None` once the connection is gone
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.receiver.recv().await
    }
}

/// Establishes authenticated connections to brokers
#[async_trait]
pub trait BrokerConnector: Send + Sync + fmt::Debug {
    async fn connect(
        &self,
        endpoint: &BrokerEndpoint,
        credentials: &Credentials,
    ) -> MessagingResult<Arc<dyn BrokerConnection>>;
}

/// An open connection to a broker
#[async_trait]
pub trait BrokerConnection: Send + Sync + fmt::Debug {
    fn endpoint(&self) -> &BrokerEndpoint;

    fn is_connected(&self) -> bool;

    async fn publish(&self, topic: &str, envelope: &Envelope) -> MessagingResult<()>;

    async fn subscribe(&self, topic: &str) -> MessagingResult<Subscription>;
}
